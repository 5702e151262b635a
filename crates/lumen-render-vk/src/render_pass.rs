// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::swapchain::Texture;

/// Single-subpass pass: color attachment 0, optional depth attachment 1.
pub struct RenderPass {
    device: Arc<Device>,
    raw: vk::RenderPass,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
}

/// EXTERNAL -> subpass 0. The new frame's attachment writes wait for the
/// previous use of the image (presentation engine, previous depth writes).
pub fn external_dependency(has_depth: bool) -> vk::SubpassDependency {
    let mut dep = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    if has_depth {
        dep.src_stage_mask |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        dep.dst_stage_mask |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        dep.src_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        dep.dst_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    dep
}

impl RenderPass {
    pub fn new(
        device: &Arc<Device>,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<Self, VkError> {
        let mut attachments = vec![vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        if let Some(format) = depth_format {
            attachments.push(vk::AttachmentDescription {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: if depth_format.is_some() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let dependency = external_dependency(depth_format.is_some());

        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        // SAFETY: pointers in ci outlive the call
        let raw = unsafe { device.raw().create_render_pass(&ci, None) }
            .creating(ResourceKind::RenderPass)?;

        Ok(Self {
            device: Arc::clone(device),
            raw,
            color_format,
            depth_format,
        })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // SAFETY: framebuffers and pipelines using this pass hold an Arc or
        // are dropped first
        unsafe { self.device.raw().destroy_render_pass(self.raw, None) };
    }
}

/// One render pass bound to one swapchain image view at a fixed size.
pub struct FrameBuffer {
    device: Arc<Device>,
    raw: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl FrameBuffer {
    pub fn new(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        texture: &Texture,
        depth_view: Option<vk::ImageView>,
        extent: vk::Extent2D,
    ) -> Result<Self, VkError> {
        let attachments: Vec<vk::ImageView> =
            std::iter::once(texture.view).chain(depth_view).collect();
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: render_pass.raw(),
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        // SAFETY: the views belong to live images of this device
        let raw = unsafe { device.raw().create_framebuffer(&ci, None) }
            .creating(ResourceKind::Framebuffer)?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
            extent,
        })
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.raw
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        // SAFETY: not referenced by any pending submission
        unsafe { self.device.raw().destroy_framebuffer(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_only_dependency_gates_color_output() {
        let dep = external_dependency(false);
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dep.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn depth_dependency_adds_fragment_test_stages() {
        let dep = external_dependency(true);
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dep
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dep
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
    }
}
