// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::{Device, Queue};
use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::pipeline::Pipeline;
use crate::render_pass::{FrameBuffer, RenderPass};

/// Command pool bound to one queue family. Buffers are individually
/// resettable; destroying the pool frees them all.
pub struct CommandPool {
    device: Arc<Device>,
    raw: vk::CommandPool,
    family: u32,
}

impl CommandPool {
    pub fn new(device: &Arc<Device>, queue: Queue) -> Result<Self, VkError> {
        let ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue.family(),
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // SAFETY: plain creation call
        let raw = unsafe { device.raw().create_command_pool(&ci, None) }
            .creating(ResourceKind::CommandPool)?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
            family: queue.family(),
        })
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.raw
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>, VkError> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.raw,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        // SAFETY: the pool is only used from the frame-loop thread
        unsafe { self.device.raw().allocate_command_buffers(&ai) }
            .creating(ResourceKind::CommandBuffer)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: no buffer from this pool is pending once the renderer has
        // waited for idle
        unsafe { self.device.raw().destroy_command_pool(self.raw, None) };
    }
}

/// Records into one command buffer. Expected call order:
///
/// `begin` → `bind_render_pass` → `bind_pipeline` → `set_viewport` →
/// `set_scissor` → `draw` → (overlay commands) → `end_render_pass` → `end`
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a Device, cmd: vk::CommandBuffer) -> Self {
        Self {
            device: device.raw(),
            cmd,
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn device(&self) -> &ash::Device {
        self.device
    }

    /// Resets the buffer and begins a one-time-submit recording. The caller
    /// guarantees no earlier submission of this buffer is still pending.
    pub fn begin(&self) -> Result<(), VkError> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // SAFETY: see above; the pool allows per-buffer reset
        unsafe {
            self.device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(self.cmd, &begin)?;
        }
        Ok(())
    }

    pub fn bind_render_pass(
        &self,
        render_pass: &RenderPass,
        framebuffer: &FrameBuffer,
        clear_color: [f32; 4],
    ) {
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let clear_count = if render_pass.depth_format().is_some() {
            2
        } else {
            1
        };
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: render_pass.raw(),
            framebuffer: framebuffer.raw(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            },
            clear_value_count: clear_count,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        // SAFETY: recording state; handles alive for the recording
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &begin, vk::SubpassContents::INLINE)
        };
    }

    pub fn bind_pipeline(&self, pipeline: &Pipeline) {
        // SAFETY: recording state
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, pipeline.bind_point(), pipeline.raw())
        };
    }

    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        // SAFETY: recording state; viewport is dynamic in every pipeline
        unsafe {
            self.device
                .cmd_set_viewport(self.cmd, 0, std::slice::from_ref(&viewport))
        };
    }

    pub fn set_scissor(&self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        // SAFETY: recording state; scissor is dynamic in every pipeline
        unsafe {
            self.device
                .cmd_set_scissor(self.cmd, 0, std::slice::from_ref(&scissor))
        };
    }

    pub fn draw(&self, vertex_count: u32, first_vertex: u32) {
        // SAFETY: recording inside a render pass with a bound pipeline
        unsafe { self.device.cmd_draw(self.cmd, vertex_count, 1, first_vertex, 0) };
    }

    /// Clears a rectangle of color attachment 0 inside the open pass.
    pub fn clear_color_rect(&self, rect: vk::Rect2D, rgba: [f32; 4]) {
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: rgba },
            },
        };
        let clear_rect = vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        };
        // SAFETY: recording inside a render pass
        unsafe {
            self.device.cmd_clear_attachments(
                self.cmd,
                std::slice::from_ref(&attachment),
                std::slice::from_ref(&clear_rect),
            )
        };
    }

    pub fn end_render_pass(&self) {
        // SAFETY: a render pass was begun on this buffer
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
    }

    pub fn end(&self) -> Result<(), VkError> {
        // SAFETY: recording state, no open render pass
        unsafe { self.device.end_command_buffer(self.cmd) }?;
        Ok(())
    }
}
