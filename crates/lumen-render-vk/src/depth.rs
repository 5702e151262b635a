// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{ResourceKind, VkError, VkResultExt};

const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM,
];

fn first_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| supports(f))
}

/// First of D32 -> D24S8 -> D32S8 -> D16 usable as an optimal-tiling
/// depth attachment. D32_SFLOAT when the driver reports none.
pub fn pick_depth_format(device: &Device) -> vk::Format {
    let instance = device.instance().raw();
    let phys = device.physical();
    first_depth_format(|format| {
        // SAFETY: phys belongs to this instance
        let props = unsafe { instance.get_physical_device_format_properties(phys, format) };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .unwrap_or(vk::Format::D32_SFLOAT)
}

fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Device-local depth image sized to the swapchain. Rebuilt with it.
pub struct DepthTarget {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
}

impl DepthTarget {
    pub fn new(
        device: &Arc<Device>,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self, VkError> {
        let d = device.raw();
        let image_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        // SAFETY: plain creation call
        let image = unsafe { d.create_image(&image_ci, None) }.creating(ResourceKind::Image)?;

        // Partially built targets clean up through Drop.
        let mut target = Self {
            device: Arc::clone(device),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
        };

        // SAFETY: image was just created
        let req = unsafe { d.get_image_memory_requirements(image) };
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: device
                .find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
            ..Default::default()
        };
        // SAFETY: plain allocation call
        target.memory =
            unsafe { d.allocate_memory(&alloc, None) }.creating(ResourceKind::Memory)?;
        // SAFETY: fresh image, fresh allocation of the required size
        unsafe { d.bind_image_memory(image, target.memory, 0) }?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect_for(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        // SAFETY: memory is bound
        target.view =
            unsafe { d.create_image_view(&view_ci, None) }.creating(ResourceKind::ImageView)?;

        debug!(
            "vk: depth target {}x{} {:?}",
            extent.width, extent.height, format
        );
        Ok(target)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        let d = self.device.raw();
        // SAFETY: framebuffers using the view are gone and the device is idle;
        // destroying null handles is a no-op
        unsafe {
            d.destroy_image_view(self.view, None);
            d.destroy_image(self.image, None);
            d.free_memory(self.memory, None);
        }
    }
}
