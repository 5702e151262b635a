// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use lumen_render::{AcquireOutcome, PresentOutcome, RenderSize, VsyncMode};
use tracing::{debug, info};

use crate::device::{Device, Queue, QueueFamilies};
use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::frame_device::VkFrameDevice;
use crate::surface::Surface;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// The preferred pair when the surface offers it, otherwise the first one
/// reported. `None` only for an empty list.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO is the only mode every surface must support
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `u32::MAX` in `current_extent` means the window decides; clamp the wanted
/// size into the surface limits then.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; `max == 0` means unbounded.
pub fn choose_image_count(min: u32, max: u32) -> u32 {
    let wanted = min.saturating_add(1);
    if max == 0 {
        wanted
    } else {
        wanted.clamp(min, max)
    }
}

/// Concurrent sharing across graphics and present when they differ.
pub fn choose_sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics == families.present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Color attachment, plus transfer src/dst where the surface allows them.
fn choose_image_usage(supported: vk::ImageUsageFlags) -> vk::ImageUsageFlags {
    let transfer = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    vk::ImageUsageFlags::COLOR_ATTACHMENT | (supported & transfer)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub size: RenderSize,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

/// What was negotiated with the surface. Render passes, pipelines and
/// framebuffers are built against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
}

/// One presentable image and its view. The image belongs to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

pub struct Swapchain {
    device: Arc<Device>,
    loader: swapchain::Device,
    raw: vk::SwapchainKHR,
    textures: Vec<Texture>,
    desc: SwapchainDesc,
    present_queue: Queue,
    surface: Surface,
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("raw", &self.raw)
            .field("desc", &self.desc)
            .field("textures", &self.textures.len())
            .finish_non_exhaustive()
    }
}

impl Swapchain {
    pub fn new(
        device: &Arc<Device>,
        surface: Surface,
        config: SwapchainConfig,
    ) -> Result<Self, VkError> {
        let loader = swapchain::Device::new(device.instance().raw(), device.raw());
        let (raw, textures, desc) =
            build_chain(device, &loader, &surface, config, vk::SwapchainKHR::null())?;
        Ok(Self {
            device: Arc::clone(device),
            loader,
            raw,
            textures,
            desc,
            present_queue: device.present_queue(),
            surface,
        })
    }

    // STRICT ORDER (recreate):
    // 1) Caller has waited every fence that could reference the old chain
    // 2) Create the NEW chain with old_swapchain = current handle
    // 3) Destroy OLD views, then the OLD chain
    // Framebuffers over the old views must already be gone.
    pub fn recreate(&mut self, config: SwapchainConfig) -> Result<(), VkError> {
        let (raw, textures, desc) =
            build_chain(&self.device, &self.loader, &self.surface, config, self.raw)?;

        let old_raw = std::mem::replace(&mut self.raw, raw);
        let old_textures = std::mem::replace(&mut self.textures, textures);
        let old_desc = std::mem::replace(&mut self.desc, desc);
        // SAFETY: no submission references the old chain (see above)
        unsafe { destroy_chain(&self.device, &self.loader, old_raw, &old_textures) };

        if old_desc.format != self.desc.format {
            info!(
                "vk: swapchain format changed {:?} -> {:?}",
                old_desc.format, self.desc.format
            );
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn desc(&self) -> SwapchainDesc {
        self.desc
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn present_queue(&self) -> Queue {
        self.present_queue
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Current surface size as the window system reports it; zero while
    /// minimized on most platforms.
    pub fn surface_extent(&self) -> Result<vk::Extent2D, VkError> {
        Ok(self
            .surface
            .capabilities(self.device.physical())?
            .current_extent)
    }

    /// Handles the frame engine needs to acquire from and present this chain.
    pub fn frame_device(&self) -> VkFrameDevice {
        VkFrameDevice::new(
            Arc::clone(&self.device),
            self.loader.clone(),
            self.raw,
            self.present_queue,
        )
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // SAFETY: the renderer waits for the device to go idle before
        // dropping the chain
        unsafe { destroy_chain(&self.device, &self.loader, self.raw, &self.textures) };
        // surface is dropped after this, with the chain already gone
    }
}

pub(crate) fn acquire(
    loader: &swapchain::Device,
    chain: vk::SwapchainKHR,
    signal: vk::Semaphore,
    timeout_ns: u64,
) -> Result<AcquireOutcome, VkError> {
    // SAFETY: the chain and the semaphore are alive; the semaphore has no
    // pending signal (tracked by the frame engine)
    match unsafe { loader.acquire_next_image(chain, timeout_ns, signal, vk::Fence::null()) } {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn present(
    loader: &swapchain::Device,
    queue: Queue,
    chain: vk::SwapchainKHR,
    image_index: u32,
    wait: vk::Semaphore,
) -> Result<PresentOutcome, VkError> {
    let present = vk::PresentInfoKHR {
        s_type: vk::StructureType::PRESENT_INFO_KHR,
        wait_semaphore_count: 1,
        p_wait_semaphores: &wait,
        swapchain_count: 1,
        p_swapchains: &chain,
        p_image_indices: &image_index,
        ..Default::default()
    };
    // SAFETY: pointers in `present` outlive the call
    match unsafe { loader.queue_present(queue.raw(), &present) } {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        // the wait on `wait` still executes
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(e.into()),
    }
}

fn build_chain(
    device: &Device,
    loader: &swapchain::Device,
    surface: &Surface,
    config: SwapchainConfig,
    old_swapchain: vk::SwapchainKHR,
) -> Result<(vk::SwapchainKHR, Vec<Texture>, SwapchainDesc), VkError> {
    let phys = device.physical();
    let caps = surface.capabilities(phys)?;
    let formats = surface.formats(phys)?;
    let modes = surface.present_modes(phys)?;

    let surface_format = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT).ok_or(
        VkError::Create {
            kind: ResourceKind::Swapchain,
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        },
    )?;
    let present_mode = choose_present_mode(&modes, config.vsync, config.vsync_mode);
    let extent = choose_extent(&caps, config.size);
    let min_image_count = choose_image_count(caps.min_image_count, caps.max_image_count);
    let (sharing_mode, family_indices) = choose_sharing(&device.families());

    let create_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: surface.raw(),
        min_image_count,
        image_format: surface_format.format,
        image_color_space: surface_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: choose_image_usage(caps.supported_usage_flags),
        image_sharing_mode: sharing_mode,
        queue_family_index_count: family_indices.len() as u32,
        p_queue_family_indices: family_indices.as_ptr(),
        pre_transform: choose_pre_transform(&caps),
        composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
        present_mode,
        clipped: vk::TRUE,
        old_swapchain,
        ..Default::default()
    };

    // SAFETY: pointers in create_info outlive the call; old_swapchain is
    // either null or the live chain being replaced
    let raw = unsafe { loader.create_swapchain(&create_info, None) }
        .creating(ResourceKind::Swapchain)?;
    // SAFETY: raw was just created
    let images = match unsafe { loader.get_swapchain_images(raw) } {
        Ok(images) => images,
        Err(e) => {
            // SAFETY: nothing references the new chain yet
            unsafe { loader.destroy_swapchain(raw, None) };
            return Err(e.into());
        }
    };

    let mut textures = Vec::with_capacity(images.len());
    for image in images {
        match create_view(device, image, surface_format.format) {
            Ok(view) => textures.push(Texture { image, view }),
            Err(e) => {
                // SAFETY: the partial set of views and the chain are unused
                unsafe { destroy_chain(device, loader, raw, &textures) };
                return Err(e);
            }
        }
    }

    let desc = SwapchainDesc {
        format: surface_format.format,
        color_space: surface_format.color_space,
        extent,
        image_count: textures.len() as u32,
        present_mode,
    };
    info!(
        "vk: swapchain {}x{} format={:?} color_space={:?} present_mode={:?} images={} (min={} max={}) sharing={:?}",
        extent.width,
        extent.height,
        desc.format,
        desc.color_space,
        present_mode,
        desc.image_count,
        caps.min_image_count,
        caps.max_image_count,
        sharing_mode,
    );
    Ok((raw, textures, desc))
}

fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, VkError> {
    let view_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    // SAFETY: image belongs to a live swapchain of this device
    unsafe { device.raw().create_image_view(&view_info, None) }.creating(ResourceKind::ImageView)
}

/// Views first, then the chain that owns the images.
unsafe fn destroy_chain(
    device: &Device,
    loader: &swapchain::Device,
    raw: vk::SwapchainKHR,
    textures: &[Texture],
) {
    debug!("vk: destroying swapchain {raw:?} ({} views)", textures.len());
    for t in textures {
        // SAFETY: caller guarantees the views are unused
        unsafe { device.raw().destroy_image_view(t.view, None) };
    }
    // SAFETY: caller guarantees the chain is unused
    unsafe { loader.destroy_swapchain(raw, None) };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn preferred_format_wins_when_offered() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            ),
        ];
        let chosen = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[], PREFERRED_SURFACE_FORMAT).is_none());
    }

    #[test]
    fn image_count_is_min_plus_one_within_bounds() {
        assert_eq!(choose_image_count(1, 3), 2);
        assert_eq!(choose_image_count(2, 0), 3);
        assert_eq!(choose_image_count(3, 3), 3);
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let count = choose_image_count(min, max);
                assert!(count >= min);
                if max != 0 {
                    assert!(count <= max);
                }
                if max == 0 || max > min {
                    assert_eq!(count, min + 1);
                }
            }
        }
    }

    #[test]
    fn present_mode_follows_vsync_settings() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        let fifo_only = [vk::PresentModeKHR::FIFO];

        assert_eq!(
            choose_present_mode(&all, true, VsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&all, true, VsyncMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, false, VsyncMode::Fifo),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&fifo_only, true, VsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, false, VsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_is_fixed_unless_window_decides() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let want = RenderSize {
            width: 4000,
            height: 8,
        };
        let fixed = choose_extent(&caps, want);
        assert_eq!((fixed.width, fixed.height), (800, 600));

        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let clamped = choose_extent(&caps, want);
        assert_eq!((clamped.width, clamped.height), (1024, 16));
    }

    #[test]
    fn sharing_is_concurrent_only_across_families() {
        let mut families = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: None,
            transfer: None,
        };
        let (mode, indices) = choose_sharing(&families);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        families.present = 2;
        let (mode, indices) = choose_sharing(&families);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        let all = vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(
            choose_composite_alpha(all),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn transfer_usage_only_when_supported() {
        let usage = choose_image_usage(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        );
        assert_eq!(
            usage,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );
    }
}
