// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{
    FrameError, FrameOutcome, FrameStatus, FrameSync, RenderSettings, RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::command::{CommandPool, CommandRecorder};
use crate::depth::{pick_depth_format, DepthTarget};
use crate::device::Device;
use crate::error::VkError;
use crate::frame_device::{create_frame_slots, SyncObjects, VkFrameDevice};
use crate::instance::Instance;
use crate::overlay::{OverlayContext, OverlayFrame, PassOverlay};
use crate::pipeline::{GraphicsPipelineDesc, Pipeline, PipelineDesc};
use crate::pipeline_cache::PipelineCache;
use crate::render_pass::{FrameBuffer, RenderPass};
use crate::shader::Shader;
use crate::surface::Surface;
use crate::swapchain::{Swapchain, SwapchainConfig};

// STRICT TEARDOWN ORDER:
// - Drop waits every submitted fence, then device_wait_idle()
// - Fields then drop top to bottom:
//   overlays, framebuffers, pipeline, render pass, depth, pipeline cache,
//   swapchain (views, chain, surface), frame sync, sync objects,
//   command pool, device, instance.
// Do not reorder the fields.
pub struct VkRenderer {
    overlays: Vec<Box<dyn PassOverlay>>,
    framebuffers: Vec<FrameBuffer>,
    pipeline: Pipeline,
    render_pass: Arc<RenderPass>,
    depth: Option<DepthTarget>,
    pipeline_cache: PipelineCache,
    swapchain: Swapchain,
    frame_device: VkFrameDevice,
    frames: FrameSync<VkFrameDevice>,
    _sync_objects: SyncObjects,
    command_pool: CommandPool,
    device: Arc<Device>,
    _instance: Arc<Instance>,

    settings: RenderSettings,
    size: RenderSize,
    paused: bool,
    // Rebuild failure from set_vsync, surfaced by the next render().
    broken: Option<anyhow::Error>,
}

struct FrameTargets<'a> {
    render_pass: &'a RenderPass,
    pipeline: &'a Pipeline,
    framebuffers: &'a [FrameBuffer],
    clear_color: [f32; 4],
    slot: usize,
}

// STRICT PER-FRAME RECORDING ORDER:
// begin -> render pass -> pipeline -> viewport -> scissor -> draw
// -> overlays -> end render pass -> end
fn record_frame(
    device: &Device,
    cmd: vk::CommandBuffer,
    image_index: u32,
    targets: &FrameTargets<'_>,
    overlays: &mut [Box<dyn PassOverlay>],
) -> Result<(), VkError> {
    let framebuffer = targets
        .framebuffers
        .get(image_index as usize)
        .ok_or(VkError::ImageOutOfRange(image_index))?;
    let extent = framebuffer.extent();

    let rec = CommandRecorder::new(device, cmd);
    rec.begin()?;
    rec.bind_render_pass(targets.render_pass, framebuffer, targets.clear_color);
    rec.bind_pipeline(targets.pipeline);
    rec.set_viewport(extent);
    rec.set_scissor(extent);
    rec.draw(3, 0);

    let frame = OverlayFrame {
        slot: targets.slot,
        image_index,
        extent,
    };
    for overlay in overlays.iter_mut() {
        overlay.record(&rec, frame);
    }

    rec.end_render_pass();
    rec.end()
}

fn build_pipeline(
    device: &Arc<Device>,
    cache: &PipelineCache,
    settings: &RenderSettings,
    render_pass: &Arc<RenderPass>,
) -> Result<Pipeline, VkError> {
    let vertex = Shader::from_path(device, &settings.vertex_shader, vk::ShaderStageFlags::VERTEX)?;
    let fragment = Shader::from_path(
        device,
        &settings.fragment_shader,
        vk::ShaderStageFlags::FRAGMENT,
    )?;
    Pipeline::new(
        device,
        cache.raw(),
        PipelineDesc::Graphics(GraphicsPipelineDesc::new(
            vertex,
            fragment,
            Arc::clone(render_pass),
        )),
    )
}

fn create_depth(
    device: &Arc<Device>,
    render_pass: &RenderPass,
    extent: vk::Extent2D,
) -> Result<Option<DepthTarget>, VkError> {
    render_pass
        .depth_format()
        .map(|format| DepthTarget::new(device, format, extent))
        .transpose()
}

fn create_framebuffers(
    device: &Arc<Device>,
    render_pass: &RenderPass,
    swapchain: &Swapchain,
    depth: Option<&DepthTarget>,
) -> Result<Vec<FrameBuffer>, VkError> {
    let extent = swapchain.desc().extent;
    swapchain
        .textures()
        .iter()
        .map(|texture| {
            FrameBuffer::new(
                device,
                render_pass,
                texture,
                depth.map(DepthTarget::view),
                extent,
            )
        })
        .collect()
}

impl VkRenderer {
    /// Attach an overlay; it is re-attached after every swapchain rebuild.
    pub fn add_overlay(&mut self, mut overlay: Box<dyn PassOverlay>) -> Result<(), VkError> {
        overlay.attach(&self.overlay_context())?;
        self.overlays.push(overlay);
        Ok(())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn frames(&self) -> &FrameSync<VkFrameDevice> {
        &self.frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn overlay_context(&self) -> OverlayContext<'_> {
        OverlayContext {
            device: &self.device,
            graphics_queue: self.device.graphics_queue(),
            swapchain: self.swapchain.desc(),
            command_pool: &self.command_pool,
            render_pass: &self.render_pass,
        }
    }

    fn swapchain_config(&self) -> SwapchainConfig {
        SwapchainConfig {
            size: self.size,
            vsync: self.settings.vsync,
            vsync_mode: self.settings.vsync_mode,
        }
    }

    fn try_frame(&mut self) -> Result<FrameOutcome, FrameError<VkError>> {
        let Self {
            overlays,
            framebuffers,
            pipeline,
            render_pass,
            frame_device,
            frames,
            settings,
            ..
        } = self;
        let targets = FrameTargets {
            render_pass: &**render_pass,
            pipeline: &*pipeline,
            framebuffers: framebuffers.as_slice(),
            clear_color: settings.clear_color,
            slot: frames.current_slot(),
        };
        frames.run_frame(frame_device, |dev, cmd, image_index| {
            record_frame(dev.device(), cmd, image_index, &targets, overlays)
        })
    }

    // STRICT ORDER (rebuild):
    // 1) Wait every submitted fence, then device idle
    // 2) Drop framebuffers and depth (they reference the old views/extent)
    // 3) Recreate the chain with old_swapchain handed over
    // 4) Swap in a frame device for the new chain
    // 5) New render pass + pipeline only if the color format changed
    // 6) Depth, framebuffers, overlays
    fn rebuild(&mut self) -> Result<()> {
        let surface = self
            .swapchain
            .surface_extent()
            .context("querying surface extent")?;
        if surface.width == 0 || surface.height == 0 {
            if !self.paused {
                info!("vk: surface is 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }

        self.frames
            .wait_all(&mut self.frame_device)
            .context("waiting for frames before rebuild")?;
        self.device.wait_idle().context("device_wait_idle")?;
        self.frames.reset_after_idle();

        self.framebuffers.clear();
        self.depth = None;

        let old_format = self.swapchain.desc().format;
        self.swapchain
            .recreate(self.swapchain_config())
            .context("recreating swapchain")?;
        self.frame_device = self.swapchain.frame_device();
        let desc = self.swapchain.desc();

        if desc.format != old_format {
            let render_pass = Arc::new(
                RenderPass::new(&self.device, desc.format, self.render_pass.depth_format())
                    .context("recreating render pass")?,
            );
            let pipeline =
                build_pipeline(&self.device, &self.pipeline_cache, &self.settings, &render_pass)
                    .context("recreating pipeline")?;
            self.pipeline = pipeline;
            self.render_pass = render_pass;
        }

        self.depth = create_depth(&self.device, &self.render_pass, desc.extent)
            .context("recreating depth target")?;
        self.framebuffers = create_framebuffers(
            &self.device,
            &self.render_pass,
            &self.swapchain,
            self.depth.as_ref(),
        )
        .context("recreating framebuffers")?;

        let mut overlays = std::mem::take(&mut self.overlays);
        let attached = {
            let ctx = self.overlay_context();
            overlays.iter_mut().try_for_each(|o| o.attach(&ctx))
        };
        self.overlays = overlays;
        attached.context("re-attaching overlays")?;

        info!(
            "vk: swapchain rebuilt {}x{} ({} images, {:?})",
            desc.extent.width, desc.extent.height, desc.image_count, desc.present_mode
        );
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let display = display
            .display_handle()
            .context("display handle unavailable")?
            .as_raw();
        let window = window
            .window_handle()
            .context("window handle unavailable")?
            .as_raw();

        let instance = Instance::new(&settings.app_name, display, settings.validation)
            .context("creating Vulkan instance")?;
        let surface =
            Surface::new(&instance, display, window).context("creating window surface")?;
        let device = Device::new(&instance, &surface, settings.capabilities)
            .context("selecting a Vulkan device")?;
        let pipeline_cache = PipelineCache::load(&device, settings.pipeline_cache.as_deref())
            .context("creating pipeline cache")?;

        let config = SwapchainConfig {
            size,
            vsync: settings.vsync,
            vsync_mode: settings.vsync_mode,
        };
        let swapchain = Swapchain::new(&device, surface, config).context("creating swapchain")?;
        let desc = swapchain.desc();

        let depth_format = settings.depth.then(|| pick_depth_format(&device));
        let render_pass = Arc::new(
            RenderPass::new(&device, desc.format, depth_format).context("creating render pass")?,
        );
        let pipeline = build_pipeline(&device, &pipeline_cache, settings, &render_pass)
            .context("creating graphics pipeline")?;
        let depth =
            create_depth(&device, &render_pass, desc.extent).context("creating depth target")?;
        let framebuffers = create_framebuffers(&device, &render_pass, &swapchain, depth.as_ref())
            .context("creating framebuffers")?;

        let command_pool =
            CommandPool::new(&device, device.graphics_queue()).context("creating command pool")?;
        let frames_in_flight = settings.frames_in_flight.max(1);
        let (sync_objects, slots) = create_frame_slots(&device, &command_pool, frames_in_flight)
            .context("creating frame slots")?;
        let frames = FrameSync::new(slots, settings.sync);
        let frame_device = swapchain.frame_device();

        info!(
            "vk: renderer ready on '{}' ({} frames in flight, depth: {:?})",
            device.name(),
            frames_in_flight,
            depth_format
        );

        Ok(Self {
            overlays: Vec::new(),
            framebuffers,
            pipeline,
            render_pass,
            depth,
            pipeline_cache,
            swapchain,
            frame_device,
            frames,
            _sync_objects: sync_objects,
            command_pool,
            device,
            _instance: instance,
            settings: settings.clone(),
            size,
            paused: size.is_empty(),
            broken: None,
        })
    }

    fn set_vsync(&mut self, on: bool) {
        if self.settings.vsync == on {
            return;
        }
        self.settings.vsync = on;
        if let Err(e) = self.rebuild() {
            warn!("vk: vsync change failed: {e:#}");
            self.broken = Some(e.context("applying vsync change"));
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }

        if self.paused {
            info!(
                "vk: resize to {}x{} → paused=false",
                size.width, size.height
            );
        }
        self.paused = false;
        self.size = size;
        self.rebuild()?;
        // A fresh chain supersedes an earlier vsync failure.
        self.broken = None;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.settings.clear_color = rgba;
    }

    fn render(&mut self) -> Result<FrameStatus> {
        take_pending(&mut self.broken)?;
        if self.paused {
            return Ok(FrameStatus::Skipped);
        }

        // Guard for minimized surfaces
        match self.swapchain.surface_extent() {
            Ok(extent) if extent.width == 0 || extent.height == 0 => {
                info!("vk: current_extent is 0x0 → paused=true");
                self.paused = true;
                return Ok(FrameStatus::Skipped);
            }
            Ok(_) => {}
            Err(e) => return Err(e).context("querying surface extent"),
        }

        let mut retried = false;
        loop {
            match self.try_frame() {
                Ok(FrameOutcome::Presented { needs_rebuild, .. }) => {
                    if needs_rebuild {
                        debug!("vk: present reported a stale or suboptimal chain");
                        self.rebuild().context("rebuilding swapchain after present")?;
                    }
                    return Ok(FrameStatus::Presented);
                }
                Ok(FrameOutcome::SwapchainStale { slot }) => {
                    debug!("vk: slot {slot} acquired from a stale chain, rebuilding");
                    self.rebuild().context("rebuilding stale swapchain")?;
                    if retried || self.paused {
                        return Ok(FrameStatus::SwapchainRebuilt);
                    }
                    retried = true;
                }
                Err(e) if !e.is_fatal() => {
                    warn!("vk: frame skipped: {e}");
                    return Ok(FrameStatus::Skipped);
                }
                Err(e) => return Err(anyhow::Error::new(e).context("rendering frame")),
            }
        }
    }
}

fn take_pending(pending: &mut Option<anyhow::Error>) -> Result<()> {
    match pending.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.frames.wait_all(&mut self.frame_device) {
            warn!("vk: teardown fence wait failed: {e}");
        }
        if let Err(e) = self.device.wait_idle() {
            warn!("vk: teardown device_wait_idle failed: {e}");
        }
        for overlay in &mut self.overlays {
            overlay.detach();
        }
        debug!(
            "vk: tearing down after {} frames",
            self.frames.frames_presented()
        );
    }
}
