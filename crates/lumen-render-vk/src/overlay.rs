// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::command::{CommandPool, CommandRecorder};
use crate::device::{Device, Queue};
use crate::error::VkError;
use crate::render_pass::RenderPass;
use crate::swapchain::SwapchainDesc;

/// What an overlay may look at when it (re)builds its own resources.
/// Handed out at startup and again after every swapchain rebuild.
pub struct OverlayContext<'a> {
    pub device: &'a Arc<Device>,
    pub graphics_queue: Queue,
    pub swapchain: SwapchainDesc,
    pub command_pool: &'a CommandPool,
    pub render_pass: &'a RenderPass,
}

/// Per-frame information passed to [`PassOverlay::record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayFrame {
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Extra commands recorded inside the main render pass, after the scene
/// draw and before the pass ends.
pub trait PassOverlay {
    fn attach(&mut self, ctx: &OverlayContext<'_>) -> Result<(), VkError>;
    fn record(&mut self, recorder: &CommandRecorder<'_>, frame: OverlayFrame);
    /// Called once the device is idle, before the renderer is torn down.
    fn detach(&mut self) {}
}
