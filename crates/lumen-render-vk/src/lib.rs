// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend built on `ash`.
//!
//! Objects hold an `Arc` to the object they were created from and release
//! their handle on drop, so a parent always outlives its children.
//! [`VkRenderer`] ties them together and drives [`lumen_render::FrameSync`]
//! through [`VkFrameDevice`].

mod command;
mod depth;
mod device;
mod error;
mod frame_device;
mod instance;
mod overlay;
mod pipeline;
mod pipeline_cache;
mod render_pass;
mod renderer;
mod shader;
mod surface;
mod swapchain;

pub use ash::vk;

pub use command::{CommandPool, CommandRecorder};
pub use depth::{pick_depth_format, DepthTarget};
pub use device::{resolve_queue_families, Device, Queue, QueueFamilies, QueueFamilyIndices};
pub use error::{ResourceKind, VkError, VkResultExt};
pub use frame_device::{create_frame_slots, SyncObjects, VkFrameDevice};
pub use instance::Instance;
pub use overlay::{OverlayContext, OverlayFrame, PassOverlay};
pub use pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, Pipeline, PipelineDesc};
pub use pipeline_cache::PipelineCache;
pub use render_pass::{FrameBuffer, RenderPass};
pub use renderer::VkRenderer;
pub use shader::Shader;
pub use surface::Surface;
pub use swapchain::{
    choose_composite_alpha, choose_extent, choose_image_count, choose_present_mode,
    choose_sharing, choose_surface_format, Swapchain, SwapchainConfig, SwapchainDesc, Texture,
    PREFERRED_SURFACE_FORMAT,
};
