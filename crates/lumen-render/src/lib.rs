// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral rendering contracts and the frame synchronization engine.
//!
//! Backends implement [`Renderer`] for the application and [`FrameDevice`]
//! for [`FrameSync`], which owns the acquire -> record -> submit -> present
//! ordering for every frame slot.

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod frame;
pub mod settings;
pub mod sync;

pub use frame::{
    advance, AcquireOutcome, FrameDevice, FrameError, FrameOutcome, FrameSlot, FrameSync,
    PresentOutcome, SlotState, SyncPolicy, WaitStatus, DEFAULT_FRAMES_IN_FLIGHT,
};
pub use settings::{DeviceCapabilities, RenderSettings, VsyncMode};
pub use sync::{Fence, Semaphore, SyncViolation};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a call to [`Renderer::render`] ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was submitted (paused, or a recoverable failure).
    Skipped,
    /// The chain was stale; it has been rebuilt and the frame should be retried.
    SwapchainRebuilt,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
