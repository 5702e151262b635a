// SPDX-License-Identifier: CEPL-1.0
//! Per-frame CPU/GPU synchronization.
//!
//! Each of the N frame slots owns one command buffer, an image-available
//! semaphore, a render-finished semaphore and an in-flight fence. Nothing in
//! a slot is shared with another slot. One call to [`FrameSync::run_frame`]
//! drives the current slot through
//!
//! ```text
//! Idle -> Acquiring -> Recording -> Submitted -> Presenting
//! ```
//!
//! and advances to the next slot. The slot returns to `Idle` on its next
//! turn, once its fence has been waited on.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::sync::{Fence, Semaphore, SyncViolation};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Next frame slot index.
#[inline]
pub fn advance(index: usize, frames_in_flight: usize) -> usize {
    (index + 1) % frames_in_flight
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Upper bound for a CPU fence wait. Expiry means the device is lost.
    pub fence_timeout: Duration,
    /// Consecutive wait/reset failures tolerated before giving up.
    pub max_sync_failures: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(5),
            max_sync_failures: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The chain no longer matches the surface. Nothing was signaled.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    Stale,
}

/// The queue/presentation operations the engine sequences.
///
/// Acquire, submit and present only enqueue work; completion is observed
/// through the semaphores and fences passed along. `wait_for_fence` is the
/// one call allowed to block.
pub trait FrameDevice {
    type Error: std::error::Error + Send + Sync + 'static;
    type CommandBuffer: Copy + PartialEq + fmt::Debug;
    type Semaphore: Copy + fmt::Debug;
    type Fence: Copy + fmt::Debug;

    fn wait_for_fence(
        &mut self,
        fence: Self::Fence,
        timeout: Duration,
    ) -> Result<WaitStatus, Self::Error>;

    fn reset_fence(&mut self, fence: Self::Fence) -> Result<(), Self::Error>;

    fn acquire_next_image(
        &mut self,
        signal: Self::Semaphore,
    ) -> Result<AcquireOutcome, Self::Error>;

    /// Submit `command_buffer`, waiting on `wait` at color-attachment output,
    /// signaling `signal` and `fence` on completion.
    fn submit(
        &mut self,
        command_buffer: Self::CommandBuffer,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Self::Fence,
    ) -> Result<(), Self::Error>;

    fn present(
        &mut self,
        image_index: u32,
        wait: Self::Semaphore,
    ) -> Result<PresentOutcome, Self::Error>;

    /// Errors for which retrying a wait is pointless.
    fn is_device_lost(_error: &Self::Error) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

pub struct FrameSlot<D: FrameDevice> {
    command_buffer: D::CommandBuffer,
    image_available: Semaphore<D::Semaphore>,
    render_finished: Semaphore<D::Semaphore>,
    in_flight: Fence<D::Fence>,
    state: SlotState,
}

impl<D: FrameDevice> fmt::Debug for FrameSlot<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("command_buffer", &self.command_buffer)
            .field("image_available", &self.image_available)
            .field("render_finished", &self.render_finished)
            .field("in_flight", &self.in_flight)
            .field("state", &self.state)
            .finish()
    }
}

impl<D: FrameDevice> FrameSlot<D> {
    pub fn new(
        command_buffer: D::CommandBuffer,
        image_available: D::Semaphore,
        render_finished: D::Semaphore,
        in_flight: D::Fence,
    ) -> Self {
        Self {
            command_buffer,
            image_available: Semaphore::new(image_available),
            render_finished: Semaphore::new(render_finished),
            in_flight: Fence::new(in_flight),
            state: SlotState::Idle,
        }
    }

    pub fn command_buffer(&self) -> D::CommandBuffer {
        self.command_buffer
    }

    pub fn image_available(&self) -> &Semaphore<D::Semaphore> {
        &self.image_available
    }

    pub fn render_finished(&self) -> &Semaphore<D::Semaphore> {
        &self.render_finished
    }

    pub fn fence(&self) -> &Fence<D::Fence> {
        &self.in_flight
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        slot: usize,
        image_index: u32,
        /// Acquire or present reported the chain suboptimal/stale after the
        /// frame was already queued. Rebuild before the next frame.
        needs_rebuild: bool,
    },
    /// Acquire reported the chain stale. Nothing was recorded, submitted or
    /// presented; rebuild the swapchain and retry.
    SwapchainStale { slot: usize },
}

#[derive(Debug, Error)]
pub enum FrameError<E: std::error::Error + 'static> {
    #[error("fence wait exceeded {0:?}; device considered lost")]
    FenceTimeout(Duration),
    #[error("device lost after {failures} consecutive synchronization failures")]
    DeviceLost {
        failures: u32,
        #[source]
        source: E,
    },
    #[error("synchronization failure ({failures} in a row)")]
    Sync {
        failures: u32,
        #[source]
        source: E,
    },
    #[error(transparent)]
    Protocol(#[from] SyncViolation),
    #[error("image acquisition failed")]
    Acquire(#[source] E),
    #[error("command recording failed")]
    Record(#[source] E),
    #[error("queue submission failed")]
    Submit(#[source] E),
    #[error("presentation failed")]
    Present(#[source] E),
}

impl<E: std::error::Error + 'static> FrameError<E> {
    /// Only an isolated synchronization failure may be skipped over.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Sync { .. })
    }
}

fn escalate<E: std::error::Error + 'static>(
    failures: &mut u32,
    max_failures: u32,
    device_lost: bool,
    source: E,
) -> FrameError<E> {
    *failures = failures.saturating_add(1);
    warn!("synchronization failure #{}: {source}", *failures);
    if device_lost || *failures >= max_failures.max(1) {
        FrameError::DeviceLost {
            failures: *failures,
            source,
        }
    } else {
        FrameError::Sync {
            failures: *failures,
            source,
        }
    }
}

pub struct FrameSync<D: FrameDevice> {
    slots: Vec<FrameSlot<D>>,
    current: usize,
    policy: SyncPolicy,
    sync_failures: u32,
    frames_presented: u64,
}

impl<D: FrameDevice> fmt::Debug for FrameSync<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSync")
            .field("slots", &self.slots)
            .field("current", &self.current)
            .field("policy", &self.policy)
            .field("sync_failures", &self.sync_failures)
            .field("frames_presented", &self.frames_presented)
            .finish()
    }
}

impl<D: FrameDevice> FrameSync<D> {
    /// One slot per frame in flight.
    ///
    /// # Panics
    /// If `slots` is empty.
    pub fn new(slots: Vec<FrameSlot<D>>, policy: SyncPolicy) -> Self {
        assert!(!slots.is_empty(), "at least one frame slot is required");
        Self {
            slots,
            current: 0,
            policy,
            sync_failures: 0,
            frames_presented: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> &[FrameSlot<D>] {
        &self.slots
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn sync_failures(&self) -> u32 {
        self.sync_failures
    }

    /// Slots whose submission has not been waited on by the CPU yet.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.in_flight.is_submitted())
            .count()
    }

    /// Run one wait -> acquire -> record -> submit -> present cycle on the
    /// current slot.
    ///
    /// `record` receives the slot's command buffer and the *acquired image
    /// index*, which is unrelated to the slot index.
    pub fn run_frame<R>(
        &mut self,
        device: &mut D,
        record: R,
    ) -> Result<FrameOutcome, FrameError<D::Error>>
    where
        R: FnOnce(&mut D, D::CommandBuffer, u32) -> Result<(), D::Error>,
    {
        let index = self.current;

        // 1) Wait: the slot's previous submission must be finished. The GPU
        // fence is reset here, before anything is acquired, so a failed
        // reset leaves the slot untouched. The logical `submitted` flag
        // decides whether a later wait happens, so an abandoned frame never
        // waits on the unsignaled fence.
        self.wait_slot(device, index)?;
        if let Err(e) = device.reset_fence(self.slots[index].in_flight.raw()) {
            let lost = D::is_device_lost(&e);
            return Err(escalate(
                &mut self.sync_failures,
                self.policy.max_sync_failures,
                lost,
                e,
            ));
        }

        let slot = &mut self.slots[index];

        // 2) Acquire
        slot.state = SlotState::Acquiring;
        if slot.image_available.is_signaled() {
            return Err(SyncViolation::SemaphoreAlreadySignaled.into());
        }
        let (image_index, acquired_suboptimal) = match device
            .acquire_next_image(slot.image_available.raw())
            .map_err(FrameError::Acquire)?
        {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::Stale => {
                slot.in_flight.mark_waited();
                slot.state = SlotState::Idle;
                debug!("slot {index}: swapchain stale at acquire, frame abandoned");
                return Ok(FrameOutcome::SwapchainStale { slot: index });
            }
        };
        slot.image_available.signal()?;

        // 3) Record
        slot.state = SlotState::Recording;
        if slot.in_flight.is_submitted() {
            return Err(SyncViolation::CommandBufferInFlight.into());
        }
        record(&mut *device, slot.command_buffer, image_index).map_err(FrameError::Record)?;

        // 4) Submit
        slot.in_flight.mark_submitted()?;
        slot.image_available.consume()?;
        slot.render_finished.signal()?;
        device
            .submit(
                slot.command_buffer,
                slot.image_available.raw(),
                slot.render_finished.raw(),
                slot.in_flight.raw(),
            )
            .map_err(FrameError::Submit)?;
        slot.state = SlotState::Submitted;

        // 5) Present
        slot.render_finished.consume()?;
        slot.state = SlotState::Presenting;
        let presented = device
            .present(image_index, slot.render_finished.raw())
            .map_err(FrameError::Present)?;
        let needs_rebuild = acquired_suboptimal || presented != PresentOutcome::Presented;

        // 6) Advance
        self.current = advance(index, self.slots.len());
        self.frames_presented += 1;

        Ok(FrameOutcome::Presented {
            slot: index,
            image_index,
            needs_rebuild,
        })
    }

    /// Wait on every submitted fence. Call before tearing down anything a
    /// submission might reference.
    pub fn wait_all(&mut self, device: &mut D) -> Result<(), FrameError<D::Error>> {
        for index in 0..self.slots.len() {
            self.wait_slot(device, index)?;
        }
        Ok(())
    }

    /// Forget all pending state. Only valid once the device is idle.
    pub fn reset_after_idle(&mut self) {
        for slot in &mut self.slots {
            slot.in_flight.mark_waited();
            slot.image_available.clear();
            slot.render_finished.clear();
            slot.state = SlotState::Idle;
        }
        self.current = 0;
    }

    fn wait_slot(&mut self, device: &mut D, index: usize) -> Result<(), FrameError<D::Error>> {
        let slot = &mut self.slots[index];
        if !slot.in_flight.is_submitted() {
            slot.state = SlotState::Idle;
            return Ok(());
        }

        match device.wait_for_fence(slot.in_flight.raw(), self.policy.fence_timeout) {
            Ok(WaitStatus::Signaled) => {
                slot.in_flight.mark_waited();
                slot.state = SlotState::Idle;
                self.sync_failures = 0;
                Ok(())
            }
            Ok(WaitStatus::TimedOut) => Err(FrameError::FenceTimeout(self.policy.fence_timeout)),
            Err(e) => {
                let lost = D::is_device_lost(&e);
                Err(escalate(
                    &mut self.sync_failures,
                    self.policy.max_sync_failures,
                    lost,
                    e,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_periodic() {
        for n in [1usize, 2, 4] {
            let mut i = 0;
            for step in 1..=1000usize {
                i = advance(i, n);
                assert_eq!(i, step % n);
            }
        }
    }

    #[test]
    fn only_isolated_sync_failures_are_recoverable() {
        let io = || std::io::Error::other("boom");
        let err: FrameError<std::io::Error> = FrameError::Sync {
            failures: 1,
            source: io(),
        };
        assert!(!err.is_fatal());
        assert!(FrameError::<std::io::Error>::DeviceLost {
            failures: 3,
            source: io()
        }
        .is_fatal());
        assert!(FrameError::<std::io::Error>::Protocol(SyncViolation::FenceAlreadySubmitted)
            .is_fatal());
    }

    #[test]
    fn escalate_turns_repeated_failures_into_device_lost() {
        let mut failures = 0;
        let io = || std::io::Error::other("wait failed");
        assert!(matches!(
            escalate(&mut failures, 3, false, io()),
            FrameError::Sync { failures: 1, .. }
        ));
        assert!(matches!(
            escalate(&mut failures, 3, false, io()),
            FrameError::Sync { failures: 2, .. }
        ));
        assert!(matches!(
            escalate(&mut failures, 3, false, io()),
            FrameError::DeviceLost { failures: 3, .. }
        ));
        let mut failures = 0;
        assert!(matches!(
            escalate(&mut failures, 3, true, io()),
            FrameError::DeviceLost { failures: 1, .. }
        ));
    }
}
