// SPDX-License-Identifier: CEPL-1.0
//! Drives `FrameSync` against a scripted device that plays the GPU's part:
//! it keeps submissions pending until their fence is waited on and checks
//! the semaphore/fence protocol from the queue's point of view.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use lumen_render::{
    AcquireOutcome, FrameDevice, FrameError, FrameOutcome, FrameSlot, FrameSync, PresentOutcome,
    SlotState, SyncPolicy, WaitStatus,
};

#[derive(Debug, thiserror::Error)]
#[error("mock device: {0}")]
struct MockError(&'static str);

#[derive(Clone, Copy, Debug)]
enum WaitReply {
    Signal,
    TimeOut,
    Fail,
}

#[derive(Default)]
struct MockDevice {
    images: u32,
    next_image: u32,
    acquires: u64,
    stale_acquires: BTreeSet<u64>,
    suboptimal_acquires: BTreeSet<u64>,
    reset_failures: u32,
    fail_submit: bool,
    fail_present: bool,
    wait_script: VecDeque<WaitReply>,
    present_script: VecDeque<PresentOutcome>,

    // fence -> command buffer still executing
    in_flight: HashMap<u64, u32>,
    fence_signaled: HashMap<u64, bool>,
    pending_semaphores: BTreeSet<u32>,

    submits: usize,
    presents: usize,
    max_outstanding: usize,
    recorded: Vec<(u32, u32)>,
}

impl MockDevice {
    fn new(images: u32) -> Self {
        Self {
            images,
            ..Default::default()
        }
    }
}

impl FrameDevice for MockDevice {
    type Error = MockError;
    type CommandBuffer = u32;
    type Semaphore = u32;
    type Fence = u64;

    fn wait_for_fence(&mut self, fence: u64, _timeout: Duration) -> Result<WaitStatus, MockError> {
        match self.wait_script.pop_front().unwrap_or(WaitReply::Signal) {
            WaitReply::Signal => {
                self.in_flight.remove(&fence);
                self.fence_signaled.insert(fence, true);
                Ok(WaitStatus::Signaled)
            }
            WaitReply::TimeOut => Ok(WaitStatus::TimedOut),
            WaitReply::Fail => Err(MockError("wait failed")),
        }
    }

    fn reset_fence(&mut self, fence: u64) -> Result<(), MockError> {
        assert!(
            !self.in_flight.contains_key(&fence),
            "fence {fence} reset while its submission is pending"
        );
        if self.reset_failures > 0 {
            self.reset_failures -= 1;
            return Err(MockError("reset failed"));
        }
        self.fence_signaled.insert(fence, false);
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: u32) -> Result<AcquireOutcome, MockError> {
        self.acquires += 1;
        if self.stale_acquires.contains(&self.acquires) {
            return Ok(AcquireOutcome::Stale);
        }
        assert!(
            self.pending_semaphores.insert(signal),
            "semaphore {signal} signaled twice"
        );
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.images;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: self.suboptimal_acquires.contains(&self.acquires),
        })
    }

    fn submit(&mut self, cmd: u32, wait: u32, signal: u32, fence: u64) -> Result<(), MockError> {
        if self.fail_submit {
            return Err(MockError("queue submit rejected"));
        }
        assert!(
            !self.in_flight.values().any(|&c| c == cmd),
            "command buffer {cmd} submitted while still executing"
        );
        assert_eq!(
            self.fence_signaled.get(&fence),
            Some(&false),
            "fence {fence} must be reset before submit"
        );
        assert!(
            self.pending_semaphores.remove(&wait),
            "submit waits on unsignaled semaphore {wait}"
        );
        assert!(
            self.pending_semaphores.insert(signal),
            "semaphore {signal} signaled twice"
        );
        self.in_flight.insert(fence, cmd);
        self.max_outstanding = self.max_outstanding.max(self.in_flight.len());
        self.submits += 1;
        Ok(())
    }

    fn present(&mut self, _image_index: u32, wait: u32) -> Result<PresentOutcome, MockError> {
        if self.fail_present {
            return Err(MockError("surface lost"));
        }
        assert!(
            self.pending_semaphores.remove(&wait),
            "present waits on unsignaled semaphore {wait}"
        );
        self.presents += 1;
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }
}

fn engine(frames_in_flight: usize, policy: SyncPolicy) -> FrameSync<MockDevice> {
    let slots = (0..frames_in_flight)
        .map(|i| {
            let i = i as u32;
            FrameSlot::new(100 + i, 200 + i, 300 + i, 400 + i as u64)
        })
        .collect();
    FrameSync::new(slots, policy)
}

fn record_checked(dev: &mut MockDevice, cmd: u32, image: u32) -> Result<(), MockError> {
    assert!(
        !dev.in_flight.values().any(|&c| c == cmd),
        "command buffer {cmd} re-recorded while in flight"
    );
    dev.recorded.push((cmd, image));
    Ok(())
}

#[test]
fn frames_never_share_an_in_flight_command_buffer() {
    let mut dev = MockDevice::new(3);
    let mut sync = engine(2, SyncPolicy::default());

    for frame in 0..10usize {
        let outcome = sync.run_frame(&mut dev, record_checked).unwrap();
        match outcome {
            FrameOutcome::Presented {
                slot,
                needs_rebuild,
                ..
            } => {
                assert_eq!(slot, frame % 2);
                assert!(!needs_rebuild);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(sync.outstanding() <= 2);
    }

    assert_eq!(dev.submits, 10);
    assert_eq!(dev.presents, 10);
    assert!(dev.max_outstanding <= 2);
    assert_eq!(sync.frames_presented(), 10);
}

#[test]
fn slot_index_cycles_with_period_n() {
    for n in [1usize, 2, 4] {
        let mut dev = MockDevice::new(3);
        let mut sync = engine(n, SyncPolicy::default());
        for frame in 0..1000usize {
            assert_eq!(sync.current_slot(), frame % n);
            sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap();
        }
        assert_eq!(sync.current_slot(), 1000 % n);
    }
}

#[test]
fn record_sees_image_index_not_slot_index() {
    let mut dev = MockDevice::new(3);
    let mut sync = engine(2, SyncPolicy::default());
    for _ in 0..4 {
        sync.run_frame(&mut dev, record_checked).unwrap();
    }
    assert_eq!(dev.recorded, vec![(100, 0), (101, 1), (100, 2), (101, 0)]);
}

#[test]
fn stale_acquire_abandons_frame_without_submit_or_present() {
    let mut dev = MockDevice::new(3);
    dev.stale_acquires.insert(5);
    let mut sync = engine(2, SyncPolicy::default());

    for _ in 0..4 {
        sync.run_frame(&mut dev, record_checked).unwrap();
    }
    let (submits, presents) = (dev.submits, dev.presents);

    let outcome = sync.run_frame(&mut dev, record_checked).unwrap();
    assert_eq!(outcome, FrameOutcome::SwapchainStale { slot: 0 });
    assert_eq!((dev.submits, dev.presents), (submits, presents));
    assert_eq!(dev.recorded.len(), 4);
    assert_eq!(sync.current_slot(), 0);
    assert_eq!(sync.slots()[0].state(), SlotState::Idle);
    assert!(!sync.slots()[0].image_available().is_signaled());

    // The retry reuses the same slot and goes all the way through.
    let outcome = sync.run_frame(&mut dev, record_checked).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { slot: 0, .. }));
    assert_eq!(dev.submits, submits + 1);
}

#[test]
fn suboptimal_present_still_counts_but_requests_rebuild() {
    let mut dev = MockDevice::new(2);
    dev.present_script.push_back(PresentOutcome::Suboptimal);
    let mut sync = engine(2, SyncPolicy::default());

    let outcome = sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            needs_rebuild: true,
            ..
        }
    ));
    assert_eq!(sync.current_slot(), 1);
}

#[test]
fn fence_timeout_is_device_lost() {
    let mut dev = MockDevice::new(2);
    let mut sync = engine(1, SyncPolicy::default());
    sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap();

    dev.wait_script.push_back(WaitReply::TimeOut);
    let err = sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap_err();
    assert!(matches!(err, FrameError::FenceTimeout(_)));
    assert!(err.is_fatal());
    assert_eq!(dev.submits, 1);
}

#[test]
fn failed_wait_keeps_slot_pending_and_retries() {
    let mut dev = MockDevice::new(2);
    let mut sync = engine(1, SyncPolicy::default());
    sync.run_frame(&mut dev, record_checked).unwrap();

    dev.wait_script.push_back(WaitReply::Fail);
    let err = sync.run_frame(&mut dev, record_checked).unwrap_err();
    assert!(matches!(err, FrameError::Sync { failures: 1, .. }));
    assert!(!err.is_fatal());
    assert!(sync.slots()[0].fence().is_submitted());
    assert_eq!(dev.recorded.len(), 1);

    sync.run_frame(&mut dev, record_checked).unwrap();
    assert_eq!(sync.sync_failures(), 0);
    assert_eq!(dev.recorded.len(), 2);
}

#[test]
fn repeated_sync_failures_escalate_to_device_lost() {
    let mut dev = MockDevice::new(2);
    let policy = SyncPolicy {
        fence_timeout: Duration::from_millis(10),
        max_sync_failures: 3,
    };
    let mut sync = engine(1, policy);
    sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap();

    dev.wait_script.extend([WaitReply::Fail; 3]);
    let first = sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap_err();
    let second = sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap_err();
    let third = sync.run_frame(&mut dev, |_, _, _| Ok(())).unwrap_err();

    assert!(matches!(first, FrameError::Sync { failures: 1, .. }));
    assert!(matches!(second, FrameError::Sync { failures: 2, .. }));
    assert!(matches!(third, FrameError::DeviceLost { failures: 3, .. }));
    assert!(third.is_fatal());
}

#[test]
fn record_failure_is_fatal_and_nothing_is_submitted() {
    let mut dev = MockDevice::new(2);
    let mut sync = engine(2, SyncPolicy::default());
    let err = sync
        .run_frame(&mut dev, |_, _, _| Err(MockError("record")))
        .unwrap_err();
    assert!(matches!(err, FrameError::Record(_)));
    assert!(err.is_fatal());
    assert_eq!(dev.submits, 0);
    assert!(!sync.slots()[0].fence().is_submitted());
}

#[test]
fn wait_all_drains_every_slot_then_reset_starts_over() {
    let mut dev = MockDevice::new(3);
    let mut sync = engine(2, SyncPolicy::default());
    for _ in 0..3 {
        sync.run_frame(&mut dev, record_checked).unwrap();
    }
    assert_eq!(sync.outstanding(), 2);

    sync.wait_all(&mut dev).unwrap();
    assert_eq!(sync.outstanding(), 0);
    assert!(dev.in_flight.is_empty());

    sync.reset_after_idle();
    assert_eq!(sync.current_slot(), 0);
    assert!(sync
        .slots()
        .iter()
        .all(|s| s.state() == SlotState::Idle && !s.fence().is_submitted()));
}

#[test]
fn failed_fence_reset_skips_frame_and_leaves_slot_reusable() {
    let mut dev = MockDevice::new(2);
    dev.reset_failures = 1;
    let mut sync = engine(1, SyncPolicy::default());

    let err = sync.run_frame(&mut dev, record_checked).unwrap_err();
    assert!(matches!(err, FrameError::Sync { failures: 1, .. }));
    assert!(!err.is_fatal());
    assert_eq!(dev.acquires, 0);
    assert!(!sync.slots()[0].image_available().is_signaled());
    assert!(dev.pending_semaphores.is_empty());

    let outcome = sync.run_frame(&mut dev, record_checked).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { slot: 0, .. }));
    assert_eq!((dev.submits, dev.presents), (1, 1));
    sync.run_frame(&mut dev, record_checked).unwrap();
    assert_eq!(dev.presents, 2);
}

#[test]
fn submit_failure_is_fatal_and_nothing_is_presented() {
    let mut dev = MockDevice::new(2);
    dev.fail_submit = true;
    let mut sync = engine(2, SyncPolicy::default());

    let err = sync.run_frame(&mut dev, record_checked).unwrap_err();
    assert!(matches!(err, FrameError::Submit(_)));
    assert!(err.is_fatal());
    assert_eq!((dev.submits, dev.presents), (0, 0));
    assert_eq!(dev.recorded.len(), 1);
    assert_eq!(sync.frames_presented(), 0);
}

#[test]
fn present_failure_is_fatal_and_not_retried() {
    let mut dev = MockDevice::new(2);
    dev.fail_present = true;
    let mut sync = engine(2, SyncPolicy::default());

    let err = sync.run_frame(&mut dev, record_checked).unwrap_err();
    assert!(matches!(err, FrameError::Present(_)));
    assert!(err.is_fatal());
    assert_eq!(dev.submits, 1);
    assert_eq!(dev.presents, 0);
    assert_eq!(sync.slots()[0].state(), SlotState::Presenting);
    assert!(sync.slots()[0].fence().is_submitted());
    assert_eq!(sync.current_slot(), 0);
}

#[test]
fn suboptimal_acquire_still_presents_but_requests_rebuild() {
    let mut dev = MockDevice::new(3);
    dev.suboptimal_acquires.insert(2);
    let mut sync = engine(2, SyncPolicy::default());

    let first = sync.run_frame(&mut dev, record_checked).unwrap();
    let second = sync.run_frame(&mut dev, record_checked).unwrap();
    assert!(matches!(
        first,
        FrameOutcome::Presented {
            needs_rebuild: false,
            ..
        }
    ));
    assert!(matches!(
        second,
        FrameOutcome::Presented {
            slot: 1,
            needs_rebuild: true,
            ..
        }
    ));
    assert_eq!(dev.presents, 2);
}
