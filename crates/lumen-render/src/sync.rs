// SPDX-License-Identifier: CEPL-1.0
//! Logical state carried next to raw synchronization handles.
//!
//! The GPU never tells us when a binary semaphore was consumed, and a fence
//! only tells us about completion when asked. These wrappers track what the
//! CPU side has *requested* so that misuse is caught before it reaches the
//! driver: a fence is submitted at most once per wait, a semaphore is
//! signaled at most once per wait.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncViolation {
    #[error("fence submitted again before it was waited on and reset")]
    FenceAlreadySubmitted,
    #[error("semaphore signaled again before its previous signal was waited on")]
    SemaphoreAlreadySignaled,
    #[error("wait on a semaphore that has no pending signal")]
    SemaphoreNotSignaled,
    #[error("command buffer re-recorded while its previous submission is in flight")]
    CommandBufferInFlight,
}

/// CPU-GPU completion signal.
///
/// `submitted == true` means a queue submission will signal the fence and
/// nothing it references may be reused until the CPU has waited on it.
#[derive(Debug, Clone)]
pub struct Fence<H> {
    raw: H,
    submitted: bool,
    submissions: u64,
}

impl<H: Copy> Fence<H> {
    pub fn new(raw: H) -> Self {
        Self {
            raw,
            submitted: false,
            submissions: 0,
        }
    }

    pub fn raw(&self) -> H {
        self.raw
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Total number of submissions this fence has tracked.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// false -> true. Rejects a second submission without an intervening wait.
    pub fn mark_submitted(&mut self) -> Result<(), SyncViolation> {
        if self.submitted {
            return Err(SyncViolation::FenceAlreadySubmitted);
        }
        self.submitted = true;
        self.submissions += 1;
        Ok(())
    }

    /// true -> false after a successful CPU wait (or when the submission was
    /// abandoned before reaching a queue).
    pub fn mark_waited(&mut self) {
        self.submitted = false;
    }
}

/// GPU-GPU ordering signal. Every signal must be consumed by exactly one wait.
#[derive(Debug, Clone)]
pub struct Semaphore<H> {
    raw: H,
    signaled: bool,
}

impl<H: Copy> Semaphore<H> {
    pub fn new(raw: H) -> Self {
        Self {
            raw,
            signaled: false,
        }
    }

    pub fn raw(&self) -> H {
        self.raw
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    pub fn signal(&mut self) -> Result<(), SyncViolation> {
        if self.signaled {
            return Err(SyncViolation::SemaphoreAlreadySignaled);
        }
        self.signaled = true;
        Ok(())
    }

    pub fn consume(&mut self) -> Result<(), SyncViolation> {
        if !self.signaled {
            return Err(SyncViolation::SemaphoreNotSignaled);
        }
        self.signaled = false;
        Ok(())
    }

    /// Forget a pending signal. Only valid once the device is idle.
    pub fn clear(&mut self) {
        self.signaled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_rejects_double_submit() {
        let mut fence = Fence::new(7u64);
        fence.mark_submitted().unwrap();
        assert_eq!(
            fence.mark_submitted(),
            Err(SyncViolation::FenceAlreadySubmitted)
        );
        fence.mark_waited();
        fence.mark_submitted().unwrap();
        assert_eq!(fence.submissions(), 2);
        assert_eq!(fence.raw(), 7);
    }

    #[test]
    fn semaphore_pairs_signal_with_wait() {
        let mut sem = Semaphore::new(1u32);
        assert_eq!(sem.consume(), Err(SyncViolation::SemaphoreNotSignaled));
        sem.signal().unwrap();
        assert_eq!(sem.signal(), Err(SyncViolation::SemaphoreAlreadySignaled));
        sem.consume().unwrap();
        assert!(!sem.is_signaled());
    }
}
