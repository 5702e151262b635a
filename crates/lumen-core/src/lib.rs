// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports once per window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, Duration::from_secs(1))
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            window,
            frames: 0,
            since: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Drop the current count, e.g. while paused.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }

    /// Returns the frame count of the elapsed window, if one has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.since) < self.window {
            return None;
        }
        let frames = self.frames;
        self.reset(now);
        Some(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counter_reports_after_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        for _ in 0..42 {
            fps.frame();
        }
        assert_eq!(fps.poll(start + Duration::from_millis(500)), None);
        assert_eq!(fps.poll(start + Duration::from_secs(1)), Some(42));
        // count starts over after a report
        assert_eq!(fps.poll(start + Duration::from_secs(2)), Some(0));
    }

    #[test]
    fn fps_counter_reset_discards_frames() {
        let start = Instant::now();
        let mut fps = FpsCounter::with_window(start, Duration::from_millis(100));
        fps.frame();
        fps.frame();
        let later = start + Duration::from_millis(50);
        fps.reset(later);
        assert_eq!(fps.poll(later + Duration::from_millis(100)), Some(0));
    }
}
