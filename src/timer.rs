//! Monotonic time and sleeping for the main loop.
//!
//! Everything that waits goes through [`Timer`], so the state machine and the
//! animations can be driven by a fake clock in tests.

use std::thread;
use std::time::{Duration, Instant};

/// Millisecond clock plus a blocking sleep.
pub trait Timer {
    /// Milliseconds since an arbitrary fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);

    /// Milliseconds elapsed since `since`, saturating at zero.
    fn elapsed_since(&self, since: u64) -> u64 {
        self.now_ms().saturating_sub(since)
    }
}

/// Wall-clock timer backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    origin: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
