//! Audio clock sources.
//!
//! The transport derives every displayed and seek-relative position from a
//! clock query plus session bookkeeping, so the clock is injectable: real
//! playback uses a monotonic system clock, tests use a manually advanced one.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// A monotonic clock reporting seconds since some fixed origin.
pub trait AudioClock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// System clock backed by `Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Set the absolute clock time.
    pub fn set(&self, secs: f64) {
        *self.now.lock() = secs;
    }
}

impl AudioClock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock()
    }
}
