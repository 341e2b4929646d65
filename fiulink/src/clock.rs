//! Millisecond time sources.
//!
//! The command layer only ever compares two readings, so a 32-bit counter
//! that wraps after ~49 days is fine as long as differences are taken with
//! [`elapsed_ms`].

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU32, Ordering},
};
use std::time::Instant;

/// Monotonic millisecond counter.
pub trait Clock {
    /// Current reading in milliseconds.
    fn now_ms(&self) -> u32;
}

/// Wrap-around safe difference `now - since`.
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Anchor for [`SystemClock`], fixed on first use.
static CLOCK_START: OnceLock<Instant> = OnceLock::new();

/// Process-relative monotonic clock backed by [`Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)] // wraps by design, see elapsed_ms
    fn now_ms(&self) -> u32 {
        let start = CLOCK_START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u32
    }
}

/// Hand-driven clock for tests and simulation.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Clock starting at `start_ms`.
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    /// Jump to an absolute reading.
    pub fn set(&self, now_ms: u32) {
        self.now.store(now_ms, Ordering::Relaxed);
    }

    /// Move forward by `delta_ms`, wrapping at `u32::MAX`.
    pub fn advance(&self, delta_ms: u32) {
        let now = self.now.load(Ordering::Relaxed);
        self.now.store(now.wrapping_add(delta_ms), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}
