//! Monotonic time sources
//!
//! Wall-clock time is deliberately used over CPU time: the goal is to show
//! where an application spends real time, sleeps and I/O waits included,
//! not what keeps the CPU busy. The `Clock` trait is the seam that lets the
//! replay host and the tests drive the tracer with recorded timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Nanosecond-resolution monotonic time source.
///
/// `now_ns` must be non-decreasing within a thread. No synchronization
/// across cores is required; skew between threads is tolerated because
/// times are only summed per site, never ordered.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Real monotonic clock, anchored at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Externally driven clock used by the replay host and by tests.
///
/// `set` clamps to the current value so the clock never runs backwards even
/// if a recorded trace carries out-of-order timestamps.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock to `ns`, keeping it monotonic.
    pub fn set(&self, ns: u64) {
        self.now.fetch_max(ns, Ordering::Relaxed);
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
