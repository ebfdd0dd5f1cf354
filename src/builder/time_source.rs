//! Millisecond clocks for the auto-save debounce.
//!
//! The builder never reads the clock itself; it asks a [`TimeSource`]. The
//! async session uses [`TokioTimeSource`] so paused test runtimes can drive
//! the debounce deterministically, and unit tests use [`FakeTimeSource`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

/// A monotonic millisecond clock.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn current_time_ms(&self) -> u64;
}

/// Wall-clock source measured from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for MonotonicTimeSource {
    fn current_time_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Source that follows the tokio clock, including when it is paused.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSource {
    origin: tokio::time::Instant,
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl TimeSource for TokioTimeSource {
    fn current_time_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven source. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct FakeTimeSource {
    time: Arc<AtomicU64>,
}

impl FakeTimeSource {
    /// A source reading `initial_ms`.
    #[must_use]
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new(initial_ms)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, delta_ms: u64) {
        self.time.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Sets the current time.
    pub fn set(&self, time_ms: u64) {
        self.time.store(time_ms, Ordering::SeqCst);
    }
}

impl TimeSource for FakeTimeSource {
    fn current_time_ms(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_time_ms(&self) -> u64 {
        (**self).current_time_ms()
    }
}
