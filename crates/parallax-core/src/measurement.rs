//! Monotonic timing for observations
//!
//! A [`Stopwatch`] anchors a start instant on a [`Clock`]. A [`Measurement`]
//! reads that stopwatch once a block has finished:
//! - [`Measurement::benchmark`] starts a fresh stopwatch
//! - [`Measurement::remeasure`] keeps the original start, so elapsed time
//!   spans every stage run so far
//! - [`Measurement::preserve`] runs a block without touching elapsed time

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic instants
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall-independent monotonic clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Lets timing assertions run without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Move the clock forward by whole milliseconds
    #[inline]
    pub fn tick(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Mutable timer anchored at a start instant
#[derive(Debug, Clone)]
pub struct Stopwatch {
    clock: Arc<dyn Clock>,
    start: Instant,
}

impl Stopwatch {
    /// Start a stopwatch on the given clock
    #[must_use]
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self { clock, start }
    }

    /// Re-anchor the stopwatch at the current instant
    pub fn reset(&mut self) {
        self.start = self.clock.now();
    }

    /// Time since the start instant
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.start)
    }

    /// Time since the start instant, rounded to the nearest millisecond
    #[inline]
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        round_millis(self.elapsed())
    }
}

/// Immutable reading of a [`Stopwatch`]
#[derive(Debug, Clone)]
pub struct Measurement {
    stopwatch: Stopwatch,
    elapsed_ms: u64,
}

impl Measurement {
    /// Run `block` on a fresh stopwatch and read it afterwards
    pub fn benchmark<R>(clock: Arc<dyn Clock>, block: impl FnOnce() -> R) -> (R, Self) {
        let stopwatch = Stopwatch::start(clock);
        let out = block();
        (out, Self::read(stopwatch))
    }

    /// Run `block` and read the original stopwatch again
    ///
    /// Elapsed time covers everything since the first benchmark, so a later
    /// stage (such as settling an awaited value) is counted exactly once.
    pub fn remeasure<R>(&self, block: impl FnOnce() -> R) -> (R, Self) {
        let out = block();
        (out, Self::read(self.stopwatch.clone()))
    }

    /// Run `block` and keep this measurement unchanged
    pub fn preserve<R>(&self, block: impl FnOnce() -> R) -> (R, Self) {
        let out = block();
        (out, self.clone())
    }

    /// Elapsed milliseconds at the time of reading
    #[inline]
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Elapsed time at the time of reading
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    fn read(stopwatch: Stopwatch) -> Self {
        let elapsed_ms = stopwatch.elapsed_ms();
        Self {
            stopwatch,
            elapsed_ms,
        }
    }
}

/// Round to the nearest millisecond, halves away from zero
pub(crate) fn round_millis(duration: Duration) -> u64 {
    let millis = (duration.as_nanos() + 500_000) / 1_000_000;
    u64::try_from(millis).unwrap_or(u64::MAX)
}
