//! Rate-limited progress reporting for long batches.

use std::time::{Duration, Instant};

/// Helper that periodically logs progress of a long batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tick {
    start: Instant,
    last: Instant,
    every: usize,
}

impl Tick {
    /// Create a new `Tick` that will trigger at most once per `every` items.
    #[inline]
    pub(crate) fn new(every: usize) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            every: every.max(1),
        }
    }

    /// Returns `true` when the supplied `count` is a multiple of `every` **and**
    /// at least 200 ms have elapsed since the previous log.
    #[inline]
    pub(crate) fn should(&mut self, count: usize) -> bool {
        const MIN_INTERVAL: Duration = Duration::from_millis(200);
        count % self.every == 0 && self.last.elapsed() >= MIN_INTERVAL
    }

    /// Record the current instant as the time of the latest log.
    #[inline]
    pub(crate) fn bump(&mut self) {
        self.last = Instant::now();
    }

    /// Processing rate in thousand items per second.
    #[inline]
    pub(crate) fn rate_kps(&self, count: usize) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        (count as f64) / 1_000.0 / elapsed
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
