//! Delta computation for monotonic counters.
//!
//! Cumulative counters (CPU ticks, GC milliseconds, bytes read) are only
//! meaningful as the increase between two observations. The first observation
//! has no predecessor, so it seeds the tracker and yields zero instead of the
//! whole lifetime total.

/// Tracks the previous value of one monotonic counter.
///
/// Decreases (counter reset, exited child process, clock anomaly) are clamped
/// to zero and the lower value becomes the new baseline. Gauges that may go
/// down legitimately must not be fed through a tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaTracker {
    previous: i64,
    initialized: bool,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` and returns the non-negative increase since the last call.
    pub fn observe(&mut self, value: i64) -> i64 {
        if !self.initialized {
            self.previous = value;
            self.initialized = true;
            return 0;
        }
        let delta = value.saturating_sub(self.previous);
        self.previous = value;
        delta.max(0)
    }

    /// Same as [`observe`](Self::observe) for unsigned kernel counters.
    pub fn observe_u64(&mut self, value: u64) -> i64 {
        self.observe(i64::try_from(value).unwrap_or(i64::MAX))
    }

    /// Last recorded value, `None` before the first observation.
    pub fn previous(&self) -> Option<i64> {
        self.initialized.then_some(self.previous)
    }
}
