use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::profiler::{Aggregator, Profiler, ProfilerError, Sampler, Schedule};

/// Start/stop as seen by the agent. Never fails: errors stay in the driver.
pub trait Lifecycle: Send {
    fn name(&self) -> &str;
    fn start(&mut self);
    fn stop(&mut self);
}

/// A driver that also runs on a timer.
pub trait Periodic: Lifecycle {
    fn interval(&self) -> Duration;
    fn tick(&mut self);
}

/// Runs one profiler call, logging errors and panics instead of propagating.
fn guarded(profiler: &str, call: &str, f: impl FnOnce() -> Result<(), ProfilerError>) {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{}: {} failed: {}", profiler, call, e),
        Err(payload) => error!(
            "{}: {} panicked: {}",
            profiler,
            call,
            panic_message(&*payload)
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Drives a profiler with no periodic work.
pub struct OneShotDriver {
    name: String,
    profiler: Box<dyn Profiler>,
    clock: Arc<dyn Clock>,
    started_ms: i64,
}

impl OneShotDriver {
    pub fn new(profiler: Box<dyn Profiler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: profiler.name().to_string(),
            profiler,
            started_ms: clock.now_ms(),
            clock,
        }
    }
}

impl Lifecycle for OneShotDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) {
        let now = self.clock.now_ms();
        self.started_ms = now;
        guarded(&self.name, "start", || self.profiler.start(now));
    }

    fn stop(&mut self) {
        let now = self.clock.now_ms();
        let delta = now - self.started_ms;
        guarded(&self.name, "stop", || self.profiler.stop(now, delta));
    }
}

/// Drives a sampler: computes the elapsed time between samples and takes a
/// final sample on stop.
pub struct SamplingDriver<S: Sampler + ?Sized> {
    name: String,
    sampler: Box<S>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    last_sample_ms: AtomicI64,
}

impl<S: Sampler + ?Sized> SamplingDriver<S> {
    /// `profiling_ms` is clamped to at least 1 ms.
    pub fn new(sampler: Box<S>, profiling_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: sampler.name().to_string(),
            sampler,
            interval: Duration::from_millis(profiling_ms.max(1) as u64),
            last_sample_ms: AtomicI64::new(clock.now_ms()),
            clock,
        }
    }

    /// Returns `(now, now - previous sample)` and records `now` as the
    /// previous sample.
    fn advance(&self) -> (i64, i64) {
        let now = self.clock.now_ms();
        let previous = self.last_sample_ms.swap(now, Ordering::SeqCst);
        (now, now - previous)
    }

    fn sample(&mut self) -> (i64, i64) {
        let (now, delta) = self.advance();
        debug!("{}: sample after {} ms", self.name, delta);
        guarded(&self.name, "sample", || self.sampler.sample(now, delta));
        (now, delta)
    }
}

impl<S: Sampler + ?Sized> Lifecycle for SamplingDriver<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) {
        let now = self.clock.now_ms();
        self.last_sample_ms.store(now, Ordering::SeqCst);
        guarded(&self.name, "start", || self.sampler.start(now));
    }

    fn stop(&mut self) {
        let (now, delta) = self.sample();
        guarded(&self.name, "stop", || self.sampler.stop(now, delta));
    }
}

impl<S: Sampler + ?Sized> Periodic for SamplingDriver<S> {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn tick(&mut self) {
        self.sample();
    }
}

/// Sampling driver that also calls `report` every `reportingMs / profilingMs`
/// samples, and once more on stop.
pub struct AggregatingDriver {
    inner: SamplingDriver<dyn Aggregator>,
    report_after: u64,
    samples: u64,
}

impl AggregatingDriver {
    pub fn new(aggregator: Box<dyn Aggregator>, schedule: Schedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: SamplingDriver::new(aggregator, schedule.profiling_ms, clock),
            report_after: schedule.report_after(),
            samples: 0,
        }
    }

    fn report(&mut self) {
        self.samples = 0;
        let inner = &mut self.inner;
        guarded(&inner.name, "report", || inner.sampler.report());
    }
}

impl Lifecycle for AggregatingDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&mut self) {
        self.inner.start();
    }

    fn stop(&mut self) {
        self.inner.stop();
        self.report();
    }
}

impl Periodic for AggregatingDriver {
    fn interval(&self) -> Duration {
        self.inner.interval()
    }

    fn tick(&mut self) {
        self.inner.tick();
        self.samples += 1;
        if self.samples >= self.report_after {
            self.report();
        }
    }
}
