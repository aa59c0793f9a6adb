use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::collector::RuntimeCounters;
use crate::config::Config;
use crate::delta::DeltaTracker;
use crate::profiler::memory::MIB;
use crate::profiler::{HostLoadTracker, Profiler, ProfilerError, Sampler, ratio};
use crate::reporter::Reporter;

pub const NAME: &str = "RuntimeProfiler";

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Combined CPU, GC and memory view of the runtime.
///
/// Minor and major collection times are accumulated from GC notifications,
/// which arrive on the provider's thread, and drained on every sample.
pub struct RuntimeProfiler {
    runtime: Arc<dyn RuntimeCounters>,
    reporter: Arc<dyn Reporter>,
    reserved_bytes: f64,
    cpu_ms: DeltaTracker,
    gc_ms: DeltaTracker,
    host_load: HostLoadTracker,
    minor_gc_ms: Arc<AtomicI64>,
    major_gc_ms: Arc<AtomicI64>,
}

impl RuntimeProfiler {
    pub fn new(
        config: &Config,
        runtime: Arc<dyn RuntimeCounters>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ProfilerError> {
        let reserved_mb = config.get_i64_or("reservedMB", 0)?;
        Ok(Self {
            runtime,
            reporter,
            reserved_bytes: reserved_mb as f64 * MIB,
            cpu_ms: DeltaTracker::new(),
            gc_ms: DeltaTracker::new(),
            host_load: HostLoadTracker::default(),
            minor_gc_ms: Arc::new(AtomicI64::new(0)),
            major_gc_ms: Arc::new(AtomicI64::new(0)),
        })
    }
}

impl Profiler for RuntimeProfiler {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, _now_ms: i64) -> Result<(), ProfilerError> {
        self.cpu_ms
            .observe(self.runtime.process_cpu_time_ns()? / NANOS_PER_MILLI);
        self.gc_ms.observe(self.runtime.gc_time_ms()?);
        self.host_load.observe(self.runtime.host_cpu_ticks()?);

        let minor = Arc::clone(&self.minor_gc_ms);
        let major = Arc::clone(&self.major_gc_ms);
        self.runtime.subscribe_gc_events(
            Box::new(move |ms| {
                minor.fetch_add(ms, Ordering::Relaxed);
            }),
            Box::new(move |ms| {
                major.fetch_add(ms, Ordering::Relaxed);
            }),
        )?;
        Ok(())
    }

    fn stop(&mut self, _now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }
}

impl Sampler for RuntimeProfiler {
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        let cpu_time_ms = self.runtime.process_cpu_time_ns()? / NANOS_PER_MILLI;
        let gc_time_ms = self.runtime.gc_time_ms()?;
        let host_ticks = self.runtime.host_cpu_ticks()?;
        let heap = self.runtime.heap_usage()?;
        let non_heap = self.runtime.non_heap_usage()?;
        let cpus = self.runtime.available_cpus().max(1) as f64;
        let minor_gc_ms = self.minor_gc_ms.swap(0, Ordering::Relaxed);
        let major_gc_ms = self.major_gc_ms.swap(0, Ordering::Relaxed);

        let elapsed = delta_ms as f64;
        let cores = ratio(self.cpu_ms.observe(cpu_time_ms) as f64, elapsed);
        let gc_ratio = ratio(self.gc_ms.observe(gc_time_ms) as f64, elapsed);
        let host_load = self.host_load.observe(host_ticks);

        let r = &self.reporter;
        r.report_event("RUNTIME_CPU_USAGE", "", cores / cpus, now_ms);
        r.report_event("RUNTIME_CORES_USAGE", "", cores, now_ms);
        r.report_event("RUNTIME_HOST_CPU_USAGE", "", host_load, now_ms);
        r.report_event("RUNTIME_HOST_CORES_USAGE", "", host_load * cpus, now_ms);

        r.report_event("RUNTIME_GC_RATIO", "", gc_ratio, now_ms);
        r.report_event("RUNTIME_MINOR_GC_RATIO", "", ratio(minor_gc_ms as f64, elapsed), now_ms);
        r.report_event("RUNTIME_MAJOR_GC_RATIO", "", ratio(major_gc_ms as f64, elapsed), now_ms);

        r.report_event("RUNTIME_HEAP_MEMORY_USED_BYTES", "", heap.used as f64, now_ms);
        r.report_event("RUNTIME_HEAP_MEMORY_COMMITTED_BYTES", "", heap.committed as f64, now_ms);
        r.report_event("RUNTIME_OFF_HEAP_MEMORY_USED_BYTES", "", non_heap.used as f64, now_ms);
        r.report_event(
            "RUNTIME_OFF_HEAP_MEMORY_COMMITTED_BYTES",
            "",
            non_heap.committed as f64,
            now_ms,
        );
        r.report_event("RUNTIME_MEMORY_RESERVED_BYTES", "", self.reserved_bytes, now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FakeRuntime, MemoryUsage};
    use crate::reporter::MemoryReporter;

    fn setup(runtime: FakeRuntime) -> (Arc<FakeRuntime>, Arc<MemoryReporter>, RuntimeProfiler) {
        let runtime = Arc::new(runtime);
        let reporter = Arc::new(MemoryReporter::new());
        let profiler =
            RuntimeProfiler::new(&Config::default(), runtime.clone(), reporter.clone()).unwrap();
        (runtime, reporter, profiler)
    }

    #[test]
    fn gc_notifications_are_drained_per_sample() {
        let (runtime, reporter, mut profiler) = setup(FakeRuntime::new(2));
        profiler.start(0).unwrap();

        runtime.emit_minor_gc(30);
        runtime.emit_minor_gc(20);
        runtime.emit_major_gc(250);
        profiler.sample(500, 500).unwrap();
        assert_eq!(reporter.last_value("RUNTIME_MINOR_GC_RATIO"), Some(0.1));
        assert_eq!(reporter.last_value("RUNTIME_MAJOR_GC_RATIO"), Some(0.5));

        profiler.sample(1000, 500).unwrap();
        assert_eq!(reporter.last_value("RUNTIME_MINOR_GC_RATIO"), Some(0.0));
        assert_eq!(reporter.last_value("RUNTIME_MAJOR_GC_RATIO"), Some(0.0));
    }

    #[test]
    fn cpu_and_memory_metrics() {
        let (runtime, reporter, mut profiler) = setup(FakeRuntime::new(4));
        profiler.start(0).unwrap();

        runtime.set_cpu_time_ns(1000 * NANOS_PER_MILLI);
        runtime.set_gc_time_ms(50);
        runtime.set_host_ticks(100, 400);
        runtime.set_heap(MemoryUsage {
            used: 10,
            committed: 20,
            max: -1,
        });
        profiler.sample(1000, 1000).unwrap();

        assert_eq!(reporter.last_value("RUNTIME_CORES_USAGE"), Some(1.0));
        assert_eq!(reporter.last_value("RUNTIME_CPU_USAGE"), Some(0.25));
        assert_eq!(reporter.last_value("RUNTIME_HOST_CPU_USAGE"), Some(0.25));
        assert_eq!(reporter.last_value("RUNTIME_HOST_CORES_USAGE"), Some(1.0));
        assert_eq!(reporter.last_value("RUNTIME_GC_RATIO"), Some(0.05));
        assert_eq!(reporter.last_value("RUNTIME_HEAP_MEMORY_USED_BYTES"), Some(10.0));
        assert_eq!(reporter.last_value("RUNTIME_HEAP_MEMORY_COMMITTED_BYTES"), Some(20.0));
        assert_eq!(reporter.last_value("RUNTIME_MEMORY_RESERVED_BYTES"), Some(0.0));
        assert_eq!(reporter.events().len(), 12);
    }

    #[test]
    fn unsupported_gc_subscription_keeps_sampling() {
        let (_runtime, reporter, mut profiler) = setup(FakeRuntime::without_gc_events(1));
        assert!(profiler.start(0).is_err());
        profiler.sample(1000, 1000).unwrap();
        assert_eq!(reporter.last_value("RUNTIME_MINOR_GC_RATIO"), Some(0.0));
    }
}
