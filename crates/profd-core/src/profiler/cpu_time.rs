use std::sync::Arc;

use crate::collector::RuntimeCounters;
use crate::delta::DeltaTracker;
use crate::profiler::{HostLoadTracker, Profiler, ProfilerError, Sampler, ratio};
use crate::reporter::Reporter;

pub const NAME: &str = "CPUTimeProfiler";

const NANOS_PER_MILLI: i64 = 1_000_000;

/// CPU consumed by the process and share of it spent in garbage collection.
///
/// CPU usage is expressed in cores (`*_SCALED_*`) and as a fraction of the
/// available cores. GC ratio is GC time over wall-clock time.
pub struct CpuTimeProfiler {
    runtime: Arc<dyn RuntimeCounters>,
    reporter: Arc<dyn Reporter>,
    cpu_ms: DeltaTracker,
    gc_ms: DeltaTracker,
    host_load: HostLoadTracker,
}

impl CpuTimeProfiler {
    pub fn new(runtime: Arc<dyn RuntimeCounters>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            runtime,
            reporter,
            cpu_ms: DeltaTracker::new(),
            gc_ms: DeltaTracker::new(),
            host_load: HostLoadTracker::default(),
        }
    }
}

impl Profiler for CpuTimeProfiler {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, _now_ms: i64) -> Result<(), ProfilerError> {
        self.cpu_ms
            .observe(self.runtime.process_cpu_time_ns()? / NANOS_PER_MILLI);
        self.gc_ms.observe(self.runtime.gc_time_ms()?);
        self.host_load.observe(self.runtime.host_cpu_ticks()?);
        Ok(())
    }

    fn stop(&mut self, _now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }
}

impl Sampler for CpuTimeProfiler {
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        let cpu_time_ms = self.runtime.process_cpu_time_ns()? / NANOS_PER_MILLI;
        let gc_time_ms = self.runtime.gc_time_ms()?;
        let host_ticks = self.runtime.host_cpu_ticks()?;
        let cpus = self.runtime.available_cpus().max(1) as f64;

        let system_load = self.host_load.observe(host_ticks);

        let cores = ratio(self.cpu_ms.observe(cpu_time_ms) as f64, delta_ms as f64);
        let gc_ratio = ratio(self.gc_ms.observe(gc_time_ms) as f64, delta_ms as f64);

        let r = &self.reporter;
        r.report_event("GC_RATIO", "", gc_ratio, now_ms);
        r.report_event("GC_SCALED_CPU_USAGE", "", gc_ratio * cores, now_ms);
        r.report_event("PROCESS_CPU_USAGE", "", cores / cpus, now_ms);
        r.report_event("PROCESS_SCALED_CPU_USAGE", "", cores, now_ms);
        r.report_event("SYSTEM_CPU_LOAD", "", system_load, now_ms);
        r.report_event("SYSTEM_SCALED_CPU_USAGE", "", system_load * cpus, now_ms);
        Ok(())
    }
}
