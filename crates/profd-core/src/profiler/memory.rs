use std::sync::Arc;

use crate::collector::RuntimeCounters;
use crate::config::Config;
use crate::profiler::{Profiler, ProfilerError, Sampler};
use crate::reporter::Reporter;

pub const NAME: &str = "MemoryProfiler";

/// Bytes per MiB, for the `reservedMB` parameter.
pub(crate) const MIB: f64 = 1024.0 * 1024.0;

/// Heap and off-heap usage gauges, plus the memory reserved for the process
/// by its launcher (`reservedMB`).
pub struct MemoryProfiler {
    runtime: Arc<dyn RuntimeCounters>,
    reporter: Arc<dyn Reporter>,
    reserved_bytes: f64,
}

impl MemoryProfiler {
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
        })
    }
}

impl Profiler for MemoryProfiler {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, _now_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }

    fn stop(&mut self, _now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }
}

impl Sampler for MemoryProfiler {
    fn sample(&mut self, now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        let heap = self.runtime.heap_usage()?;
        let non_heap = self.runtime.non_heap_usage()?;

        let r = &self.reporter;
        r.report_event("HEAP_MEMORY_USED_BYTES", "", heap.used as f64, now_ms);
        r.report_event("HEAP_MEMORY_COMMITTED_BYTES", "", heap.committed as f64, now_ms);
        r.report_event("OFF_HEAP_MEMORY_USED_BYTES", "", non_heap.used as f64, now_ms);
        r.report_event("OFF_HEAP_MEMORY_COMMITTED_BYTES", "", non_heap.committed as f64, now_ms);
        r.report_event("MEMORY_RESERVED_BYTES", "", self.reserved_bytes, now_ms);
        r.report_event("HEAP_MEMORY_MAX_BYTES", "", heap.max as f64, now_ms);
        Ok(())
    }
}
