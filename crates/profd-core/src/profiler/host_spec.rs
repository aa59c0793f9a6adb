use std::path::PathBuf;
use std::sync::Arc;

use crate::collector::procfs::parser::parse_meminfo;
use crate::collector::{FileSystem, RuntimeCounters};
use crate::profiler::{Profiler, ProfilerError};
use crate::reporter::Reporter;

pub const NAME: &str = "HostSpecProfiler";

/// Reports the host's static capacity once at start, and the agent's
/// uptime at stop.
pub struct HostSpecProfiler<F: FileSystem> {
    fs: F,
    proc_root: PathBuf,
    runtime: Arc<dyn RuntimeCounters>,
    reporter: Arc<dyn Reporter>,
    started_ms: Option<i64>,
}

impl<F: FileSystem> HostSpecProfiler<F> {
    pub fn new(
        fs: F,
        proc_root: impl Into<PathBuf>,
        runtime: Arc<dyn RuntimeCounters>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            fs,
            proc_root: proc_root.into(),
            runtime,
            reporter,
            started_ms: None,
        }
    }
}

impl<F: FileSystem> Profiler for HostSpecProfiler<F> {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, now_ms: i64) -> Result<(), ProfilerError> {
        self.started_ms = Some(now_ms);
        let cpus = self.runtime.available_cpus();
        self.reporter
            .report_event("HOST_CPU_COUNT", "", cpus as f64, now_ms);

        // CPU count is still useful when meminfo is missing.
        let meminfo = parse_meminfo(&self.fs.read_to_string(&self.proc_root.join("meminfo"))?)?;
        self.reporter.report_event(
            "HOST_MEMORY_TOTAL_BYTES",
            "",
            (meminfo.mem_total * 1024) as f64,
            now_ms,
        );
        Ok(())
    }

    fn stop(&mut self, now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        if let Some(started_ms) = self.started_ms.take() {
            self.reporter
                .report_event("AGENT_UPTIME_MS", "", (now_ms - started_ms).max(0) as f64, now_ms);
        }
        Ok(())
    }
}
