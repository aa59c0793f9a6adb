//! Profilers: units of measurement.
//!
//! Capabilities compose instead of inheriting:
//!
//! - [`Profiler`]: `start` and `stop` only. Run once, at agent start and
//!   shutdown.
//! - [`Sampler`]: adds `sample`, called on every tick of its own timer.
//! - [`Aggregator`]: adds `report`, which flushes accumulated state on a
//!   slower cadence.
//!
//! Profilers never handle timing or failures themselves. The drivers in
//! [`crate::worker`] compute the elapsed time, call the profiler and log
//! whatever it returns.

mod cpu_time;
mod host;
mod host_spec;
mod memory;
mod procfs;
mod registry;
mod runtime;
mod stack_trace;
mod trace_cache;

use std::fmt;

use crate::collector::{HostCpuTicks, ProviderError};
use crate::config::{Config, ConfigError};
use crate::delta::DeltaTracker;

pub use cpu_time::CpuTimeProfiler;
pub use host::HostProfiler;
pub use host_spec::HostSpecProfiler;
pub use memory::MemoryProfiler;
pub use procfs::ProcFsProfiler;
pub use registry::{ProfilerRegistry, Providers};
pub use runtime::RuntimeProfiler;
pub use stack_trace::{StackTraceProfiler, trace_signature};
pub use trace_cache::{TraceCache, TraceEntry};

pub const DEFAULT_PROFILING_MS: i64 = 1000;
pub const DEFAULT_REPORTING_MS: i64 = 10_000;

#[derive(Debug)]
pub enum ProfilerError {
    /// A counter source failed.
    Provider(ProviderError),
    /// A profiler parameter is invalid.
    Config(ConfigError),
    /// The profiler cannot run on this platform.
    Unsupported(String),
}

impl fmt::Display for ProfilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfilerError::Provider(e) => write!(f, "provider error: {}", e),
            ProfilerError::Config(e) => write!(f, "{}", e),
            ProfilerError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
        }
    }
}

impl std::error::Error for ProfilerError {}

impl From<ProviderError> for ProfilerError {
    fn from(e: ProviderError) -> Self {
        ProfilerError::Provider(e)
    }
}

impl From<ConfigError> for ProfilerError {
    fn from(e: ConfigError) -> Self {
        ProfilerError::Config(e)
    }
}

impl From<std::io::Error> for ProfilerError {
    fn from(e: std::io::Error) -> Self {
        ProfilerError::Provider(ProviderError::Io(e))
    }
}

impl From<crate::collector::procfs::parser::ParseError> for ProfilerError {
    fn from(e: crate::collector::procfs::parser::ParseError) -> Self {
        ProfilerError::Provider(e.into())
    }
}

/// Start/stop lifecycle shared by every profiler.
pub trait Profiler: Send {
    /// Configuration block name, e.g. `CPUTimeProfiler`.
    fn name(&self) -> &str;

    /// One-time setup. A failure is logged and the profiler keeps running.
    fn start(&mut self, now_ms: i64) -> Result<(), ProfilerError>;

    /// Teardown. For samplers the driver has already taken a final sample.
    fn stop(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError>;
}

/// A profiler driven by a periodic timer.
pub trait Sampler: Profiler {
    /// `delta_ms` is the wall-clock time since the previous sample (or since
    /// `start`). It may be zero.
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError>;
}

/// A sampler that accumulates and flushes on a secondary cadence.
pub trait Aggregator: Sampler {
    fn report(&mut self) -> Result<(), ProfilerError>;
}

/// Sampling and reporting cadence of one profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub profiling_ms: i64,
    pub reporting_ms: i64,
}

impl Schedule {
    /// Both intervals clamped to at least 1 ms.
    pub fn new(profiling_ms: i64, reporting_ms: i64) -> Self {
        Self {
            profiling_ms: profiling_ms.max(1),
            reporting_ms: reporting_ms.max(1),
        }
    }

    /// Reads `profilingMs` and `reportingMs`, falling back to the given defaults.
    pub fn from_config(
        config: &Config,
        default_profiling_ms: i64,
        default_reporting_ms: i64,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.get_i64_or("profilingMs", default_profiling_ms)?,
            config.get_i64_or("reportingMs", default_reporting_ms)?,
        ))
    }

    /// Number of samples between two reports. Never zero.
    pub fn report_after(&self) -> u64 {
        (self.reporting_ms / self.profiling_ms).max(1) as u64
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILING_MS, DEFAULT_REPORTING_MS)
    }
}

/// `num / den`, or 0 when the denominator is not positive.
pub(crate) fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Host CPU load between successive readings of cumulative ticks.
///
/// Each profiler owns one, so profilers sharing a provider never see each
/// other's readings.
#[derive(Debug, Default)]
pub(crate) struct HostLoadTracker {
    active: DeltaTracker,
    total: DeltaTracker,
}

impl HostLoadTracker {
    /// Fraction of ticks spent active since the previous call. Zero on the
    /// first call.
    pub(crate) fn observe(&mut self, ticks: HostCpuTicks) -> f64 {
        let active = self.active.observe_u64(ticks.active);
        let total = self.total.observe_u64(ticks.total);
        ratio(active as f64, total as f64).clamp(0.0, 1.0)
    }
}

/// Converts a count observed over `delta_ms` into a per-second rate.
pub(crate) fn per_second(delta: i64, delta_ms: i64) -> f64 {
    ratio(delta as f64 * 1000.0, delta_ms as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    #[test]
    fn schedule_defaults_and_overrides() {
        let config = AgentConfig::parse("reportingMs=5000,P[profilingMs=100]").unwrap();
        let schedule = Schedule::from_config(&config.profiler_config("P"), 1000, 10_000).unwrap();
        assert_eq!(schedule, Schedule::new(100, 5000));
        assert_eq!(schedule.report_after(), 50);

        let schedule = Schedule::from_config(&config.profiler_config("Q"), 20, 600_000).unwrap();
        assert_eq!(schedule.profiling_ms, 20);
        assert_eq!(schedule.reporting_ms, 5000);
    }

    #[test]
    fn schedule_is_clamped() {
        let schedule = Schedule::new(0, -5);
        assert_eq!(schedule, Schedule::new(1, 1));
        assert_eq!(schedule.report_after(), 1);
        assert_eq!(Schedule::new(1000, 10).report_after(), 1);
        assert_eq!(Schedule::new(100, 1000).report_after(), 10);
    }

    #[test]
    fn schedule_rejects_non_numbers() {
        let config = AgentConfig::parse("P[profilingMs=soon]").unwrap();
        assert!(Schedule::from_config(&config.profiler_config("P"), 1000, 10_000).is_err());
    }

    #[test]
    fn host_load_is_tracked_per_profiler() {
        use std::sync::Arc;

        use crate::collector::{MockFs, ProcRuntime, RuntimeCounters, TREE_ROOT_PID};
        use crate::reporter::MemoryReporter;

        let fs = MockFs::process_tree_host();
        let counters: Arc<dyn RuntimeCounters> =
            Arc::new(ProcRuntime::new(fs.clone(), "/proc", TREE_ROOT_PID));
        let cpu_reporter = Arc::new(MemoryReporter::new());
        let runtime_reporter = Arc::new(MemoryReporter::new());
        let mut cpu = CpuTimeProfiler::new(Arc::clone(&counters), cpu_reporter.clone());
        let mut runtime =
            RuntimeProfiler::new(&Config::default(), counters, runtime_reporter.clone()).unwrap();

        cpu.start(0).unwrap();
        // procfs has no GC subscription; the trackers are seeded anyway
        assert!(runtime.start(0).is_err());
        cpu.sample(500, 500).unwrap();
        runtime.sample(500, 500).unwrap();
        assert_eq!(cpu_reporter.last_value("SYSTEM_CPU_LOAD"), Some(0.0));
        assert_eq!(runtime_reporter.last_value("RUNTIME_HOST_CPU_USAGE"), Some(0.0));

        // 400 ticks elapsed, all of them active
        fs.add_file("/proc/stat", "cpu  1400 0 500 8000 500 0 0 0 0 0\n");
        cpu.sample(1000, 500).unwrap();
        runtime.sample(1000, 500).unwrap();
        assert_eq!(cpu_reporter.last_value("SYSTEM_CPU_LOAD"), Some(1.0));
        assert_eq!(runtime_reporter.last_value("RUNTIME_HOST_CPU_USAGE"), Some(1.0));
    }

    #[test]
    fn host_load_tracker_starts_at_zero() {
        let mut tracker = HostLoadTracker::default();
        assert_eq!(tracker.observe(HostCpuTicks { active: 500, total: 1000 }), 0.0);
        assert_eq!(tracker.observe(HostCpuTicks { active: 530, total: 1100 }), 0.3);
        // counter reset
        assert_eq!(tracker.observe(HostCpuTicks { active: 10, total: 20 }), 0.0);
    }

    #[test]
    fn guarded_division() {
        assert_eq!(ratio(5.0, 0.0), 0.0);
        assert_eq!(ratio(5.0, -1.0), 0.0);
        assert_eq!(ratio(5.0, 2.0), 2.5);
        assert_eq!(per_second(500, 250), 2000.0);
        assert_eq!(per_second(500, 0), 0.0);
    }
}
