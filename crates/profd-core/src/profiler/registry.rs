use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::{
    Aggregator, DEFAULT_PROFILING_MS, DEFAULT_REPORTING_MS, Profiler, ProfilerError, Sampler,
    Schedule, cpu_time, host, host_spec, memory, procfs, runtime, stack_trace,
};
use super::{
    CpuTimeProfiler, HostProfiler, HostSpecProfiler, MemoryProfiler, ProcFsProfiler,
    RuntimeProfiler, StackTraceProfiler,
};
use crate::clock::Clock;
use crate::collector::{
    FileSystem, ProcRuntime, ProcThreadDumper, RealFs, RuntimeCounters, ThreadDumper,
};
use crate::config::{AgentConfig, Config, ConfigError};
use crate::reporter::Reporter;
use crate::worker::{AggregatingDriver, Lifecycle, OneShotDriver, Periodic, SamplingDriver};

/// Counter sources handed to the profilers.
pub struct Providers<F: FileSystem> {
    pub runtime: Arc<dyn RuntimeCounters>,
    pub threads: Arc<dyn ThreadDumper>,
    pub fs: F,
    pub proc_root: PathBuf,
    /// Root of the process tree observed by `ProcFSProfiler`.
    pub pid: u32,
}

impl Providers<RealFs> {
    /// Everything read from the real procfs mounted at `proc_root`.
    pub fn from_proc(proc_root: impl Into<PathBuf>, pid: u32) -> Self {
        let proc_root = proc_root.into();
        Self {
            runtime: Arc::new(ProcRuntime::new(RealFs, proc_root.clone(), pid)),
            threads: Arc::new(ProcThreadDumper::new(RealFs, proc_root.clone(), pid)),
            fs: RealFs,
            proc_root,
            pid,
        }
    }
}

enum Built {
    OneShot(Box<dyn Profiler>),
    Sampler(Box<dyn Sampler>, Schedule),
    Aggregator(Box<dyn Aggregator>, Schedule),
}

fn build<F: FileSystem + Clone + 'static>(
    name: &str,
    params: &Config,
    providers: &Providers<F>,
    reporter: &Arc<dyn Reporter>,
) -> Result<Option<Built>, ProfilerError> {
    let schedule = || Schedule::from_config(params, DEFAULT_PROFILING_MS, DEFAULT_REPORTING_MS);
    let counters = Arc::clone(&providers.runtime);
    let reporter = Arc::clone(reporter);

    let built = match name {
        cpu_time::NAME => Built::Sampler(
            Box::new(CpuTimeProfiler::new(counters, reporter)),
            schedule()?,
        ),
        memory::NAME => Built::Sampler(
            Box::new(MemoryProfiler::new(params, counters, reporter)?),
            schedule()?,
        ),
        runtime::NAME => Built::Sampler(
            Box::new(RuntimeProfiler::new(params, counters, reporter)?),
            schedule()?,
        ),
        procfs::NAME => Built::Sampler(
            Box::new(ProcFsProfiler::new(
                providers.fs.clone(),
                providers.proc_root.clone(),
                providers.pid,
                reporter,
            )?),
            schedule()?,
        ),
        host::NAME => Built::Sampler(
            Box::new(HostProfiler::new(
                providers.fs.clone(),
                providers.proc_root.clone(),
                reporter,
            )?),
            schedule()?,
        ),
        stack_trace::NAME => Built::Aggregator(
            Box::new(StackTraceProfiler::new(
                Arc::clone(&providers.threads),
                reporter,
            )),
            Schedule::from_config(
                params,
                stack_trace::DEFAULT_PROFILING_MS,
                stack_trace::DEFAULT_REPORTING_MS,
            )?,
        ),
        host_spec::NAME => Built::OneShot(Box::new(HostSpecProfiler::new(
            providers.fs.clone(),
            providers.proc_root.clone(),
            counters,
            reporter,
        ))),
        _ => return Ok(None),
    };
    Ok(Some(built))
}

/// The profilers of one agent, already wrapped in their drivers.
pub struct ProfilerRegistry {
    clock: Arc<dyn Clock>,
    periodic: Vec<Box<dyn Periodic>>,
    one_shot: Vec<Box<dyn Lifecycle>>,
}

impl ProfilerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            periodic: Vec::new(),
            one_shot: Vec::new(),
        }
    }

    /// Instantiates every profiler enabled in `config`.
    ///
    /// Unknown names and profilers unsupported on this platform are logged and
    /// skipped. An invalid parameter fails the whole registry.
    pub fn from_config<F: FileSystem + Clone + 'static>(
        config: &AgentConfig,
        providers: Providers<F>,
        reporter: Arc<dyn Reporter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new(clock);
        for name in config.profiler_names() {
            let params = config.profiler_config(name);
            match build(name, &params, &providers, &reporter) {
                Ok(Some(Built::OneShot(p))) => registry.add_one_shot(p),
                Ok(Some(Built::Sampler(p, schedule))) => registry.add_sampler(p, schedule),
                Ok(Some(Built::Aggregator(p, schedule))) => registry.add_aggregator(p, schedule),
                Ok(None) => warn!("Unknown profiler '{}', ignoring", name),
                Err(ProfilerError::Config(e)) => return Err(e),
                Err(e) => warn!("{}: disabled: {}", name, e),
            }
        }
        info!(
            "Registered profilers: {}",
            registry.names().join(", ")
        );
        Ok(registry)
    }

    pub fn add_one_shot(&mut self, profiler: Box<dyn Profiler>) {
        let driver = OneShotDriver::new(profiler, Arc::clone(&self.clock));
        self.one_shot.push(Box::new(driver));
    }

    pub fn add_sampler(&mut self, sampler: Box<dyn Sampler>, schedule: Schedule) {
        let driver = SamplingDriver::new(sampler, schedule.profiling_ms, Arc::clone(&self.clock));
        self.periodic.push(Box::new(driver));
    }

    pub fn add_aggregator(&mut self, aggregator: Box<dyn Aggregator>, schedule: Schedule) {
        let driver = AggregatingDriver::new(aggregator, schedule, Arc::clone(&self.clock));
        self.periodic.push(Box::new(driver));
    }

    pub fn periodic_len(&self) -> usize {
        self.periodic.len()
    }

    pub fn one_shot_len(&self) -> usize {
        self.one_shot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periodic.is_empty() && self.one_shot.is_empty()
    }

    /// Periodic profilers first, then one-shot ones, each in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.periodic
            .iter()
            .map(|d| d.name())
            .chain(self.one_shot.iter().map(|d| d.name()))
            .collect()
    }

    pub fn into_parts(self) -> (Vec<Box<dyn Periodic>>, Vec<Box<dyn Lifecycle>>) {
        (self.periodic, self.one_shot)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::collector::{FakeRuntime, FakeThreads, MockFs, TREE_ROOT_PID};
    use crate::reporter::MemoryReporter;

    fn providers(fs: MockFs) -> Providers<MockFs> {
        Providers {
            runtime: Arc::new(FakeRuntime::new(2)),
            threads: Arc::new(FakeThreads::default()),
            fs,
            proc_root: PathBuf::from("/proc"),
            pid: TREE_ROOT_PID,
        }
    }

    fn build_registry(config: &str, fs: MockFs) -> Result<ProfilerRegistry, ConfigError> {
        ProfilerRegistry::from_config(
            &AgentConfig::parse(config).unwrap(),
            providers(fs),
            Arc::new(MemoryReporter::new()),
            Arc::new(ManualClock::new(0)),
        )
    }

    #[test]
    fn builds_every_known_profiler() {
        let registry = build_registry(
            "CPUTimeProfiler,MemoryProfiler,RuntimeProfiler,ProcFSProfiler,HostProfiler,\
             StackTraceProfiler,HostSpecProfiler",
            MockFs::process_tree_host(),
        )
        .unwrap();

        assert_eq!(registry.periodic_len(), 6);
        assert_eq!(registry.one_shot_len(), 1);
        assert_eq!(
            registry.names(),
            vec![
                "CPUTimeProfiler",
                "HostProfiler",
                "MemoryProfiler",
                "ProcFSProfiler",
                "RuntimeProfiler",
                "StackTraceProfiler",
                "HostSpecProfiler",
            ]
        );
    }

    #[test]
    fn intervals_follow_config_and_defaults() {
        let registry = build_registry(
            "profilingMs=500,CPUTimeProfiler,MemoryProfiler[profilingMs=250],StackTraceProfiler",
            MockFs::new(),
        )
        .unwrap();
        let (periodic, _) = registry.into_parts();
        let intervals: Vec<(&str, Duration)> =
            periodic.iter().map(|d| (d.name(), d.interval())).collect();

        assert_eq!(
            intervals,
            vec![
                ("CPUTimeProfiler", Duration::from_millis(500)),
                ("MemoryProfiler", Duration::from_millis(250)),
                // the global profilingMs applies here too
                ("StackTraceProfiler", Duration::from_millis(500)),
            ]
        );

        let registry = build_registry("StackTraceProfiler", MockFs::new()).unwrap();
        let (periodic, _) = registry.into_parts();
        assert_eq!(periodic[0].interval(), Duration::from_millis(20));
    }

    #[test]
    fn unknown_and_unsupported_profilers_are_skipped() {
        let registry = build_registry(
            "Bogus[x=1],ProcFSProfiler,HostProfiler,CPUTimeProfiler",
            MockFs::new(),
        )
        .unwrap();
        assert_eq!(registry.names(), vec!["CPUTimeProfiler"]);
    }

    #[test]
    fn invalid_parameter_fails_the_registry() {
        assert!(build_registry("MemoryProfiler[reservedMB=lots]", MockFs::new()).is_err());
        assert!(build_registry("CPUTimeProfiler[profilingMs=fast]", MockFs::new()).is_err());
        assert!(build_registry("reportingMs=never,StackTraceProfiler", MockFs::new()).is_err());
    }

    #[test]
    fn empty_config_registers_nothing() {
        let registry = build_registry("", MockFs::new()).unwrap();
        assert!(registry.is_empty());
    }
}
