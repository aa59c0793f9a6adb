//! Agent lifecycle: start the sink, start the profilers, schedule them, and
//! tear everything down exactly once.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{error, info};

use crate::profiler::ProfilerRegistry;
use crate::reporter::{ReportError, Reporter};
use crate::worker::{ScheduleError, Scheduler, ShutdownCoordinator};

#[derive(Debug)]
pub enum AgentError {
    /// The sink could not be started. Nothing else was started.
    Report(ReportError),
    /// A timer thread could not be spawned. Everything already started has
    /// been stopped again.
    Spawn(io::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Report(e) => write!(f, "failed to start reporter: {}", e),
            AgentError::Spawn(e) => write!(f, "failed to spawn sampling thread: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ReportError> for AgentError {
    fn from(e: ReportError) -> Self {
        AgentError::Report(e)
    }
}

/// A running agent. Dropping it shuts it down.
pub struct Agent {
    coordinator: Option<ShutdownCoordinator>,
}

impl Agent {
    /// Starts the sink, then every profiler synchronously, then one timer per
    /// periodic profiler.
    pub fn start(registry: ProfilerRegistry, reporter: Arc<dyn Reporter>) -> Result<Self, AgentError> {
        Self::start_on(Scheduler::new(), registry, reporter)
    }

    fn start_on(
        mut scheduler: Scheduler,
        registry: ProfilerRegistry,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, AgentError> {
        reporter.start()?;

        let (mut periodic, mut one_shot) = registry.into_parts();
        for profiler in one_shot.iter_mut() {
            profiler.start();
        }
        for driver in periodic.iter_mut() {
            driver.start();
        }

        let mut drivers = periodic.into_iter();
        while let Some(driver) = drivers.next() {
            if let Err(ScheduleError { error, driver }) = scheduler.schedule(driver) {
                error!("Failed to schedule {}: {}", driver.name(), error);
                // Started but never scheduled: stop them with the rest.
                for mut driver in std::iter::once(driver).chain(drivers) {
                    driver.stop();
                }
                ShutdownCoordinator::new(scheduler, one_shot, reporter).run();
                return Err(AgentError::Spawn(error));
            }
        }

        info!("Agent started with {} timers", scheduler.len());
        Ok(Self {
            coordinator: Some(ShutdownCoordinator::new(scheduler, one_shot, reporter)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_some()
    }

    /// Stops all profilers, draining their final samples and reports, then
    /// stops the sink. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.run();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::clock::SystemClock;
    use crate::collector::{FakeRuntime, FakeThreads, MockFs, StackFrame, ThreadSnapshot};
    use crate::config::AgentConfig;
    use crate::profiler::Providers;
    use crate::reporter::{MemoryReporter, SinkCall};

    fn registry(config: &str, reporter: Arc<MemoryReporter>) -> ProfilerRegistry {
        let threads = FakeThreads::new(vec![ThreadSnapshot {
            name: "main".to_string(),
            frames: vec![StackFrame::new("app", "run", 1)],
        }]);
        let providers = Providers {
            runtime: Arc::new(FakeRuntime::new(2)),
            threads: Arc::new(threads),
            fs: MockFs::process_tree_host(),
            proc_root: PathBuf::from("/proc"),
            pid: crate::collector::TREE_ROOT_PID,
        };
        ProfilerRegistry::from_config(
            &AgentConfig::parse(config).unwrap(),
            providers,
            reporter,
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn start(config: &str) -> (Agent, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let agent = Agent::start(registry(config, reporter.clone()), reporter.clone()).unwrap();
        (agent, reporter)
    }

    #[test]
    fn shutdown_drains_before_stopping_sink() {
        let (mut agent, reporter) = start(
            "CPUTimeProfiler[profilingMs=3600000],\
             StackTraceProfiler[profilingMs=3600000,reportingMs=7200000],HostSpecProfiler",
        );
        assert!(agent.is_running());
        agent.shutdown();
        assert!(!agent.is_running());

        let calls = reporter.calls();
        assert_eq!(calls.first(), Some(&SinkCall::Start));
        assert_eq!(calls.last(), Some(&SinkCall::Stop));
        // first tick plus the final sample on stop
        assert_eq!(reporter.events_named("PROCESS_CPU_USAGE").len(), 2);
        let traces = reporter.events_named("CPU_TRACES");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].label, "main|app.run:1");
        assert_eq!(traces[0].value, 2.0);
        assert_eq!(reporter.events_named("HOST_CPU_COUNT").len(), 1);
        assert_eq!(reporter.events_named("AGENT_UPTIME_MS").len(), 1);

        agent.shutdown();
        assert_eq!(reporter.calls().len(), calls.len());
    }

    #[test]
    fn drop_shuts_down() {
        let (agent, reporter) = start("MemoryProfiler[profilingMs=3600000]");
        drop(agent);
        assert_eq!(reporter.calls().last(), Some(&SinkCall::Stop));
        assert_eq!(reporter.events_named("HEAP_MEMORY_USED_BYTES").len(), 2);
    }

    #[test]
    fn empty_agent_starts_and_stops_sink() {
        let (mut agent, reporter) = start("");
        agent.shutdown();
        assert_eq!(reporter.calls(), vec![SinkCall::Start, SinkCall::Stop]);
    }

    #[test]
    fn spawn_failure_stops_every_started_profiler() {
        let reporter = Arc::new(MemoryReporter::new());
        let registry = registry(
            "CPUTimeProfiler[profilingMs=3600000],MemoryProfiler[profilingMs=3600000],\
             StackTraceProfiler[profilingMs=3600000,reportingMs=7200000]",
            reporter.clone(),
        );
        let scheduler = Scheduler::with_spawner(|_, _| Err(io::Error::other("no threads")));

        let result = Agent::start_on(scheduler, registry, reporter.clone());
        assert!(matches!(result, Err(AgentError::Spawn(_))));

        // never ticked, so the only sample of each is the final one
        assert_eq!(reporter.events_named("PROCESS_CPU_USAGE").len(), 1);
        assert_eq!(reporter.events_named("HEAP_MEMORY_USED_BYTES").len(), 1);
        assert_eq!(reporter.events_named("CPU_TRACES").len(), 1);
        assert_eq!(reporter.calls().last(), Some(&SinkCall::Stop));
    }
}
