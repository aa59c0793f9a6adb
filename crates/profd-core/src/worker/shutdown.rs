use std::sync::Arc;

use tracing::info;

use super::driver::Lifecycle;
use super::scheduler::Scheduler;
use crate::reporter::Reporter;

/// Ordered teardown of a running agent.
///
/// 1. cancel every timer, waiting for in-flight ticks
/// 2. stop every periodic driver (final sample, final report)
/// 3. stop the one-shot profilers
/// 4. stop the sink
pub struct ShutdownCoordinator {
    scheduler: Scheduler,
    one_shot: Vec<Box<dyn Lifecycle>>,
    reporter: Arc<dyn Reporter>,
}

impl ShutdownCoordinator {
    pub fn new(
        scheduler: Scheduler,
        one_shot: Vec<Box<dyn Lifecycle>>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            scheduler,
            one_shot,
            reporter,
        }
    }

    pub fn run(mut self) {
        info!("Shutting down {} timers", self.scheduler.len());
        for mut driver in self.scheduler.cancel_all() {
            driver.stop();
        }
        for profiler in self.one_shot.iter_mut() {
            profiler.stop();
        }
        self.reporter.stop();
        info!("Agent stopped");
    }
}
