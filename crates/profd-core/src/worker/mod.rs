//! Drivers, timers and shutdown.
//!
//! A driver wraps one profiler, owns its timing state and is the only place
//! where profiler failures are handled. The scheduler runs each periodic
//! driver on a dedicated thread. The shutdown coordinator cancels the timers
//! and drains every driver before stopping the sink.

mod driver;
mod scheduler;
mod shutdown;
#[cfg(test)]
pub(crate) mod test_support;

pub use driver::{AggregatingDriver, Lifecycle, OneShotDriver, Periodic, SamplingDriver};
pub use scheduler::{
    ScheduleError, Scheduler, Spawner, THREAD_NAME_PREFIX, TimerBody, TimerHandle, TimerThread,
    schedule,
};
pub use shutdown::ShutdownCoordinator;
