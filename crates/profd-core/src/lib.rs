//! profd-core — sampling telemetry engine.
//!
//! Provides:
//! - `config` — agent configuration string parser and typed accessors
//! - `delta` — monotonic counter delta tracking
//! - `clock` — wall-clock abstraction (real and manual)
//! - `collector` — counter snapshot providers (`/proc`, runtime, threads)
//! - `profiler` — profilers and the registry built from configuration
//! - `worker` — sampling drivers, scheduler and shutdown coordinator
//! - `reporter` — reporting sinks (log file, in-memory)
//! - `agent` — ties everything together: start, schedule, drain, stop

pub mod agent;
pub mod clock;
pub mod collector;
pub mod config;
pub mod delta;
pub mod profiler;
pub mod reporter;
pub mod worker;

pub use agent::{Agent, AgentError};
pub use config::{AgentConfig, ConfigError};
pub use profiler::{ProfilerRegistry, Providers};
pub use reporter::{LogReporter, MemoryReporter, Reporter};
