//! Counter snapshot providers.
//!
//! Profilers never read counters directly. They depend on the small traits
//! defined here, so the same profiler runs against `/proc` in production and
//! against in-memory fakes in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Profilers                           │
//! └───────┬──────────────────────┬──────────────────────┬──────┘
//!         │                      │                      │
//! ┌───────▼────────┐    ┌────────▼───────┐    ┌─────────▼──────┐
//! │ RuntimeCounters│    │  ThreadDumper  │    │   FileSystem   │
//! │ (cpu, gc, heap)│    │ (thread stacks)│    │    (/proc)     │
//! └───────┬────────┘    └────────┬───────┘    └─────────┬──────┘
//!         │                      │                      │
//!  ProcRuntime /          ProcThreadDumper /      RealFs / MockFs
//!  FakeRuntime            FakeThreads
//! ```

pub mod mock;
pub mod procfs;
pub mod traits;

use std::fmt;

pub use mock::{FakeRuntime, FakeThreads, MockFs, TREE_ROOT_PID};
pub use procfs::{ProcRuntime, ProcThreadDumper};
pub use traits::{FileSystem, RealFs};

/// Failure of a counter snapshot provider.
#[derive(Debug)]
pub enum ProviderError {
    /// I/O error reading a counter source.
    Io(std::io::Error),
    /// Counter source returned content that could not be parsed.
    Parse(String),
    /// The capability is not available on this platform or runtime.
    Unsupported(&'static str),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Io(e) => write!(f, "I/O error: {}", e),
            ProviderError::Parse(msg) => write!(f, "parse error: {}", msg),
            ProviderError::Unsupported(what) => write!(f, "{} is not supported", what),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e)
    }
}

impl From<procfs::parser::ParseError> for ProviderError {
    fn from(e: procfs::parser::ParseError) -> Self {
        ProviderError::Parse(e.message)
    }
}

/// Cumulative host CPU ticks since boot. Consumers diff two readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCpuTicks {
    pub active: u64,
    pub total: u64,
}

/// Memory pool usage in bytes. `max` is `-1` when the pool is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryUsage {
    pub used: i64,
    pub committed: i64,
    pub max: i64,
}

/// Callback invoked with the duration of a finished collection, in ms.
pub type GcCallback = Box<dyn Fn(i64) + Send + Sync>;

/// Process-level runtime counters.
pub trait RuntimeCounters: Send + Sync {
    /// Cumulative CPU time consumed by the process, in nanoseconds.
    fn process_cpu_time_ns(&self) -> Result<i64, ProviderError>;

    /// Cumulative time spent in garbage collection, in milliseconds.
    fn gc_time_ms(&self) -> Result<i64, ProviderError>;

    /// Host-wide CPU ticks. Reading has no side effects.
    fn host_cpu_ticks(&self) -> Result<HostCpuTicks, ProviderError>;

    /// Logical CPUs available to the process. Never zero.
    fn available_cpus(&self) -> usize;

    fn heap_usage(&self) -> Result<MemoryUsage, ProviderError>;

    fn non_heap_usage(&self) -> Result<MemoryUsage, ProviderError>;

    /// Registers callbacks fired at the end of each minor and major collection.
    fn subscribe_gc_events(
        &self,
        _on_minor: GcCallback,
        _on_major: GcCallback,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("GC event subscription"))
    }
}

/// One frame of a thread stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub module: String,
    pub function: String,
    pub line: u32,
}

impl StackFrame {
    pub fn new(module: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.module, self.function, self.line)
    }
}

/// Stack of one running thread. Frames are ordered innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub name: String,
    pub frames: Vec<StackFrame>,
}

/// Source of stack snapshots of currently running threads.
pub trait ThreadDumper: Send + Sync {
    /// Returns the threads currently on CPU.
    fn running_threads(&self) -> Result<Vec<ThreadSnapshot>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_frame_display() {
        let frame = StackFrame::new("kernel", "do_syscall_64", 92);
        assert_eq!(frame.to_string(), "kernel.do_syscall_64:92");
    }

    #[test]
    fn provider_error_display() {
        let err = ProviderError::Unsupported("GC event subscription");
        assert_eq!(err.to_string(), "GC event subscription is not supported");
        let err: ProviderError = std::io::Error::other("boom").into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
