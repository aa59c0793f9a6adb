use std::sync::Arc;

use crate::collector::{ThreadDumper, ThreadSnapshot};
use crate::profiler::{Aggregator, Profiler, ProfilerError, Sampler, TraceCache};
use crate::reporter::Reporter;
use crate::worker::THREAD_NAME_PREFIX;

pub const NAME: &str = "StackTraceProfiler";
pub const DEFAULT_PROFILING_MS: i64 = 20;
/// Traces are heavy: report every 10 minutes.
pub const DEFAULT_REPORTING_MS: i64 = 600_000;

/// Counts how often each running stack is observed and reports the counts
/// as `CPU_TRACES`, labelled with the stack signature.
pub struct StackTraceProfiler {
    threads: Arc<dyn ThreadDumper>,
    reporter: Arc<dyn Reporter>,
    cache: TraceCache,
}

impl StackTraceProfiler {
    pub fn new(threads: Arc<dyn ThreadDumper>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            threads,
            reporter,
            cache: TraceCache::new(),
        }
    }
}

/// `thread|frame|frame...` with frames innermost first.
pub fn trace_signature(thread: &ThreadSnapshot) -> String {
    let mut signature = thread.name.clone();
    for frame in &thread.frames {
        signature.push('|');
        signature.push_str(&frame.to_string());
    }
    signature
}

impl Profiler for StackTraceProfiler {
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

impl Sampler for StackTraceProfiler {
    fn sample(&mut self, now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        for thread in self.threads.running_threads()? {
            // Some threads have no stack; the agent's own threads are noise.
            if thread.frames.is_empty() || thread.name.starts_with(THREAD_NAME_PREFIX) {
                continue;
            }
            self.cache.increment(&trace_signature(&thread), now_ms);
        }
        Ok(())
    }
}

impl Aggregator for StackTraceProfiler {
    fn report(&mut self) -> Result<(), ProfilerError> {
        for (signature, entry) in self.cache.copy_and_clear() {
            self.reporter.report_event(
                "CPU_TRACES",
                &signature,
                entry.count as f64,
                entry.first_timestamp_ms,
            );
        }
        Ok(())
    }
}
