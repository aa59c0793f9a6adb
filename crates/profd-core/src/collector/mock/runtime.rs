use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::collector::{
    GcCallback, HostCpuTicks, MemoryUsage, ProviderError, RuntimeCounters, ThreadDumper, ThreadSnapshot,
};

/// Settable runtime counters.
///
/// Counters are atomics so a test can move them while a profiler samples on
/// another thread. GC callbacks registered through `subscribe_gc_events` are
/// fired by [`FakeRuntime::emit_minor_gc`] and [`FakeRuntime::emit_major_gc`].
pub struct FakeRuntime {
    cpu_time_ns: AtomicI64,
    gc_time_ms: AtomicI64,
    host_active_ticks: AtomicU64,
    host_total_ticks: AtomicU64,
    cpus: AtomicUsize,
    heap: Mutex<MemoryUsage>,
    non_heap: Mutex<MemoryUsage>,
    supports_gc_events: bool,
    minor: Mutex<Vec<GcCallback>>,
    major: Mutex<Vec<GcCallback>>,
    failing: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FakeRuntime {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpu_time_ns: AtomicI64::new(0),
            gc_time_ms: AtomicI64::new(0),
            host_active_ticks: AtomicU64::new(0),
            host_total_ticks: AtomicU64::new(0),
            cpus: AtomicUsize::new(cpus.max(1)),
            heap: Mutex::new(MemoryUsage::default()),
            non_heap: Mutex::new(MemoryUsage::default()),
            supports_gc_events: true,
            minor: Mutex::new(Vec::new()),
            major: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// A runtime whose GC subscription is unsupported.
    pub fn without_gc_events(cpus: usize) -> Self {
        Self {
            supports_gc_events: false,
            ..Self::new(cpus)
        }
    }

    pub fn set_cpu_time_ns(&self, ns: i64) {
        self.cpu_time_ns.store(ns, Ordering::SeqCst);
    }

    pub fn set_gc_time_ms(&self, ms: i64) {
        self.gc_time_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_host_ticks(&self, active: u64, total: u64) {
        self.host_active_ticks.store(active, Ordering::SeqCst);
        self.host_total_ticks.store(total, Ordering::SeqCst);
    }

    pub fn set_heap(&self, usage: MemoryUsage) {
        *lock(&self.heap) = usage;
    }

    pub fn set_non_heap(&self, usage: MemoryUsage) {
        *lock(&self.non_heap) = usage;
    }

    /// Makes every counter read fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn emit_minor_gc(&self, duration_ms: i64) {
        for callback in lock(&self.minor).iter() {
            callback(duration_ms);
        }
    }

    pub fn emit_major_gc(&self, duration_ms: i64) {
        for callback in lock(&self.major).iter() {
            callback(duration_ms);
        }
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Io(std::io::Error::other("counter source unavailable")));
        }
        Ok(())
    }
}

impl RuntimeCounters for FakeRuntime {
    fn process_cpu_time_ns(&self) -> Result<i64, ProviderError> {
        self.check()?;
        Ok(self.cpu_time_ns.load(Ordering::SeqCst))
    }

    fn gc_time_ms(&self) -> Result<i64, ProviderError> {
        self.check()?;
        Ok(self.gc_time_ms.load(Ordering::SeqCst))
    }

    fn host_cpu_ticks(&self) -> Result<HostCpuTicks, ProviderError> {
        self.check()?;
        Ok(HostCpuTicks {
            active: self.host_active_ticks.load(Ordering::SeqCst),
            total: self.host_total_ticks.load(Ordering::SeqCst),
        })
    }

    fn available_cpus(&self) -> usize {
        self.cpus.load(Ordering::SeqCst)
    }

    fn heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        self.check()?;
        Ok(*lock(&self.heap))
    }

    fn non_heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        self.check()?;
        Ok(*lock(&self.non_heap))
    }

    fn subscribe_gc_events(
        &self,
        on_minor: GcCallback,
        on_major: GcCallback,
    ) -> Result<(), ProviderError> {
        if !self.supports_gc_events {
            return Err(ProviderError::Unsupported("GC event subscription"));
        }
        lock(&self.minor).push(on_minor);
        lock(&self.major).push(on_major);
        Ok(())
    }
}

/// Thread dumper returning a fixed set of threads.
#[derive(Default)]
pub struct FakeThreads {
    threads: Mutex<Vec<ThreadSnapshot>>,
}

impl FakeThreads {
    pub fn new(threads: Vec<ThreadSnapshot>) -> Self {
        Self {
            threads: Mutex::new(threads),
        }
    }

    pub fn set(&self, threads: Vec<ThreadSnapshot>) {
        *lock(&self.threads) = threads;
    }
}

impl ThreadDumper for FakeThreads {
    fn running_threads(&self) -> Result<Vec<ThreadSnapshot>, ProviderError> {
        Ok(lock(&self.threads).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn gc_callbacks_fire_after_subscription() {
        let runtime = FakeRuntime::new(4);
        let total = Arc::new(AtomicI64::new(0));
        let minor = Arc::clone(&total);
        runtime
            .subscribe_gc_events(
                Box::new(move |d| {
                    minor.fetch_add(d, Ordering::SeqCst);
                }),
                Box::new(|_| {}),
            )
            .unwrap();

        runtime.emit_minor_gc(5);
        runtime.emit_minor_gc(7);
        runtime.emit_major_gc(100);
        assert_eq!(total.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn unsupported_gc_events() {
        let runtime = FakeRuntime::without_gc_events(2);
        assert_eq!(runtime.available_cpus(), 2);
        assert!(runtime
            .subscribe_gc_events(Box::new(|_| {}), Box::new(|_| {}))
            .is_err());
    }

    #[test]
    fn failing_counters() {
        let runtime = FakeRuntime::default();
        runtime.set_host_ticks(30, 100);
        assert_eq!(
            runtime.host_cpu_ticks().unwrap(),
            HostCpuTicks {
                active: 30,
                total: 100,
            }
        );
        runtime.set_failing(true);
        assert!(runtime.host_cpu_ticks().is_err());
        assert!(runtime.heap_usage().is_err());
    }
}
