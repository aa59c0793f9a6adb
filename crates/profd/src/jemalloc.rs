//! Heap counters from the global jemalloc allocator.

use std::ffi::CStr;

use profd_core::collector::{
    FileSystem, GcCallback, HostCpuTicks, MemoryUsage, ProcRuntime, ProviderError,
    RuntimeCounters,
};

/// `ProcRuntime` with heap usage taken from jemalloc statistics instead of
/// anonymous RSS. Only meaningful for the agent's own process.
pub struct JemallocRuntime<F: FileSystem> {
    proc: ProcRuntime<F>,
}

impl<F: FileSystem> JemallocRuntime<F> {
    pub fn new(proc: ProcRuntime<F>) -> Self {
        Self { proc }
    }
}

/// Refreshes the cached statistics; jemalloc only updates them on a new epoch.
fn advance_epoch() -> Result<(), ProviderError> {
    let mut epoch: u64 = 1;
    let mut current: u64 = 0;
    let mut len = std::mem::size_of::<u64>();
    // SAFETY: "epoch" reads and writes a u64; both pointers are valid for that size.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            c"epoch".as_ptr().cast(),
            (&mut current as *mut u64).cast(),
            &mut len,
            (&mut epoch as *mut u64).cast(),
            std::mem::size_of::<u64>(),
        )
    };
    if rc != 0 {
        return Err(ProviderError::Unsupported("jemalloc epoch"));
    }
    Ok(())
}

fn read_size(name: &CStr) -> Result<i64, ProviderError> {
    let mut value: usize = 0;
    let mut len = std::mem::size_of::<usize>();
    // SAFETY: the "stats.*" size counters are size_t; value and len match it.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            name.as_ptr().cast(),
            (&mut value as *mut usize).cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(ProviderError::Unsupported("jemalloc stats"));
    }
    Ok(i64::try_from(value).unwrap_or(i64::MAX))
}

impl<F: FileSystem> RuntimeCounters for JemallocRuntime<F> {
    fn process_cpu_time_ns(&self) -> Result<i64, ProviderError> {
        self.proc.process_cpu_time_ns()
    }

    fn gc_time_ms(&self) -> Result<i64, ProviderError> {
        self.proc.gc_time_ms()
    }

    fn host_cpu_ticks(&self) -> Result<HostCpuTicks, ProviderError> {
        self.proc.host_cpu_ticks()
    }

    fn available_cpus(&self) -> usize {
        self.proc.available_cpus()
    }

    fn heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        advance_epoch()?;
        Ok(MemoryUsage {
            used: read_size(c"stats.allocated")?,
            committed: read_size(c"stats.active")?,
            max: -1,
        })
    }

    fn non_heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        self.proc.non_heap_usage()
    }

    fn subscribe_gc_events(
        &self,
        on_minor: GcCallback,
        on_major: GcCallback,
    ) -> Result<(), ProviderError> {
        self.proc.subscribe_gc_events(on_minor, on_major)
    }
}
