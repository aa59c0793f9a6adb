use std::path::PathBuf;

use crate::collector::procfs::parser::{parse_global_stat, parse_proc_stat, parse_proc_status};
use crate::collector::procfs::tree::stat_path;
use crate::collector::procfs::JIFFY_MS;
use crate::collector::traits::FileSystem;
use crate::collector::{HostCpuTicks, MemoryUsage, ProviderError, RuntimeCounters};

/// Runtime counters of a single process read from `/proc`.
///
/// Native processes have no garbage collector: GC time is always zero and GC
/// subscription is unsupported. Heap is approximated by anonymous resident
/// memory, off-heap by file-backed and shared resident memory.
pub struct ProcRuntime<F: FileSystem> {
    fs: F,
    proc_root: PathBuf,
    pid: u32,
    cpus: usize,
}

impl<F: FileSystem> ProcRuntime<F> {
    pub fn new(fs: F, proc_root: impl Into<PathBuf>, pid: u32) -> Self {
        let proc_root = proc_root.into();
        let cpus = fs
            .read_to_string(&proc_root.join("stat"))
            .ok()
            .and_then(|content| parse_global_stat(&content).ok())
            .map(|stat| stat.cpu_count())
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1);

        Self {
            fs,
            proc_root,
            pid,
            cpus,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn read_status(&self) -> Result<crate::collector::procfs::parser::ProcStatus, ProviderError> {
        let path = self.proc_root.join(self.pid.to_string()).join("status");
        Ok(parse_proc_status(&self.fs.read_to_string(&path)?)?)
    }
}

impl<F: FileSystem> RuntimeCounters for ProcRuntime<F> {
    fn process_cpu_time_ns(&self) -> Result<i64, ProviderError> {
        let content = self.fs.read_to_string(&stat_path(&self.proc_root, self.pid))?;
        let stat = parse_proc_stat(&content)?;
        let ns = (stat.utime + stat.stime)
            .saturating_mul(JIFFY_MS)
            .saturating_mul(1_000_000);
        Ok(i64::try_from(ns).unwrap_or(i64::MAX))
    }

    fn gc_time_ms(&self) -> Result<i64, ProviderError> {
        Ok(0)
    }

    fn host_cpu_ticks(&self) -> Result<HostCpuTicks, ProviderError> {
        let content = self.fs.read_to_string(&self.proc_root.join("stat"))?;
        let stat = parse_global_stat(&content)?;
        let cpu = stat
            .total()
            .ok_or_else(|| ProviderError::Parse("missing aggregate cpu line".into()))?;
        Ok(HostCpuTicks {
            active: cpu.active(),
            total: cpu.total(),
        })
    }

    fn available_cpus(&self) -> usize {
        self.cpus
    }

    fn heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        let status = self.read_status()?;
        Ok(MemoryUsage {
            used: kb_to_bytes(status.rss_anon),
            committed: kb_to_bytes(status.vm_data),
            max: -1,
        })
    }

    fn non_heap_usage(&self) -> Result<MemoryUsage, ProviderError> {
        let status = self.read_status()?;
        Ok(MemoryUsage {
            used: kb_to_bytes(status.rss_file + status.rss_shmem),
            committed: kb_to_bytes(status.vm_size.saturating_sub(status.vm_data)),
            max: -1,
        })
    }
}

fn kb_to_bytes(kb: u64) -> i64 {
    i64::try_from(kb.saturating_mul(1024)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    const STATUS: &str = "\
Name:\tapp
Pid:\t42
VmSize:\t  100000 kB
VmData:\t   30000 kB
VmRSS:\t   12000 kB
RssAnon:\t    9000 kB
RssFile:\t    2500 kB
RssShmem:\t     500 kB
";

    fn setup() -> MockFs {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/stat",
            "cpu  100 0 100 800 0 0 0 0\ncpu0 50 0 50 400 0 0 0 0\ncpu1 50 0 50 400 0 0 0 0\n",
        );
        fs.add_process(
            "/proc",
            42,
            "42 (app) S 1 42 42 0 -1 0 0 0 0 0 150 50 0 0 20 0 4 0 100 102400000 3000",
            STATUS,
        );
        fs
    }

    #[test]
    fn cpu_count_comes_from_stat() {
        let runtime = ProcRuntime::new(setup(), "/proc", 42);
        assert_eq!(runtime.available_cpus(), 2);
        assert_eq!(runtime.pid(), 42);
    }

    #[test]
    fn process_cpu_time_is_jiffies_in_ns() {
        let runtime = ProcRuntime::new(setup(), "/proc", 42);
        // 200 ticks * 10 ms
        assert_eq!(runtime.process_cpu_time_ns().unwrap(), 2_000_000_000);
        assert_eq!(runtime.gc_time_ms().unwrap(), 0);
    }

    #[test]
    fn host_ticks_are_cumulative() {
        let fs = setup();
        let runtime = ProcRuntime::new(fs.clone(), "/proc", 42);
        let boot = HostCpuTicks {
            active: 200,
            total: 1000,
        };
        assert_eq!(runtime.host_cpu_ticks().unwrap(), boot);
        // reading twice changes nothing
        assert_eq!(runtime.host_cpu_ticks().unwrap(), boot);

        fs.add_file("/proc/stat", "cpu  250 0 250 900 0 0 0 0\n");
        assert_eq!(
            runtime.host_cpu_ticks().unwrap(),
            HostCpuTicks {
                active: 500,
                total: 1400,
            }
        );
    }

    #[test]
    fn memory_from_status() {
        let runtime = ProcRuntime::new(setup(), "/proc", 42);
        let heap = runtime.heap_usage().unwrap();
        assert_eq!(heap.used, 9000 * 1024);
        assert_eq!(heap.committed, 30000 * 1024);
        assert_eq!(heap.max, -1);

        let off_heap = runtime.non_heap_usage().unwrap();
        assert_eq!(off_heap.used, 3000 * 1024);
        assert_eq!(off_heap.committed, 70000 * 1024);
    }

    #[test]
    fn gc_subscription_is_unsupported() {
        let runtime = ProcRuntime::new(setup(), "/proc", 42);
        let result = runtime.subscribe_gc_events(Box::new(|_| {}), Box::new(|_| {}));
        assert!(matches!(result, Err(ProviderError::Unsupported(_))));
    }

    #[test]
    fn missing_process_is_io_error() {
        let runtime = ProcRuntime::new(setup(), "/proc", 7);
        assert!(matches!(
            runtime.process_cpu_time_ns(),
            Err(ProviderError::Io(_))
        ));
    }
}
