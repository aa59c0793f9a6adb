use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::collector::FileSystem;
use crate::collector::procfs::parser::{
    parse_global_stat, parse_proc_io, parse_smaps, smaps_anonymous_bytes,
};
use crate::collector::procfs::tree::process_tree;
use crate::collector::procfs::{JIFFY_MS, PAGE_SIZE, is_available};
use crate::delta::DeltaTracker;
use crate::profiler::{Profiler, ProfilerError, Sampler, per_second, ratio};
use crate::reporter::Reporter;

pub const NAME: &str = "ProcFSProfiler";

/// Shared mappings are not counted as anonymous memory, matching the
/// smaps-based RSS accounting of cluster resource managers.
const SMAPS_EXCLUDED_PERMISSIONS: [&str; 2] = ["r--s", "r-xs"];

/// Cumulative counters summed over the process tree, plus host CPU ticks.
#[derive(Debug, Default)]
struct TreeCounters {
    rss_pages: i64,
    vsize_bytes: u64,
    user_ticks: u64,
    system_ticks: u64,
    host_total_ticks: u64,
    host_active_ticks: u64,
    read_bytes: u64,
    write_bytes: u64,
    rchar: u64,
    wchar: u64,
    smaps_anonymous_bytes: u64,
}

#[derive(Debug, Default)]
struct Trackers {
    user_ticks: DeltaTracker,
    system_ticks: DeltaTracker,
    host_total_ticks: DeltaTracker,
    host_active_ticks: DeltaTracker,
    read_bytes: DeltaTracker,
    write_bytes: DeltaTracker,
    rchar: DeltaTracker,
    wchar: DeltaTracker,
}

/// Resource usage of a process and all its descendants, read from `/proc`.
pub struct ProcFsProfiler<F: FileSystem> {
    fs: F,
    proc_root: PathBuf,
    pid: u32,
    reporter: Arc<dyn Reporter>,
    trackers: Trackers,
}

impl<F: FileSystem> ProcFsProfiler<F> {
    pub fn new(
        fs: F,
        proc_root: impl Into<PathBuf>,
        pid: u32,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ProfilerError> {
        let proc_root = proc_root.into();
        if !is_available(&fs, &proc_root) {
            return Err(ProfilerError::Unsupported(format!(
                "{} requires a procfs mount at {}",
                NAME,
                proc_root.display()
            )));
        }
        Ok(Self {
            fs,
            proc_root,
            pid,
            reporter,
            trackers: Trackers::default(),
        })
    }

    fn read_counters(&self, with_smaps: bool) -> Result<TreeCounters, ProfilerError> {
        let tree = process_tree(&self.fs, &self.proc_root, self.pid)?;
        let host = parse_global_stat(&self.fs.read_to_string(&self.proc_root.join("stat"))?)?;
        let mut counters = TreeCounters::default();
        if let Some(cpu) = host.total() {
            counters.host_total_ticks = cpu.total();
            counters.host_active_ticks = cpu.active();
        }

        for stat in &tree {
            counters.rss_pages += stat.rss;
            counters.vsize_bytes += stat.vsize;
            counters.user_ticks += stat.utime;
            counters.system_ticks += stat.stime;

            let dir = self.proc_root.join(stat.pid.to_string());
            // io and smaps are unreadable for other users' processes.
            match self
                .fs
                .read_to_string(&dir.join("io"))
                .map_err(ProfilerError::from)
                .and_then(|content| Ok(parse_proc_io(&content)?))
            {
                Ok(io) => {
                    counters.read_bytes += io.read_bytes;
                    counters.write_bytes += io.write_bytes;
                    counters.rchar += io.rchar;
                    counters.wchar += io.wchar;
                }
                Err(e) => debug!("{}: skipping io of pid {}: {}", NAME, stat.pid, e),
            }

            if with_smaps
                && let Ok(content) = self.fs.read_to_string(&dir.join("smaps"))
                && let Ok(entries) = parse_smaps(&content)
            {
                counters.smaps_anonymous_bytes +=
                    smaps_anonymous_bytes(&entries, &SMAPS_EXCLUDED_PERMISSIONS);
            }
        }
        Ok(counters)
    }
}

impl<F: FileSystem> Profiler for ProcFsProfiler<F> {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, _now_ms: i64) -> Result<(), ProfilerError> {
        let c = self.read_counters(false)?;
        let t = &mut self.trackers;
        t.user_ticks.observe_u64(c.user_ticks);
        t.system_ticks.observe_u64(c.system_ticks);
        t.host_total_ticks.observe_u64(c.host_total_ticks);
        t.host_active_ticks.observe_u64(c.host_active_ticks);
        t.read_bytes.observe_u64(c.read_bytes);
        t.write_bytes.observe_u64(c.write_bytes);
        t.rchar.observe_u64(c.rchar);
        t.wchar.observe_u64(c.wchar);
        Ok(())
    }

    fn stop(&mut self, _now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }
}

impl<F: FileSystem> Sampler for ProcFsProfiler<F> {
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        let c = self.read_counters(true)?;
        let t = &mut self.trackers;

        let user = t.user_ticks.observe_u64(c.user_ticks);
        let system = t.system_ticks.observe_u64(c.system_ticks);
        let host_total = t.host_total_ticks.observe_u64(c.host_total_ticks) as f64;
        let host_active = t.host_active_ticks.observe_u64(c.host_active_ticks);
        let read_bytes = t.read_bytes.observe_u64(c.read_bytes);
        let write_bytes = t.write_bytes.observe_u64(c.write_bytes);
        let rchar = t.rchar.observe_u64(c.rchar);
        let wchar = t.wchar.observe_u64(c.wchar);

        let user_load = ratio(user as f64, host_total);
        let system_load = ratio(system as f64, host_total);
        let tree_cpu_ms = (user + system) as f64 * JIFFY_MS as f64;

        let r = &self.reporter;
        let rss_bytes = c.rss_pages as f64 * PAGE_SIZE as f64;
        r.report_event("PROC_TREE_RSS_MEMORY_BYTES", "", rss_bytes, now_ms);
        r.report_event("PROC_TREE_VIRTUAL_MEMORY_BYTES", "", c.vsize_bytes as f64, now_ms);
        r.report_event("PROC_TREE_USER_MODE_CPU_LOAD", "", user_load, now_ms);
        r.report_event("PROC_TREE_KERNEL_MODE_CPU_LOAD", "", system_load, now_ms);
        r.report_event("PROC_TREE_CPU_LOAD", "", user_load + system_load, now_ms);
        r.report_event(
            "PROC_HOST_CPU_LOAD",
            "",
            ratio(host_active as f64, host_total),
            now_ms,
        );
        r.report_event("PROC_TREE_CPU_TIME", "", tree_cpu_ms, now_ms);
        r.report_event("PROC_TREE_READ_BYTES", "", read_bytes as f64, now_ms);
        r.report_event("PROC_TREE_WRITE_BYTES", "", write_bytes as f64, now_ms);
        r.report_event("PROC_TREE_RCHAR", "", rchar as f64, now_ms);
        r.report_event("PROC_TREE_WCHAR", "", wchar as f64, now_ms);
        r.report_event(
            "PROC_TREE_READ_BYTES_PER_SEC",
            "",
            per_second(read_bytes, delta_ms),
            now_ms,
        );
        r.report_event(
            "PROC_TREE_WRITE_BYTES_PER_SEC",
            "",
            per_second(write_bytes, delta_ms),
            now_ms,
        );
        r.report_event("PROC_TREE_RCHAR_PER_SEC", "", per_second(rchar, delta_ms), now_ms);
        r.report_event("PROC_TREE_WCHAR_PER_SEC", "", per_second(wchar, delta_ms), now_ms);
        r.report_event(
            "PROC_TREE_SMAPS_ANONYMOUS_BYTES",
            "",
            c.smaps_anonymous_bytes as f64,
            now_ms,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockFs, TREE_ROOT_PID};
    use crate::reporter::MemoryReporter;

    fn setup() -> (MockFs, Arc<MemoryReporter>, ProcFsProfiler<MockFs>) {
        let fs = MockFs::process_tree_host();
        let reporter = Arc::new(MemoryReporter::new());
        let profiler =
            ProcFsProfiler::new(fs.clone(), "/proc", TREE_ROOT_PID, reporter.clone()).unwrap();
        (fs, reporter, profiler)
    }

    #[test]
    fn unavailable_without_procfs() {
        let result = ProcFsProfiler::new(MockFs::new(), "/proc", 1, Arc::new(MemoryReporter::new()));
        assert!(matches!(result, Err(ProfilerError::Unsupported(_))));
    }

    #[test]
    fn gauges_are_summed_over_the_tree() {
        let (_fs, reporter, mut profiler) = setup();
        profiler.start(0).unwrap();
        profiler.sample(1000, 1000).unwrap();

        assert_eq!(reporter.events().len(), 16);
        // 4 processes, 256 pages each
        assert_eq!(
            reporter.last_value("PROC_TREE_RSS_MEMORY_BYTES"),
            Some(4.0 * 256.0 * 4096.0)
        );
        assert_eq!(
            reporter.last_value("PROC_TREE_VIRTUAL_MEMORY_BYTES"),
            Some(4.0 * 1048576.0)
        );
        // 64 kB anonymous per process, the r--s mapping excluded
        assert_eq!(
            reporter.last_value("PROC_TREE_SMAPS_ANONYMOUS_BYTES"),
            Some(4.0 * 64.0 * 1024.0)
        );
        // Nothing moved since start
        assert_eq!(reporter.last_value("PROC_TREE_CPU_LOAD"), Some(0.0));
        assert_eq!(reporter.last_value("PROC_TREE_READ_BYTES"), Some(0.0));
    }

    #[test]
    fn cpu_and_io_deltas() {
        let (fs, reporter, mut profiler) = setup();
        profiler.start(0).unwrap();

        // Host: +100 ticks total, 60 of them active.
        fs.add_file("/proc/stat", "cpu  1040 0 520 8040 500 0 0 0 0 0\n");
        // Root: +10 user, +10 system ticks.
        fs.add_tree_process(TREE_ROOT_PID, 1, 20, 15);
        fs.set_io(1003, 4096 + 2000, 4096, 8192 + 500, 8192);
        profiler.sample(500, 500).unwrap();

        assert_eq!(reporter.last_value("PROC_HOST_CPU_LOAD"), Some(0.6));
        assert_eq!(reporter.last_value("PROC_TREE_USER_MODE_CPU_LOAD"), Some(0.1));
        assert_eq!(reporter.last_value("PROC_TREE_KERNEL_MODE_CPU_LOAD"), Some(0.1));
        assert_eq!(reporter.last_value("PROC_TREE_CPU_LOAD"), Some(0.2));
        assert_eq!(reporter.last_value("PROC_TREE_CPU_TIME"), Some(200.0));
        assert_eq!(reporter.last_value("PROC_TREE_READ_BYTES"), Some(2000.0));
        assert_eq!(reporter.last_value("PROC_TREE_READ_BYTES_PER_SEC"), Some(4000.0));
        assert_eq!(reporter.last_value("PROC_TREE_RCHAR"), Some(500.0));
        assert_eq!(reporter.last_value("PROC_TREE_RCHAR_PER_SEC"), Some(1000.0));
        assert_eq!(reporter.last_value("PROC_TREE_WRITE_BYTES"), Some(0.0));
    }

    #[test]
    fn exited_child_does_not_produce_negative_deltas() {
        let (fs, reporter, mut profiler) = setup();
        profiler.start(0).unwrap();

        fs.remove("/proc/1003");
        profiler.sample(1000, 1000).unwrap();

        assert_eq!(reporter.last_value("PROC_TREE_CPU_TIME"), Some(0.0));
        assert_eq!(reporter.last_value("PROC_TREE_READ_BYTES"), Some(0.0));
        assert_eq!(
            reporter.last_value("PROC_TREE_RSS_MEMORY_BYTES"),
            Some(3.0 * 256.0 * 4096.0)
        );
    }

    #[test]
    fn unreadable_io_is_skipped() {
        let (fs, reporter, mut profiler) = setup();
        fs.remove("/proc/1002/io");
        profiler.start(0).unwrap();
        profiler.sample(1000, 1000).unwrap();
        assert_eq!(reporter.events().len(), 16);
    }

    #[test]
    fn missing_root_process_fails_the_sample() {
        let (fs, reporter, mut profiler) = setup();
        fs.remove(format!("/proc/{}", TREE_ROOT_PID));
        assert!(profiler.sample(1000, 1000).is_err());
        assert!(reporter.events().is_empty());
    }
}
