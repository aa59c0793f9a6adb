use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::collector::FileSystem;
use crate::collector::procfs::is_available;
use crate::collector::procfs::parser::{parse_diskstats, parse_loadavg, parse_net_dev};
use crate::delta::DeltaTracker;
use crate::profiler::{Profiler, ProfilerError, Sampler, per_second};
use crate::reporter::Reporter;

pub const NAME: &str = "HostProfiler";

const SECTOR_SIZE: u64 = 512;

/// Byte counters of one device or interface, read and write side.
#[derive(Debug, Default)]
struct DuplexTracker {
    read: DeltaTracker,
    write: DeltaTracker,
}

impl DuplexTracker {
    fn observe(&mut self, read: u64, write: u64) -> (i64, i64) {
        (self.read.observe_u64(read), self.write.observe_u64(write))
    }
}

/// Host-wide disk and network throughput plus the 1-minute load average.
pub struct HostProfiler<F: FileSystem> {
    fs: F,
    proc_root: PathBuf,
    reporter: Arc<dyn Reporter>,
    disks: HashMap<String, DuplexTracker>,
    interfaces: HashMap<String, DuplexTracker>,
}

impl<F: FileSystem> HostProfiler<F> {
    pub fn new(
        fs: F,
        proc_root: impl Into<PathBuf>,
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
            reporter,
            disks: HashMap::new(),
            interfaces: HashMap::new(),
        })
    }

    /// Byte deltas per disk, in `/proc/diskstats` order.
    fn disk_deltas(&mut self) -> Result<Vec<(String, i64, i64)>, ProfilerError> {
        let content = self.fs.read_to_string(&self.proc_root.join("diskstats"))?;
        let disks = parse_diskstats(&content)?;
        // Forget devices that went away so a re-attached one starts fresh.
        self.disks
            .retain(|name, _| disks.iter().any(|d| &d.device == name));
        Ok(disks
            .into_iter()
            .map(|d| {
                let (read, write) = self.disks.entry(d.device.clone()).or_default().observe(
                    d.read_sectors.saturating_mul(SECTOR_SIZE),
                    d.write_sectors.saturating_mul(SECTOR_SIZE),
                );
                (d.device, read, write)
            })
            .collect())
    }

    fn net_deltas(&mut self) -> Result<Vec<(String, i64, i64)>, ProfilerError> {
        let content = self.fs.read_to_string(&self.proc_root.join("net/dev"))?;
        let devices = parse_net_dev(&content)?;
        self.interfaces
            .retain(|name, _| devices.iter().any(|d| &d.interface == name));
        Ok(devices
            .into_iter()
            .map(|d| {
                let (rx, tx) = self
                    .interfaces
                    .entry(d.interface.clone())
                    .or_default()
                    .observe(d.rx_bytes, d.tx_bytes);
                (d.interface, rx, tx)
            })
            .collect())
    }
}

impl<F: FileSystem> Profiler for HostProfiler<F> {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self, _now_ms: i64) -> Result<(), ProfilerError> {
        self.disk_deltas()?;
        self.net_deltas()?;
        Ok(())
    }

    fn stop(&mut self, _now_ms: i64, _delta_ms: i64) -> Result<(), ProfilerError> {
        Ok(())
    }
}

impl<F: FileSystem> Sampler for HostProfiler<F> {
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        let load = parse_loadavg(&self.fs.read_to_string(&self.proc_root.join("loadavg"))?)?;
        let disks = self.disk_deltas()?;
        let interfaces = self.net_deltas()?;

        let r = &self.reporter;
        for (device, read, write) in &disks {
            r.report_event(
                "HOST_DISK_READ_BYTES_PER_SEC",
                device,
                per_second(*read, delta_ms),
                now_ms,
            );
            r.report_event(
                "HOST_DISK_WRITE_BYTES_PER_SEC",
                device,
                per_second(*write, delta_ms),
                now_ms,
            );
        }
        for (interface, rx, tx) in &interfaces {
            r.report_event(
                "HOST_NET_RX_BYTES_PER_SEC",
                interface,
                per_second(*rx, delta_ms),
                now_ms,
            );
            r.report_event(
                "HOST_NET_TX_BYTES_PER_SEC",
                interface,
                per_second(*tx, delta_ms),
                now_ms,
            );
        }
        r.report_event("HOST_LOAD_AVG_1", "", load.load1, now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::reporter::MemoryReporter;

    fn setup() -> (MockFs, Arc<MemoryReporter>, HostProfiler<MockFs>) {
        let fs = MockFs::process_tree_host();
        let reporter = Arc::new(MemoryReporter::new());
        let profiler = HostProfiler::new(fs.clone(), "/proc", reporter.clone()).unwrap();
        (fs, reporter, profiler)
    }

    #[test]
    fn throughput_per_device_and_interface() {
        let (fs, reporter, mut profiler) = setup();
        profiler.start(0).unwrap();

        fs.add_file(
            "/proc/diskstats",
            "   8       0 sda 120 0 4000 12 60 0 1500 6 0 18 18 0 0 0 0\n",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 30000     120    0    0    0     0          0         0  6000      60    0    0    0     0       0          0
",
        );
        profiler.sample(2000, 2000).unwrap();

        let read = reporter.events_named("HOST_DISK_READ_BYTES_PER_SEC");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].label, "sda");
        // 2000 sectors in 2 s
        assert_eq!(read[0].value, 512_000.0);
        assert_eq!(
            reporter.last_value("HOST_DISK_WRITE_BYTES_PER_SEC"),
            Some(128_000.0)
        );
        assert_eq!(reporter.last_value("HOST_NET_RX_BYTES_PER_SEC"), Some(10_000.0));
        assert_eq!(reporter.last_value("HOST_NET_TX_BYTES_PER_SEC"), Some(500.0));
        assert_eq!(reporter.last_value("HOST_LOAD_AVG_1"), Some(0.5));
    }

    #[test]
    fn new_device_starts_at_zero() {
        let (fs, reporter, mut profiler) = setup();
        profiler.start(0).unwrap();

        fs.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 100 0 2000 10 50 0 1000 5 0 15 15 0 0 0 0
   8      16 sdb 900 0 90000 10 50 0 70000 5 0 15 15 0 0 0 0
",
        );
        profiler.sample(1000, 1000).unwrap();

        let read = reporter.events_named("HOST_DISK_READ_BYTES_PER_SEC");
        assert_eq!(read.len(), 2);
        assert!(read.iter().all(|e| e.value == 0.0));
    }

    #[test]
    fn missing_loadavg_fails_the_sample() {
        let (fs, reporter, mut profiler) = setup();
        fs.remove("/proc/loadavg");
        assert!(profiler.sample(1000, 1000).is_err());
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn unavailable_without_procfs() {
        let result = HostProfiler::new(MockFs::new(), "/proc", Arc::new(MemoryReporter::new()));
        assert!(matches!(result, Err(ProfilerError::Unsupported(_))));
    }
}
