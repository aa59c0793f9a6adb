//! Pre-built `/proc` states.

use super::filesystem::MockFs;

/// Pid of the root process in [`MockFs::process_tree_host`].
pub const TREE_ROOT_PID: u32 = 1000;

impl MockFs {
    /// A 4-CPU host running a small process tree under `/proc`:
    /// pid 1000 with children 1001 and 1002, and 1003 as a child of 1001.
    /// Pid 2000 is unrelated.
    ///
    /// Counters are set so that every process has consumed 10 user and 5
    /// system ticks and has done 4096 bytes of block I/O each way.
    pub fn process_tree_host() -> Self {
        let fs = Self::new();

        fs.add_file(
            "/proc/stat",
            "\
cpu  1000 0 500 8000 500 0 0 0 0 0
cpu0 250 0 125 2000 125 0 0 0 0 0
cpu1 250 0 125 2000 125 0 0 0 0 0
cpu2 250 0 125 2000 125 0 0 0 0 0
cpu3 250 0 125 2000 125 0 0 0 0 0
btime 1700000000
",
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
",
        );
        fs.add_file("/proc/loadavg", "0.50 0.40 0.30 2/300 4321\n");
        fs.add_file(
            "/proc/diskstats",
            "   8       0 sda 100 0 2000 10 50 0 1000 5 0 15 15 0 0 0 0\n",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 10000     100    0    0    0     0          0         0  5000      50    0    0    0     0       0          0
",
        );

        for (pid, ppid) in [(1000, 1), (1001, 1000), (1002, 1000), (1003, 1001), (2000, 1)] {
            fs.add_tree_process(pid, ppid, 10, 5);
        }

        fs
    }

    /// Adds a process with stat, status, io and smaps files.
    pub fn add_tree_process(&self, pid: u32, ppid: u32, utime: u64, stime: u64) {
        let base = format!("/proc/{pid}");
        self.add_file(
            format!("{base}/stat"),
            format!(
                "{pid} (worker {pid}) S {ppid} {pid} {pid} 0 -1 4194304 0 0 0 0 {utime} {stime} 0 0 20 0 2 0 500 1048576 256 18446744073709551615"
            ),
        );
        self.add_file(
            format!("{base}/status"),
            format!("Name:\tworker\nPid:\t{pid}\nPPid:\t{ppid}\nVmSize:\t1024 kB\nVmRSS:\t1024 kB\n"),
        );
        self.set_io(pid, 4096, 4096, 8192, 8192);
        self.add_file(
            format!("{base}/smaps"),
            "\
00400000-00452000 rw-p 00000000 00:00 0
Size:                 64 kB
Rss:                  64 kB
Anonymous:            64 kB
7f0000000000-7f0000100000 r--s 00000000 08:01 1234                       /dev/shm/segment
Size:               1024 kB
Rss:                  16 kB
Anonymous:            16 kB
",
        );
    }

    /// Overwrites `/proc/<pid>/io`.
    pub fn set_io(&self, pid: u32, read_bytes: u64, write_bytes: u64, rchar: u64, wchar: u64) {
        self.add_file(
            format!("/proc/{pid}/io"),
            format!(
                "rchar: {rchar}\nwchar: {wchar}\nsyscr: 1\nsyscw: 1\nread_bytes: {read_bytes}\nwrite_bytes: {write_bytes}\ncancelled_write_bytes: 0\n"
            ),
        );
    }
}
