//! Parsers for `/proc` files.
//!
//! Pure functions from file content to structured data, testable with
//! string inputs.

use std::collections::HashMap;

use crate::collector::StackFrame;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fields of `/proc/[pid]/stat` used by the agent.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    /// Ticks in user mode.
    pub utime: u64,
    /// Ticks in kernel mode.
    pub stime: u64,
    pub num_threads: i64,
    pub starttime: u64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: i64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field may contain spaces and parentheses, so it is delimited by
/// the first `(` and the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    // Indices below are relative to the field after ')', i.e. `state` is 0.
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    fn field<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str) -> Result<T, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    }

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: field(&fields, 1, "ppid")?,
        utime: field(&fields, 11, "utime")?,
        stime: field(&fields, 12, "stime")?,
        num_threads: field(&fields, 17, "num_threads")?,
        starttime: field(&fields, 19, "starttime")?,
        vsize: field(&fields, 20, "vsize")?,
        rss: field(&fields, 21, "rss")?,
    })
}

/// Memory fields of `/proc/[pid]/status`, in kB.
#[derive(Debug, Clone, Default)]
pub struct ProcStatus {
    pub name: String,
    pub pid: u32,
    pub ppid: u32,
    pub vm_size: u64,
    pub vm_rss: u64,
    pub vm_data: u64,
    pub rss_anon: u64,
    pub rss_file: u64,
    pub rss_shmem: u64,
    pub threads: u32,
}

/// Parses `/proc/[pid]/status` content (`Key:\tvalue` lines).
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }

    // "12345 kB"
    let parse_kb = |key: &str| -> u64 {
        fields
            .get(key)
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };
    let parse_num = |key: &str| fields.get(key).and_then(|s| s.parse().ok()).unwrap_or(0);

    Ok(ProcStatus {
        name: fields.get("Name").unwrap_or(&"").to_string(),
        pid: parse_num("Pid"),
        ppid: parse_num("PPid"),
        vm_size: parse_kb("VmSize"),
        vm_rss: parse_kb("VmRSS"),
        vm_data: parse_kb("VmData"),
        rss_anon: parse_kb("RssAnon"),
        rss_file: parse_kb("RssFile"),
        rss_shmem: parse_kb("RssShmem"),
        threads: parse_num("Threads"),
    })
}

/// Parsed data from `/proc/[pid]/io`.
#[derive(Debug, Clone, Default)]
pub struct ProcIo {
    /// Bytes read, possibly served from page cache.
    pub rchar: u64,
    /// Bytes written, possibly only to page cache.
    pub wchar: u64,
    /// Bytes fetched from block storage.
    pub read_bytes: u64,
    /// Bytes sent to block storage.
    pub write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content. Every field is required.
pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    let (mut rchar, mut wchar, mut read_bytes, mut write_bytes) = (None, None, None, None);

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "rchar" => &mut rchar,
            "wchar" => &mut wchar,
            "read_bytes" => &mut read_bytes,
            "write_bytes" => &mut write_bytes,
            _ => continue,
        };
        let value: u64 = value
            .trim()
            .parse()
            .map_err(|_| ParseError::new(format!("invalid value in io line: {}", line)))?;
        *slot = Some(value);
    }

    match (rchar, wchar, read_bytes, write_bytes) {
        (Some(rchar), Some(wchar), Some(read_bytes), Some(write_bytes)) => Ok(ProcIo {
            rchar,
            wchar,
            read_bytes,
            write_bytes,
        }),
        _ => Err(ParseError::new("missing field in io")),
    }
}

/// Parsed data from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
}

pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let parse_kb = |value: &str| -> u64 {
        value
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "MemTotal" => info.mem_total = parse_kb(value),
            "MemFree" => info.mem_free = parse_kb(value),
            "MemAvailable" => info.mem_available = parse_kb(value),
            _ => {}
        }
    }

    if info.mem_total == 0 {
        return Err(ParseError::new("missing MemTotal in meminfo"));
    }
    Ok(info)
}

/// Single CPU line from `/proc/stat`, in ticks.
#[derive(Debug, Clone, Default)]
pub struct CpuStat {
    /// `None` for the aggregate "cpu" line.
    pub cpu_id: Option<u32>,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Ticks spent doing work.
    pub fn active(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    /// Active ticks plus idle and iowait.
    pub fn total(&self) -> u64 {
        self.active() + self.idle + self.iowait
    }
}

/// Global stats from `/proc/stat`.
#[derive(Debug, Clone, Default)]
pub struct GlobalStat {
    pub cpus: Vec<CpuStat>,
    pub btime: u64,
}

impl GlobalStat {
    /// Aggregate line over all CPUs.
    pub fn total(&self) -> Option<&CpuStat> {
        self.cpus.iter().find(|c| c.cpu_id.is_none())
    }

    /// Number of per-CPU lines.
    pub fn cpu_count(&self) -> usize {
        self.cpus.iter().filter(|c| c.cpu_id.is_some()).count()
    }
}

pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&head) = parts.first() else {
            continue;
        };

        if let Some(id) = head.strip_prefix("cpu") {
            let cpu_id = if id.is_empty() {
                None
            } else {
                Some(
                    id.parse()
                        .map_err(|_| ParseError::new(format!("invalid cpu line: {}", line)))?,
                )
            };
            let get_val =
                |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

            stat.cpus.push(CpuStat {
                cpu_id,
                user: get_val(1),
                nice: get_val(2),
                system: get_val(3),
                idle: get_val(4),
                iowait: get_val(5),
                irq: get_val(6),
                softirq: get_val(7),
                steal: get_val(8),
            });
        } else if head == "btime" {
            stat.btime = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
        }
    }

    if stat.total().is_none() {
        return Err(ParseError::new("missing aggregate cpu line in stat"));
    }
    Ok(stat)
}

#[derive(Debug, Clone, Default)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ParseError::new("invalid loadavg format"));
    }
    let parse = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parts[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(LoadAvg {
        load1: parse(0, "load1")?,
        load5: parse(1, "load5")?,
        load15: parse(2, "load15")?,
    })
}

/// Per-device counters from `/proc/diskstats`. Sectors are 512 bytes.
#[derive(Debug, Clone, Default)]
pub struct DiskStats {
    pub major: u32,
    pub minor: u32,
    pub device: String,
    pub reads: u64,
    pub read_sectors: u64,
    pub writes: u64,
    pub write_sectors: u64,
}

/// Parses `/proc/diskstats` content. Malformed lines are skipped.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors ...
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStats>, ParseError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }
        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        disks.push(DiskStats {
            major: parts[0].parse().unwrap_or(0),
            minor: parts[1].parse().unwrap_or(0),
            device: parts[2].to_string(),
            reads: get_val(3),
            read_sectors: get_val(5),
            writes: get_val(7),
            write_sectors: get_val(9),
        });
    }

    Ok(disks)
}

#[derive(Debug, Clone, Default)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Parses `/proc/net/dev` content. The two header lines contain `|`.
pub fn parse_net_dev(content: &str) -> Result<Vec<NetDevStats>, ParseError> {
    let mut devices = Vec::new();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }
        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }
        let get_val =
            |idx: usize| -> u64 { values.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        devices.push(NetDevStats {
            interface: interface.trim().to_string(),
            rx_bytes: get_val(0),
            rx_packets: get_val(1),
            tx_bytes: get_val(8),
            tx_packets: get_val(9),
        });
    }

    Ok(devices)
}

/// One mapping of `/proc/[pid]/smaps`. Sizes in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmapsEntry {
    pub permissions: String,
    pub size: u64,
    pub rss: u64,
    pub anonymous: u64,
}

/// Parses `/proc/[pid]/smaps` content into one entry per mapping.
///
/// A mapping header looks like `7f1a-7f1b rw-p 00000000 00:00 0 [heap]`; the
/// `Key: N kB` lines that follow belong to it.
pub fn parse_smaps(content: &str) -> Result<Vec<SmapsEntry>, ParseError> {
    let mut entries: Vec<SmapsEntry> = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };

        if first.contains('-') && !first.ends_with(':') {
            let permissions = parts
                .next()
                .ok_or_else(|| ParseError::new(format!("missing permissions: {}", line)))?;
            entries.push(SmapsEntry {
                permissions: permissions.to_string(),
                ..Default::default()
            });
            continue;
        }

        let Some(entry) = entries.last_mut() else {
            return Err(ParseError::new("smaps field before any mapping header"));
        };
        let value = || -> u64 { line.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0) };
        match first {
            "Size:" => entry.size = value(),
            "Rss:" => entry.rss = value(),
            "Anonymous:" => entry.anonymous = value(),
            _ => {}
        }
    }

    Ok(entries)
}

/// Sums anonymous memory in bytes over mappings whose permissions are not in
/// `excluded`.
pub fn smaps_anonymous_bytes(entries: &[SmapsEntry], excluded: &[&str]) -> u64 {
    entries
        .iter()
        .filter(|e| !excluded.contains(&e.permissions.as_str()))
        .map(|e| e.anonymous * 1024)
        .sum()
}

/// Parses `/proc/[pid]/task/[tid]/stack`.
///
/// Lines look like `[<0>] do_syscall_64+0x5b/0x100` with an optional
/// trailing `[module]`. The offset inside the symbol is used as line number.
pub fn parse_kernel_stack(content: &str) -> Vec<StackFrame> {
    content
        .lines()
        .filter_map(|line| {
            let rest = match line.trim().split_once("] ") {
                Some((_, rest)) => rest,
                None => line.trim(),
            };
            let mut parts = rest.split_whitespace();
            let symbol = parts.next()?;
            let module = parts
                .next()
                .map(|m| m.trim_matches(|c| c == '[' || c == ']'))
                .unwrap_or("kernel");

            let (function, offset) = match symbol.split_once('+') {
                Some((function, location)) => {
                    let offset = location.split('/').next().unwrap_or("0");
                    let offset = u32::from_str_radix(offset.trim_start_matches("0x"), 16).unwrap_or(0);
                    (function, offset)
                }
                None => (symbol, 0),
            };
            (!function.is_empty()).then(|| StackFrame::new(module, function, offset))
        })
        .collect()
}
