//! Process tree discovery.
//!
//! The tree of a process is the process itself plus every transitive
//! descendant, found by following the `ppid` field of `/proc/<pid>/stat`.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use crate::collector::procfs::parser::{ProcStat, parse_proc_stat};
use crate::collector::traits::FileSystem;
use crate::collector::ProviderError;

/// Reads the stat of `root_pid` and of all its descendants.
///
/// The root must be readable. Other processes that vanish or cannot be parsed
/// while the directory is scanned are skipped. The root comes first; the rest
/// are in breadth-first order.
pub fn process_tree<F: FileSystem>(
    fs: &F,
    proc_root: &Path,
    root_pid: u32,
) -> Result<Vec<ProcStat>, ProviderError> {
    let root_stat = parse_proc_stat(&fs.read_to_string(&stat_path(proc_root, root_pid))?)?;

    let mut children: HashMap<u32, Vec<ProcStat>> = HashMap::new();
    for entry in fs.read_dir(proc_root)? {
        let Some(pid) = entry
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == root_pid {
            continue;
        }
        let Ok(content) = fs.read_to_string(&entry.join("stat")) else {
            continue;
        };
        if let Ok(stat) = parse_proc_stat(&content) {
            children.entry(stat.ppid).or_default().push(stat);
        }
    }

    let mut tree = vec![root_stat];
    let mut queue = VecDeque::from([root_pid]);
    while let Some(parent) = queue.pop_front() {
        let Some(mut kids) = children.remove(&parent) else {
            continue;
        };
        kids.sort_by_key(|s| s.pid);
        queue.extend(kids.iter().map(|s| s.pid));
        tree.extend(kids);
    }
    Ok(tree)
}

pub(crate) fn stat_path(proc_root: &Path, pid: u32) -> std::path::PathBuf {
    proc_root.join(pid.to_string()).join("stat")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn stat_line(pid: u32, ppid: u32) -> String {
        format!(
            "{pid} (proc{pid}) S {ppid} 1 1 0 -1 4194304 0 0 0 0 10 5 0 0 20 0 1 0 100 4096 2 18446744073709551615"
        )
    }

    #[test]
    fn collects_transitive_descendants() {
        let fs = MockFs::new();
        for (pid, ppid) in [(1, 0), (100, 1), (101, 100), (102, 101), (103, 100), (200, 1)] {
            fs.add_file(format!("/proc/{pid}/stat"), stat_line(pid, ppid));
        }
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");

        let pids: Vec<u32> = process_tree(&fs, Path::new("/proc"), 100)
            .unwrap()
            .iter()
            .map(|s| s.pid)
            .collect();
        assert_eq!(pids, vec![100, 101, 103, 102]);
    }

    #[test]
    fn skips_unparsable_processes() {
        let fs = MockFs::new();
        fs.add_file("/proc/10/stat", stat_line(10, 1));
        fs.add_file("/proc/11/stat", "garbage");
        fs.add_dir("/proc/12");
        fs.add_file("/proc/13/stat", stat_line(13, 10));

        let tree = process_tree(&fs, Path::new("/proc"), 10).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].pid, 13);
    }

    #[test]
    fn missing_root_is_an_error() {
        let fs = MockFs::new();
        fs.add_file("/proc/2/stat", stat_line(2, 1));
        assert!(process_tree(&fs, Path::new("/proc"), 1).is_err());
    }
}
