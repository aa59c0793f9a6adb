use std::path::PathBuf;

use crate::collector::procfs::parser::{parse_kernel_stack, parse_proc_stat};
use crate::collector::traits::FileSystem;
use crate::collector::{ProviderError, ThreadDumper, ThreadSnapshot};

/// Lists running threads of a process from `/proc/<pid>/task`.
///
/// Frames come from the kernel stack file of each task. Reading it requires
/// privileges; without them threads are reported with no frames.
pub struct ProcThreadDumper<F: FileSystem> {
    fs: F,
    task_dir: PathBuf,
}

impl<F: FileSystem> ProcThreadDumper<F> {
    pub fn new(fs: F, proc_root: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            fs,
            task_dir: proc_root.into().join(pid.to_string()).join("task"),
        }
    }
}

impl<F: FileSystem> ThreadDumper for ProcThreadDumper<F> {
    fn running_threads(&self) -> Result<Vec<ThreadSnapshot>, ProviderError> {
        let mut tasks = self.fs.read_dir(&self.task_dir)?;
        tasks.sort();

        let mut threads = Vec::new();
        for task in tasks {
            // Threads exit between listing and reading.
            let Ok(content) = self.fs.read_to_string(&task.join("stat")) else {
                continue;
            };
            let Ok(stat) = parse_proc_stat(&content) else {
                continue;
            };
            if stat.state != 'R' {
                continue;
            }
            let frames = self
                .fs
                .read_to_string(&task.join("stack"))
                .map(|s| parse_kernel_stack(&s))
                .unwrap_or_default();
            threads.push(ThreadSnapshot {
                name: stat.comm,
                frames,
            });
        }
        Ok(threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn task_stat(tid: u32, comm: &str, state: char) -> String {
        format!("{tid} ({comm}) {state} 1 1 1 0 -1 0 0 0 0 0 1 1 0 0 20 0 1 0 10 4096 1")
    }

    #[test]
    fn keeps_running_threads_only() {
        let fs = MockFs::new();
        fs.add_file("/proc/9/task/9/stat", task_stat(9, "main", 'R'));
        fs.add_file("/proc/9/task/9/stack", "[<0>] do_syscall_64+0x5b/0x100\n");
        fs.add_file("/proc/9/task/10/stat", task_stat(10, "io worker", 'S'));
        fs.add_file("/proc/9/task/11/stat", task_stat(11, "compute", 'R'));

        let dumper = ProcThreadDumper::new(fs, "/proc", 9);
        let threads = dumper.running_threads().unwrap();

        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].name, "compute");
        assert!(threads[0].frames.is_empty());
        assert_eq!(threads[1].name, "main");
        assert_eq!(threads[1].frames[0].to_string(), "kernel.do_syscall_64:91");
    }

    #[test]
    fn missing_task_dir_is_an_error() {
        let dumper = ProcThreadDumper::new(MockFs::new(), "/proc", 9);
        assert!(dumper.running_threads().is_err());
    }
}
