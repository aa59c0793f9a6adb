//! `/proc` backed providers (Linux).

pub mod parser;
mod runtime;
mod threads;
pub mod tree;

use std::path::Path;

use crate::collector::traits::FileSystem;

pub use runtime::ProcRuntime;
pub use threads::ProcThreadDumper;

/// Length of a clock tick in milliseconds (`CLK_TCK` = 100).
pub const JIFFY_MS: u64 = 10;

/// Size of a memory page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Whether `proc_root` looks like a Linux procfs mount.
pub fn is_available<F: FileSystem>(fs: &F, proc_root: &Path) -> bool {
    fs.exists(&proc_root.join("stat"))
}
