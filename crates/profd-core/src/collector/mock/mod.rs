//! In-memory providers for tests and embedding.
//!
//! `MockFs` stands in for `/proc`, `FakeRuntime` and `FakeThreads` for the
//! runtime counter and thread dump sources.

mod filesystem;
mod runtime;
mod scenarios;

pub use filesystem::MockFs;
pub use runtime::{FakeRuntime, FakeThreads};
pub use scenarios::TREE_ROOT_PID;
