//! I/O adapters: configuration, snapshots, git, and child processes.

pub mod config;
pub mod git;
pub mod process;
pub mod snapshot;
