//! Side-effecting adapters: filesystem, subprocesses, git.
//!
//! Everything here is kept behind small functions or traits so the
//! orchestration modules can be tested with scripted doubles.

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod executor;
pub mod git;
pub mod process;
pub mod prompt;
pub mod reports;
pub mod scenarios;
