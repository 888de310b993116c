//! Automated test-and-repair orchestrator for natural-language command agents.
//!
//! The orchestrator runs behavioral test cases against an agent under test,
//! grades each generated command against declarative criteria, and can drive
//! a feedback loop in which external reviewer, decision and fixer agents
//! diagnose failures, decide whether to continue, and patch the system under
//! test before the next run. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scenario parsing, command
//!   extraction, validation, decision parsing, statistics, the iteration
//!   state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, subprocesses, agents,
//!   collaborators, report artifacts, git). Isolated to enable scripted
//!   doubles in tests.
//!
//! Orchestration modules ([`suite`], [`session`], [`looping`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
