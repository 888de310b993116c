//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `run`, the final run had no failing tests.
pub const OK: i32 = 0;
/// Invalid config, unreadable scenarios, unwritable reports or other errors.
pub const INVALID: i32 = 1;
/// The session ended with failing tests in its final run.
pub const TESTS_FAILED: i32 = 2;
/// The session halted because a reviewer, decision or fixer agent failed.
pub const COLLABORATOR_FAILED: i32 = 3;
