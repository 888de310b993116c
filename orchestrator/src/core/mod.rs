//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod controller;
pub mod decision;
pub mod extract;
pub mod rules;
pub mod scenario;
pub mod stats;
pub mod types;
pub mod validate;
