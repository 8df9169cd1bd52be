//! Deterministic, pure logic shared by the orchestration loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod extract;
pub mod policy;
pub mod routing;
pub mod run_log;
pub mod state;
pub mod types;
