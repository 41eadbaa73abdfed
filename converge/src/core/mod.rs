//! Deterministic, pure logic shared by the engine and the CLI.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod elapsed;
pub mod plan;
pub mod report;
pub mod step;
pub mod types;
