//! Deterministic, pure logic shared by the assistant core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod control;
pub mod directive;
pub mod execution_state;
pub mod invariants;
pub mod policy;
pub mod todo;
pub mod types;
