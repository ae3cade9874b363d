//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod commands;
pub mod diff;
pub mod invariants;
pub mod policy;
pub mod sanitize;
pub mod state_update;
pub mod types;
