//! Resumable execution engine for multi-step automated code-change tasks.
//!
//! A task is an ordered list of typed steps (analyze, edit, shell, test, doc,
//! custom) planned against a git branch. The engine runs the steps in order,
//! persists a state record per step after each one, and applies each step's
//! on-fail policy. Rerunning a task skips what already succeeded.
//!
//! - **[`core`]**: Pure, deterministic logic (policy, diff validation, state merges).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (stores, git, processes, the model server).
//! - **[`handlers`]**: One handler per step kind, built on `core` and `io`.
//!
//! Orchestration modules ([`start`], [`execute`]) coordinate these to implement
//! CLI commands.

pub mod core;
pub mod error;
pub mod execute;
pub mod exit_codes;
pub mod handlers;
pub mod io;
pub mod logging;
pub mod start;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
