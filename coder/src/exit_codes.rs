//! Stable exit codes for `coder` CLI commands.

/// Command succeeded; for `run`/`resume`, every step is success or skipped.
pub const OK: i32 = 0;
/// Command failed due to an invalid task, config, missing state or other errors.
pub const INVALID: i32 = 1;
/// `run` or `resume` halted on a failed step.
pub const HALTED: i32 = 3;
