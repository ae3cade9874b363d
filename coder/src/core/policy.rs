//! On-fail policy decisions for the execution loop.

use crate::task::{OnFailStrategy, StepDefinition};

/// Retry cycles granted by `fix_and_retry` when `max_cycles` is unset.
pub const DEFAULT_FIX_CYCLES: u32 = 1;

/// What the loop does once a step has resolved to `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Rewrite the record to `skipped` with `note` and continue.
    Skip { note: String },
    /// Record `note` (if any) and stop executing further steps.
    Halt { note: Option<String> },
}

/// Number of extra handler invocations allowed after the first failure.
pub fn max_fix_cycles(step: &StepDefinition) -> u32 {
    match step.on_fail.as_ref() {
        Some(on_fail) if on_fail.strategy == Some(OnFailStrategy::FixAndRetry) => {
            on_fail.max_cycles.unwrap_or(DEFAULT_FIX_CYCLES)
        }
        _ => 0,
    }
}

/// True if a failed attempt numbered `attempt` (0-based retries consumed) may be re-run.
pub fn should_retry(step: &StepDefinition, attempt: u32) -> bool {
    attempt < max_fix_cycles(step)
}

/// Decide how a step whose attempts have resolved to `failed` is handled.
pub fn resolve_failure(step: &StepDefinition, error: Option<&str>) -> FailureAction {
    match step.strategy() {
        Some(OnFailStrategy::Skip) => FailureAction::Skip {
            note: format!(
                "Skipped after failure due to on_fail=skip. Original error: {}",
                error.unwrap_or("unknown error")
            ),
        },
        Some(OnFailStrategy::FixAndRetry) => FailureAction::Halt {
            note: Some(format!(
                "Failure persisted after {} fix_and_retry cycle(s); manual intervention required.",
                max_fix_cycles(step)
            )),
        },
        Some(OnFailStrategy::RevertAndStop) | None => FailureAction::Halt { note: None },
    }
}
