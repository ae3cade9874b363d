//! Development-time tracing for debugging the engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the engine's recorded output.
//!
//! - **Event log (`io/event_log`)**: Product record in `.coder/logs/<task-id>.jsonl`.
//!   Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset; `verbose` raises
/// the default to `coder=info`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=coder=debug coder run --task T-1
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "warn,coder=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
