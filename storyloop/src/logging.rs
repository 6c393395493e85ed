//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG` or `--verbose`,
//!   output to stderr. Not persisted.
//!
//! - **Iteration logging (`io/iteration_log`)**: Product artifacts in
//!   `<state_dir>/iterations/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `debug` for this
/// crate with `verbose`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=storyloop=debug storyloop run 001-alerts --mode loop
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,storyloop=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
