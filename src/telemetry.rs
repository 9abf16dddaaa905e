//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,makoto=debug";

/// Initializes tracing with the default filter.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing() -> Result<()> {
    init_tracing_with(DEFAULT_LOG_FILTER)
}

/// Initializes tracing, falling back to `default_filter` when `RUST_LOG` is
/// unset. Logs go to stderr so stdout stays free for results.
///
/// # Errors
///
/// Fails if the filter does not parse or a global subscriber is already
/// installed.
pub fn init_tracing_with(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .with_context(|| format!("Invalid log filter {default_filter:?}"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}
