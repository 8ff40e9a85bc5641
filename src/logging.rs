//! Tracing subscriber setup for the CLI.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("warn,appfoundry={}", level)
}

fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let directive = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default_directive(verbose),
    };
    Ok(EnvFilter::try_new(directive)?)
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let filter = env_filter(verbose)?;
    let registry = tracing_subscriber::registry();
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_filter(filter),
            )
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
