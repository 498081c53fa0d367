//! Logging system setup.
//!
//! `RUST_LOG` wins over the configured level when set, e.g.
//! `RUST_LOG=scaleout_core=debug`.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Installs the global subscriber: human-readable by default, JSON when
/// either the configuration or `--json-logs` asks for it.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if settings.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!(level = %settings.level, json = settings.json_format, "Logging initialized");
    Ok(())
}
