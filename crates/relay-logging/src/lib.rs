//! # relay-logging
//!
//! `tracing` subscriber setup shared by the relay binaries.
//!
//! `RUST_LOG` always wins when set; otherwise the filter is built from the
//! configured default level plus per-module overrides.

#![deny(unsafe_code)]

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, ANSI colored.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Per-module level overrides (e.g. `relay_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

/// Errors from installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already set.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Render the filter directive string for a config, e.g. `info,relay_server=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter = config.level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push(',');
        filter.push_str(module);
        filter.push('=');
        filter.push_str(&level.to_string().to_lowercase());
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let json_layer = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
    });
    let pretty_layer = (config.format == LogFormat::Pretty)
        .then(|| fmt::layer().with_target(true).with_ansi(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;
    Ok(())
}
