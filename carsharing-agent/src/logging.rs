//! Tracing setup.
//!
//! Two sinks: human-readable request tracing on stdout, filtered by
//! `RUST_LOG`, and an append-only JSON error log that receives every
//! `ERROR` event regardless of the stdout filter.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
    /// File receiving error events as JSON lines.
    pub error_log: PathBuf,
}

/// Open (or create) the error log for appending.
pub fn open_error_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Layer writing `ERROR` events as JSON lines to `file`.
pub fn error_log_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::ERROR)
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let error_file = open_error_log(&config.error_log)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_filter(filter))
        .with(error_log_layer(error_file))
        .init();

    tracing::info!(
        filter = %config.filter,
        error_log = %config.error_log.display(),
        "logging initialized"
    );
    Ok(())
}
