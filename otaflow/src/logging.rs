//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When a log file is configured, a second,
//! non-blocking layer writes the same events there without ANSI colors.
//! `RUST_LOG` takes precedence over the configured level.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Errors that can occur while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the file writer alive. Dropping it flushes pending log lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Local wall-clock timestamps, millisecond precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Filter from `RUST_LOG`, else from `level` (`debug` when verbose).
pub fn build_filter(level: &str, verbose: bool) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = if verbose { "debug" } else { level };
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError> {
    let file_name = path.file_name().ok_or_else(|| LoggingError::LogFile {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "not a file path"),
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(file_name)))
}

/// Install the global subscriber.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<LoggingGuard, LoggingError> {
    let filter = build_filter(&settings.level, verbose)?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_timer(LocalTimer)
        .with_target(false);

    let (file_layer, file_guard) = match &settings.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            fs::create_dir_all(&dir).map_err(|source| LoggingError::LogFile {
                path: path.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_timer(LocalTimer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard { _file: file_guard })
}
