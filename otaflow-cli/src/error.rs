//! CLI error type.

use std::io;

use otaflow::config::ConfigError;
use otaflow::logging::LoggingError;
use otaflow::package::PackageError;
use otaflow::service::ServiceError;
use otaflow::store::StoreError;
use thiserror::Error;

/// Errors surfaced to the user by a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("state store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("an update is already in progress (flag {key}=1); pass --force to apply anyway")]
    AlreadyUpdating { key: String },

    /// The update ran but did not succeed.
    #[error("update {0}")]
    UpdateFailed(String),

    #[error("failed to start runtime: {0}")]
    Runtime(String),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}
