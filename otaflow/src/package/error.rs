//! Error types for package parsing.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Errors that can occur while parsing an update package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The container could not be opened or its directory enumerated.
    #[error("failed to read update package {}: {source}", path.display())]
    ContainerRead {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The properties entry exists but could not be read as text.
    #[error("failed to read payload properties from {}: {source}", path.display())]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    /// Path of the container the error relates to.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::ContainerRead { path, .. } | Self::PropertiesRead { path, .. } => path,
        }
    }
}
