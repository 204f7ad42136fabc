//! Errors reported by update engine adapters.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine requests.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while talking to the update engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine client could not be launched.
    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The engine refused a request.
    #[error("update engine rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// A request that needs a bound callback was issued without one.
    #[error("no callback bound to the update engine")]
    NotBound,

    /// The operation needs a payload in flight and there is none.
    #[error("no payload is being applied")]
    NotApplying,
}
