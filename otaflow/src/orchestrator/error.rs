//! Errors returned by the lifecycle orchestrator.

use thiserror::Error;

use super::types::{AttemptId, AttemptState};
use crate::engine::EngineError;
use crate::lease::LeaseError;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Why an attempt could not be started.
#[derive(Debug, Error)]
pub enum StartFailureCause {
    #[error("power lease: {0}")]
    Lease(#[source] LeaseError),

    #[error("bind: {0}")]
    Bind(#[source] EngineError),

    #[error("apply: {0}")]
    Apply(#[source] EngineError),
}

/// Errors that can occur while driving an update attempt.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The descriptor cannot be applied. Nothing was changed.
    #[error("invalid update package: {reason}")]
    InvalidDescriptor { reason: &'static str },

    /// Lease, bind or apply failed synchronously. The attempt is `Failed`.
    #[error("update attempt {attempt} failed to start: {source}")]
    StartFailure {
        attempt: AttemptId,
        #[source]
        source: StartFailureCause,
    },

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: AttemptState,
    },

    /// The engine refused a suspend or resume.
    #[error("update engine failed to {operation}: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },
}
