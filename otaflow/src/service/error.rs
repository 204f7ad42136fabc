//! Errors returned through a [`ServiceHandle`](super::ServiceHandle).

use thiserror::Error;

use crate::orchestrator::OrchestratorError;

/// Result type for service requests.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur when talking to a running service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service task has stopped.
    #[error("update service is not running")]
    Closed,

    /// The orchestrator refused the request.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
