//! Update lifecycle orchestration.
//!
//! One [`UpdateOrchestrator`] owns at most one live [`UpdateAttempt`]. It
//! takes the power lease, binds a per-attempt [`AttemptSink`] to the engine
//! and issues the apply. Reports come back as [`EngineEvent`]s tagged with
//! the attempt id so that a report from a torn-down attempt can never touch
//! the current one.
//!
//! # Lease discipline
//!
//! The lease is acquired once at start and released exactly once: on the
//! first effective completion, on a start failure, or when a new attempt
//! (or shutdown) tears the attempt down. Suspend, resume and cancel never
//! touch it.
//!
//! # Example
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut orchestrator = UpdateOrchestrator::new(config, engine, lease, store, projector, tx);
//!
//! orchestrator.start_attempt(otaflow::package::parse(path)?)?;
//! while let Some(event) = rx.recv().await {
//!     orchestrator.handle_event(event);
//! }
//! ```

mod config;
mod error;
mod lifecycle;
mod types;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult, StartFailureCause};
pub use lifecycle::UpdateOrchestrator;
pub use types::{
    percent_from_fraction, AttemptId, AttemptSink, AttemptSnapshot, AttemptState, EngineEvent,
    EngineEventKind, UpdateAttempt,
};
