//! Boundary to the privileged update engine.
//!
//! The engine applies payloads to the inactive slot and reports back
//! asynchronously. This module defines the two halves of that contract:
//!
//! - [`UpdateEngine`] - requests issued to the engine
//! - [`EngineCallback`] - the sink the engine reports status and completion to
//!
//! # Implementations
//!
//! - [`ClientEngine`] - drives the platform `update_engine_client` binary
//! - [`SimulatedEngine`] - scripted engine for dry runs and tests
//!
//! ```text
//! ┌──────────────┐  bind / apply / suspend / resume / cancel  ┌──────────────┐
//! │ Orchestrator │ ─────────────────────────────────────────► │ UpdateEngine │
//! │              │ ◄───────────────────────────────────────── │              │
//! └──────────────┘   EngineCallback (status, completion)      └──────────────┘
//! ```

mod client;
mod error;
mod simulated;

use std::sync::Arc;

pub use client::{
    parse_follow_line, ClientEngine, FollowEvent, DEFAULT_ACCEPT_WINDOW, DEFAULT_CLIENT_PATH,
};
pub use error::{EngineError, EngineResult};
pub use simulated::{SimulatedEngine, SimulationScript};

/// Sink receiving asynchronous reports from the update engine.
///
/// Implementations must be cheap and non-blocking; the engine may call them
/// from its own reader threads.
pub trait EngineCallback: Send + Sync {
    /// Engine status changed. `percent` is a fraction in `[0, 1]`.
    fn on_status_update(&self, status_code: i32, percent: f32);

    /// Payload application finished with `error_code` (`0` on success).
    fn on_payload_application_complete(&self, error_code: i32);
}

/// Requests the orchestrator issues to the update engine.
pub trait UpdateEngine: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Register the sink that receives status and completion reports.
    fn bind(&mut self, callback: Arc<dyn EngineCallback>) -> EngineResult<()>;

    /// Detach the sink. Reports arriving afterwards are dropped.
    fn unbind(&mut self);

    /// Start applying the payload at `url`, `offset`..`offset + size`.
    fn apply_payload(
        &mut self,
        url: &str,
        offset: u64,
        size: u64,
        properties: &[String],
    ) -> EngineResult<()>;

    /// Pause the running update.
    fn suspend(&mut self) -> EngineResult<()>;

    /// Resume a paused update.
    fn resume(&mut self) -> EngineResult<()>;

    /// Ask the engine to cancel. Completion is still reported asynchronously.
    fn cancel(&mut self) -> EngineResult<()>;
}
