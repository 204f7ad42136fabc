//! Attempt state and engine events.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::EngineCallback;
use crate::package::UpdatePackageDescriptor;
use crate::status::{ErrorCode, UpdateStatus};

/// Monotonic identifier of an update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttemptId(u64);

impl AttemptId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a single attempt.
///
/// ```text
/// Idle → Preparing → Applying ⇄ Suspended
///                        │
///                        ▼
///                   Completing → Succeeded | Failed
///
/// Preparing | Applying | Suspended → Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Idle,
    Preparing,
    Applying,
    Suspended,
    Completing,
    Succeeded,
    Failed,
    Canceled,
}

impl AttemptState {
    /// `Succeeded`, `Failed` and `Canceled` end an attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Whether suspend and resume are allowed.
    pub fn is_pausable(self) -> bool {
        matches!(self, Self::Applying | Self::Suspended)
    }

    /// Whether cancellation is allowed.
    pub fn is_cancelable(self) -> bool {
        matches!(self, Self::Preparing | Self::Applying | Self::Suspended)
    }

    /// State after the engine reports `status`.
    pub fn after_status(self, status: UpdateStatus) -> Self {
        if self.is_terminal() {
            return self;
        }
        match status {
            UpdateStatus::CheckingForUpdate
            | UpdateStatus::UpdateAvailable
            | UpdateStatus::Downloading
            | UpdateStatus::Verifying => match self {
                Self::Suspended => Self::Suspended,
                _ => Self::Applying,
            },
            UpdateStatus::Finalizing | UpdateStatus::UpdatedNeedReboot => Self::Completing,
            _ => self,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Applying => "applying",
            Self::Suspended => "suspended",
            Self::Completing => "completing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one live update attempt.
#[derive(Debug, Clone)]
pub struct UpdateAttempt {
    pub id: AttemptId,
    pub state: AttemptState,
    /// Last reported progress, 0 to 100.
    pub progress_percent: u8,
    pub lease_held: bool,
    /// Set once the first completion has been processed.
    pub completion_handled: bool,
    pub cancel_requested: bool,
    pub start_notice_shown: bool,
    /// Code the engine finished with.
    pub completion: Option<ErrorCode>,
    pub descriptor: UpdatePackageDescriptor,
}

impl UpdateAttempt {
    pub fn new(id: AttemptId, descriptor: UpdatePackageDescriptor) -> Self {
        Self {
            id,
            state: AttemptState::Idle,
            progress_percent: 0,
            lease_held: false,
            completion_handled: false,
            cancel_requested: false,
            start_notice_shown: false,
            completion: None,
            descriptor,
        }
    }

    pub fn snapshot(&self, engine_status: Option<UpdateStatus>) -> AttemptSnapshot {
        AttemptSnapshot {
            id: self.id,
            state: self.state,
            progress_percent: self.progress_percent,
            engine_status,
            completion: self.completion,
            source_uri: self.descriptor.source_uri().to_string(),
        }
    }
}

/// Read-only view of an attempt, published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSnapshot {
    pub id: AttemptId,
    pub state: AttemptState,
    pub progress_percent: u8,
    pub engine_status: Option<UpdateStatus>,
    pub completion: Option<ErrorCode>,
    pub source_uri: String,
}

/// Engine report tagged with the attempt it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub attempt: AttemptId,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEventKind {
    Status { code: i32, fraction: f32 },
    Complete { code: i32 },
}

/// Callback sink bound to the engine for one attempt.
///
/// Forwards reports into the service channel so they are processed on the
/// service task, in delivery order.
pub struct AttemptSink {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl AttemptSink {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { attempt, tx }
    }

    fn forward(&self, kind: EngineEventKind) {
        let event = EngineEvent {
            attempt: self.attempt,
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!(attempt = %self.attempt, "Engine report dropped, receiver gone");
        }
    }
}

impl EngineCallback for AttemptSink {
    fn on_status_update(&self, status_code: i32, percent: f32) {
        self.forward(EngineEventKind::Status {
            code: status_code,
            fraction: percent,
        });
    }

    fn on_payload_application_complete(&self, error_code: i32) {
        self.forward(EngineEventKind::Complete { code: error_code });
    }
}

/// Convert an engine fraction to a whole percentage.
///
/// Rounds to nearest and clamps to `0..=100`. NaN maps to 0.
pub fn percent_from_fraction(fraction: f32) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}
