//! Presentation surface the projector renders to.

use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::status::ErrorCode;

/// One-off user-visible notices raised by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The engine accepted the payload and the update is under way.
    UpdateStarting,
    /// The engine finished with a failure code.
    UpdateFailed(ErrorCode),
    /// The attempt could not be started.
    StartFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UpdateStarting => write!(f, "System update starting"),
            Notice::UpdateFailed(code) => write!(f, "System update failed: {}", code),
            Notice::StartFailed(reason) => write!(f, "System update could not start: {}", reason),
        }
    }
}

/// Where progress and notices end up.
///
/// Calls arrive from the service task and must not block.
pub trait Presenter: Send + Sync {
    /// Remove any progress indication.
    fn clear(&self);

    /// Show `message` with a completion percentage.
    fn show_progress(&self, message: &str, percent: u8);

    /// Show a message without progress.
    fn show_message(&self, message: &str);

    /// Raise a one-off notice.
    fn notice(&self, notice: Notice);

    /// Ask the user to confirm a reboot for `reason`.
    fn request_reboot(&self, reason: &str);
}

/// [`Presenter`] that writes everything to the log.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn clear(&self) {}

    fn show_progress(&self, message: &str, percent: u8) {
        info!(percent, "{}", message);
    }

    fn show_message(&self, message: &str) {
        info!("{}", message);
    }

    fn notice(&self, notice: Notice) {
        match notice {
            Notice::UpdateStarting => info!("{}", notice),
            _ => warn!("{}", notice),
        }
    }

    fn request_reboot(&self, reason: &str) {
        info!(reason, "Reboot required to finish the update");
    }
}

/// Everything a [`RecordingPresenter`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterCall {
    Clear,
    Progress(String, u8),
    Message(String),
    Notice(Notice),
    Reboot(String),
}

/// [`Presenter`] that records calls, for tests and embedding hosts.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<PresenterCall>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.lock().clone()
    }

    pub fn reboot_requests(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, PresenterCall::Reboot(_)))
            .count()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PresenterCall::Notice(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    fn clear(&self) {
        self.calls.lock().push(PresenterCall::Clear);
    }

    fn show_progress(&self, message: &str, percent: u8) {
        self.calls
            .lock()
            .push(PresenterCall::Progress(message.to_string(), percent));
    }

    fn show_message(&self, message: &str) {
        self.calls.lock().push(PresenterCall::Message(message.to_string()));
    }

    fn notice(&self, notice: Notice) {
        self.calls.lock().push(PresenterCall::Notice(notice));
    }

    fn request_reboot(&self, reason: &str) {
        self.calls.lock().push(PresenterCall::Reboot(reason.to_string()));
    }
}
