//! Maps engine status into what the user sees.
//!
//! ```text
//! FAIL / IDLE              → clear
//! UPDATED_NEED_REBOOT      → reboot prompt after the settle delay (once per attempt)
//! DOWNLOADING / VERIFYING  → "Downloading update… N%"
//! FINALIZING               → "Finalizing update… N%"
//! anything else            → "System update running"
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::presentation::Presenter;
use crate::status::UpdateStatus;

/// Reason passed along with the reboot request.
pub const DEFAULT_REBOOT_REASON: &str = "reboot-ab-update";

/// Delay between the engine reporting a pending reboot and the prompt.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Message shown for statuses without a dedicated rendering.
pub const RUNNING_MESSAGE: &str = "System update running";

/// Configuration for the [`StatusProjector`].
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub settle_delay: Duration,
    pub reboot_reason: String,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            reboot_reason: DEFAULT_REBOOT_REASON.to_string(),
        }
    }
}

impl ProjectorConfig {
    /// Set the delay before the reboot prompt.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the reboot reason.
    pub fn with_reboot_reason(mut self, reason: impl Into<String>) -> Self {
        self.reboot_reason = reason.into();
        self
    }
}

/// What a single status update was rendered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Clear,
    /// Reboot prompt scheduled, or already scheduled for this attempt.
    RebootPending { scheduled: bool },
    Progress { text: String, percent: u8 },
    Running,
}

/// Renders `(status, progress)` pairs to a [`Presenter`].
pub struct StatusProjector {
    presenter: Arc<dyn Presenter>,
    config: ProjectorConfig,
    reboot_requested: bool,
    /// Cancels the pending reboot prompt of the current attempt.
    reboot_prompt: CancellationToken,
    last_text: Option<String>,
}

impl StatusProjector {
    pub fn new(presenter: Arc<dyn Presenter>, config: ProjectorConfig) -> Self {
        Self {
            presenter,
            config,
            reboot_requested: false,
            reboot_prompt: CancellationToken::new(),
            last_text: None,
        }
    }

    pub fn presenter(&self) -> &Arc<dyn Presenter> {
        &self.presenter
    }

    /// Reset per-attempt state. Called when a new attempt starts.
    ///
    /// A reboot prompt still waiting out the settle delay is dropped.
    pub fn begin_attempt(&mut self) {
        self.reboot_prompt.cancel();
        self.reboot_prompt = CancellationToken::new();
        self.reboot_requested = false;
        self.last_text = None;
    }

    /// Last progress or running text shown, if any.
    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    /// Render one status update.
    pub fn project(&mut self, status: UpdateStatus, progress: u8) -> Projection {
        let projection = match status {
            UpdateStatus::Fail | UpdateStatus::Idle => {
                self.presenter.clear();
                self.last_text = None;
                Projection::Clear
            }
            UpdateStatus::UpdatedNeedReboot => {
                let scheduled = !self.reboot_requested;
                if scheduled {
                    self.reboot_requested = true;
                    self.schedule_reboot();
                }
                Projection::RebootPending { scheduled }
            }
            UpdateStatus::Downloading | UpdateStatus::Verifying => {
                self.progress(format!("Downloading update... {}%", progress), progress)
            }
            UpdateStatus::Finalizing => {
                self.progress(format!("Finalizing update... {}%", progress), progress)
            }
            _ => {
                self.presenter.show_message(RUNNING_MESSAGE);
                self.last_text = Some(RUNNING_MESSAGE.to_string());
                Projection::Running
            }
        };
        debug!(status = %status, progress, ?projection, "Projected status");
        projection
    }

    fn progress(&mut self, text: String, percent: u8) -> Projection {
        self.presenter.show_progress(&text, percent);
        self.last_text = Some(text.clone());
        Projection::Progress { text, percent }
    }

    fn schedule_reboot(&self) {
        let presenter = Arc::clone(&self.presenter);
        let reason = self.config.reboot_reason.clone();
        let delay = self.config.settle_delay;
        let token = self.reboot_prompt.clone();
        info!(reason = %reason, delay_ms = delay.as_millis() as u64, "Scheduling reboot prompt");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Reboot prompt dropped by a newer attempt");
                        }
                        _ = tokio::time::sleep(delay) => presenter.request_reboot(&reason),
                    }
                });
            }
            Err(_) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    if !token.is_cancelled() {
                        presenter.request_reboot(&reason);
                    }
                });
            }
        }
    }
}
