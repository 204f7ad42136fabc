//! Scripted update engine.
//!
//! Walks through the status sequence a real engine reports for a healthy
//! update, one step per tick, on a background thread. Suspend pauses the
//! walk, resume continues it and cancel completes with `USER_CANCELED`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::error::{EngineError, EngineResult};
use super::{EngineCallback, UpdateEngine};
use crate::status::{ErrorCode, UpdateStatus};

/// Shape of a simulated update.
#[derive(Debug, Clone)]
pub struct SimulationScript {
    /// Delay between reports.
    pub step: Duration,
    /// Number of progress reports while downloading.
    pub download_steps: u32,
    /// Completion code reported at the end.
    pub completion_code: i32,
    /// Reject apply requests synchronously.
    pub reject_apply: bool,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(200),
            download_steps: 10,
            completion_code: ErrorCode::SUCCESS.code(),
            reject_apply: false,
        }
    }
}

impl SimulationScript {
    /// Set the delay between reports.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Finish with `code` instead of success.
    pub fn with_completion_code(mut self, code: i32) -> Self {
        self.completion_code = code;
        self
    }

    /// Reject apply requests synchronously.
    pub fn with_reject_apply(mut self, reject: bool) -> Self {
        self.reject_apply = reject;
        self
    }

    /// The reports a run of this script produces, in order.
    pub fn reports(&self) -> Vec<Report> {
        let steps = self.download_steps.max(1);
        let mut reports = vec![Report::Status(UpdateStatus::UpdateAvailable, 0.0)];
        reports.extend(
            (0..=steps).map(|i| Report::Status(UpdateStatus::Downloading, i as f32 / steps as f32)),
        );
        reports.push(Report::Status(UpdateStatus::Verifying, 0.0));
        reports.push(Report::Status(UpdateStatus::Verifying, 1.0));
        reports.push(Report::Status(UpdateStatus::Finalizing, 0.0));
        reports.push(Report::Status(UpdateStatus::Finalizing, 1.0));
        if self.completion_code == ErrorCode::SUCCESS.code() {
            reports.push(Report::Status(UpdateStatus::UpdatedNeedReboot, 1.0));
        } else {
            reports.push(Report::Status(UpdateStatus::Idle, 0.0));
        }
        reports.push(Report::Complete(self.completion_code));
        reports
    }
}

/// A single simulated engine report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Report {
    Status(UpdateStatus, f32),
    Complete(i32),
}

#[derive(Default)]
struct Shared {
    callback: Option<Arc<dyn EngineCallback>>,
    running: bool,
    suspended: bool,
    canceled: bool,
    generation: u64,
}

/// [`UpdateEngine`] that plays a [`SimulationScript`].
pub struct SimulatedEngine {
    script: SimulationScript,
    shared: Arc<(Mutex<Shared>, Condvar)>,
}

impl SimulatedEngine {
    pub fn new(script: SimulationScript) -> Self {
        Self {
            script,
            shared: Arc::new((Mutex::new(Shared::default()), Condvar::new())),
        }
    }

    /// Whether a script is currently playing.
    pub fn is_running(&self) -> bool {
        self.shared.0.lock().running
    }

    fn control(&self, operation: &'static str, apply: impl FnOnce(&mut Shared)) -> EngineResult<()> {
        let (lock, cvar) = &*self.shared;
        let mut shared = lock.lock();
        if !shared.running {
            debug!(operation, "Simulated engine has nothing to control");
            return Err(EngineError::NotApplying);
        }
        apply(&mut shared);
        cvar.notify_all();
        Ok(())
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SimulationScript::default())
    }
}

fn play(shared: Arc<(Mutex<Shared>, Condvar)>, reports: Vec<Report>, step: Duration, generation: u64) {
    let (lock, cvar) = &*shared;

    for report in reports {
        let deadline = Instant::now() + step;
        let mut state = lock.lock();
        let report = loop {
            if state.generation != generation {
                return;
            }
            if state.canceled {
                break Report::Complete(ErrorCode::USER_CANCELED.code());
            }
            if state.suspended {
                cvar.wait(&mut state);
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                break report;
            }
            cvar.wait_for(&mut state, deadline - now);
        };

        let finished = matches!(report, Report::Complete(_));
        if finished {
            state.running = false;
        }
        let callback = state.callback.clone();
        drop(state);

        if let Some(callback) = callback {
            match report {
                Report::Status(status, fraction) => callback.on_status_update(status.code(), fraction),
                Report::Complete(code) => callback.on_payload_application_complete(code),
            }
        }
        if finished {
            return;
        }
    }
}

impl UpdateEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn bind(&mut self, callback: Arc<dyn EngineCallback>) -> EngineResult<()> {
        self.shared.0.lock().callback = Some(callback);
        Ok(())
    }

    fn unbind(&mut self) {
        self.shared.0.lock().callback = None;
    }

    fn apply_payload(
        &mut self,
        url: &str,
        offset: u64,
        size: u64,
        _properties: &[String],
    ) -> EngineResult<()> {
        if self.script.reject_apply {
            return Err(EngineError::Rejected {
                operation: "apply",
                reason: "simulated rejection".to_string(),
            });
        }

        let generation = {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock();
            if shared.callback.is_none() {
                return Err(EngineError::NotBound);
            }
            shared.generation += 1;
            shared.running = true;
            shared.suspended = false;
            shared.canceled = false;
            cvar.notify_all();
            shared.generation
        };

        info!(url, offset, size, "Simulated engine applying payload");
        let shared = Arc::clone(&self.shared);
        let reports = self.script.reports();
        let step = self.script.step;
        thread::spawn(move || play(shared, reports, step, generation));
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.control("suspend", |s| s.suspended = true)
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.control("resume", |s| s.suspended = false)
    }

    fn cancel(&mut self) -> EngineResult<()> {
        self.control("cancel", |s| s.canceled = true)
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        lock.lock().generation += 1;
        cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<Report>>,
    }

    impl EngineCallback for Recorder {
        fn on_status_update(&self, status_code: i32, percent: f32) {
            self.reports
                .lock()
                .push(Report::Status(UpdateStatus::from_code(status_code), percent));
        }

        fn on_payload_application_complete(&self, error_code: i32) {
            self.reports.lock().push(Report::Complete(error_code));
        }
    }

    impl Recorder {
        fn wait_complete(&self) -> Vec<Report> {
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                let reports = self.reports.lock().clone();
                if matches!(reports.last(), Some(Report::Complete(_))) {
                    return reports;
                }
                thread::sleep(Duration::from_millis(5));
            }
            panic!("simulation did not complete");
        }
    }

    fn fast_script() -> SimulationScript {
        SimulationScript::default().with_step(Duration::from_millis(1))
    }

    #[test]
    fn test_script_reports_end_with_reboot_then_success() {
        let reports = SimulationScript::default().reports();
        assert_eq!(reports[0], Report::Status(UpdateStatus::UpdateAvailable, 0.0));
        let n = reports.len();
        assert_eq!(reports[n - 2], Report::Status(UpdateStatus::UpdatedNeedReboot, 1.0));
        assert_eq!(reports[n - 1], Report::Complete(0));
    }

    #[test]
    fn test_failing_script_ends_idle() {
        let reports = SimulationScript::default().with_completion_code(60).reports();
        let n = reports.len();
        assert_eq!(reports[n - 2], Report::Status(UpdateStatus::Idle, 0.0));
        assert_eq!(reports[n - 1], Report::Complete(60));
    }

    #[test]
    fn test_plays_full_script() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = SimulatedEngine::new(fast_script());
        engine.bind(recorder.clone()).unwrap();
        engine.apply_payload("file:///u.zip", 41, 10, &[]).unwrap();

        let reports = recorder.wait_complete();
        assert_eq!(reports, fast_script().reports());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_cancel_completes_with_user_canceled() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = SimulatedEngine::new(SimulationScript::default().with_step(Duration::from_millis(20)));
        engine.bind(recorder.clone()).unwrap();
        engine.apply_payload("file:///u.zip", 41, 10, &[]).unwrap();
        engine.cancel().unwrap();

        let reports = recorder.wait_complete();
        assert_eq!(reports.last(), Some(&Report::Complete(48)));
    }

    #[test]
    fn test_suspend_pauses_reports() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = SimulatedEngine::new(SimulationScript::default().with_step(Duration::from_millis(5)));
        engine.bind(recorder.clone()).unwrap();
        engine.apply_payload("file:///u.zip", 41, 10, &[]).unwrap();
        engine.suspend().unwrap();

        thread::sleep(Duration::from_millis(30));
        let paused = recorder.reports.lock().len();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(recorder.reports.lock().len(), paused);

        engine.resume().unwrap();
        let reports = recorder.wait_complete();
        assert_eq!(reports.last(), Some(&Report::Complete(0)));
    }

    #[test]
    fn test_control_without_apply_fails() {
        let mut engine = SimulatedEngine::default();
        assert!(matches!(engine.suspend(), Err(EngineError::NotApplying)));
        assert!(matches!(engine.cancel(), Err(EngineError::NotApplying)));
    }

    #[test]
    fn test_reject_apply() {
        let mut engine = SimulatedEngine::new(SimulationScript::default().with_reject_apply(true));
        engine.bind(Arc::new(Recorder::default())).unwrap();
        let err = engine.apply_payload("file:///u.zip", 0, 1, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
    }

    #[test]
    fn test_unbound_reports_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = SimulatedEngine::new(SimulationScript::default().with_step(Duration::from_millis(20)));
        engine.bind(recorder.clone()).unwrap();
        engine.apply_payload("file:///u.zip", 41, 10, &[]).unwrap();
        engine.unbind();

        thread::sleep(Duration::from_millis(100));
        assert!(recorder.reports.lock().is_empty());
    }
}
