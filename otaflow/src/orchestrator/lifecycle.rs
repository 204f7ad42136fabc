//! The update orchestrator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::error::{OrchestratorError, OrchestratorResult, StartFailureCause};
use super::types::{
    percent_from_fraction, AttemptId, AttemptSink, AttemptSnapshot, AttemptState, EngineEvent,
    EngineEventKind, UpdateAttempt,
};
use crate::cleanup::purge_tree;
use crate::engine::UpdateEngine;
use crate::lease::PowerLease;
use crate::package::UpdatePackageDescriptor;
use crate::presentation::Notice;
use crate::projector::StatusProjector;
use crate::status::{ErrorCode, UpdateStatus};
use crate::store::{StatusStore, NOT_UPDATING, UPDATING};

/// Drives the update engine through one attempt at a time.
///
/// Owns the engine, the power lease and the projector. Engine reports come
/// back through [`handle_event`](Self::handle_event), in the order the
/// engine produced them.
pub struct UpdateOrchestrator {
    config: OrchestratorConfig,
    engine: Box<dyn UpdateEngine>,
    lease: Box<dyn PowerLease>,
    store: Arc<dyn StatusStore>,
    projector: StatusProjector,
    events: mpsc::UnboundedSender<EngineEvent>,
    attempt: Option<UpdateAttempt>,
    next_id: u64,
    engine_status: Option<UpdateStatus>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator. Engine reports for started attempts are sent
    /// to `events`.
    pub fn new(
        config: OrchestratorConfig,
        engine: Box<dyn UpdateEngine>,
        lease: Box<dyn PowerLease>,
        store: Arc<dyn StatusStore>,
        projector: StatusProjector,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            engine,
            lease,
            store,
            projector,
            events,
            attempt: None,
            next_id: 0,
            engine_status: None,
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Start applying `descriptor`.
    ///
    /// A live attempt is torn down first. On a synchronous lease, bind or
    /// apply failure the new attempt ends `Failed` with the lease released.
    pub fn start_attempt(
        &mut self,
        descriptor: UpdatePackageDescriptor,
    ) -> OrchestratorResult<AttemptId> {
        if let Some(reason) = descriptor.invalid_reason() {
            warn!(descriptor = %descriptor, reason, "Refusing invalid update package");
            return Err(OrchestratorError::InvalidDescriptor { reason });
        }

        self.teardown_live_attempt();

        self.next_id += 1;
        let mut attempt = UpdateAttempt::new(AttemptId::new(self.next_id), descriptor);
        attempt.state = AttemptState::Preparing;
        self.projector.begin_attempt();
        self.engine_status = None;
        info!(
            attempt = %attempt.id,
            engine = self.engine.name(),
            descriptor = %attempt.descriptor,
            "Starting update attempt"
        );

        match self.launch(&mut attempt) {
            Ok(()) => {
                attempt.state = AttemptState::Applying;
                let id = attempt.id;
                self.attempt = Some(attempt);
                Ok(id)
            }
            Err(cause) => Err(self.fail_start(attempt, cause)),
        }
    }

    /// Pause the engine. Only while applying.
    pub fn suspend(&mut self) -> OrchestratorResult<()> {
        self.require("suspend", AttemptState::is_pausable)?;
        self.engine
            .suspend()
            .map_err(|source| OrchestratorError::Engine {
                operation: "suspend",
                source,
            })?;
        self.set_state(AttemptState::Suspended);
        info!("Update suspended");
        Ok(())
    }

    /// Continue a suspended update.
    pub fn resume(&mut self) -> OrchestratorResult<()> {
        self.require("resume", AttemptState::is_pausable)?;
        self.engine
            .resume()
            .map_err(|source| OrchestratorError::Engine {
                operation: "resume",
                source,
            })?;
        self.set_state(AttemptState::Applying);
        info!("Update resumed");
        Ok(())
    }

    /// Ask the engine to cancel the live attempt.
    ///
    /// The attempt ends `Canceled` once the engine reports completion. Engine
    /// failures are logged, not returned. The lease stays held until then.
    pub fn cancel_attempt(&mut self) -> OrchestratorResult<()> {
        self.require("cancel", AttemptState::is_cancelable)?;
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.cancel_requested = true;
            info!(attempt = %attempt.id, "Cancel requested");
        }
        if let Err(e) = self.engine.cancel() {
            warn!(error = %e, "Update engine cancel failed");
        }
        Ok(())
    }

    /// Give up on the live attempt without waiting for the engine.
    ///
    /// Unbinds the engine, asks it to cancel, releases the lease, clears
    /// the durable flag and marks the attempt `Canceled`. Returns whether
    /// there was a live attempt.
    pub fn abandon_attempt(&mut self) -> bool {
        self.teardown_live_attempt()
    }

    /// Detach the callback sink from the engine.
    pub fn unbind_engine(&mut self) {
        self.engine.unbind();
        debug!("Engine callback unbound");
    }

    /// Release everything held on behalf of the live attempt.
    ///
    /// The engine keeps applying; only this process lets go of it.
    pub fn shutdown(&mut self) {
        self.engine.unbind();
        if let Some(attempt) = self.attempt.as_mut() {
            release_lease(self.lease.as_mut(), attempt);
        }
        info!("Orchestrator shut down");
    }

    // =========================================================================
    // Engine reports
    // =========================================================================

    /// Route an engine report. Reports from earlier attempts are dropped.
    ///
    /// Returns whether the report was applied.
    pub fn handle_event(&mut self, event: EngineEvent) -> bool {
        let current = self.attempt.as_ref().map(|a| a.id);
        if current != Some(event.attempt) {
            debug!(
                event_attempt = %event.attempt,
                current = ?current.map(AttemptId::get),
                "Dropping report from stale attempt"
            );
            return false;
        }

        match event.kind {
            EngineEventKind::Status { code, fraction } => self.on_status_update(code, fraction),
            EngineEventKind::Complete { code } => self.on_apply_complete(code),
        }
        true
    }

    /// Engine status changed.
    pub fn on_status_update(&mut self, status_code: i32, fraction: f32) {
        let status = UpdateStatus::from_code(status_code);
        let Some(attempt) = self.attempt.as_mut() else {
            debug!(status = %status, "Status update without an attempt");
            return;
        };
        if attempt.state.is_terminal() {
            debug!(attempt = %attempt.id, status = %status, "Status update after attempt ended");
            return;
        }

        let percent = percent_from_fraction(fraction);
        attempt.progress_percent = percent;
        attempt.state = attempt.state.after_status(status);
        self.engine_status = Some(status);
        debug!(
            attempt = %attempt.id,
            status = %status,
            percent,
            state = %attempt.state,
            "Engine status"
        );

        self.projector.project(status, percent);

        if status == UpdateStatus::UpdateAvailable {
            if let Err(e) = self.store.put_int(&self.config.state_key, UPDATING) {
                warn!(error = %e, "Failed to persist update flag");
            }
            if !attempt.start_notice_shown {
                attempt.start_notice_shown = true;
                self.projector.presenter().notice(Notice::UpdateStarting);
            }
        }
    }

    /// Engine finished applying the payload. Only the first call per attempt
    /// has an effect.
    pub fn on_apply_complete(&mut self, error_code: i32) {
        let code = ErrorCode::from(error_code);
        let Some(attempt) = self.attempt.as_mut() else {
            debug!(code = %code, "Completion without an attempt");
            return;
        };
        if attempt.completion_handled {
            debug!(attempt = %attempt.id, code = %code, "Duplicate completion ignored");
            return;
        }

        self.engine.unbind();
        if let Err(e) = self.store.put_int(&self.config.state_key, NOT_UPDATING) {
            warn!(error = %e, "Failed to clear update flag");
        }
        if self.config.delete_files {
            let path = attempt.descriptor.container_path();
            match purge_tree(path) {
                Ok(stats) => info!(path = %path.display(), files = stats.files, "Removed update package"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove update package"),
            }
        }
        release_lease(self.lease.as_mut(), attempt);
        attempt.completion_handled = true;
        attempt.completion = Some(code);

        attempt.state = if code.is_success() {
            AttemptState::Succeeded
        } else if attempt.cancel_requested || code.is_user_canceled() {
            AttemptState::Canceled
        } else {
            AttemptState::Failed
        };

        match attempt.state {
            AttemptState::Succeeded => info!(attempt = %attempt.id, "Update applied"),
            AttemptState::Canceled => info!(attempt = %attempt.id, code = %code, "Update canceled"),
            _ => {
                error!(attempt = %attempt.id, code = %code, "Update failed");
                self.projector.presenter().notice(Notice::UpdateFailed(code));
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// State of the current attempt, `Idle` when there is none.
    pub fn state(&self) -> AttemptState {
        self.attempt.as_ref().map_or(AttemptState::Idle, |a| a.state)
    }

    /// Whether an attempt is live.
    pub fn is_updating(&self) -> bool {
        self.attempt.as_ref().is_some_and(|a| !a.state.is_terminal())
    }

    /// Last status the engine reported for the current attempt.
    pub fn engine_status(&self) -> Option<UpdateStatus> {
        self.engine_status
    }

    pub fn attempt(&self) -> Option<&UpdateAttempt> {
        self.attempt.as_ref()
    }

    pub fn snapshot(&self) -> Option<AttemptSnapshot> {
        self.attempt.as_ref().map(|a| a.snapshot(self.engine_status))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn launch(&mut self, attempt: &mut UpdateAttempt) -> Result<(), StartFailureCause> {
        if !attempt.lease_held {
            self.lease.acquire().map_err(StartFailureCause::Lease)?;
            attempt.lease_held = true;
            debug!(lease = self.lease.name(), "Power lease acquired");
        }

        let sink = Arc::new(AttemptSink::new(attempt.id, self.events.clone()));
        self.engine.bind(sink).map_err(StartFailureCause::Bind)?;

        let d = &attempt.descriptor;
        self.engine
            .apply_payload(
                d.source_uri(),
                d.payload_offset(),
                d.payload_size(),
                d.properties().unwrap_or_default(),
            )
            .map_err(StartFailureCause::Apply)
    }

    fn fail_start(
        &mut self,
        mut attempt: UpdateAttempt,
        cause: StartFailureCause,
    ) -> OrchestratorError {
        error!(attempt = %attempt.id, error = %cause, "Update attempt failed to start");

        self.engine.unbind();
        release_lease(self.lease.as_mut(), &mut attempt);
        attempt.state = AttemptState::Failed;
        attempt.completion_handled = true;
        attempt.progress_percent = 100;
        self.engine_status = Some(UpdateStatus::Fail);

        self.projector.project(UpdateStatus::Fail, 100);
        self.projector
            .presenter()
            .notice(Notice::StartFailed(cause.to_string()));

        let id = attempt.id;
        self.attempt = Some(attempt);
        OrchestratorError::StartFailure {
            attempt: id,
            source: cause,
        }
    }

    fn teardown_live_attempt(&mut self) -> bool {
        let Some(prev) = self.attempt.as_mut() else {
            return false;
        };
        if prev.state.is_terminal() {
            return false;
        }

        warn!(attempt = %prev.id, state = %prev.state, "Tearing down live attempt");
        self.engine.unbind();
        if let Err(e) = self.engine.cancel() {
            debug!(error = %e, "Cancel of previous attempt failed");
        }
        release_lease(self.lease.as_mut(), prev);
        prev.cancel_requested = true;
        prev.completion_handled = true;
        prev.state = AttemptState::Canceled;

        if let Err(e) = self.store.put_int(&self.config.state_key, NOT_UPDATING) {
            warn!(error = %e, "Failed to clear update flag");
        }
        true
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: fn(AttemptState) -> bool,
    ) -> OrchestratorResult<()> {
        let state = self.state();
        if allowed(state) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState { operation, state })
        }
    }

    fn set_state(&mut self, state: AttemptState) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.state = state;
        }
    }
}

fn release_lease(lease: &mut dyn PowerLease, attempt: &mut UpdateAttempt) {
    if !attempt.lease_held {
        return;
    }
    attempt.lease_held = false;
    match lease.release() {
        Ok(()) => debug!(lease = lease.name(), "Power lease released"),
        Err(e) => warn!(error = %e, "Failed to release power lease"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCallback, EngineError, EngineResult};
    use crate::lease::LeaseError;
    use crate::presentation::{PresenterCall, RecordingPresenter};
    use crate::projector::ProjectorConfig;
    use crate::store::{MemoryStatusStore, DEFAULT_STATE_KEY};
    use parking_lot::Mutex;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Bind,
        Unbind,
        Apply {
            url: String,
            offset: u64,
            size: u64,
            properties: Vec<String>,
        },
        Suspend,
        Resume,
        Cancel,
    }

    #[derive(Default)]
    struct EngineLog {
        calls: Vec<Call>,
        callback: Option<Arc<dyn EngineCallback>>,
        fail_apply: bool,
        fail_cancel: bool,
    }

    struct FakeEngine(Arc<Mutex<EngineLog>>);

    impl UpdateEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn bind(&mut self, callback: Arc<dyn EngineCallback>) -> EngineResult<()> {
            let mut log = self.0.lock();
            log.calls.push(Call::Bind);
            log.callback = Some(callback);
            Ok(())
        }

        fn unbind(&mut self) {
            let mut log = self.0.lock();
            log.calls.push(Call::Unbind);
            log.callback = None;
        }

        fn apply_payload(
            &mut self,
            url: &str,
            offset: u64,
            size: u64,
            properties: &[String],
        ) -> EngineResult<()> {
            let mut log = self.0.lock();
            log.calls.push(Call::Apply {
                url: url.to_string(),
                offset,
                size,
                properties: properties.to_vec(),
            });
            if log.fail_apply {
                return Err(EngineError::Rejected {
                    operation: "apply",
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }

        fn suspend(&mut self) -> EngineResult<()> {
            self.0.lock().calls.push(Call::Suspend);
            Ok(())
        }

        fn resume(&mut self) -> EngineResult<()> {
            self.0.lock().calls.push(Call::Resume);
            Ok(())
        }

        fn cancel(&mut self) -> EngineResult<()> {
            let mut log = self.0.lock();
            log.calls.push(Call::Cancel);
            if log.fail_cancel {
                return Err(EngineError::NotApplying);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct LeaseLog {
        acquires: usize,
        releases: usize,
        held: bool,
        fail_acquire: bool,
    }

    struct FakeLease(Arc<Mutex<LeaseLog>>);

    impl PowerLease for FakeLease {
        fn name(&self) -> &str {
            "fake"
        }

        fn acquire(&mut self) -> Result<(), LeaseError> {
            let mut log = self.0.lock();
            if log.fail_acquire {
                return Err(LeaseError::Write {
                    name: "fake".to_string(),
                    path: PathBuf::from("/sys/power/wake_lock"),
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            log.acquires += 1;
            log.held = true;
            Ok(())
        }

        fn release(&mut self) -> Result<(), LeaseError> {
            let mut log = self.0.lock();
            log.releases += 1;
            log.held = false;
            Ok(())
        }

        fn is_held(&self) -> bool {
            self.0.lock().held
        }
    }

    struct Harness {
        orchestrator: UpdateOrchestrator,
        engine: Arc<Mutex<EngineLog>>,
        lease: Arc<Mutex<LeaseLog>>,
        store: Arc<MemoryStatusStore>,
        presenter: Arc<RecordingPresenter>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    }

    fn harness_with(config: OrchestratorConfig) -> Harness {
        let engine = Arc::new(Mutex::new(EngineLog::default()));
        let lease = Arc::new(Mutex::new(LeaseLog::default()));
        let store = Arc::new(MemoryStatusStore::new());
        let presenter = Arc::new(RecordingPresenter::new());
        let (tx, events) = mpsc::unbounded_channel();
        let projector = StatusProjector::new(presenter.clone(), ProjectorConfig::default());

        let orchestrator = UpdateOrchestrator::new(
            config,
            Box::new(FakeEngine(engine.clone())),
            Box::new(FakeLease(lease.clone())),
            store.clone(),
            projector,
            tx,
        );
        Harness {
            orchestrator,
            engine,
            lease,
            store,
            presenter,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(OrchestratorConfig::default())
    }

    fn descriptor() -> UpdatePackageDescriptor {
        UpdatePackageDescriptor::new(
            "/data/ota/update.zip",
            225,
            2000,
            Some(vec!["FILE_HASH=abc".to_string(), "FILE_SIZE=2000".to_string()]),
        )
    }

    fn flag(store: &MemoryStatusStore) -> i32 {
        store.get_int(DEFAULT_STATE_KEY, -1).unwrap()
    }

    #[test]
    fn test_start_binds_and_applies() {
        let mut h = harness();
        let id = h.orchestrator.start_attempt(descriptor()).unwrap();

        assert_eq!(id, AttemptId::new(1));
        assert_eq!(h.orchestrator.state(), AttemptState::Applying);
        assert!(h.orchestrator.is_updating());
        assert_eq!(
            h.engine.lock().calls,
            vec![
                Call::Bind,
                Call::Apply {
                    url: "file:///data/ota/update.zip".to_string(),
                    offset: 225,
                    size: 2000,
                    properties: vec!["FILE_HASH=abc".to_string(), "FILE_SIZE=2000".to_string()],
                },
            ]
        );
        assert_eq!(h.lease.lock().acquires, 1);
        assert!(h.orchestrator.attempt().unwrap().lease_held);
    }

    #[test]
    fn test_invalid_descriptor_has_no_side_effects() {
        let mut h = harness();
        let invalid = UpdatePackageDescriptor::new("/data/ota/update.zip", 41, 0, None);

        let err = h.orchestrator.start_attempt(invalid).unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidDescriptor { .. }));
        assert!(h.engine.lock().calls.is_empty());
        assert_eq!(h.lease.lock().acquires, 0);
        assert!(h.orchestrator.attempt().is_none());
        assert!(h.presenter.calls().is_empty());
    }

    #[test]
    fn test_update_available_sets_flag_and_notifies_once() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.on_status_update(2, 0.0);
        h.orchestrator.on_status_update(2, 0.0);

        assert_eq!(flag(&h.store), 1);
        assert_eq!(h.presenter.notices(), vec![Notice::UpdateStarting]);
        assert_eq!(h.orchestrator.engine_status(), Some(UpdateStatus::UpdateAvailable));
    }

    #[test]
    fn test_progress_is_projected() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.on_status_update(3, 0.5);
        assert_eq!(h.orchestrator.attempt().unwrap().progress_percent, 50);
        assert_eq!(
            h.presenter.calls().last(),
            Some(&PresenterCall::Progress("Downloading update... 50%".into(), 50))
        );

        h.orchestrator.on_status_update(5, 0.25);
        assert_eq!(h.orchestrator.state(), AttemptState::Completing);
    }

    #[test]
    fn test_success_completion_is_idempotent() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_status_update(2, 0.0);

        h.orchestrator.on_apply_complete(0);
        h.orchestrator.on_apply_complete(0);
        h.orchestrator.on_apply_complete(1);

        let unbinds = h
            .engine
            .lock()
            .calls
            .iter()
            .filter(|c| **c == Call::Unbind)
            .count();
        assert_eq!(unbinds, 1);
        assert_eq!(h.lease.lock().releases, 1);
        assert_eq!(flag(&h.store), 0);
        assert_eq!(h.orchestrator.state(), AttemptState::Succeeded);
        assert!(!h.orchestrator.is_updating());
        assert_eq!(h.orchestrator.attempt().unwrap().completion, Some(ErrorCode::SUCCESS));
    }

    #[test]
    fn test_failure_completion_raises_notice() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.on_apply_complete(60);

        assert_eq!(h.orchestrator.state(), AttemptState::Failed);
        assert_eq!(
            h.presenter.notices(),
            vec![Notice::UpdateFailed(ErrorCode::NOT_ENOUGH_SPACE)]
        );
        assert_eq!(h.lease.lock().releases, 1);
    }

    #[test]
    fn test_cancel_then_failure_is_canceled() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.cancel_attempt().unwrap();
        assert_eq!(h.lease.lock().releases, 0);
        h.orchestrator.on_apply_complete(1);

        assert_eq!(h.orchestrator.state(), AttemptState::Canceled);
        assert!(h.presenter.notices().is_empty());
        assert_eq!(h.lease.lock().releases, 1);
    }

    #[test]
    fn test_user_canceled_code_is_canceled() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_apply_complete(48);
        assert_eq!(h.orchestrator.state(), AttemptState::Canceled);
    }

    #[test]
    fn test_cancel_swallows_engine_error() {
        let mut h = harness();
        h.engine.lock().fail_cancel = true;
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.cancel_attempt().unwrap();
        assert!(h.orchestrator.attempt().unwrap().cancel_requested);
        assert_eq!(h.orchestrator.state(), AttemptState::Applying);
    }

    #[test]
    fn test_suspend_and_resume_leave_lease_alone() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.suspend().unwrap();
        assert_eq!(h.orchestrator.state(), AttemptState::Suspended);

        // still suspended while the engine drains buffered progress
        h.orchestrator.on_status_update(3, 0.3);
        assert_eq!(h.orchestrator.state(), AttemptState::Suspended);

        h.orchestrator.resume().unwrap();
        assert_eq!(h.orchestrator.state(), AttemptState::Applying);

        let lease = h.lease.lock();
        assert_eq!((lease.acquires, lease.releases), (1, 0));
        drop(lease);
        assert!(h.engine.lock().calls.contains(&Call::Suspend));
        assert!(h.engine.lock().calls.contains(&Call::Resume));
    }

    #[test]
    fn test_operations_rejected_in_wrong_state() {
        let mut h = harness();

        let err = h.orchestrator.suspend().unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidState {
                operation: "suspend",
                state: AttemptState::Idle
            }
        ));

        h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_apply_complete(0);

        assert!(matches!(
            h.orchestrator.resume(),
            Err(OrchestratorError::InvalidState { state: AttemptState::Succeeded, .. })
        ));
        assert!(matches!(
            h.orchestrator.cancel_attempt(),
            Err(OrchestratorError::InvalidState { operation: "cancel", .. })
        ));
        assert!(!h.engine.lock().calls.contains(&Call::Cancel));
    }

    #[test]
    fn test_apply_failure_is_start_failure() {
        let mut h = harness();
        h.engine.lock().fail_apply = true;

        let err = h.orchestrator.start_attempt(descriptor()).unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::StartFailure {
                source: StartFailureCause::Apply(_),
                ..
            }
        ));
        let attempt = h.orchestrator.attempt().unwrap();
        assert_eq!(attempt.state, AttemptState::Failed);
        assert!(attempt.completion_handled);
        assert!(!attempt.lease_held);
        assert_eq!(h.engine.lock().calls.last(), Some(&Call::Unbind));

        let lease = h.lease.lock();
        assert_eq!((lease.acquires, lease.releases), (1, 1));
        drop(lease);

        let calls = h.presenter.calls();
        assert!(calls.contains(&PresenterCall::Clear));
        assert!(matches!(
            h.presenter.notices().as_slice(),
            [Notice::StartFailed(_)]
        ));
        assert_eq!(h.orchestrator.engine_status(), Some(UpdateStatus::Fail));

        // a late completion changes nothing
        h.orchestrator.on_apply_complete(0);
        assert_eq!(h.orchestrator.state(), AttemptState::Failed);
        assert_eq!(h.lease.lock().releases, 1);
    }

    #[test]
    fn test_lease_failure_is_start_failure() {
        let mut h = harness();
        h.lease.lock().fail_acquire = true;

        let err = h.orchestrator.start_attempt(descriptor()).unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::StartFailure {
                source: StartFailureCause::Lease(_),
                ..
            }
        ));
        assert!(!h.engine.lock().calls.contains(&Call::Bind));
        assert_eq!(h.lease.lock().releases, 0);
    }

    #[test]
    fn test_second_start_tears_down_first() {
        let mut h = harness();
        let first = h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_status_update(2, 0.0);
        let second = h.orchestrator.start_attempt(descriptor()).unwrap();

        assert_ne!(first, second);
        let calls = h.engine.lock().calls.clone();
        let kinds: Vec<&str> = calls
            .iter()
            .map(|c| match c {
                Call::Bind => "bind",
                Call::Unbind => "unbind",
                Call::Apply { .. } => "apply",
                Call::Suspend => "suspend",
                Call::Resume => "resume",
                Call::Cancel => "cancel",
            })
            .collect();
        assert_eq!(kinds, vec!["bind", "apply", "unbind", "cancel", "bind", "apply"]);

        let lease = h.lease.lock();
        assert_eq!((lease.acquires, lease.releases), (2, 1));
        drop(lease);

        // the old attempt's completion is dropped
        let stale = EngineEvent {
            attempt: first,
            kind: EngineEventKind::Complete { code: 48 },
        };
        assert!(!h.orchestrator.handle_event(stale));
        assert_eq!(h.orchestrator.state(), AttemptState::Applying);
    }

    #[test]
    fn test_sink_reports_route_through_handle_event() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        let callback = h.engine.lock().callback.clone().unwrap();
        callback.on_status_update(3, 0.75);
        callback.on_payload_application_complete(0);

        while let Ok(event) = h.events.try_recv() {
            assert!(h.orchestrator.handle_event(event));
        }
        let snapshot = h.orchestrator.snapshot().unwrap();
        assert_eq!(snapshot.state, AttemptState::Succeeded);
        assert_eq!(snapshot.progress_percent, 75);
        assert_eq!(snapshot.engine_status, Some(UpdateStatus::Downloading));
    }

    #[test]
    fn test_status_after_completion_is_ignored() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_apply_complete(0);
        let before = h.presenter.calls().len();

        h.orchestrator.on_status_update(3, 0.1);

        assert_eq!(h.presenter.calls().len(), before);
        assert_eq!(h.orchestrator.state(), AttemptState::Succeeded);
    }

    #[test]
    fn test_delete_files_purges_package() {
        let temp = TempDir::new().unwrap();
        let package = temp.path().join("update.zip");
        fs::write(&package, b"zip").unwrap();

        let mut h = harness_with(OrchestratorConfig::default().with_delete_files(true));
        let d = UpdatePackageDescriptor::new(&package, 41, 10, Some(vec![]));
        h.orchestrator.start_attempt(d).unwrap();
        h.orchestrator.on_apply_complete(0);

        assert!(!package.exists());
    }

    #[test]
    fn test_package_kept_by_default() {
        let temp = TempDir::new().unwrap();
        let package = temp.path().join("update.zip");
        fs::write(&package, b"zip").unwrap();

        let mut h = harness();
        let d = UpdatePackageDescriptor::new(&package, 41, 10, Some(vec![]));
        h.orchestrator.start_attempt(d).unwrap();
        h.orchestrator.on_apply_complete(0);

        assert!(package.exists());
    }

    #[test]
    fn test_abandon_releases_everything_at_once() {
        let mut h = harness();
        let id = h.orchestrator.start_attempt(descriptor()).unwrap();
        h.orchestrator.on_status_update(2, 0.0);
        assert_eq!(flag(&h.store), 1);

        assert!(h.orchestrator.abandon_attempt());

        assert_eq!(h.orchestrator.state(), AttemptState::Canceled);
        assert!(!h.orchestrator.is_updating());
        assert!(!h.orchestrator.attempt().unwrap().lease_held);
        assert_eq!(flag(&h.store), 0);
        let lease = h.lease.lock();
        assert_eq!((lease.acquires, lease.releases), (1, 1));
        assert!(!lease.held);
        drop(lease);
        assert!(h.engine.lock().calls.ends_with(&[Call::Unbind, Call::Cancel]));

        // nothing left to abandon, and the engine's late report is dropped
        assert!(!h.orchestrator.abandon_attempt());
        let late = EngineEvent {
            attempt: id,
            kind: EngineEventKind::Complete { code: 48 },
        };
        h.orchestrator.handle_event(late);
        assert_eq!(h.lease.lock().releases, 1);
    }

    #[test]
    fn test_abandon_without_attempt() {
        let mut h = harness();
        assert!(!h.orchestrator.abandon_attempt());
        assert!(h.engine.lock().calls.is_empty());
    }

    #[test]
    fn test_shutdown_releases_lease() {
        let mut h = harness();
        h.orchestrator.start_attempt(descriptor()).unwrap();

        h.orchestrator.shutdown();
        h.orchestrator.shutdown();

        assert_eq!(h.lease.lock().releases, 1);
        assert_eq!(h.engine.lock().calls.last(), Some(&Call::Unbind));
    }
}
