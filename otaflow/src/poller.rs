//! Waits for the update file to appear before an attempt starts.
//!
//! The first existence check runs as soon as a poll starts. While the file
//! is missing, one re-check is scheduled per interval until the attempt
//! bound is reached. Giving up is silent: the presentation surface is
//! cleared and [`PollEvent::Exhausted`] is emitted, nothing else.
//!
//! ```text
//! start(path) ──► check ──► present ──► Ready
//!                   │
//!                   └─ missing ──► sleep(interval) ──► check_once ─┬─► Ready
//!                                      ▲                           ├─► Retry ─┐
//!                                      └───────────────────────────┼──────────┘
//!                                                                  └─► Exhausted
//! ```
//!
//! Starting a new poll cancels the pending one first, so two polling
//! sequences never interleave. Outcomes carry the poll generation; the
//! receiver drops outcomes from a superseded poll.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::presentation::Presenter;

/// Delay between existence checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Existence checks made before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration for the [`ReadinessPoller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollerConfig {
    /// Set the delay between checks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of checks before giving up.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Answers whether a path exists.
pub trait FileProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// [`FileProbe`] backed by the filesystem.
#[derive(Debug, Default)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Outcome of a single [`PollState::check_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Ready,
    Retry,
    Exhausted,
}

/// Bounded retry state for one target path.
///
/// `attempt_count` starts at 1, accounting for the immediate check made
/// when the poll starts.
#[derive(Debug, Clone)]
pub struct PollState {
    pub target_path: PathBuf,
    pub attempt_count: u32,
    pub max_attempts: u32,
}

impl PollState {
    pub fn new(target_path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            target_path: target_path.into(),
            attempt_count: 1,
            max_attempts,
        }
    }

    /// One delayed re-check.
    pub fn check_once(&mut self, probe: &dyn FileProbe) -> PollStep {
        if self.attempt_count >= self.max_attempts {
            return PollStep::Exhausted;
        }
        self.attempt_count += 1;
        if probe.exists(&self.target_path) {
            PollStep::Ready
        } else {
            PollStep::Retry
        }
    }
}

/// Result of a poll, tagged with the generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Ready { path: PathBuf, generation: u64 },
    Exhausted { path: PathBuf, generation: u64 },
}

impl PollEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PollEvent::Ready { generation, .. } | PollEvent::Exhausted { generation, .. } => {
                *generation
            }
        }
    }
}

/// Schedules existence checks on the tokio runtime.
pub struct ReadinessPoller {
    config: PollerConfig,
    probe: Arc<dyn FileProbe>,
    presenter: Arc<dyn Presenter>,
    events: mpsc::UnboundedSender<PollEvent>,
    pending: Option<CancellationToken>,
    generation: u64,
}

impl ReadinessPoller {
    pub fn new(
        config: PollerConfig,
        probe: Arc<dyn FileProbe>,
        presenter: Arc<dyn Presenter>,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        Self {
            config,
            probe,
            presenter,
            events,
            pending: None,
            generation: 0,
        }
    }

    /// Poll for `path`, superseding any poll in progress.
    ///
    /// Must be called within a tokio runtime. Returns the new generation.
    pub fn start(&mut self, path: PathBuf) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let token = CancellationToken::new();
        self.pending = Some(token.clone());

        info!(path = %path.display(), generation, "Waiting for update file");
        let state = PollState::new(path, self.config.max_attempts);
        tokio::spawn(run_poll(
            state,
            self.config.interval,
            Arc::clone(&self.probe),
            Arc::clone(&self.presenter),
            self.events.clone(),
            token,
            generation,
        ));
        generation
    }

    /// Cancel the pending re-check, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
            debug!(generation = self.generation, "Pending poll canceled");
        }
    }

    /// Generation of the most recent poll.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `event` belongs to the most recent poll.
    pub fn is_current(&self, event: &PollEvent) -> bool {
        event.generation() == self.generation
    }

    /// Mark the current poll finished once its outcome was consumed.
    pub fn finish(&mut self, generation: u64) {
        if generation == self.generation {
            self.pending = None;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for ReadinessPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poll(
    mut state: PollState,
    interval: Duration,
    probe: Arc<dyn FileProbe>,
    presenter: Arc<dyn Presenter>,
    events: mpsc::UnboundedSender<PollEvent>,
    token: CancellationToken,
    generation: u64,
) {
    let mut ready = probe.exists(&state.target_path);

    while !ready {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(path = %state.target_path.display(), generation, "Poll superseded");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match state.check_once(probe.as_ref()) {
            PollStep::Ready => ready = true,
            PollStep::Retry => {
                debug!(
                    path = %state.target_path.display(),
                    attempt = state.attempt_count,
                    "Update file not there yet"
                );
            }
            PollStep::Exhausted => {
                info!(
                    path = %state.target_path.display(),
                    attempts = state.max_attempts,
                    "Update file never appeared, giving up"
                );
                presenter.clear();
                let _ = events.send(PollEvent::Exhausted {
                    path: state.target_path,
                    generation,
                });
                return;
            }
        }
    }

    if token.is_cancelled() {
        return;
    }
    info!(path = %state.target_path.display(), generation, "Update file present");
    let _ = events.send(PollEvent::Ready {
        path: state.target_path,
        generation,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::{PresenterCall, RecordingPresenter};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Probe that reports a path present from the `appear_at`-th check on.
    struct ScriptedProbe {
        appear_at: Option<usize>,
        checks: Mutex<Vec<(PathBuf, Instant)>>,
    }

    impl ScriptedProbe {
        fn new(appear_at: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                appear_at,
                checks: Mutex::new(Vec::new()),
            })
        }

        fn count(&self, path: &Path) -> usize {
            self.checks.lock().iter().filter(|(p, _)| p == path).count()
        }
    }

    impl FileProbe for ScriptedProbe {
        fn exists(&self, path: &Path) -> bool {
            let mut checks = self.checks.lock();
            checks.push((path.to_path_buf(), Instant::now()));
            let n = checks.iter().filter(|(p, _)| p == path).count();
            self.appear_at.is_some_and(|at| n >= at)
        }
    }

    struct MapProbe(Vec<PathBuf>);

    impl FileProbe for MapProbe {
        fn exists(&self, path: &Path) -> bool {
            self.0.iter().any(|p| p == path)
        }
    }

    fn poller(
        probe: Arc<dyn FileProbe>,
    ) -> (
        ReadinessPoller,
        mpsc::UnboundedReceiver<PollEvent>,
        Arc<RecordingPresenter>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let presenter = Arc::new(RecordingPresenter::new());
        let poller = ReadinessPoller::new(PollerConfig::default(), probe, presenter.clone(), tx);
        (poller, rx, presenter)
    }

    #[test]
    fn test_check_once_counts_and_exhausts() {
        let probe = MapProbe(vec![]);
        let mut state = PollState::new("/data/ota/update.zip", 3);

        assert_eq!(state.check_once(&probe), PollStep::Retry);
        assert_eq!(state.attempt_count, 2);
        assert_eq!(state.check_once(&probe), PollStep::Retry);
        assert_eq!(state.attempt_count, 3);
        assert_eq!(state.check_once(&probe), PollStep::Exhausted);
        assert_eq!(state.attempt_count, 3);
    }

    #[test]
    fn test_check_once_ready() {
        let probe = MapProbe(vec![PathBuf::from("/data/ota/update.zip")]);
        let mut state = PollState::new("/data/ota/update.zip", 10);
        assert_eq!(state.check_once(&probe), PollStep::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_file_is_ready_immediately() {
        let path = PathBuf::from("/data/ota/update.zip");
        let (mut poller, mut rx, _) = poller(Arc::new(MapProbe(vec![path.clone()])));
        let started = Instant::now();

        let generation = poller.start(path.clone());

        assert_eq!(rx.recv().await, Some(PollEvent::Ready { path, generation }));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_checked_exactly_max_attempts() {
        let path = PathBuf::from("/data/ota/update.zip");
        let probe = ScriptedProbe::new(None);
        let (mut poller, mut rx, presenter) = poller(probe.clone());
        let started = Instant::now();

        poller.start(path.clone());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PollEvent::Exhausted { .. }));
        assert_eq!(probe.count(&path), 10);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(presenter.calls(), vec![PresenterCall::Clear]);

        // evenly spaced
        let checks = probe.checks.lock().clone();
        for pair in checks.windows(2) {
            assert_eq!(pair[1].1 - pair[0].1, DEFAULT_POLL_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_appearing_later_is_ready() {
        let path = PathBuf::from("/data/ota/update.zip");
        let probe = ScriptedProbe::new(Some(4));
        let (mut poller, mut rx, _) = poller(probe.clone());
        let started = Instant::now();

        let generation = poller.start(path.clone());

        assert_eq!(rx.recv().await, Some(PollEvent::Ready { path: path.clone(), generation }));
        assert_eq!(probe.count(&path), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_poll() {
        let first = PathBuf::from("/data/ota/first.zip");
        let second = PathBuf::from("/data/ota/second.zip");
        let probe = ScriptedProbe::new(None);
        let (mut poller, mut rx, _) = poller(probe.clone());

        poller.start(first.clone());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let first_checks = probe.count(&first);
        assert_eq!(first_checks, 4);

        let generation = poller.start(second.clone());
        assert_eq!(generation, 2);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            PollEvent::Exhausted {
                path: second.clone(),
                generation: 2
            }
        );
        assert_eq!(probe.count(&first), first_checks);
        assert_eq!(probe.count(&second), 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let path = PathBuf::from("/data/ota/update.zip");
        let probe = ScriptedProbe::new(None);
        let (mut poller, mut rx, presenter) = poller(probe.clone());

        poller.start(path.clone());
        poller.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(probe.count(&path), 1);
        assert!(rx.try_recv().is_err());
        assert!(presenter.calls().is_empty());
        assert!(!poller.is_pending());
    }

    #[test]
    fn test_is_current() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut poller = ReadinessPoller::new(
            PollerConfig::default(),
            Arc::new(FsProbe),
            Arc::new(RecordingPresenter::new()),
            tx,
        );
        poller.generation = 3;

        let stale = PollEvent::Ready {
            path: PathBuf::from("/a"),
            generation: 2,
        };
        assert!(!poller.is_current(&stale));
        poller.finish(2);
        assert_eq!(poller.generation(), 3);
    }
}
