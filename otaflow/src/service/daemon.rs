//! The update service task.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{ServiceConfig, ServiceDeps};
use super::error::{ServiceError, ServiceResult};
use crate::orchestrator::{
    AttemptSnapshot, EngineEvent, OrchestratorError, OrchestratorResult, UpdateOrchestrator,
};
use crate::package;
use crate::poller::{PollEvent, ReadinessPoller};
use crate::projector::StatusProjector;

// =============================================================================
// Commands and state
// =============================================================================

type Reply = oneshot::Sender<OrchestratorResult<()>>;

/// Requests accepted by the service.
#[derive(Debug)]
pub enum ServiceCommand {
    /// Wait for `path` to exist, then apply it.
    Start(PathBuf),
    Suspend(Reply),
    Resume(Reply),
    Cancel(Reply),
}

/// What the service is doing, as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ServiceState {
    Idle,
    WaitingForFile { path: PathBuf },
    /// An attempt exists. Its snapshot may be terminal.
    Updating(AttemptSnapshot),
    /// The file never appeared.
    GaveUp { path: PathBuf },
    /// The package could not be parsed or the attempt could not start.
    Rejected { path: PathBuf, reason: String },
}

impl ServiceState {
    /// Whether nothing further will happen without a new command.
    pub fn is_settled(&self) -> bool {
        match self {
            ServiceState::Idle | ServiceState::GaveUp { .. } | ServiceState::Rejected { .. } => true,
            ServiceState::WaitingForFile { .. } => false,
            ServiceState::Updating(snapshot) => snapshot.state.is_terminal(),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable front end to a running [`UpdateService`].
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<ServiceCommand>,
    state: watch::Receiver<ServiceState>,
}

impl ServiceHandle {
    /// Poll for `path` and apply it once present.
    pub fn start(&self, path: impl Into<PathBuf>) -> ServiceResult<()> {
        self.commands
            .send(ServiceCommand::Start(path.into()))
            .map_err(|_| ServiceError::Closed)
    }

    pub async fn suspend(&self) -> ServiceResult<()> {
        self.request(ServiceCommand::Suspend).await
    }

    pub async fn resume(&self) -> ServiceResult<()> {
        self.request(ServiceCommand::Resume).await
    }

    /// Cancel the pending poll or the live attempt.
    pub async fn cancel(&self) -> ServiceResult<()> {
        self.request(ServiceCommand::Cancel).await
    }

    /// Current published state.
    pub fn state(&self) -> ServiceState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    async fn request(&self, command: impl FnOnce(Reply) -> ServiceCommand) -> ServiceResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| ServiceError::Closed)?;
        rx.await.map_err(|_| ServiceError::Closed)??;
        Ok(())
    }
}

// =============================================================================
// Service
// =============================================================================

/// Runs the poller and the orchestrator on one task.
///
/// ```text
///  ServiceHandle ──► commands ─┐
///  ReadinessPoller ──► polls ──┼──► select! ──► UpdateOrchestrator ──► watch<ServiceState>
///  AttemptSink ──► engine ─────┘
/// ```
///
/// Engine reports, poll outcomes and commands are processed one at a time,
/// so the orchestrator never sees two of them concurrently.
pub struct UpdateService {
    orchestrator: UpdateOrchestrator,
    poller: ReadinessPoller,
    commands: mpsc::UnboundedReceiver<ServiceCommand>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    poll_events: mpsc::UnboundedReceiver<PollEvent>,
    state: watch::Sender<ServiceState>,
}

impl UpdateService {
    /// Create the service and a handle to it. Nothing runs until
    /// [`run`](Self::run) is awaited.
    pub fn new(config: ServiceConfig, deps: ServiceDeps) -> (Self, ServiceHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (engine_tx, engine_events) = mpsc::unbounded_channel();
        let (poll_tx, poll_events) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ServiceState::Idle);

        let projector = StatusProjector::new(Arc::clone(&deps.presenter), config.projector);
        let orchestrator = UpdateOrchestrator::new(
            config.orchestrator,
            deps.engine,
            deps.lease,
            deps.store,
            projector,
            engine_tx,
        );
        let poller = ReadinessPoller::new(config.poller, deps.probe, deps.presenter, poll_tx);

        let service = Self {
            orchestrator,
            poller,
            commands,
            engine_events,
            poll_events,
            state,
        };
        let handle = ServiceHandle {
            commands: command_tx,
            state: state_rx,
        };
        (service, handle)
    }

    /// Process events until `shutdown` is cancelled.
    ///
    /// On shutdown the pending poll is dropped and the orchestrator lets go
    /// of the engine and the lease.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Update service started");
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Update service shutting down");
                    break;
                }

                Some(event) = self.engine_events.recv() => {
                    if self.orchestrator.handle_event(event) {
                        self.publish_attempt();
                    }
                }

                Some(event) = self.poll_events.recv() => {
                    self.on_poll_event(event).await;
                }

                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.on_command(command),
                        None => {
                            debug!("All service handles dropped");
                            commands_open = false;
                        }
                    }
                }
            }
        }

        self.poller.cancel();
        self.orchestrator.shutdown();
        info!("Update service stopped");
    }

    fn on_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::Start(path) => {
                if self.orchestrator.abandon_attempt() {
                    info!("Relaunch while updating, dropped the live attempt");
                    self.publish_attempt();
                }
                self.poller.start(path.clone());
                self.state.send_replace(ServiceState::WaitingForFile { path });
            }
            ServiceCommand::Suspend(reply) => {
                let result = self.orchestrator.suspend();
                self.publish_attempt();
                let _ = reply.send(result);
            }
            ServiceCommand::Resume(reply) => {
                let result = self.orchestrator.resume();
                self.publish_attempt();
                let _ = reply.send(result);
            }
            ServiceCommand::Cancel(reply) => {
                if self.poller.is_pending() {
                    self.poller.cancel();
                    info!("Waiting for update file canceled");
                    self.state.send_replace(ServiceState::Idle);
                    let _ = reply.send(Ok(()));
                    return;
                }
                let result = self.orchestrator.cancel_attempt();
                self.publish_attempt();
                let _ = reply.send(result);
            }
        }
    }

    async fn on_poll_event(&mut self, event: PollEvent) {
        if !self.poller.is_current(&event) {
            debug!(generation = event.generation(), "Dropping stale poll outcome");
            return;
        }
        self.poller.finish(event.generation());

        let path = match event {
            PollEvent::Exhausted { path, .. } => {
                self.state.send_replace(ServiceState::GaveUp { path });
                return;
            }
            PollEvent::Ready { path, .. } => path,
        };

        let parse_path = path.clone();
        let parsed = match tokio::task::spawn_blocking(move || package::parse(&parse_path)).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Package parser task failed");
                self.reject(path, e.to_string());
                return;
            }
        };

        let descriptor = match parsed {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(error = %e, "Cannot read update package");
                self.reject(path, e.to_string());
                return;
            }
        };

        match self.orchestrator.start_attempt(descriptor) {
            Ok(_) => self.publish_attempt(),
            Err(OrchestratorError::StartFailure { .. }) => self.publish_attempt(),
            Err(e) => self.reject(path, e.to_string()),
        }
    }

    fn reject(&mut self, path: PathBuf, reason: String) {
        self.state.send_replace(ServiceState::Rejected { path, reason });
    }

    fn publish_attempt(&mut self) {
        if let Some(snapshot) = self.orchestrator.snapshot() {
            self.state.send_replace(ServiceState::Updating(snapshot));
        }
    }
}
