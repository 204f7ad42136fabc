//! Service configuration and collaborators.

use std::sync::Arc;

use crate::config::ConfigFile;
use crate::engine::UpdateEngine;
use crate::lease::PowerLease;
use crate::orchestrator::OrchestratorConfig;
use crate::poller::{FileProbe, FsProbe, PollerConfig};
use crate::presentation::Presenter;
use crate::projector::ProjectorConfig;
use crate::store::StatusStore;

/// Configuration for the [`UpdateService`](super::UpdateService).
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub poller: PollerConfig,
    pub orchestrator: OrchestratorConfig,
    pub projector: ProjectorConfig,
}

impl ServiceConfig {
    /// Set the poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Set the orchestrator configuration.
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Set the projector configuration.
    pub fn with_projector(mut self, projector: ProjectorConfig) -> Self {
        self.projector = projector;
        self
    }
}

impl From<&ConfigFile> for ServiceConfig {
    fn from(file: &ConfigFile) -> Self {
        Self {
            poller: file.poller_config(),
            orchestrator: file.orchestrator_config(),
            projector: file.projector_config(),
        }
    }
}

/// External collaborators the service drives.
pub struct ServiceDeps {
    pub engine: Box<dyn UpdateEngine>,
    pub lease: Box<dyn PowerLease>,
    pub store: Arc<dyn StatusStore>,
    pub presenter: Arc<dyn Presenter>,
    pub probe: Arc<dyn FileProbe>,
}

impl ServiceDeps {
    /// Collaborators as configured in `file`, rendering to `presenter`.
    pub fn from_config(file: &ConfigFile, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            engine: file.engine.build(),
            lease: file.lease.build(),
            store: Arc::new(file.state.open_store()),
            presenter,
            probe: Arc::new(FsProbe),
        }
    }

    /// Replace the engine adapter.
    pub fn with_engine(mut self, engine: Box<dyn UpdateEngine>) -> Self {
        self.engine = engine;
        self
    }
}
