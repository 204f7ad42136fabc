//! Configuration for the lifecycle orchestrator.

use crate::store::DEFAULT_STATE_KEY;

/// Configuration for the [`UpdateOrchestrator`](super::UpdateOrchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Remove the package once the engine reports completion.
    pub delete_files: bool,

    /// Key of the durable "update in progress" flag.
    pub state_key: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            delete_files: false,
            state_key: DEFAULT_STATE_KEY.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Enable or disable package removal after completion.
    pub fn with_delete_files(mut self, delete: bool) -> Self {
        self.delete_files = delete;
        self
    }

    /// Set the durable flag key.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }
}
