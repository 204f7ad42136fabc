//! INI-backed configuration file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use super::keys::ConfigKey;
use crate::engine::{ClientEngine, SimulatedEngine, SimulationScript, UpdateEngine, DEFAULT_CLIENT_PATH};
use crate::lease::{NoopLease, PowerLease, SysfsWakeLock, DEFAULT_LEASE_NAME, DEFAULT_SYSFS_DIR};
use crate::orchestrator::OrchestratorConfig;
use crate::poller::{PollerConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::projector::{ProjectorConfig, DEFAULT_REBOOT_REASON, DEFAULT_SETTLE_DELAY};
use crate::store::{IniStatusStore, DEFAULT_STATE_KEY};

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Path of the user configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("otaflow")
        .join("config.ini")
}

/// Which engine adapter drives updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineBackend {
    /// The platform `update_engine_client` binary.
    #[default]
    Client,
    /// Scripted engine, no device changes.
    Simulated,
}

impl EngineBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineBackend::Client => "client",
            EngineBackend::Simulated => "simulated",
        }
    }
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(EngineBackend::Client),
            "simulated" | "simulate" => Ok(EngineBackend::Simulated),
            other => Err(format!("expected 'client' or 'simulated', got '{}'", other)),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub backend: EngineBackend,
    /// Command line of the engine client. May carry leading arguments,
    /// e.g. `adb shell update_engine_client`.
    pub client_path: String,
    pub simulated_step: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: EngineBackend::Client,
            client_path: DEFAULT_CLIENT_PATH.to_string(),
            simulated_step: Duration::from_millis(200),
        }
    }
}

impl EngineSettings {
    /// Build the configured engine adapter.
    pub fn build(&self) -> Box<dyn UpdateEngine> {
        match self.backend {
            EngineBackend::Client => Box::new(ClientEngine::from_command_line(&self.client_path)),
            EngineBackend::Simulated => Box::new(SimulatedEngine::new(
                SimulationScript::default().with_step(self.simulated_step),
            )),
        }
    }
}

/// `[poller]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub delete_files: bool,
    pub reboot_settle: Duration,
    pub reboot_reason: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            delete_files: false,
            reboot_settle: DEFAULT_SETTLE_DELAY,
            reboot_reason: DEFAULT_REBOOT_REASON.to_string(),
        }
    }
}

/// `[lease]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseSettings {
    pub enabled: bool,
    pub name: String,
    pub sysfs_dir: PathBuf,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            name: DEFAULT_LEASE_NAME.to_string(),
            sysfs_dir: PathBuf::from(DEFAULT_SYSFS_DIR),
        }
    }
}

impl LeaseSettings {
    /// Build the configured power lease.
    pub fn build(&self) -> Box<dyn PowerLease> {
        if self.enabled {
            Box::new(SysfsWakeLock::new(self.name.clone(), self.sysfs_dir.clone()))
        } else {
            Box::new(NoopLease::new())
        }
    }
}

/// `[state]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSettings {
    pub file: PathBuf,
    pub key: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            file: IniStatusStore::default_path(),
            key: DEFAULT_STATE_KEY.to_string(),
        }
    }
}

impl StateSettings {
    pub fn open_store(&self) -> IniStatusStore {
        IniStatusStore::new(self.file.clone())
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Optional log file in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub poller: PollerSettings,
    pub orchestrator: OrchestratorSettings,
    pub lease: LeaseSettings,
    pub state: StateSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from [`config_file_path`]. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults; keys not present
    /// keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save to [`config_file_path`].
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save every set key to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section())).set(key.key_name(), value);
            }
        }

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        ini.write_to_file(path).map_err(write_err)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::default()
            .with_interval(self.poller.interval)
            .with_max_attempts(self.poller.max_attempts)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_delete_files(self.orchestrator.delete_files)
            .with_state_key(self.state.key.clone())
    }

    pub fn projector_config(&self) -> ProjectorConfig {
        ProjectorConfig::default()
            .with_settle_delay(self.orchestrator.reboot_settle)
            .with_reboot_reason(self.orchestrator.reboot_reason.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.engine.backend, EngineBackend::Client);
        assert_eq!(config.engine.client_path, "/system/bin/update_engine_client");
        assert_eq!(config.poller.interval, Duration::from_millis(300));
        assert_eq!(config.poller.max_attempts, 10);
        assert!(!config.orchestrator.delete_files);
        assert_eq!(config.orchestrator.reboot_reason, "reboot-ab-update");
        assert_eq!(config.lease.name, "OTA:CpuKeepRunning");
        assert_eq!(config.state.key, "ota.update.starting");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("config.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_partial_file_overrides_some_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(
            &path,
            "[engine]\nbackend = simulated\n\n[poller]\nmax_attempts = 3\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.engine.backend, EngineBackend::Simulated);
        assert_eq!(config.poller.max_attempts, 3);
        assert_eq!(config.poller.interval, Duration::from_millis(300));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.orchestrator.delete_files = true;
        config.logging.file = Some(PathBuf::from("/tmp/otaflow.log"));
        config.lease.enabled = false;
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_value_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[poller]\ninterval_ms = soon\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "poller.interval_ms", .. }));
    }

    #[test]
    fn test_component_configs() {
        let mut config = ConfigFile::default();
        config.poller.max_attempts = 4;
        config.orchestrator.reboot_settle = Duration::from_millis(10);
        config.state.key = "custom".to_string();

        assert_eq!(config.poller_config().max_attempts, 4);
        assert_eq!(config.projector_config().settle_delay, Duration::from_millis(10));
        assert_eq!(config.orchestrator_config().state_key, "custom");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Simulated".parse::<EngineBackend>(), Ok(EngineBackend::Simulated));
        assert!("adb".parse::<EngineBackend>().is_err());
    }

    #[test]
    fn test_builders() {
        let mut config = ConfigFile::default();
        config.engine.backend = EngineBackend::Simulated;
        assert_eq!(config.engine.build().name(), "simulated");

        config.lease.enabled = false;
        assert_eq!(config.lease.build().name(), "noop");
    }
}
