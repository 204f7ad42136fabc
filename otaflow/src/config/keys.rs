//! Addressable configuration keys.
//!
//! Every setting in the config file has a [`ConfigKey`] named
//! `section.key`. The CLI `config get|set|list` commands and the file
//! loader both go through [`ConfigKey::get`] and [`ConfigKey::set`], so a
//! value accepted on the command line is exactly a value the loader accepts.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::file::{ConfigError, ConfigFile, EngineBackend};

/// A single configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    EngineBackend,
    EngineClientPath,
    EngineSimulatedStepMs,
    PollerIntervalMs,
    PollerMaxAttempts,
    OrchestratorDeleteFiles,
    OrchestratorRebootSettleMs,
    OrchestratorRebootReason,
    LeaseEnabled,
    LeaseName,
    LeaseSysfsDir,
    StateFile,
    StateKey,
    LoggingLevel,
    LoggingFile,
}

impl ConfigKey {
    /// All keys, grouped by section, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::EngineBackend,
            ConfigKey::EngineClientPath,
            ConfigKey::EngineSimulatedStepMs,
            ConfigKey::PollerIntervalMs,
            ConfigKey::PollerMaxAttempts,
            ConfigKey::OrchestratorDeleteFiles,
            ConfigKey::OrchestratorRebootSettleMs,
            ConfigKey::OrchestratorRebootReason,
            ConfigKey::LeaseEnabled,
            ConfigKey::LeaseName,
            ConfigKey::LeaseSysfsDir,
            ConfigKey::StateFile,
            ConfigKey::StateKey,
            ConfigKey::LoggingLevel,
            ConfigKey::LoggingFile,
        ]
    }

    /// Full `section.key` name.
    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::EngineBackend => "engine.backend",
            ConfigKey::EngineClientPath => "engine.client_path",
            ConfigKey::EngineSimulatedStepMs => "engine.simulated_step_ms",
            ConfigKey::PollerIntervalMs => "poller.interval_ms",
            ConfigKey::PollerMaxAttempts => "poller.max_attempts",
            ConfigKey::OrchestratorDeleteFiles => "orchestrator.delete_files",
            ConfigKey::OrchestratorRebootSettleMs => "orchestrator.reboot_settle_ms",
            ConfigKey::OrchestratorRebootReason => "orchestrator.reboot_reason",
            ConfigKey::LeaseEnabled => "lease.enabled",
            ConfigKey::LeaseName => "lease.name",
            ConfigKey::LeaseSysfsDir => "lease.sysfs_dir",
            ConfigKey::StateFile => "state.file",
            ConfigKey::StateKey => "state.key",
            ConfigKey::LoggingLevel => "logging.level",
            ConfigKey::LoggingFile => "logging.file",
        }
    }

    /// INI section the key lives in.
    pub fn section(self) -> &'static str {
        self.split().0
    }

    /// Key name within its section.
    pub fn key_name(self) -> &'static str {
        self.split().1
    }

    fn split(self) -> (&'static str, &'static str) {
        let name = self.name();
        name.split_once('.').unwrap_or((name, ""))
    }

    /// Current value as text. Unset optional values are empty.
    pub fn get(self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::EngineBackend => config.engine.backend.to_string(),
            ConfigKey::EngineClientPath => config.engine.client_path.clone(),
            ConfigKey::EngineSimulatedStepMs => millis(config.engine.simulated_step),
            ConfigKey::PollerIntervalMs => millis(config.poller.interval),
            ConfigKey::PollerMaxAttempts => config.poller.max_attempts.to_string(),
            ConfigKey::OrchestratorDeleteFiles => config.orchestrator.delete_files.to_string(),
            ConfigKey::OrchestratorRebootSettleMs => millis(config.orchestrator.reboot_settle),
            ConfigKey::OrchestratorRebootReason => config.orchestrator.reboot_reason.clone(),
            ConfigKey::LeaseEnabled => config.lease.enabled.to_string(),
            ConfigKey::LeaseName => config.lease.name.clone(),
            ConfigKey::LeaseSysfsDir => config.lease.sysfs_dir.display().to_string(),
            ConfigKey::StateFile => config.state.file.display().to_string(),
            ConfigKey::StateKey => config.state.key.clone(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingFile => config
                .logging
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parse `value` and store it.
    pub fn set(self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            ConfigKey::EngineBackend => {
                config.engine.backend = value
                    .parse::<EngineBackend>()
                    .map_err(|reason| self.invalid(value, reason))?;
            }
            ConfigKey::EngineClientPath => config.engine.client_path = self.non_empty(value)?,
            ConfigKey::EngineSimulatedStepMs => {
                config.engine.simulated_step = Duration::from_millis(self.parse(value)?);
            }
            ConfigKey::PollerIntervalMs => {
                config.poller.interval = Duration::from_millis(self.parse(value)?);
            }
            ConfigKey::PollerMaxAttempts => {
                let attempts: u32 = self.parse(value)?;
                if attempts == 0 {
                    return Err(self.invalid(value, "must be at least 1".to_string()));
                }
                config.poller.max_attempts = attempts;
            }
            ConfigKey::OrchestratorDeleteFiles => {
                config.orchestrator.delete_files = self.parse_bool(value)?;
            }
            ConfigKey::OrchestratorRebootSettleMs => {
                config.orchestrator.reboot_settle = Duration::from_millis(self.parse(value)?);
            }
            ConfigKey::OrchestratorRebootReason => {
                config.orchestrator.reboot_reason = self.non_empty(value)?;
            }
            ConfigKey::LeaseEnabled => config.lease.enabled = self.parse_bool(value)?,
            ConfigKey::LeaseName => config.lease.name = self.non_empty(value)?,
            ConfigKey::LeaseSysfsDir => config.lease.sysfs_dir = PathBuf::from(self.non_empty(value)?),
            ConfigKey::StateFile => config.state.file = PathBuf::from(self.non_empty(value)?),
            ConfigKey::StateKey => config.state.key = self.non_empty(value)?,
            ConfigKey::LoggingLevel => config.logging.level = self.non_empty(value)?,
            ConfigKey::LoggingFile => {
                config.logging.file = (!value.is_empty()).then(|| PathBuf::from(value));
            }
        }
        Ok(())
    }

    fn invalid(self, value: &str, reason: String) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason,
        }
    }

    fn parse<T: FromStr>(self, value: &str) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        value.parse().map_err(|e: T::Err| self.invalid(value, e.to_string()))
    }

    fn parse_bool(self, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false".to_string())),
        }
    }

    fn non_empty(self, value: &str) -> Result<String, ConfigError> {
        if value.is_empty() {
            Err(self.invalid(value, "must not be empty".to_string()))
        } else {
            Ok(value.to_string())
        }
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
