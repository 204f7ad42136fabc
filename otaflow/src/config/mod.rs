//! User configuration.
//!
//! Settings live in an INI file at `<config dir>/otaflow/config.ini`. A
//! missing file, or a missing key, falls back to the built-in default.
//!
//! ```ini
//! [engine]
//! backend = client
//! client_path = /system/bin/update_engine_client
//!
//! [poller]
//! interval_ms = 300
//! max_attempts = 10
//! ```

mod file;
mod keys;

pub use file::{
    config_file_path, ConfigError, ConfigFile, EngineBackend, EngineSettings, LeaseSettings,
    LoggingSettings, OrchestratorSettings, PollerSettings, StateSettings,
};
pub use keys::ConfigKey;
