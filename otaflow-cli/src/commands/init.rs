//! Init command - initialize configuration file.

use std::path::Path;

use otaflow::config::{config_file_path, ConfigFile, EngineBackend};
use otaflow::engine::DEFAULT_CLIENT_PATH;

use crate::error::CliError;

/// Run the init command.
pub fn run() -> Result<(), CliError> {
    let path = config_file_path();
    let existed = path.exists();

    // Load existing config or create default
    let mut config = ConfigFile::load().unwrap_or_default();
    if !existed {
        config.engine.backend = detect_backend(Path::new(DEFAULT_CLIENT_PATH));
        match config.engine.backend {
            EngineBackend::Client => {
                println!("Detected update engine client:");
                println!("  {}", DEFAULT_CLIENT_PATH);
            }
            EngineBackend::Simulated => {
                println!("No update engine client at {}.", DEFAULT_CLIENT_PATH);
                println!("Using the simulated engine; set engine.client_path to drive a device.");
            }
        }
        println!();
    }
    config.save()?;

    println!("Configuration file: {}", path.display());
    println!();
    println!("Edit this file or use 'otaflow config set' to customize settings.");
    Ok(())
}

/// Client backend when the engine client binary is present.
fn detect_backend(client: &Path) -> EngineBackend {
    if client.is_file() {
        EngineBackend::Client
    } else {
        EngineBackend::Simulated
    }
}
