//! Reset-state command - clear a stale update flag.

use otaflow::config::ConfigFile;
use otaflow::store::{StatusStore, NOT_UPDATING};
use tracing::info;

use crate::error::CliError;

/// Run the reset-state command.
pub fn run(config: &ConfigFile) -> Result<(), CliError> {
    let store = config.state.open_store();
    store.put_int(&config.state.key, NOT_UPDATING)?;
    info!(key = %config.state.key, path = %store.path().display(), "Update flag reset");
    println!("Set {} = {}", config.state.key, NOT_UPDATING);
    Ok(())
}
