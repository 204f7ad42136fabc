//! Status command - show the durable update flag.

use otaflow::config::ConfigFile;
use otaflow::store::{StatusStore, NOT_UPDATING, UPDATING};

use crate::error::CliError;

/// Run the status command.
pub fn run(config: &ConfigFile) -> Result<(), CliError> {
    let store = config.state.open_store();
    let key = &config.state.key;
    let value = store.get_int(key, NOT_UPDATING)?;

    println!("State file: {}", store.path().display());
    println!("{} = {} ({})", key, value, describe(value));
    if let Some(at) = store.updated_at(key)? {
        println!("Last changed: {}", at);
    }
    Ok(())
}

fn describe(value: i32) -> &'static str {
    match value {
        UPDATING => "update in progress",
        NOT_UPDATING => "idle",
        _ => "unknown",
    }
}
