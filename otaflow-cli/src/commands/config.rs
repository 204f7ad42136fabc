//! `otaflow config`: read and edit the INI settings file.
//!
//! Every subcommand addresses a setting by its `section.key` name, the same
//! name the file uses. A missing or unreadable file reads as the defaults,
//! and `set` writes the whole file back.

use clap::Subcommand;
use otaflow::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get {
        /// Setting name, e.g. poller.interval_ms or engine.backend
        key: String,
    },

    /// Change one setting and save the file
    Set {
        /// Setting name, e.g. orchestrator.delete_files
        key: String,

        /// New value; an empty string clears optional settings
        value: String,
    },

    /// Print every setting, grouped by section
    List,

    /// Print where the settings file lives
    Path,
}

/// Dispatch a `config` subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => run_get(&key),
        ConfigCommands::Set { key, value } => run_set(&key, &value),
        ConfigCommands::List => run_list(),
        ConfigCommands::Path => run_path(),
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "No setting named '{}' (see 'otaflow config list')",
            key
        ))
    })
}

fn run_get(key: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;
    let config = ConfigFile::load().unwrap_or_default();
    println!("{}", display_value(&config_key.get(&config)));
    Ok(())
}

fn run_set(key: &str, value: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;

    let mut config = ConfigFile::load().unwrap_or_default();
    config_key.set(&mut config, value)?;
    config.save()?;

    println!("{} = {}", config_key.name(), display_value(&config_key.get(&config)));
    Ok(())
}

fn run_list() -> Result<(), CliError> {
    let config = ConfigFile::load().unwrap_or_default();
    print!("{}", render_list(&config));
    Ok(())
}

fn render_list(config: &ConfigFile) -> String {
    let mut out = String::new();
    let mut section = "";

    for key in ConfigKey::all() {
        if key.section() != section {
            if !section.is_empty() {
                out.push('\n');
            }
            section = key.section();
            out.push_str(&format!("[{}]\n", section));
        }

        out.push_str(&format!(
            "  {} = {}\n",
            key.key_name(),
            display_value(&key.get(config))
        ));
    }
    out
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}
