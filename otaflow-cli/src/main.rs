//! otaflow CLI - Command-line interface
//!
//! Applies A/B update packages through the device update engine and
//! manages the otaflow configuration.

mod commands;
mod error;
mod presenter;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use otaflow::config::ConfigFile;
use otaflow::logging::init_logging;
use tracing::{debug, error};

use commands::apply::ApplyArgs;
use commands::config::ConfigCommands;
use error::CliError;

#[derive(Parser)]
#[command(name = "otaflow")]
#[command(about = "Apply A/B OTA update packages through the device update engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for an update package and apply it
    Apply {
        /// Path of the update package (zip)
        path: PathBuf,

        /// Apply even if the update flag says an update is in progress
        #[arg(long)]
        force: bool,

        /// Use the simulated engine instead of the device engine
        #[arg(long)]
        simulate: bool,
    },

    /// Show the payload location and properties of an update package
    Inspect {
        /// Path of the update package (zip)
        path: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the durable update-in-progress flag
    Status,

    /// Clear the durable update-in-progress flag
    ResetState,

    /// View or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Create the configuration file with defaults
    Init,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    // Config commands must work even when the file is broken.
    let command = match cli.command {
        Commands::Config(command) => return commands::config::run(command),
        other => other,
    };

    let config = ConfigFile::load()?;
    let _guard = init_logging(&config.logging, cli.verbose)?;
    debug!(version = otaflow::VERSION, "otaflow starting");

    match command {
        Commands::Apply {
            path,
            force,
            simulate,
        } => commands::apply::run(
            ApplyArgs {
                path,
                force,
                simulate,
            },
            &config,
        ),
        Commands::Inspect { path, json } => commands::inspect::run(&path, json),
        Commands::Status => commands::status::run(&config),
        Commands::ResetState => commands::reset_state::run(&config),
        Commands::Init => commands::init::run(),
        Commands::Config(command) => commands::config::run(command),
    }
}
