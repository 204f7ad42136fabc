//! Apply command - wait for an update package and apply it.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use otaflow::config::{ConfigFile, EngineBackend};
use otaflow::orchestrator::AttemptState;
use otaflow::presentation::Presenter;
use otaflow::service::{ServiceConfig, ServiceDeps, ServiceHandle, ServiceState, UpdateService};
use otaflow::store::{StatusStore, NOT_UPDATING, UPDATING};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::presenter::ConsolePresenter;

/// Arguments for the apply command.
pub struct ApplyArgs {
    pub path: PathBuf,
    pub force: bool,
    pub simulate: bool,
}

/// Run the apply command.
pub fn run(args: ApplyArgs, config: &ConfigFile) -> Result<(), CliError> {
    let mut config = config.clone();
    if args.simulate {
        config.engine.backend = EngineBackend::Simulated;
    }

    let store = config.state.open_store();
    let flag = store.get_int(&config.state.key, NOT_UPDATING)?;
    if flag == UPDATING && !args.force {
        return Err(CliError::AlreadyUpdating {
            key: config.state.key.clone(),
        });
    }

    let path = absolute(&args.path)?;

    println!("otaflow v{}", otaflow::VERSION);
    println!("Package: {}", path.display());
    println!("Engine:  {}", config.engine.backend);
    println!();
    println!("Press Ctrl+C to cancel the update");
    println!();

    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    ctrlc::set_handler(move || on_signal.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let (reboot_tx, mut reboot_rx) = mpsc::unbounded_channel();
    let presenter = Arc::new(ConsolePresenter::new(reboot_tx));

    let final_state = runtime.block_on(async {
        let deps = ServiceDeps::from_config(&config, presenter.clone());
        let (service, handle) = UpdateService::new(ServiceConfig::from(&config), deps);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(service.run(shutdown.clone()));

        let result = drive(&handle, path.clone(), interrupt).await;

        // The reboot request trails success by the settle delay.
        if let Ok(ServiceState::Updating(snapshot)) = &result {
            if snapshot.state == AttemptState::Succeeded {
                let wait = config.orchestrator.reboot_settle + Duration::from_secs(1);
                if tokio::time::timeout(wait, reboot_rx.recv()).await.is_err() {
                    warn!("No reboot request after a successful update");
                }
            }
        }

        shutdown.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "Update service task failed");
        }
        result
    })?;

    presenter.clear();
    let reboot_reason = reboot_rx
        .try_recv()
        .unwrap_or_else(|_| config.orchestrator.reboot_reason.clone());

    match outcome(&final_state) {
        Ok(()) => {
            println!("Update applied. A reboot is required to switch slots.");
            if args.simulate {
                println!("Simulated update, not rebooting.");
            } else {
                offer_reboot(&reboot_reason)?;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Start the update and follow it until it settles.
async fn drive(
    handle: &ServiceHandle,
    path: PathBuf,
    interrupt: CancellationToken,
) -> Result<ServiceState, CliError> {
    let mut states = handle.subscribe();
    handle.start(path)?;
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            biased;

            _ = interrupt.cancelled(), if !cancel_sent => {
                cancel_sent = true;
                println!();
                println!("Canceling update...");
                if let Err(e) = handle.cancel().await {
                    warn!(error = %e, "Cancel request refused");
                }
            }

            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(handle.state());
                }
                let state = states.borrow_and_update().clone();
                // Idle is settled too, but it only ends the run after a cancel.
                let done = match state {
                    ServiceState::Idle => cancel_sent,
                    ref other => other.is_settled(),
                };
                if done {
                    return Ok(state);
                }
            }
        }
    }
}

/// Map the settled service state to the command result.
fn outcome(state: &ServiceState) -> Result<(), CliError> {
    match state {
        ServiceState::Updating(snapshot) => match snapshot.state {
            AttemptState::Succeeded => Ok(()),
            AttemptState::Canceled => Err(CliError::UpdateFailed("canceled".to_string())),
            AttemptState::Failed => Err(CliError::UpdateFailed(match snapshot.completion {
                Some(code) => format!("failed: {}", code),
                None => "failed to start".to_string(),
            })),
            other => Err(CliError::UpdateFailed(format!("stopped while {}", other))),
        },
        ServiceState::Idle => Err(CliError::UpdateFailed("canceled".to_string())),
        ServiceState::WaitingForFile { path } => Err(CliError::UpdateFailed(format!(
            "stopped while waiting for {}",
            path.display()
        ))),
        ServiceState::GaveUp { path } => Err(CliError::UpdateFailed(format!(
            "not started: {} never appeared",
            path.display()
        ))),
        ServiceState::Rejected { reason, .. } => {
            Err(CliError::UpdateFailed(format!("rejected: {}", reason)))
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Ask before rebooting into the updated slot.
fn offer_reboot(reason: &str) -> Result<(), CliError> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Reboot now to finish the update?")
        .default(false)
        .interact()
        .map_err(|e| CliError::Config(format!("Failed to get user confirmation: {}", e)))?;

    if !confirmed {
        println!("Reboot later to boot the updated slot.");
        return Ok(());
    }

    info!(reason, "Rebooting");
    let status = Command::new("reboot").arg(reason).status()?;
    if !status.success() {
        return Err(CliError::UpdateFailed(format!(
            "applied, but reboot exited with {}",
            status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use otaflow::orchestrator::{AttemptId, AttemptSnapshot};
    use otaflow::status::ErrorCode;

    fn updating(state: AttemptState, completion: Option<ErrorCode>) -> ServiceState {
        ServiceState::Updating(AttemptSnapshot {
            id: AttemptId::new(1),
            state,
            progress_percent: 100,
            engine_status: None,
            completion,
            source_uri: "file:///data/ota_package/update.zip".to_string(),
        })
    }

    #[test]
    fn test_success_outcome() {
        assert!(outcome(&updating(AttemptState::Succeeded, Some(ErrorCode::SUCCESS))).is_ok());
    }

    #[test]
    fn test_failure_outcome_names_the_code() {
        let err = outcome(&updating(
            AttemptState::Failed,
            Some(ErrorCode::PAYLOAD_HASH_MISMATCH_ERROR),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("PAYLOAD_HASH_MISMATCH_ERROR"));
    }

    #[test]
    fn test_give_up_and_reject_are_errors() {
        let gave_up = ServiceState::GaveUp {
            path: PathBuf::from("/data/ota_package/update.zip"),
        };
        assert!(outcome(&gave_up).unwrap_err().to_string().contains("never appeared"));

        let rejected = ServiceState::Rejected {
            path: PathBuf::from("/tmp/x.zip"),
            reason: "bad archive".to_string(),
        };
        assert!(outcome(&rejected).unwrap_err().to_string().contains("bad archive"));
    }

    #[test]
    fn test_canceled_outcome() {
        let err = outcome(&updating(AttemptState::Canceled, Some(ErrorCode::USER_CANCELED)))
            .unwrap_err();
        assert_eq!(err.to_string(), "update canceled");
        assert!(outcome(&ServiceState::Idle).is_err());
    }

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        let path = Path::new("/data/ota_package/update.zip");
        assert_eq!(absolute(path).unwrap(), path);
        assert!(absolute(Path::new("update.zip")).unwrap().is_absolute());
    }
}
