//! Long-running update service.
//!
//! [`UpdateService`] ties the [`ReadinessPoller`](crate::poller::ReadinessPoller)
//! to the [`UpdateOrchestrator`](crate::orchestrator::UpdateOrchestrator):
//! a start request waits for the package file, parses it off the async
//! runtime and hands the descriptor to the orchestrator. Observers follow
//! progress through [`ServiceHandle::subscribe`].
//!
//! # Example
//!
//! ```ignore
//! let (service, handle) = UpdateService::new(ServiceConfig::from(&file), deps);
//! let shutdown = CancellationToken::new();
//! tokio::spawn(service.run(shutdown.clone()));
//!
//! handle.start("/data/ota_package/update.zip")?;
//! ```

mod config;
mod daemon;
mod error;

pub use config::{ServiceConfig, ServiceDeps};
pub use daemon::{ServiceCommand, ServiceHandle, ServiceState, UpdateService};
pub use error::{ServiceError, ServiceResult};
