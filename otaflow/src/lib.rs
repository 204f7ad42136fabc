//! otaflow - A/B over-the-air update orchestration
//!
//! This library drives a device update engine through one update attempt:
//! it locates the payload inside an update package, waits for the package
//! to appear, holds a power lease while the engine applies it, and projects
//! engine status onto a user-facing presentation surface.
//!
//! ```text
//! package::parse ──► UpdatePackageDescriptor
//!                            │
//! ReadinessPoller ──► UpdateService ──► UpdateOrchestrator ──► UpdateEngine
//!                                              │
//!                                       StatusProjector ──► Presenter
//! ```

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod lease;
pub mod logging;
pub mod orchestrator;
pub mod package;
pub mod poller;
pub mod presentation;
pub mod projector;
pub mod service;
pub mod status;
pub mod store;

/// Version of the otaflow library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
