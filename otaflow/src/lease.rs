//! Power-retention lease held while an update is in flight.
//!
//! The lease keeps the CPU running while the engine writes the inactive
//! slot. It is exclusive and not reference counted: acquiring an already
//! held lease and releasing one that is not held are both no-ops.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Tag the lease is registered under.
pub const DEFAULT_LEASE_NAME: &str = "OTA:CpuKeepRunning";

/// Directory holding the kernel wakelock interface.
pub const DEFAULT_SYSFS_DIR: &str = "/sys/power";

/// Errors that can occur while taking or dropping the lease.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Writing to the wakelock interface failed.
    #[error("failed to write wakelock {name} to {}: {source}", path.display())]
    Write {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An exclusive, non-reference-counted power lease.
pub trait PowerLease: Send {
    /// Tag the lease is registered under.
    fn name(&self) -> &str;

    /// Take the lease. No-op when already held.
    fn acquire(&mut self) -> Result<(), LeaseError>;

    /// Drop the lease. No-op when not held.
    fn release(&mut self) -> Result<(), LeaseError>;

    /// Whether the lease is currently held.
    fn is_held(&self) -> bool;
}

/// Kernel wakelock driven through `wake_lock` / `wake_unlock`.
#[derive(Debug)]
pub struct SysfsWakeLock {
    name: String,
    dir: PathBuf,
    held: bool,
}

impl SysfsWakeLock {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            held: false,
        }
    }

    fn write(&self, file: &str) -> Result<(), LeaseError> {
        let path = self.dir.join(file);
        write_tag(&path, &self.name).map_err(|source| LeaseError::Write {
            name: self.name.clone(),
            path,
            source,
        })
    }
}

impl Default for SysfsWakeLock {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_NAME, DEFAULT_SYSFS_DIR)
    }
}

fn write_tag(path: &Path, tag: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).append(true).open(path)?;
    file.write_all(tag.as_bytes())
}

impl PowerLease for SysfsWakeLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&mut self) -> Result<(), LeaseError> {
        if self.held {
            return Ok(());
        }
        self.write("wake_lock")?;
        self.held = true;
        debug!(lease = %self.name, "Wakelock acquired");
        Ok(())
    }

    fn release(&mut self) -> Result<(), LeaseError> {
        if !self.held {
            return Ok(());
        }
        // Forget the lease even if the kernel refuses; retrying cannot help.
        self.held = false;
        self.write("wake_unlock")?;
        debug!(lease = %self.name, "Wakelock released");
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for SysfsWakeLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release wakelock on drop");
        }
    }
}

/// Lease that only tracks whether it would be held.
#[derive(Debug, Default)]
pub struct NoopLease {
    held: bool,
}

impl NoopLease {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PowerLease for NoopLease {
    fn name(&self) -> &str {
        "noop"
    }

    fn acquire(&mut self) -> Result<(), LeaseError> {
        self.held = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), LeaseError> {
        self.held = false;
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held
    }
}
