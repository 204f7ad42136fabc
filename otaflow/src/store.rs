//! Durable "update in progress" flag.
//!
//! The orchestrator writes [`UPDATING`] once the engine reports an update
//! is available and [`NOT_UPDATING`] when the attempt completes. The flag
//! survives process restarts so a later launch can refuse to start a second
//! attempt on top of an unfinished one.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Default key the flag is stored under.
pub const DEFAULT_STATE_KEY: &str = "ota.update.starting";

/// Flag value while an update is being applied.
pub const UPDATING: i32 = 1;

/// Flag value when no update is in progress.
pub const NOT_UPDATING: i32 = 0;

const STATE_SECTION: &str = "state";
const UPDATED_AT_SUFFIX: &str = ".updated_at";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing durable state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to write state file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state value {key}={value} is not an integer")]
    NotAnInteger { key: String, value: String },
}

/// Integer key/value storage that survives restarts.
pub trait StatusStore: Send + Sync {
    /// Read `key`, falling back to `default` when it was never written.
    fn get_int(&self, key: &str, default: i32) -> StoreResult<i32>;

    /// Write `key`.
    fn put_int(&self, key: &str, value: i32) -> StoreResult<()>;
}

/// [`StatusStore`] backed by an INI file.
///
/// Every write also records the time it happened under
/// `<key>.updated_at` so `otaflow status` can show when the flag changed.
#[derive(Debug)]
pub struct IniStatusStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IniStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default location under the user's local data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("otaflow")
            .join("state.ini")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When `key` was last written, as RFC 3339.
    pub fn updated_at(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock();
        let ini = self.load()?;
        Ok(ini
            .section(Some(STATE_SECTION))
            .and_then(|s| s.get(&format!("{key}{UPDATED_AT_SUFFIX}")))
            .map(str::to_string))
    }

    fn load(&self) -> StoreResult<Ini> {
        if !self.path.exists() {
            return Ok(Ini::new());
        }
        Ini::load_from_file(&self.path).map_err(|e| StoreError::Read {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

impl StatusStore for IniStatusStore {
    fn get_int(&self, key: &str, default: i32) -> StoreResult<i32> {
        let _guard = self.lock.lock();
        let ini = self.load()?;
        match ini.section(Some(STATE_SECTION)).and_then(|s| s.get(key)) {
            Some(value) => value.trim().parse().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn put_int(&self, key: &str, value: i32) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let mut ini = self.load()?;
        let now = chrono::Local::now().to_rfc3339();
        ini.with_section(Some(STATE_SECTION))
            .set(key, value.to_string())
            .set(format!("{key}{UPDATED_AT_SUFFIX}"), now);

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        ini.write_to_file(&self.path).map_err(write_err)?;
        debug!(key, value, path = %self.path.display(), "State flag written");
        Ok(())
    }
}

/// In-memory [`StatusStore`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    values: Mutex<HashMap<String, i32>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get_int(&self, key: &str, default: i32) -> StoreResult<i32> {
        Ok(self.values.lock().get(key).copied().unwrap_or(default))
    }

    fn put_int(&self, key: &str, value: i32) -> StoreResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}
