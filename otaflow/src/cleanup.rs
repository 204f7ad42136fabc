//! Removal of consumed update packages.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// What a [`purge_tree`] call removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub files: usize,
    pub dirs: usize,
    /// Entries that could not be removed.
    pub failures: usize,
}

/// Delete `root` and everything below it.
///
/// Traverses depth-first with an explicit work list, so directory depth is
/// not limited by the call stack. Symlinks are removed, never followed.
/// Individual removal failures are counted and logged; the walk continues.
///
/// # Errors
///
/// Only if `root` itself cannot be inspected. A missing `root` is not an
/// error and yields empty stats.
pub fn purge_tree(root: &Path) -> io::Result<PurgeStats> {
    let mut stats = PurgeStats::default();

    let meta = match fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
        Err(e) => return Err(e),
    };
    if !meta.is_dir() {
        remove_file(root, &mut stats);
        return Ok(stats);
    }

    // (path, children already pushed)
    let mut work: Vec<(PathBuf, bool)> = vec![(root.to_path_buf(), false)];
    while let Some((dir, expanded)) = work.pop() {
        if expanded {
            match fs::remove_dir(&dir) {
                Ok(()) => stats.dirs += 1,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to remove directory");
                    stats.failures += 1;
                }
            }
            continue;
        }

        work.push((dir.clone(), true));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to list directory");
                stats.failures += 1;
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => work.push((path, false)),
                _ => remove_file(&path, &mut stats),
            }
        }
    }

    debug!(root = %root.display(), files = stats.files, dirs = stats.dirs, "Purged tree");
    Ok(stats)
}

fn remove_file(path: &Path, stats: &mut PurgeStats) {
    match fs::remove_file(path) {
        Ok(()) => stats.files += 1,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
            stats.failures += 1;
        }
    }
}
