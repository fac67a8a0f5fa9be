//! Recursive removal of control-group directories
//!
//! A group directory can only be removed with rmdir(2) once it has no
//! child groups and no member processes. Control files inside it are not
//! real files and need no unlinking, so removal is rmdir bottom-up:
//!
//! ```text
//! remove_path(p)
//!   rmdir(p) ── ok / ENOENT ──► done
//!      │ fails
//!      ▼
//!   for each subdirectory c: remove_path(c)
//!   rmdir(p)
//! ```
//!
//! `remove_paths` repeats that over a set of groups with exponential
//! backoff, since a group whose last process is still exiting reports EBUSY
//! for a short while.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{error, warn};

use crate::config::Settings;
use crate::error::{CgroupError, Result};
use crate::metrics::REMOVE_FAILURES;

fn rmdir(path: &Path) -> io::Result<()> {
    match fs::remove_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Remove the group at `path` and every group below it.
///
/// An absent path is success.
pub fn remove_path(path: &Path) -> Result<()> {
    if rmdir(path).is_ok() {
        return Ok(());
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CgroupError::io("readdir", path, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| CgroupError::io("readdir", path, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            remove_path(&entry.path())?;
        }
    }

    rmdir(path).map_err(|e| CgroupError::io("rmdir", path, e))
}

/// Remove every group in `paths`, retrying with backoff.
///
/// Entries that are confirmed gone are dropped from `paths` as they go, so
/// on failure the map holds exactly the groups still present, which are
/// also named in the returned error.
pub fn remove_paths(paths: &mut BTreeMap<String, PathBuf>, settings: &Settings) -> Result<()> {
    let attempts = settings.remove_attempts.max(1);
    let mut delay = settings.remove_initial_delay();

    for round in 0..attempts {
        if round != 0 {
            thread::sleep(delay);
            delay *= 2;
        }

        let mut gone = Vec::new();
        for (name, path) in paths.iter() {
            if let Err(e) = remove_path(path) {
                if round == 0 {
                    warn!(name = %name, path = %path.display(), error = %e, "failed to remove cgroup (will retry)");
                } else if round == attempts - 1 {
                    error!(name = %name, path = %path.display(), error = %e, "failed to remove cgroup");
                }
            }
            if let Err(e) = fs::metadata(path) {
                if e.kind() == io::ErrorKind::NotFound {
                    gone.push(name.clone());
                }
            }
        }
        for name in gone {
            paths.remove(&name);
        }
        if paths.is_empty() {
            return Ok(());
        }
    }

    REMOVE_FAILURES.inc_by(paths.len() as u64);
    Err(CgroupError::RemoveFailed {
        paths: paths.clone(),
    })
}
