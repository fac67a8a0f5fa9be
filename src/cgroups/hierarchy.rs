//! Ancestor bootstrap for cpuset groups
//!
//! The kernel refuses to run a task in a cpuset group whose `cpuset.cpus`
//! or `cpuset.mems` is empty, and a new group starts out empty. Every
//! directory between the hierarchy root and a new group is therefore
//! created and seeded from its own parent, outermost first:
//!
//! ```text
//! root/                     cpus=0-7  mems=0      (assumed populated)
//! └── a/                    ← created, copied from root
//!     └── b/                ← created, copied from a
//!         └── target/       ← created by the driver, copied from b
//! ```

use std::path::Path;

use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;
use crate::path::lexical_clean;

pub const CPUSET_CPUS: &str = "cpuset.cpus";
pub const CPUSET_MEMS: &str = "cpuset.mems";

/// A fresh group reports an empty list or a lone newline
fn is_empty_cpuset(value: &str) -> bool {
    value.is_empty() || value == "\n"
}

fn read_cpus_and_mems(fs: &ControlFs, dir: &Path) -> Result<(String, String)> {
    let cpus = fs.read(dir, CPUSET_CPUS)?;
    let mems = fs.read(dir, CPUSET_MEMS)?;
    Ok((cpus, mems))
}

/// Create `current` and every missing ancestor below `root`, seeding each
/// from its parent.
pub fn ensure_parent(fs: &ControlFs, current: &Path, root: &Path) -> Result<()> {
    let outside = || CgroupError::OutsideRoot {
        root: root.to_path_buf(),
        path: current.to_path_buf(),
    };
    // no parent: `current` is "/" or empty, and root was never reached
    let parent = current.parent().ok_or_else(outside)?;
    if lexical_clean(parent) == lexical_clean(root) {
        return Ok(());
    }
    if parent == current {
        return Err(outside());
    }

    ensure_parent(fs, parent, root)?;
    fs.create_dir(current)?;
    copy_if_needed(fs, current, parent)
}

/// Copy `cpuset.cpus` / `cpuset.mems` from `parent` into `current` where
/// `current` has none.
pub fn copy_if_needed(fs: &ControlFs, current: &Path, parent: &Path) -> Result<()> {
    let (current_cpus, current_mems) = read_cpus_and_mems(fs, current)?;
    let (parent_cpus, parent_mems) = read_cpus_and_mems(fs, parent)?;

    if is_empty_cpuset(&current_cpus) {
        fs.write(current, CPUSET_CPUS, &parent_cpus)?;
    }
    if is_empty_cpuset(&current_mems) {
        fs.write(current, CPUSET_MEMS, &parent_mems)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty_cpuset() {
        assert!(is_empty_cpuset(""));
        assert!(is_empty_cpuset("\n"));
        assert!(!is_empty_cpuset("0-3\n"));
    }

    #[test]
    fn test_ensure_parent_seeds_every_level() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        let mountpoint = dir.path().join("cpuset");
        fs.create_dir(&mountpoint).unwrap();
        fs.write(&mountpoint, CPUSET_CPUS, "0-3\n").unwrap();
        fs.write(&mountpoint, CPUSET_MEMS, "0\n").unwrap();

        let target_parent = mountpoint.join("a/b");
        ensure_parent(&fs, &target_parent, dir.path()).unwrap();

        for level in [mountpoint.join("a"), mountpoint.join("a/b")] {
            assert_eq!(fs.read(&level, CPUSET_CPUS).unwrap(), "0-3\n");
            assert_eq!(fs.read(&level, CPUSET_MEMS).unwrap(), "0\n");
        }
    }

    #[test]
    fn test_copy_keeps_existing_values() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        let child = dir.path().join("child");
        fs.create_dir(&child).unwrap();
        fs.write(dir.path(), CPUSET_CPUS, "0-7").unwrap();
        fs.write(dir.path(), CPUSET_MEMS, "0-1").unwrap();
        fs.write(&child, CPUSET_CPUS, "2").unwrap();

        copy_if_needed(&fs, &child, dir.path()).unwrap();
        assert_eq!(fs.read(&child, CPUSET_CPUS).unwrap(), "2");
        assert_eq!(fs.read(&child, CPUSET_MEMS).unwrap(), "0-1");
    }

    #[test]
    fn test_ensure_parent_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        let err = ensure_parent(&fs, Path::new("/elsewhere/x"), dir.path()).unwrap_err();
        assert!(matches!(err, CgroupError::OutsideRoot { .. }));
    }
}
