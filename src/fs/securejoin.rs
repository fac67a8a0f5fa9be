//! User-space secure join, used when openat2 is not available
//!
//! Walks the untrusted path one component at a time below `root`,
//! expanding symlinks as it goes. `..` never climbs above `root`, and an
//! absolute symlink target is re-rooted at `root` instead of at `/`, so the
//! result always names something inside the subtree.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{CgroupError, Result};

/// Symlink expansions allowed before giving up with ELOOP
const MAX_SYMLINK_EXPANSIONS: u32 = 255;

fn push_components(queue: &mut VecDeque<OsString>, path: &Path) {
    for component in path.components() {
        match component {
            Component::Normal(part) => queue.push_back(part.to_os_string()),
            Component::ParentDir => queue.push_back(OsString::from("..")),
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
        }
    }
}

/// Join `unsafe_path` onto `root` so the result is confined under `root`
pub fn secure_join(root: &Path, unsafe_path: &Path) -> Result<PathBuf> {
    let mut pending = VecDeque::new();
    push_components(&mut pending, unsafe_path);

    let mut current = PathBuf::new();
    let mut expansions = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            current.pop();
            continue;
        }

        let candidate = current.join(&part);
        let full = root.join(&candidate);
        match fs::symlink_metadata(&full) {
            Ok(meta) if meta.file_type().is_symlink() => {
                expansions += 1;
                if expansions > MAX_SYMLINK_EXPANSIONS {
                    return Err(CgroupError::io(
                        "securejoin",
                        full,
                        io::Error::from_raw_os_error(libc::ELOOP),
                    ));
                }
                let target = fs::read_link(&full)
                    .map_err(|e| CgroupError::io("readlink", &full, e))?;
                if target.has_root() {
                    current.clear();
                }
                let mut expanded = VecDeque::new();
                push_components(&mut expanded, &target);
                expanded.extend(pending.drain(..));
                pending = expanded;
            }
            Ok(_) => current = candidate,
            // the tail may not exist yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => current = candidate,
            Err(e) => return Err(CgroupError::io("lstat", full, e)),
        }
    }

    let joined = root.join(&current);
    if !joined.starts_with(root) {
        return Err(CgroupError::OutsideRoot {
            root: root.to_path_buf(),
            path: joined,
        });
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_plain_join() {
        let dir = tempfile::tempdir().unwrap();
        let joined = secure_join(dir.path(), Path::new("a/b/cpu.shares")).unwrap();
        assert_eq!(joined, dir.path().join("a/b/cpu.shares"));
    }

    #[test]
    fn test_dotdot_stops_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let joined = secure_join(dir.path(), Path::new("../../../../etc/passwd")).unwrap();
        assert_eq!(joined, dir.path().join("etc/passwd"));
    }

    #[test]
    fn test_absolute_symlink_is_rerooted() {
        let dir = tempfile::tempdir().unwrap();
        symlink("/etc", dir.path().join("escape")).unwrap();
        let joined = secure_join(dir.path(), Path::new("escape/passwd")).unwrap();
        assert_eq!(joined, dir.path().join("etc/passwd"));
    }

    #[test]
    fn test_relative_symlink_cannot_climb() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        symlink("../../../../..", dir.path().join("sub/up")).unwrap();
        let joined = secure_join(dir.path(), Path::new("sub/up/etc")).unwrap();
        assert_eq!(joined, dir.path().join("etc"));
    }

    #[test]
    fn test_symlink_loop() {
        let dir = tempfile::tempdir().unwrap();
        symlink("b", dir.path().join("a")).unwrap();
        symlink("a", dir.path().join("b")).unwrap();
        assert!(secure_join(dir.path(), Path::new("a")).is_err());
    }
}
