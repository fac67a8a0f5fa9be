//! Lexical path handling for control-group locations
//!
//! Caller-supplied names, parents and paths are untrusted. Every one of them
//! is cleaned as if it were rooted at `/` before being placed under a
//! controller root, so `..` segments collapse at that root instead of
//! walking out of it:
//!
//! ```text
//!   root  = /sys/fs/cgroup/cpu
//!   path  = ../../../../etc
//!   inner = /etc                      (cleaned, rooted)
//!   full  = /sys/fs/cgroup/cpu/etc    (always below root)
//! ```
//!
//! `resolve()` then walks the inner path on disk with `secure_join`, so a
//! symlink inside the controller root is expanded below that root too.
//! An absolute link target is re-rooted at the controller root and a
//! relative one cannot climb above it.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::config::CgroupConfig;
use crate::error::{CgroupError, Result};
use crate::fs::securejoin::secure_join;

/// Lexically clean a path: drop `.`, collapse `..`, squash separators.
///
/// `..` at the root of an absolute path is dropped; leading `..` in a
/// relative path is kept. An empty result becomes `.`.
pub fn lexical_clean(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let absolute = path.has_root();
    let parent = OsStr::new("..");
    let mut parts: Vec<&OsStr> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().map_or(false, |last| *last != parent) {
                    parts.pop();
                } else if !absolute {
                    parts.push(parent);
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    let mut out = if absolute {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    for part in parts {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Clean a possibly hostile path so it can never start with `..`.
///
/// Absolute paths are cleaned normally. Relative paths are cleaned as if
/// they were rooted at `/` and then made relative again. An empty path
/// stays empty.
pub fn clean_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return PathBuf::new();
    }

    let cleaned = lexical_clean(path);
    if cleaned.has_root() {
        return cleaned;
    }

    let rooted = lexical_clean(Path::new("/").join(&cleaned));
    match rooted.strip_prefix("/") {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Clean `path` and anchor it at `/`
fn rooted(path: &Path) -> PathBuf {
    lexical_clean(Path::new("/").join(path))
}

/// Append the normal components of `tail` to `base`.
///
/// Unlike `PathBuf::join`, an absolute `tail` does not replace `base`.
fn append_components(base: &Path, tail: &Path) -> PathBuf {
    let mut out = base.to_path_buf();
    for component in tail.components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

/// A control group location: a controller root plus a path below it
///
/// The inner path is stored cleaned and rooted, so `resolve()` is always a
/// descendant of (or equal to) the controller root, symlinks included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlGroupPath {
    root: PathBuf,
    inner: PathBuf,
}

impl ControlGroupPath {
    pub fn new(root: impl AsRef<Path>, inner: impl AsRef<Path>) -> Result<Self> {
        let group = Self {
            root: lexical_clean(root),
            inner: rooted(inner.as_ref()),
        };
        let full = append_components(&group.root, &group.inner);
        if !full.starts_with(&group.root) {
            return Err(CgroupError::OutsideRoot {
                root: group.root,
                path: full,
            });
        }
        group.resolve()?;
        Ok(group)
    }

    /// Build from a name/parent/path triple.
    ///
    /// `path` wins when set; otherwise the group is `parent` joined with
    /// `name`, each cleaned on its own first.
    pub fn from_config(root: impl AsRef<Path>, config: &CgroupConfig) -> Result<Self> {
        let inner = if !config.path.is_empty() {
            clean_path(&config.path)
        } else {
            let parent = clean_path(&config.parent);
            let name = clean_path(&config.name);
            append_components(&parent, &name)
        };
        Self::new(root, inner)
    }

    /// Controller root this group lives under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Group path relative to the controller root, always starting with `/`
    pub fn inner(&self) -> &Path {
        &self.inner
    }

    /// Absolute directory of the group.
    ///
    /// Symlinks met on the way are expanded with the controller root as
    /// `/`. The tree can change between calls, so callers resolve again
    /// before each operation instead of caching the result.
    pub fn resolve(&self) -> Result<PathBuf> {
        secure_join(&self.root, &self.inner)
    }
}
