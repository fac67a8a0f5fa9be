//! Error type shared by every control-tree operation
//!
//! Errors carry enough context (path, file, attempted value) for a caller
//! to diagnose a failure without re-deriving state.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CgroupError>;

/// Error type for control-tree operations
#[derive(Debug)]
pub enum CgroupError {
    /// A file operation was attempted without a directory
    NoDirectory { file: String },
    /// The "no process" sentinel was passed where a real pid is required
    NoProcess,
    /// A resolved path would leave its root
    OutsideRoot { root: PathBuf, path: PathBuf },
    /// A filesystem call failed
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    /// Writing a value into a control file failed
    Write {
        data: String,
        path: PathBuf,
        source: io::Error,
    },
    /// A value read or supplied as text could not be parsed
    Parse { value: String, reason: String },
    /// A line is not of the form "key value"
    InvalidKeyValue { line: String },
    /// The kernel reported a freezer state we don't know
    UnknownFreezerState(String),
    /// A desired freezer state string is not FROZEN, THAWED or empty
    InvalidFreezerState(String),
    /// The kernel raised cpu.shares to this value
    MinShares(u64),
    /// The kernel lowered cpu.shares to this value
    MaxShares(u64),
    /// Writing a pid into the membership file failed
    Enroll {
        pid: i32,
        file: PathBuf,
        source: io::Error,
    },
    /// No mount record covers the given directory
    MountNotFound(PathBuf),
    /// Some paths were still present after every removal round
    RemoveFailed { paths: BTreeMap<String, PathBuf> },
    /// The freezer did not settle within the configured timeout
    FreezerTimeout { path: PathBuf, state: String },
    /// The controller does not implement the requested operation
    Unsupported {
        controller: &'static str,
        op: &'static str,
    },
}

impl CgroupError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CgroupError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    fn os_error(&self) -> Option<&io::Error> {
        match self {
            CgroupError::Io { source, .. }
            | CgroupError::Write { source, .. }
            | CgroupError::Enroll { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The underlying OS error says the file or directory does not exist
    pub fn is_not_found(&self) -> bool {
        self.os_error()
            .map(|e| e.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
    }

    /// The underlying OS error is ENODEV (the group went away under us)
    pub fn is_no_device(&self) -> bool {
        self.os_error()
            .and_then(io::Error::raw_os_error)
            .map(|code| code == libc::ENODEV)
            .unwrap_or(false)
    }
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::NoDirectory { file } => write!(f, "no directory specified for {}", file),
            CgroupError::NoProcess => write!(f, "a real process id is required"),
            CgroupError::OutsideRoot { root, path } => write!(
                f,
                "cgroup path {} is outside cgroup root {}",
                path.display(),
                root.display()
            ),
            CgroupError::Io { op, path, source } => {
                write!(f, "{} {}: {}", op, path.display(), source)
            }
            CgroupError::Write { data, path, source } => {
                write!(f, "failed to write {:?} to {}: {}", data, path.display(), source)
            }
            CgroupError::Parse { value, reason } => {
                write!(f, "unable to parse {:?}: {}", value, reason)
            }
            CgroupError::InvalidKeyValue { line } => {
                write!(f, "line is not a valid key value format: {:?}", line)
            }
            CgroupError::UnknownFreezerState(state) => {
                write!(f, "unknown freezer.state {:?}", state)
            }
            CgroupError::InvalidFreezerState(state) => {
                write!(f, "invalid argument '{}' to freezer.state", state)
            }
            CgroupError::MinShares(v) => write!(f, "the minimum allowed cpu-shares is {}", v),
            CgroupError::MaxShares(v) => write!(f, "the maximum allowed cpu-shares is {}", v),
            CgroupError::Enroll { pid, file, source } => {
                write!(f, "failed to write {} to {}: {}", pid, file.display(), source)
            }
            CgroupError::MountNotFound(dir) => {
                write!(f, "can't find mount point of {}", dir.display())
            }
            CgroupError::RemoveFailed { paths } => {
                let listed: Vec<String> = paths
                    .iter()
                    .map(|(name, path)| format!("{}:{}", name, path.display()))
                    .collect();
                write!(f, "failed to remove paths: [{}]", listed.join(" "))
            }
            CgroupError::FreezerTimeout { path, state } => write!(
                f,
                "freezer at {} did not reach {} in time",
                path.display(),
                state
            ),
            CgroupError::Unsupported { controller, op } => {
                write!(f, "{} controller does not support {}", controller, op)
            }
        }
    }
}

impl std::error::Error for CgroupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.os_error()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
