//! Mount discovery and layout probes
//!
//! Two facts about the host are probed once and memoized for the life of
//! the process:
//! - whether `/sys/fs/cgroup` is a unified (cgroup2) mount
//! - where the control-tree root is (the ControlTreeRoot)
//!
//! Everything else here parses the kernel's text interfaces:
//!
//! ```text
//! /proc/self/mountinfo   36 35 0:30 / /sys/fs/cgroup/cpu rw - cgroup cgroup rw,cpu
//! /proc/cgroups          #subsys_name  hierarchy  num_cgroups  enabled
//! /proc/<pid>/cgroup     4:cpu,cpuacct:/user.slice
//! cgroup.controllers     cpuset cpu io memory pids
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lazy_static::lazy_static;
use nix::errno::Errno;
use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC};
use tracing::{debug, warn};

use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;

/// Where the control tree is mounted
pub const CGROUPFS_DIR: &str = "/sys/fs/cgroup";

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";
const PROC_CGROUPS_PATH: &str = "/proc/cgroups";

lazy_static! {
    static ref CGROUP2_UNIFIED: bool = probe_unified_mode();
    static ref CGROUP_ROOT: Mutex<Option<PathBuf>> = Mutex::new(None);
}

fn probe_unified_mode() -> bool {
    match statfs(CGROUPFS_DIR) {
        Ok(st) => st.filesystem_type() == CGROUP2_SUPER_MAGIC,
        Err(Errno::ENOENT) => {
            debug!(path = CGROUPFS_DIR, "cgroupfs missing, assuming cgroup v1");
            false
        }
        Err(e) => {
            warn!(path = CGROUPFS_DIR, error = %e, "cannot statfs cgroup root, assuming cgroup v1");
            false
        }
    }
}

/// True when the host uses the unified (single mountpoint) layout
pub fn is_cgroup2_unified_mode() -> bool {
    *CGROUP2_UNIFIED
}

/// One line of /proc/self/mountinfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub mountpoint: PathBuf,
    pub root: PathBuf,
    pub fstype: String,
    pub source: String,
    pub super_options: String,
}

/// Decode the octal escapes (`\040` for space, ...) mountinfo uses
/// Value of a three-digit octal escape such as `040`
fn octal_byte(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, &d| match d {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add(d - b'0'),
        _ => None,
    })
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Some(byte) = octal_byte(&bytes[i + 1..i + 4]) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_mountinfo_line(line: &str) -> Result<Mount> {
    let malformed = || CgroupError::Parse {
        value: line.to_string(),
        reason: "malformed mountinfo line".to_string(),
    };

    let (left, right) = line.split_once(" - ").ok_or_else(malformed)?;
    let left: Vec<&str> = left.split_whitespace().collect();
    let right: Vec<&str> = right.split_whitespace().collect();
    if left.len() < 5 || right.is_empty() {
        return Err(malformed());
    }

    Ok(Mount {
        root: PathBuf::from(unescape(left[3])),
        mountpoint: PathBuf::from(unescape(left[4])),
        fstype: right[0].to_string(),
        source: right.get(1).map(|s| unescape(s)).unwrap_or_default(),
        super_options: right.get(2).map(|s| s.to_string()).unwrap_or_default(),
    })
}

/// Parse mountinfo-formatted text
pub fn parse_mountinfo<R: BufRead>(reader: R) -> Result<Vec<Mount>> {
    let mut mounts = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io("read", MOUNTINFO_PATH, e))?;
        if line.trim().is_empty() {
            continue;
        }
        mounts.push(parse_mountinfo_line(&line)?);
    }
    Ok(mounts)
}

/// All mounts visible to this process
pub fn get_mounts() -> Result<Vec<Mount>> {
    let file = File::open(MOUNTINFO_PATH).map_err(|e| CgroupError::io("open", MOUNTINFO_PATH, e))?;
    parse_mountinfo(BufReader::new(file))
}

/// The mountpoint `dir` lives on: the longest mountpoint that is an
/// ancestor of `dir`. Ties go to the record seen first.
pub fn find_mountpoint(dir: &Path, mounts: &[Mount]) -> Result<PathBuf> {
    let mut best: Option<&Mount> = None;
    for mount in mounts.iter().filter(|m| dir.starts_with(&m.mountpoint)) {
        let longer = best.map_or(true, |b| {
            mount.mountpoint.as_os_str().len() > b.mountpoint.as_os_str().len()
        });
        if longer {
            best = Some(mount);
        }
    }
    best.map(|m| m.mountpoint.clone())
        .ok_or_else(|| CgroupError::MountNotFound(dir.to_path_buf()))
}

/// Pick the control-tree root from a legacy mount table: the parent of the
/// first per-controller cgroup mount.
pub fn select_cgroup_root(mounts: &[Mount]) -> Option<PathBuf> {
    mounts
        .iter()
        .find(|m| m.fstype == "cgroup")
        .and_then(|m| m.mountpoint.parent())
        .map(Path::to_path_buf)
}

/// The control-tree root, memoized after the first successful probe
pub fn cgroup_root() -> Result<PathBuf> {
    let mut cached = CGROUP_ROOT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(root) = cached.as_ref() {
        return Ok(root.clone());
    }

    let root = if is_cgroup2_unified_mode() {
        PathBuf::from(CGROUPFS_DIR)
    } else {
        let mounts = get_mounts()?;
        select_cgroup_root(&mounts)
            .ok_or_else(|| CgroupError::MountNotFound(PathBuf::from(CGROUPFS_DIR)))?
    };
    debug!(root = %root.display(), "resolved cgroup root");
    *cached = Some(root.clone());
    Ok(root)
}

/// Controller names listed in a unified `cgroup.controllers` file, plus
/// the controllers cgroup2 implements without a file of their own.
pub fn parse_unified_controllers(data: &str) -> Vec<String> {
    let mut subsystems = vec!["devices".to_string(), "freezer".to_string()];
    subsystems.extend(data.split_whitespace().map(String::from));
    subsystems
}

/// Enabled controllers from /proc/cgroups-formatted text
pub fn parse_proc_cgroups<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut subsystems = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io("read", PROC_CGROUPS_PATH, e))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 4 && parts[3] != "0" {
            subsystems.push(parts[0].to_string());
        }
    }
    Ok(subsystems)
}

/// Every controller available on this host
pub fn get_all_subsystems(fs: &ControlFs) -> Result<Vec<String>> {
    if is_cgroup2_unified_mode() {
        let data = fs.read(Path::new(CGROUPFS_DIR), "cgroup.controllers")?;
        return Ok(parse_unified_controllers(&data));
    }
    let file =
        File::open(PROC_CGROUPS_PATH).map_err(|e| CgroupError::io("open", PROC_CGROUPS_PATH, e))?;
    parse_proc_cgroups(BufReader::new(file))
}

/// Parse /proc/<pid>/cgroup-formatted text into controller -> path
pub fn parse_cgroup_from_reader<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut cgroups = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io("read", "cgroup file", e))?;
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() < 3 {
            return Err(CgroupError::Parse {
                value: line.clone(),
                reason: "invalid cgroup entry: must contain at least two colons".to_string(),
            });
        }
        for subsystem in parts[1].split(',') {
            cgroups.insert(subsystem.to_string(), parts[2].to_string());
        }
    }
    Ok(cgroups)
}

/// Parse a /proc/<pid>/cgroup file
pub fn parse_cgroup_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| CgroupError::io("open", path, e))?;
    parse_cgroup_from_reader(BufReader::new(file))
}
