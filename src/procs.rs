//! Process membership: enrolling pids into a group and listing them
//!
//! ```text
//! write_cgroup_proc(dir, pid)
//!   │
//!   ├─ pid == NO_PID ─────────────► Ok (nothing to move)
//!   │
//!   └─ write "<pid>" to dir/cgroup.procs
//!         ├─ Ok ──────────────────► done
//!         ├─ EINVAL ──► sleep, retry (bounded)
//!         └─ other ───────────────► Enroll error
//! ```
//!
//! EINVAL shows up when the process is mid-exit or the group is still
//! being set up, so a few quick retries usually succeed.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use tracing::debug;

use crate::config::Settings;
use crate::error::{CgroupError, Result};
use crate::fs::{Access, ControlFs};
use crate::metrics::ENROLL_RETRIES;

/// Membership file of every group
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// The "no process" sentinel: enrolling it is a no-op
pub const NO_PID: i32 = -1;

/// Enroll `pid` into the group at `dir`
pub fn write_cgroup_proc(fs: &ControlFs, dir: &Path, pid: i32) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(CgroupError::NoDirectory {
            file: CGROUP_PROCS.to_string(),
        });
    }
    if pid == NO_PID {
        return Ok(());
    }

    let mut fd = match fs.open(dir, CGROUP_PROCS, Access::WriteOnly) {
        Ok(fd) => fd,
        Err(CgroupError::Io { source, .. }) => {
            return Err(CgroupError::Enroll {
                pid,
                file: dir.join(CGROUP_PROCS),
                source,
            })
        }
        Err(e) => return Err(e),
    };
    enroll_with(&mut fd, dir, pid, fs.settings())
}

/// Write `pid` to an already opened membership file, retrying EINVAL up to
/// `enroll_attempts` times
fn enroll_with<W: Write>(w: &mut W, dir: &Path, pid: i32, settings: &Settings) -> Result<()> {
    let attempts = settings.enroll_attempts.max(1);
    let data = pid.to_string();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match w.write_all(data.as_bytes()) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if err.raw_os_error() == Some(libc::EINVAL) && attempt < attempts {
            ENROLL_RETRIES.inc();
            debug!(pid, attempt, dir = %dir.display(), "cgroup.procs write returned EINVAL, retrying");
            thread::sleep(settings.enroll_retry_delay());
            continue;
        }

        return Err(CgroupError::Enroll {
            pid,
            file: dir.join(CGROUP_PROCS),
            source: err,
        });
    }
}

/// Parse the content of a cgroup.procs file
pub fn parse_pids(content: &str) -> Result<Vec<i32>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<i32>().map_err(|e| CgroupError::Parse {
                value: line.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Pids listed directly in `dir`
pub fn get_pids(fs: &ControlFs, dir: &Path) -> Result<Vec<i32>> {
    parse_pids(&fs.read(dir, CGROUP_PROCS)?)
}

/// Pids in `dir` and every group below it
pub fn get_all_pids(fs: &ControlFs, dir: &Path) -> Result<Vec<i32>> {
    let mut pids = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        if current.join(CGROUP_PROCS).is_file() {
            pids.extend(get_pids(fs, &current)?);
        }
        let entries =
            std::fs::read_dir(&current).map_err(|e| CgroupError::io("readdir", &current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CgroupError::io("readdir", &current, e))?;
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir())
                .map_err(|e| CgroupError::io("stat", entry.path(), e))?;
            if is_dir {
                pending.push(entry.path());
            }
        }
    }
    Ok(pids)
}

/// Enroll `pid` into every existing group of `paths`; the first failure aborts
pub fn enter_pid(fs: &ControlFs, paths: &BTreeMap<String, PathBuf>, pid: i32) -> Result<()> {
    for path in paths.values() {
        match std::fs::metadata(path) {
            Ok(_) => write_cgroup_proc(fs, path, pid)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(CgroupError::io("stat", path, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        write_cgroup_proc(&fs, dir.path(), 1234).unwrap();
        assert_eq!(fs.read(dir.path(), CGROUP_PROCS).unwrap(), "1234");
    }

    #[test]
    fn test_sentinel_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        write_cgroup_proc(&fs, dir.path(), NO_PID).unwrap();
        assert!(!dir.path().join(CGROUP_PROCS).exists());
    }

    #[test]
    fn test_empty_dir_rejected() {
        let fs = ControlFs::emulated();
        let err = write_cgroup_proc(&fs, Path::new(""), 1).unwrap_err();
        assert!(matches!(err, CgroupError::NoDirectory { .. }));
    }

    #[test]
    fn test_missing_group_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::default();
        let err = write_cgroup_proc(&fs, &dir.path().join("gone"), 1).unwrap_err();
        assert!(matches!(err, CgroupError::Enroll { pid: 1, .. }));
        assert!(err.to_string().contains("gone/cgroup.procs"));
    }

    /// Membership file that rejects the first `failures` writes with EINVAL
    struct Busy {
        failures: u32,
        calls: u32,
        written: Vec<u8>,
    }

    impl Busy {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: 0,
                written: Vec::new(),
            }
        }
    }

    impl Write for Busy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls <= self.failures {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn quick_settings() -> Settings {
        Settings {
            enroll_retry_delay_ms: 0,
            ..Settings::emulated()
        }
    }

    #[test]
    fn test_einval_retries_then_succeeds() {
        let mut w = Busy::new(2);
        enroll_with(&mut w, Path::new("/g"), 77, &quick_settings()).unwrap();
        assert_eq!(w.calls, 3);
        assert_eq!(w.written, b"77");
    }

    #[test]
    fn test_einval_gives_up_after_attempts() {
        let mut w = Busy::new(u32::MAX);
        let settings = quick_settings();
        let err = enroll_with(&mut w, Path::new("/g"), 77, &settings).unwrap_err();
        assert_eq!(w.calls, settings.enroll_attempts);
        assert_eq!(w.calls, 5);
        match err {
            CgroupError::Enroll { pid, file, source } => {
                assert_eq!(pid, 77);
                assert_eq!(file, Path::new("/g/cgroup.procs"));
                assert_eq!(source.raw_os_error(), Some(libc::EINVAL));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("1\n22\n\n333\n").unwrap(), vec![1, 22, 333]);
        assert!(parse_pids("1\nabc\n").is_err());
        assert!(parse_pids("").unwrap().is_empty());
    }

    #[test]
    fn test_get_all_pids_walks_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        let child = dir.path().join("a/b");
        fs.create_dir(&child).unwrap();
        fs.write(dir.path(), CGROUP_PROCS, "1\n2\n").unwrap();
        fs.write(&child, CGROUP_PROCS, "3\n").unwrap();

        let mut pids = get_all_pids(&fs, dir.path()).unwrap();
        pids.sort();
        assert_eq!(pids, vec![1, 2, 3]);
    }

    #[test]
    fn test_enter_pid_skips_missing_groups() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        let present = dir.path().join("cpu");
        fs.create_dir(&present).unwrap();

        let mut paths = BTreeMap::new();
        paths.insert("cpu".to_string(), present.clone());
        paths.insert("freezer".to_string(), dir.path().join("freezer"));

        enter_pid(&fs, &paths, 42).unwrap();
        assert_eq!(fs.read(&present, CGROUP_PROCS).unwrap(), "42");
        assert!(!dir.path().join("freezer").exists());
    }
}
