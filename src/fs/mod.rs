//! Hardened access to control files
//!
//! Every driver reads and writes control files through `ControlFs`. A file
//! name is never simply joined onto a directory:
//!
//! ```text
//! open(dir, file)
//!   │
//!   ├─ dir under /sys/fs/cgroup and openat2 usable?
//!   │     └─ yes ──► openat2(root_fd, rel/file, RESOLVE_BENEATH | ...)
//!   │
//!   └─ otherwise ──► secure_join(dir, file) ──► open(2)
//! ```
//!
//! Both routes guarantee the opened file lives inside the directory's
//! subtree, even when `file` carries `..` segments or the tree contains
//! symlinks.

mod openat2;
pub mod securejoin;

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Read, Write};
use std::num::IntErrorKind;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::error::{CgroupError, Result};
use crate::metrics::{SECURE_JOIN_FALLBACKS, WRITE_INTERRUPTS};
use crate::mounts::CGROUPFS_DIR;

pub use securejoin::secure_join;

/// How a control file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
}

impl Access {
    fn flags(self) -> i32 {
        match self {
            Access::ReadOnly => libc::O_RDONLY,
            Access::WriteOnly => libc::O_WRONLY,
        }
    }
}

/// Secure file accessor for the control tree
///
/// Cheap to clone; every driver holds its own copy.
#[derive(Debug, Clone, Default)]
pub struct ControlFs {
    settings: Arc<Settings>,
}

impl ControlFs {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Accessor over a plain directory tree (see `Settings::emulated`)
    pub fn emulated() -> Self {
        Self::new(Settings::emulated())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ═══════════════════════════════════════════════════════════════════════
    // open(dir, file, access) - open a control file without escaping dir
    // ═══════════════════════════════════════════════════════════════════════
    // Paths under /sys/fs/cgroup go through openat2 when the kernel has it;
    // anything else (or an older kernel) goes through secure_join.
    // ═══════════════════════════════════════════════════════════════════════
    pub fn open(&self, dir: &Path, file: &str, access: Access) -> Result<File> {
        if dir.as_os_str().is_empty() {
            return Err(CgroupError::NoDirectory {
                file: file.to_string(),
            });
        }

        let create = self.settings.emulate_cgroupfs && access == Access::WriteOnly;
        let mut flags = access.flags();
        if create {
            flags |= libc::O_CREAT | libc::O_TRUNC;
        }

        if let Ok(reldir) = dir.strip_prefix(CGROUPFS_DIR) {
            if let Some(handle) = openat2::cgroupfs_handle() {
                let relname = reldir.join(file);
                return handle
                    .open(&relname, flags, 0o644)
                    .map_err(|e| CgroupError::io("openat2", dir.join(file), e));
            }
        }

        SECURE_JOIN_FALLBACKS.inc();
        let path = secure_join(dir, Path::new(file))?;
        OpenOptions::new()
            .read(access == Access::ReadOnly)
            .write(access == Access::WriteOnly)
            .create(create)
            .truncate(create)
            .mode(0o644)
            .open(&path)
            .map_err(|e| CgroupError::io("open", path, e))
    }

    /// Write `data` to a control file, retrying interrupted writes
    pub fn write(&self, dir: &Path, file: &str, data: &str) -> Result<()> {
        let mut fd = self.open(dir, file, Access::WriteOnly)?;
        retrying_write(&mut fd, data.as_bytes()).map_err(|e| CgroupError::Write {
            data: data.to_string(),
            path: dir.join(file),
            source: e,
        })
    }

    /// Read the whole content of a control file
    pub fn read(&self, dir: &Path, file: &str) -> Result<String> {
        let mut fd = match self.open(dir, file, Access::ReadOnly) {
            Ok(fd) => fd,
            Err(e) if self.settings.emulate_cgroupfs && e.is_not_found() && dir.is_dir() => {
                return Ok(String::new());
            }
            Err(e) => return Err(e),
        };
        let mut content = String::new();
        fd.read_to_string(&mut content)
            .map_err(|e| CgroupError::io("read", dir.join(file), e))?;
        Ok(content)
    }

    /// Read a control file with surrounding whitespace trimmed
    pub fn read_string_param(&self, dir: &Path, file: &str) -> Result<String> {
        Ok(self.read(dir, file)?.trim().to_string())
    }

    /// Read a single unsigned value; "max" reads as `u64::MAX`
    pub fn read_uint_param(&self, dir: &Path, file: &str) -> Result<u64> {
        let content = self.read_string_param(dir, file)?;
        if content == "max" {
            return Ok(u64::MAX);
        }
        parse_uint(&content).map_err(|e| match e {
            CgroupError::Parse { value, reason } => CgroupError::Parse {
                value,
                reason: format!("{} (in {})", reason, dir.join(file).display()),
            },
            other => other,
        })
    }

    /// Create a group directory (and missing ancestors) with the configured mode
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(self.settings.dir_mode)
            .create(path)
            .map_err(|e| CgroupError::io("mkdir", path, e))
    }
}

fn retrying_write<W: Write>(fd: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match fd.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                WRITE_INTERRUPTS.inc();
                info!(data = %String::from_utf8_lossy(data), "interrupted while writing control file");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Parse an unsigned decimal value the way the kernel reports counters.
///
/// Negative values (including ones below `i64::MIN`) read as 0: some
/// kernel counters underflow and are printed signed.
pub fn parse_uint(s: &str) -> Result<u64> {
    match s.parse::<u64>() {
        Ok(value) => Ok(value),
        Err(uint_err) => match s.parse::<i64>() {
            Ok(value) if value < 0 => Ok(0),
            Err(e) if *e.kind() == IntErrorKind::NegOverflow => Ok(0),
            _ => Err(CgroupError::Parse {
                value: s.to_string(),
                reason: uint_err.to_string(),
            }),
        },
    }
}

/// Split a "key value" line such as `nr_throttled 12`
pub fn parse_key_value(line: &str) -> Result<(String, u64)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [key, value] => Ok((key.to_string(), parse_uint(value)?)),
        _ => Err(CgroupError::InvalidKeyValue {
            line: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uint_plain() {
        assert_eq!(parse_uint("2048").unwrap(), 2048);
        assert_eq!(parse_uint("2048\n".trim()).unwrap(), 2048);
    }

    #[test]
    fn test_parse_uint_negative_clamps_to_zero() {
        assert_eq!(parse_uint("-1").unwrap(), 0);
        assert_eq!(parse_uint("-12345").unwrap(), 0);
        assert_eq!(parse_uint("-9223372036854775808").unwrap(), 0);
        assert_eq!(parse_uint("-99999999999999999999999").unwrap(), 0);
    }

    #[test]
    fn test_parse_uint_garbage() {
        assert!(parse_uint("not-a-number").is_err());
        assert!(parse_uint("").is_err());
        assert!(parse_uint("99999999999999999999999").is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("nr_periods 42").unwrap(),
            ("nr_periods".to_string(), 42)
        );
        assert_eq!(
            parse_key_value("throttled_time -5").unwrap(),
            ("throttled_time".to_string(), 0)
        );
        assert!(matches!(
            parse_key_value("nr_periods"),
            Err(CgroupError::InvalidKeyValue { .. })
        ));
        assert!(parse_key_value("a b c").is_err());
        assert!(parse_key_value("nr_periods lots").is_err());
    }

    #[test]
    fn test_empty_directory_rejected() {
        let fs = ControlFs::emulated();
        let err = fs.read(Path::new(""), "cpu.shares").unwrap_err();
        assert!(matches!(err, CgroupError::NoDirectory { .. }));
    }

    #[test]
    fn test_read_uint_param() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();

        fs.write(dir.path(), "cgroup.file", "2048\n").unwrap();
        assert_eq!(fs.read_uint_param(dir.path(), "cgroup.file").unwrap(), 2048);

        fs.write(dir.path(), "cgroup.file", "max").unwrap();
        assert_eq!(fs.read_uint_param(dir.path(), "cgroup.file").unwrap(), u64::MAX);

        fs.write(dir.path(), "cgroup.file", "-12345").unwrap();
        assert_eq!(fs.read_uint_param(dir.path(), "cgroup.file").unwrap(), 0);

        fs.write(dir.path(), "cgroup.file", "not-a-float").unwrap();
        assert!(fs.read_uint_param(dir.path(), "cgroup.file").is_err());
    }

    #[test]
    fn test_missing_file_without_emulation_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::default();
        let err = fs.read(dir.path(), "cpu.stat").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_emulated_read_of_absent_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        assert_eq!(fs.read(dir.path(), "cpuset.cpus").unwrap(), "");
        // but not when the directory itself is gone
        assert!(fs.read(&dir.path().join("gone"), "cpuset.cpus").is_err());
    }

    #[test]
    fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        fs.write(dir.path(), "cpu.shares", "1024").unwrap();
        fs.write(dir.path(), "cpu.shares", "512").unwrap();
        assert_eq!(fs.read(dir.path(), "cpu.shares").unwrap(), "512");
    }

    #[test]
    fn test_traversal_in_file_name_stays_inside() {
        let dir = tempfile::tempdir().unwrap();
        let group = dir.path().join("group");
        std::fs::create_dir(&group).unwrap();
        let fs = ControlFs::emulated();
        fs.write(&group, "../../../../outside", "x").unwrap();
        assert!(group.join("outside").exists());
        assert!(!dir.path().join("outside").exists());
    }

    /// Writer that is interrupted a few times and then accepts short writes
    struct Interrupted {
        interrupts: u32,
        written: Vec<u8>,
    }

    impl Write for Interrupted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.interrupts > 0 {
                self.interrupts -= 1;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_retrying_write_survives_interrupts() {
        let mut w = Interrupted {
            interrupts: 2,
            written: Vec::new(),
        };
        let before = WRITE_INTERRUPTS.get();
        retrying_write(&mut w, b"200000").unwrap();
        assert_eq!(w.written, b"200000");
        assert!(WRITE_INTERRUPTS.get() >= before + 2);
    }

    #[test]
    fn test_retrying_write_zero_is_error() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = retrying_write(&mut Full, b"1").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
