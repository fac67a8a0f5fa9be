//! Kernel-assisted path resolution with openat2(2)
//!
//! openat2 lets the kernel enforce containment while it walks the path:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  dirfd = open("/sys/fs/cgroup", O_PATH | O_DIRECTORY)   (once)   │
//! │                                                                  │
//! │  openat2(dirfd, "cpu/box/cpu.shares", { resolve: ... })          │
//! │     RESOLVE_BENEATH        no "..", no absolute jump above dirfd │
//! │     RESOLVE_NO_MAGICLINKS  no /proc/self/fd style links          │
//! │     RESOLVE_NO_SYMLINKS    unified layout only                   │
//! │     RESOLVE_NO_XDEV        unified layout only                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The legacy layout keeps symlinks allowed because controllers such as
//! `cpu -> cpu,cpuacct` are symlinks under the root.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;

use lazy_static::lazy_static;
use tracing::{debug, warn};

use crate::mounts::{is_cgroup2_unified_mode, CGROUPFS_DIR};

// Resolve flags from linux/openat2.h
const RESOLVE_NO_XDEV: u64 = 0x01;
const RESOLVE_NO_MAGICLINKS: u64 = 0x02;
const RESOLVE_NO_SYMLINKS: u64 = 0x04;
const RESOLVE_BENEATH: u64 = 0x08;

/// `struct open_how` from linux/openat2.h
#[repr(C)]
#[derive(Debug, Default)]
struct OpenHow {
    flags: u64,
    mode: u64,
    resolve: u64,
}

fn openat2(dirfd: RawFd, path: &Path, how: &OpenHow) -> io::Result<File> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let fd = unsafe {
        libc::syscall(
            libc::SYS_openat2,
            dirfd,
            c_path.as_ptr(),
            how as *const OpenHow,
            std::mem::size_of::<OpenHow>(),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd as RawFd) })
}

/// Held O_PATH handle to the control-tree root plus the resolve flags to use
#[derive(Debug)]
pub(crate) struct CgroupfsHandle {
    dir: File,
    resolve: u64,
}

impl CgroupfsHandle {
    fn probe() -> Option<Self> {
        let how = OpenHow {
            flags: (libc::O_DIRECTORY | libc::O_PATH | libc::O_CLOEXEC) as u64,
            ..OpenHow::default()
        };
        let dir = match openat2(libc::AT_FDCWD, Path::new(CGROUPFS_DIR), &how) {
            Ok(dir) => dir,
            Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => {
                debug!("openat2 not available, falling back to securejoin");
                return None;
            }
            Err(e) => {
                warn!(error = %e, path = CGROUPFS_DIR, "falling back to securejoin");
                return None;
            }
        };

        let mut resolve = RESOLVE_BENEATH | RESOLVE_NO_MAGICLINKS;
        if is_cgroup2_unified_mode() {
            // single mountpoint, no per-controller symlinks to follow
            resolve |= RESOLVE_NO_XDEV | RESOLVE_NO_SYMLINKS;
        }
        Some(Self { dir, resolve })
    }

    /// Open `relname` beneath the control-tree root
    pub(crate) fn open(&self, relname: &Path, flags: i32, mode: u32) -> io::Result<File> {
        let how = OpenHow {
            flags: (flags | libc::O_CLOEXEC) as u64,
            mode: mode as u64,
            resolve: self.resolve,
        };
        openat2(self.dir.as_raw_fd(), relname, &how)
    }
}

lazy_static! {
    static ref CGROUPFS_HANDLE: Option<CgroupfsHandle> = CgroupfsHandle::probe();
}

/// The memoized openat2 handle, or None when openat2 can't be used here
pub(crate) fn cgroupfs_handle() -> Option<&'static CgroupfsHandle> {
    CGROUPFS_HANDLE.as_ref()
}
