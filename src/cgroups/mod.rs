//! Per-controller drivers
//!
//! Each controller (cpu, cpuset, freezer) encodes its own kernel protocol
//! for writing limits, enrolling processes and reading statistics. They
//! all share one capability set, the `Subsystem` trait:
//!
//! ```text
//!                  ┌────────────────────────────┐
//!                  │      trait Subsystem       │
//!                  │ name / apply / set /       │
//!                  │ get_stats / add_pid        │
//!                  └─────────────┬──────────────┘
//!          ┌─────────────────────┼─────────────────────┐
//!          ▼                     ▼                     ▼
//!     CpuGroup              CpusetGroup           FreezerGroup
//!   shares read-back     ancestor bootstrap     write + poll until
//!   rt period→runtime    (hierarchy.rs)         settled (freezer.rs)
//! ```
//!
//! The set of controllers is fixed, so `Controller` is a closed enum that
//! dispatches with a match rather than a boxed trait object.
//!
//! # Example Usage
//!
//! ```ignore
//! use cgplane::cgroups::{Controller, ControllerKind, Subsystem};
//! use cgplane::fs::ControlFs;
//!
//! let cpu = Controller::new(ControllerKind::Cpu, ControlFs::default());
//! cpu.set(Path::new("/sys/fs/cgroup/cpu/box"), &spec)?;
//! cpu.add_pid(Path::new("/sys/fs/cgroup/cpu/box"), pid)?;
//! ```

pub mod cpu;
pub mod cpuset;
pub mod freezer;
pub mod handle;
pub mod hierarchy;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::ResourceSpec;
use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;
use crate::procs::write_cgroup_proc;
use crate::stats::Stats;

pub use cpu::CpuGroup;
pub use cpuset::CpusetGroup;
pub use freezer::FreezerGroup;
pub use handle::SubsystemHandle;

/// What every controller driver can do
pub trait Subsystem {
    /// Controller name as it appears in mount options and /proc/cgroups
    fn name(&self) -> &'static str;

    /// Create the group at `path`, apply what must be in place before a
    /// process joins, then enroll `pid`
    fn apply(&self, path: &Path, spec: &ResourceSpec, pid: i32) -> Result<()>;

    /// Write the limits of `spec` into an existing group
    fn set(&self, path: &Path, spec: &ResourceSpec) -> Result<()>;

    /// Fill the controller's part of `stats`
    fn get_stats(&self, path: &Path, stats: &mut Stats) -> Result<()>;

    /// Enroll `pid` into an existing group
    fn add_pid(&self, path: &Path, pid: i32) -> Result<()>;
}

/// The controllers this crate drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControllerKind {
    Cpu,
    Cpuset,
    Freezer,
}

impl ControllerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerKind::Cpu => "cpu",
            ControllerKind::Cpuset => "cpuset",
            ControllerKind::Freezer => "freezer",
        }
    }

    pub fn all() -> [ControllerKind; 3] {
        [ControllerKind::Cpu, ControllerKind::Cpuset, ControllerKind::Freezer]
    }

    /// Directory of this controller below the control-tree root.
    ///
    /// The unified layout has one hierarchy for every controller; the
    /// legacy layout mounts each controller in its own directory.
    pub fn root_under(&self, tree_root: &Path, unified: bool) -> PathBuf {
        if unified {
            tree_root.to_path_buf()
        } else {
            tree_root.join(self.name())
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerKind {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(ControllerKind::Cpu),
            "cpuset" => Ok(ControllerKind::Cpuset),
            "freezer" => Ok(ControllerKind::Freezer),
            other => Err(CgroupError::Parse {
                value: other.to_string(),
                reason: "unknown controller".to_string(),
            }),
        }
    }
}

/// A driver for one of the fixed controllers
#[derive(Debug, Clone)]
pub enum Controller {
    Cpu(CpuGroup),
    Cpuset(CpusetGroup),
    Freezer(FreezerGroup),
}

impl Controller {
    pub fn new(kind: ControllerKind, fs: ControlFs) -> Self {
        match kind {
            ControllerKind::Cpu => Controller::Cpu(CpuGroup::new(fs)),
            ControllerKind::Cpuset => Controller::Cpuset(CpusetGroup::new(fs)),
            ControllerKind::Freezer => Controller::Freezer(FreezerGroup::new(fs)),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            Controller::Cpu(_) => ControllerKind::Cpu,
            Controller::Cpuset(_) => ControllerKind::Cpuset,
            Controller::Freezer(_) => ControllerKind::Freezer,
        }
    }

    fn as_subsystem(&self) -> &dyn Subsystem {
        match self {
            Controller::Cpu(group) => group,
            Controller::Cpuset(group) => group,
            Controller::Freezer(group) => group,
        }
    }
}

impl Subsystem for Controller {
    fn name(&self) -> &'static str {
        self.as_subsystem().name()
    }

    fn apply(&self, path: &Path, spec: &ResourceSpec, pid: i32) -> Result<()> {
        self.as_subsystem().apply(path, spec, pid)
    }

    fn set(&self, path: &Path, spec: &ResourceSpec) -> Result<()> {
        self.as_subsystem().set(path, spec)
    }

    fn get_stats(&self, path: &Path, stats: &mut Stats) -> Result<()> {
        self.as_subsystem().get_stats(path, stats)
    }

    fn add_pid(&self, path: &Path, pid: i32) -> Result<()> {
        self.as_subsystem().add_pid(path, pid)
    }
}

/// Create `path` if needed and enroll `pid`. A no-op for an empty path.
pub(crate) fn join(fs: &ControlFs, path: &Path, pid: i32) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    fs.create_dir(path)?;
    write_cgroup_proc(fs, path, pid)
}
