//! Cpuset controller: CPU and NUMA node pinning
//!
//! Applying a new cpuset group is more involved than for other controllers
//! because the group must never be empty once a task joins it. See
//! `hierarchy` for how ancestors get seeded.

use std::path::Path;

use crate::config::ResourceSpec;
use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;
use crate::mounts::{find_mountpoint, get_mounts};
use crate::procs::write_cgroup_proc;
use crate::stats::Stats;

use super::hierarchy::{copy_if_needed, ensure_parent, CPUSET_CPUS, CPUSET_MEMS};
use super::Subsystem;

#[derive(Debug, Clone, Default)]
pub struct CpusetGroup {
    fs: ControlFs,
}

impl CpusetGroup {
    pub fn new(fs: ControlFs) -> Self {
        Self { fs }
    }

    /// Create `dir` below `root` and enroll `pid`.
    ///
    /// `root` is the directory above the cpuset mountpoint; everything from
    /// the mountpoint down to `dir` is created and seeded.
    pub fn apply_dir(&self, dir: &Path, root: &Path, spec: &ResourceSpec, pid: i32) -> Result<()> {
        if dir.as_os_str().is_empty() {
            return Ok(());
        }
        let parent = dir.parent().ok_or_else(|| CgroupError::OutsideRoot {
            root: root.to_path_buf(),
            path: dir.to_path_buf(),
        })?;
        ensure_parent(&self.fs, parent, root)?;
        self.fs.create_dir(dir)?;
        self.ensure_cpus_and_mems(dir, parent, spec)?;
        write_cgroup_proc(&self.fs, dir, pid)
    }

    fn ensure_cpus_and_mems(&self, dir: &Path, parent: &Path, spec: &ResourceSpec) -> Result<()> {
        self.set(dir, spec)?;
        copy_if_needed(&self.fs, dir, parent)
    }
}

impl Subsystem for CpusetGroup {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn apply(&self, path: &Path, spec: &ResourceSpec, pid: i32) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let mounts = get_mounts()?;
        let mountpoint = find_mountpoint(path, &mounts)?;
        let root = mountpoint
            .parent()
            .ok_or_else(|| CgroupError::MountNotFound(path.to_path_buf()))?;
        self.apply_dir(path, root, spec, pid)
    }

    fn set(&self, path: &Path, spec: &ResourceSpec) -> Result<()> {
        if !spec.cpuset_cpus.is_empty() {
            self.fs.write(path, CPUSET_CPUS, &spec.cpuset_cpus)?;
        }
        if !spec.cpuset_mems.is_empty() {
            self.fs.write(path, CPUSET_MEMS, &spec.cpuset_mems)?;
        }
        Ok(())
    }

    fn get_stats(&self, _path: &Path, _stats: &mut Stats) -> Result<()> {
        Ok(())
    }

    fn add_pid(&self, path: &Path, pid: i32) -> Result<()> {
        write_cgroup_proc(&self.fs, path, pid)
    }
}
