//! One controller attached to one group
//!
//! A `SubsystemHandle` ties a driver to a contained group location and the
//! limits the caller asked for. It is created when a controller is first
//! attached to a group and consumed by `destroy` once the directory is
//! gone.
//!
//! ```text
//! SubsystemHandle
//! ├── controller   Cpu | Cpuset | Freezer
//! ├── path         ControlGroupPath (root + contained inner path)
//! └── spec         Arc<ResourceSpec>, shared with the caller, never mutated
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{CgroupConfig, FreezerState, ResourceSpec};
use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;
use crate::mounts::is_cgroup2_unified_mode;
use crate::path::ControlGroupPath;
use crate::procs::{get_all_pids, get_pids, NO_PID};
use crate::reclaim::remove_paths;
use crate::stats::Stats;

use super::{Controller, ControllerKind, Subsystem};

#[derive(Debug, Clone)]
pub struct SubsystemHandle {
    controller: Controller,
    fs: ControlFs,
    path: ControlGroupPath,
    spec: Arc<ResourceSpec>,
}

impl SubsystemHandle {
    pub fn new(
        kind: ControllerKind,
        fs: ControlFs,
        path: ControlGroupPath,
        spec: Arc<ResourceSpec>,
    ) -> Self {
        Self {
            controller: Controller::new(kind, fs.clone()),
            fs,
            path,
            spec,
        }
    }

    /// Attach `kind` to the group `config` names below the control-tree
    /// root `tree_root`.
    ///
    /// Fails with a containment error if the name/parent/path triple would
    /// resolve outside the controller's root.
    pub fn open(
        kind: ControllerKind,
        fs: ControlFs,
        tree_root: &Path,
        config: &CgroupConfig,
        spec: Arc<ResourceSpec>,
    ) -> Result<Self> {
        let root = kind.root_under(tree_root, is_cgroup2_unified_mode());
        let path = ControlGroupPath::from_config(root, config)?;
        Ok(Self::new(kind, fs, path, spec))
    }

    pub fn kind(&self) -> ControllerKind {
        self.controller.kind()
    }

    pub fn path(&self) -> &ControlGroupPath {
        &self.path
    }

    /// Absolute directory of the group, resolved against the controller
    /// root each time it is asked for
    pub fn dir(&self) -> Result<PathBuf> {
        self.path.resolve()
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Replace the limits used by later `set` calls
    pub fn update_spec(&mut self, spec: Arc<ResourceSpec>) {
        self.spec = spec;
    }

    pub fn exists(&self) -> bool {
        self.dir().map_or(false, |dir| dir.is_dir())
    }

    /// Create the group and enroll `pid` (`NO_PID` only creates it)
    pub fn apply(&self, pid: i32) -> Result<()> {
        self.controller.apply(&self.dir()?, &self.spec, pid)
    }

    /// Write the current limits into the group
    pub fn set(&self) -> Result<()> {
        self.controller.set(&self.dir()?, &self.spec)
    }

    pub fn stats(&self) -> Result<Stats> {
        let mut stats = Stats::new();
        self.controller.get_stats(&self.dir()?, &mut stats)?;
        Ok(stats)
    }

    /// Move a running process into the group
    pub fn add_pid(&self, pid: i32) -> Result<()> {
        if pid == NO_PID {
            return Err(CgroupError::NoProcess);
        }
        self.controller.add_pid(&self.dir()?, pid)
    }

    /// Pids directly in the group
    pub fn pids(&self) -> Result<Vec<i32>> {
        get_pids(&self.fs, &self.dir()?)
    }

    /// Pids in the group and every group below it
    pub fn all_pids(&self) -> Result<Vec<i32>> {
        get_all_pids(&self.fs, &self.dir()?)
    }

    fn freezer(&self, op: &'static str) -> Result<&super::FreezerGroup> {
        match &self.controller {
            Controller::Freezer(freezer) => Ok(freezer),
            other => Err(CgroupError::Unsupported {
                controller: other.name(),
                op,
            }),
        }
    }

    /// Freeze or thaw the group, blocking until the kernel settles
    pub fn freeze(&self, state: FreezerState) -> Result<()> {
        self.freezer("freeze")?.set_state(&self.dir()?, state)
    }

    pub fn freezer_state(&self) -> Result<FreezerState> {
        self.freezer("freezer_state")?.get_state(&self.dir()?)
    }

    /// Remove the group and everything below it.
    ///
    /// On failure the handle comes back with the error so the caller can
    /// retry later.
    pub fn destroy(self) -> std::result::Result<(), (Self, CgroupError)> {
        let dir = match self.dir() {
            Ok(dir) => dir,
            Err(e) => return Err((self, e)),
        };
        let mut paths = BTreeMap::new();
        paths.insert(self.controller.name().to_string(), dir);
        match remove_paths(&mut paths, self.fs.settings()) {
            Ok(()) => Ok(()),
            Err(e) => Err((self, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::TempDir;

    fn handle(kind: ControllerKind, dir: &TempDir, inner: &str) -> SubsystemHandle {
        let root = dir.path().join(kind.name());
        let path = ControlGroupPath::new(&root, inner).unwrap();
        SubsystemHandle::new(kind, ControlFs::emulated(), path, Arc::new(ResourceSpec::default()))
    }

    #[test]
    fn test_add_pid_rejects_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let cpu = handle(ControllerKind::Cpu, &dir, "box");
        assert!(matches!(cpu.add_pid(NO_PID), Err(CgroupError::NoProcess)));
    }

    #[test]
    fn test_apply_then_pids() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = handle(ControllerKind::Freezer, &dir, "box");
        assert!(!freezer.exists());
        freezer.apply(4321).unwrap();
        assert!(freezer.exists());
        assert_eq!(freezer.pids().unwrap(), vec![4321]);
        assert_eq!(freezer.all_pids().unwrap(), vec![4321]);
    }

    #[test]
    fn test_freeze_only_on_freezer() {
        let dir = tempfile::tempdir().unwrap();
        let cpu = handle(ControllerKind::Cpu, &dir, "box");
        assert!(matches!(
            cpu.freeze(FreezerState::Frozen),
            Err(CgroupError::Unsupported { controller: "cpu", .. })
        ));
        assert!(cpu.freezer_state().is_err());

        let freezer = handle(ControllerKind::Freezer, &dir, "box");
        freezer.apply(NO_PID).unwrap();
        freezer.freeze(FreezerState::Frozen).unwrap();
        assert_eq!(freezer.freezer_state().unwrap(), FreezerState::Frozen);
    }

    #[test]
    fn test_destroy_removes_group() {
        let dir = tempfile::tempdir().unwrap();
        let cpu = handle(ControllerKind::Cpu, &dir, "box/app");
        cpu.apply(NO_PID).unwrap();
        let group = cpu.dir().unwrap();
        assert!(group.is_dir());

        assert!(cpu.destroy().is_ok());
        assert!(!group.exists());
    }

    #[test]
    fn test_destroy_failure_returns_handle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cpu");
        let path = ControlGroupPath::new(&root, "busy").unwrap();
        let fs = ControlFs::new(Settings {
            remove_attempts: 1,
            ..Settings::emulated()
        });
        let cpu = SubsystemHandle::new(
            ControllerKind::Cpu,
            fs,
            path,
            Arc::new(ResourceSpec::default()),
        );
        cpu.apply(NO_PID).unwrap();
        std::fs::write(cpu.dir().unwrap().join("pinned"), "x").unwrap();

        let (cpu, err) = cpu.destroy().unwrap_err();
        assert!(matches!(err, CgroupError::RemoveFailed { .. }));
        assert!(cpu.exists());
    }

    #[test]
    fn test_open_contains_hostile_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CgroupConfig::with_parent_and_name("../../..", "../../etc");
        let cpu = SubsystemHandle::open(
            ControllerKind::Cpu,
            ControlFs::emulated(),
            dir.path(),
            &config,
            Arc::new(ResourceSpec::default()),
        )
        .unwrap();
        assert!(cpu.dir().unwrap().starts_with(dir.path()));
    }
}
