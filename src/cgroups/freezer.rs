//! Freezer controller and the freeze/thaw handshake
//!
//! The kernel moves a group to FROZEN asynchronously; while tasks are
//! still being stopped it reports FREEZING:
//!
//! ```text
//!             write FROZEN                 all tasks stopped
//!   THAWED ───────────────► FREEZING ─────────────────────────► FROZEN
//!     ▲                                                           │
//!     └───────────────────────── write THAWED ────────────────────┘
//! ```
//!
//! `set_state` keeps re-asserting the desired state and reading it back
//! until the two agree. `get_state` never returns FREEZING; it waits it
//! out. By default both wait for as long as the kernel takes; setting
//! `freezer_timeout_ms` bounds the wait.

use std::path::Path;
use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::config::{FreezerState, ResourceSpec};
use crate::error::{CgroupError, Result};
use crate::fs::ControlFs;
use crate::metrics::FREEZER_POLLS;
use crate::procs::write_cgroup_proc;
use crate::stats::Stats;

use super::{join, Subsystem};

pub const FREEZER_STATE: &str = "freezer.state";

const FREEZING: &str = "FREEZING";

/// When a transition gives up, if ever
struct Deadline(Option<Instant>);

impl Deadline {
    fn from_settings(fs: &ControlFs) -> Self {
        Deadline(fs.settings().freezer_timeout().map(|t| Instant::now() + t))
    }

    fn check(&self, path: &Path, state: &str) -> Result<()> {
        match self.0 {
            Some(deadline) if Instant::now() >= deadline => Err(CgroupError::FreezerTimeout {
                path: path.to_path_buf(),
                state: state.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FreezerGroup {
    fs: ControlFs,
}

impl FreezerGroup {
    pub fn new(fs: ControlFs) -> Self {
        Self { fs }
    }

    /// Drive the group at `path` to `state` and wait until the kernel
    /// reports it. `Undefined` leaves the group alone.
    pub fn set_state(&self, path: &Path, state: FreezerState) -> Result<()> {
        if state == FreezerState::Undefined {
            return Ok(());
        }

        let deadline = Deadline::from_settings(&self.fs);
        loop {
            self.fs.write(path, FREEZER_STATE, state.as_str())?;
            let current = self.read_state(path, &deadline)?;
            if current == state {
                return Ok(());
            }

            FREEZER_POLLS.with_label_values(&[state.as_str()]).inc();
            debug!(path = %path.display(), want = %state, current = %current, "waiting for freezer");
            deadline.check(path, state.as_str())?;
            thread::sleep(self.fs.settings().freezer_poll_interval());
        }
    }

    /// Current settled state of the group.
    ///
    /// A group that is gone (no state file, or ENODEV) reads as `Undefined`.
    pub fn get_state(&self, path: &Path) -> Result<FreezerState> {
        self.read_state(path, &Deadline::from_settings(&self.fs))
    }

    fn read_state(&self, path: &Path, deadline: &Deadline) -> Result<FreezerState> {
        loop {
            let state = match self.fs.read(path, FREEZER_STATE) {
                Ok(state) => state,
                Err(e) if e.is_not_found() || e.is_no_device() => {
                    return Ok(FreezerState::Undefined)
                }
                Err(e) => return Err(e),
            };

            match state.trim() {
                "THAWED" => return Ok(FreezerState::Thawed),
                "FROZEN" => return Ok(FreezerState::Frozen),
                FREEZING => {
                    FREEZER_POLLS.with_label_values(&[FREEZING]).inc();
                    debug!(path = %path.display(), "freezer still FREEZING");
                    deadline.check(path, FREEZING)?;
                    thread::sleep(self.fs.settings().freezer_poll_interval());
                }
                other => return Err(CgroupError::UnknownFreezerState(other.to_string())),
            }
        }
    }
}

impl Subsystem for FreezerGroup {
    fn name(&self) -> &'static str {
        "freezer"
    }

    fn apply(&self, path: &Path, _spec: &ResourceSpec, pid: i32) -> Result<()> {
        join(&self.fs, path, pid)
    }

    fn set(&self, path: &Path, spec: &ResourceSpec) -> Result<()> {
        self.set_state(path, spec.freezer)
    }

    fn get_stats(&self, _path: &Path, _stats: &mut Stats) -> Result<()> {
        Ok(())
    }

    fn add_pid(&self, path: &Path, pid: i32) -> Result<()> {
        write_cgroup_proc(&self.fs, path, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn freezer_with_timeout(ms: u64) -> FreezerGroup {
        FreezerGroup::new(ControlFs::new(Settings {
            freezer_timeout_ms: Some(ms),
            ..Settings::emulated()
        }))
    }

    #[test]
    fn test_frozen_to_thawed() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = FreezerGroup::new(ControlFs::emulated());
        freezer.set_state(dir.path(), FreezerState::Frozen).unwrap();
        assert_eq!(freezer.get_state(dir.path()).unwrap(), FreezerState::Frozen);

        freezer.set_state(dir.path(), FreezerState::Thawed).unwrap();
        assert_eq!(freezer.get_state(dir.path()).unwrap(), FreezerState::Thawed);
    }

    #[test]
    fn test_undefined_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = FreezerGroup::new(ControlFs::emulated());
        freezer.set_state(dir.path(), FreezerState::Undefined).unwrap();
        assert!(!dir.path().join(FREEZER_STATE).exists());
    }

    #[test]
    fn test_missing_group_reads_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = FreezerGroup::new(ControlFs::emulated());
        let state = freezer.get_state(&dir.path().join("gone")).unwrap();
        assert_eq!(state, FreezerState::Undefined);
    }

    #[test]
    fn test_unknown_state_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = ControlFs::emulated();
        fs.write(dir.path(), FREEZER_STATE, "SLEEPY\n").unwrap();
        let freezer = FreezerGroup::new(fs);
        assert!(matches!(
            freezer.get_state(dir.path()),
            Err(CgroupError::UnknownFreezerState(_))
        ));
    }

    #[test]
    fn test_stuck_freezing_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = freezer_with_timeout(20);
        freezer.fs.write(dir.path(), FREEZER_STATE, "FREEZING\n").unwrap();
        assert!(matches!(
            freezer.get_state(dir.path()),
            Err(CgroupError::FreezerTimeout { .. })
        ));
    }

    #[test]
    fn test_set_through_resource_spec() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = FreezerGroup::new(ControlFs::emulated());
        let spec = ResourceSpec {
            freezer: FreezerState::Frozen,
            ..ResourceSpec::default()
        };
        freezer.set(dir.path(), &spec).unwrap();
        assert_eq!(freezer.fs.read(dir.path(), FREEZER_STATE).unwrap(), "FROZEN");
    }
}
