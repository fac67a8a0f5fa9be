//! Configuration for the control plane
//!
//! Two kinds of configuration live here:
//! - `Settings`: process tunables (retry bounds, delays, emulation mode)
//! - `ResourceSpec` / `CgroupConfig`: what a caller asks for on each call
//!
//! Both deserialize from JSON so a lifecycle manager can embed them in its
//! own configuration file.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CgroupError, Result};

/// Process tunables for control-tree access
///
/// The defaults match what the kernel interfaces expect in production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Treat the tree as a plain directory tree instead of a cgroupfs mount.
    ///
    /// Write-opens add `O_CREAT | O_TRUNC`, and reading an absent file in an
    /// existing directory yields empty content, mirroring a freshly created
    /// cgroup whose control files always exist.
    pub emulate_cgroupfs: bool,
    /// Mode for directories created in the tree
    pub dir_mode: u32,
    /// Attempts when writing a pid into cgroup.procs returns EINVAL
    pub enroll_attempts: u32,
    /// Delay between pid enrollment attempts
    pub enroll_retry_delay_ms: u64,
    /// Delay between freezer.state polls
    pub freezer_poll_interval_ms: u64,
    /// Give up on a freezer transition after this long (None = wait forever)
    pub freezer_timeout_ms: Option<u64>,
    /// Rounds of recursive removal before reporting failure
    pub remove_attempts: u32,
    /// Delay before the second removal round; doubles every round
    pub remove_initial_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            emulate_cgroupfs: false,
            dir_mode: 0o755,
            enroll_attempts: 5,
            enroll_retry_delay_ms: 30,
            freezer_poll_interval_ms: 1,
            freezer_timeout_ms: None,
            remove_attempts: 5,
            remove_initial_delay_ms: 10,
        }
    }
}

impl Settings {
    /// Defaults with cgroupfs emulation turned on (tests, dry runs)
    pub fn emulated() -> Self {
        Self {
            emulate_cgroupfs: true,
            ..Self::default()
        }
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| CgroupError::Parse {
            value: input.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn enroll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.enroll_retry_delay_ms)
    }

    pub fn freezer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.freezer_poll_interval_ms)
    }

    pub fn freezer_timeout(&self) -> Option<Duration> {
        self.freezer_timeout_ms.map(Duration::from_millis)
    }

    pub fn remove_initial_delay(&self) -> Duration {
        Duration::from_millis(self.remove_initial_delay_ms)
    }
}

/// Desired or observed state of the freezer controller
///
/// The kernel may also report `FREEZING`; that value is transient and is
/// never a valid target, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FreezerState {
    #[default]
    Undefined,
    Frozen,
    Thawed,
}

impl FreezerState {
    /// The string written to / read from freezer.state
    pub fn as_str(&self) -> &'static str {
        match self {
            FreezerState::Undefined => "",
            FreezerState::Frozen => "FROZEN",
            FreezerState::Thawed => "THAWED",
        }
    }
}

impl fmt::Display for FreezerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreezerState {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(FreezerState::Undefined),
            "FROZEN" => Ok(FreezerState::Frozen),
            "THAWED" => Ok(FreezerState::Thawed),
            other => Err(CgroupError::InvalidFreezerState(other.to_string())),
        }
    }
}

impl TryFrom<String> for FreezerState {
    type Error = CgroupError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FreezerState> for String {
    fn from(state: FreezerState) -> Self {
        state.as_str().to_string()
    }
}

/// Requested resource limits for one apply/set call
///
/// Zero / empty fields mean "leave the kernel value alone".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// Relative CPU weight (cpu.shares)
    pub cpu_shares: u64,
    /// CFS quota in microseconds; negative means unlimited
    pub cpu_quota: i64,
    /// CFS period in microseconds
    pub cpu_period: u64,
    /// Real-time runtime in microseconds
    #[serde(rename = "cpu_rt_quota")]
    pub cpu_rt_runtime: i64,
    /// Real-time period in microseconds
    pub cpu_rt_period: u64,
    /// CPU list in kernel range syntax, e.g. "0-3,6"
    pub cpuset_cpus: String,
    /// NUMA node list in kernel range syntax
    pub cpuset_mems: String,
    /// Desired freezer state
    pub freezer: FreezerState,
}

impl ResourceSpec {
    /// Parse a spec from JSON using the field names above
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| CgroupError::Parse {
            value: input.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Where a group lives below each controller root
///
/// Either `path` is set, or the group is `parent`/`name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupConfig {
    pub name: String,
    pub parent: String,
    pub path: String,
}

impl CgroupConfig {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_parent_and_name(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            path: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(!settings.emulate_cgroupfs);
        assert_eq!(settings.enroll_attempts, 5);
        assert_eq!(settings.enroll_retry_delay(), Duration::from_millis(30));
        assert_eq!(settings.remove_attempts, 5);
        assert_eq!(settings.remove_initial_delay(), Duration::from_millis(10));
        assert!(settings.freezer_timeout().is_none());
    }

    #[test]
    fn test_settings_partial_json() {
        let settings = Settings::from_json(r#"{"freezer_timeout_ms": 500}"#).unwrap();
        assert_eq!(settings.freezer_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(settings.dir_mode, 0o755);
    }

    #[test]
    fn test_freezer_state_parse() {
        assert_eq!("FROZEN".parse::<FreezerState>().unwrap(), FreezerState::Frozen);
        assert_eq!("THAWED".parse::<FreezerState>().unwrap(), FreezerState::Thawed);
        assert_eq!("".parse::<FreezerState>().unwrap(), FreezerState::Undefined);
        assert!(matches!(
            "FREEZING".parse::<FreezerState>(),
            Err(CgroupError::InvalidFreezerState(_))
        ));
        assert!("Invalid".parse::<FreezerState>().is_err());
    }

    #[test]
    fn test_resource_spec_json_names() {
        let spec = ResourceSpec::from_json(
            r#"{"cpu_shares": 512, "cpu_quota": -1, "cpu_rt_quota": 950000,
                "cpuset_cpus": "0-1", "freezer": "FROZEN"}"#,
        )
        .unwrap();
        assert_eq!(spec.cpu_shares, 512);
        assert_eq!(spec.cpu_quota, -1);
        assert_eq!(spec.cpu_rt_runtime, 950000);
        assert_eq!(spec.cpuset_cpus, "0-1");
        assert_eq!(spec.freezer, FreezerState::Frozen);
        assert_eq!(spec.cpu_period, 0);
    }

    #[test]
    fn test_resource_spec_rejects_unknown_freezer_state() {
        assert!(ResourceSpec::from_json(r#"{"freezer": "Invalid"}"#).is_err());
    }
}
