//! Statistics read back from controller files
//!
//! Only the CPU controller defines counters today; cpuset and freezer leave
//! a `Stats` untouched. All counters are monotonically non-decreasing while
//! the group exists.

use serde::{Deserialize, Serialize};

/// CFS bandwidth throttling counters from cpu.stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlingData {
    /// Number of enforcement periods that have elapsed (nr_periods)
    #[serde(default)]
    pub periods: u64,
    /// Number of periods the group was throttled in (nr_throttled)
    #[serde(default)]
    pub throttled_periods: u64,
    /// Total time the group was throttled, in nanoseconds (throttled_time)
    #[serde(default)]
    pub throttled_time: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub throttling_data: ThrottlingData,
}

/// Per-group statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
}
