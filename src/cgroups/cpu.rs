//! CPU controller: CFS bandwidth, shares and real-time bandwidth
//!
//! ```text
//! <group>/
//! ├── cpu.shares          ← relative weight, read back after writing
//! ├── cpu.cfs_period_us   ← CFS period (µs)
//! ├── cpu.cfs_quota_us    ← CFS quota per period (µs), -1 = unlimited
//! ├── cpu.rt_period_us    ← real-time period (µs)
//! ├── cpu.rt_runtime_us   ← real-time runtime per period (µs)
//! └── cpu.stat            ← nr_periods / nr_throttled / throttled_time
//! ```
//!
//! The kernel silently clamps `cpu.shares` to its supported range, so a
//! write is only trusted after reading the value back.

use std::path::Path;

use crate::config::ResourceSpec;
use crate::error::{CgroupError, Result};
use crate::fs::{parse_key_value, ControlFs};
use crate::procs::write_cgroup_proc;
use crate::stats::Stats;

use super::Subsystem;

const CPU_SHARES: &str = "cpu.shares";
const CFS_PERIOD: &str = "cpu.cfs_period_us";
const CFS_QUOTA: &str = "cpu.cfs_quota_us";
const RT_PERIOD: &str = "cpu.rt_period_us";
const RT_RUNTIME: &str = "cpu.rt_runtime_us";
const CPU_STAT: &str = "cpu.stat";

#[derive(Debug, Clone, Default)]
pub struct CpuGroup {
    fs: ControlFs,
}

impl CpuGroup {
    pub fn new(fs: ControlFs) -> Self {
        Self { fs }
    }

    /// Write real-time bandwidth: period first, since the kernel checks the
    /// runtime against the period currently in place.
    pub fn set_rt_sched(&self, path: &Path, spec: &ResourceSpec) -> Result<()> {
        if spec.cpu_rt_period != 0 {
            self.fs.write(path, RT_PERIOD, &spec.cpu_rt_period.to_string())?;
        }
        if spec.cpu_rt_runtime != 0 {
            self.fs.write(path, RT_RUNTIME, &spec.cpu_rt_runtime.to_string())?;
        }
        Ok(())
    }

    fn set_shares(&self, path: &Path, shares: u64) -> Result<()> {
        self.fs.write(path, CPU_SHARES, &shares.to_string())?;
        let effective = self.fs.read_uint_param(path, CPU_SHARES)?;
        check_shares(shares, effective)
    }
}

/// Compare the shares written with what the kernel kept; a clamp is an
/// error naming the value that was applied
pub fn check_shares(requested: u64, effective: u64) -> Result<()> {
    if requested > effective {
        Err(CgroupError::MaxShares(effective))
    } else if requested < effective {
        Err(CgroupError::MinShares(effective))
    } else {
        Ok(())
    }
}

impl Subsystem for CpuGroup {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn apply(&self, path: &Path, spec: &ResourceSpec, pid: i32) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        self.fs.create_dir(path)?;
        // rt bandwidth must be in place before a real-time task can join
        self.set_rt_sched(path, spec)?;
        write_cgroup_proc(&self.fs, path, pid)
    }

    fn set(&self, path: &Path, spec: &ResourceSpec) -> Result<()> {
        if spec.cpu_shares != 0 {
            self.set_shares(path, spec.cpu_shares)?;
        }
        if spec.cpu_period != 0 {
            self.fs.write(path, CFS_PERIOD, &spec.cpu_period.to_string())?;
        }
        if spec.cpu_quota != 0 {
            self.fs.write(path, CFS_QUOTA, &spec.cpu_quota.to_string())?;
        }
        self.set_rt_sched(path, spec)
    }

    fn get_stats(&self, path: &Path, stats: &mut Stats) -> Result<()> {
        let content = match self.fs.read(path, CPU_STAT) {
            Ok(content) => content,
            // older kernels have no cpu.stat
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let throttling = &mut stats.cpu_stats.throttling_data;
        for line in content.lines() {
            let (key, value) = parse_key_value(line)?;
            match key.as_str() {
                "nr_periods" => throttling.periods = value,
                "nr_throttled" => throttling.throttled_periods = value,
                "throttled_time" => throttling.throttled_time = value,
                _ => {}
            }
        }
        Ok(())
    }

    fn add_pid(&self, path: &Path, pid: i32) -> Result<()> {
        write_cgroup_proc(&self.fs, path, pid)
    }
}
