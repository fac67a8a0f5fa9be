//! cgplane - control plane for Linux control groups
//!
//! Maps resource limits (CPU shares and bandwidth, CPU/NUMA pinning,
//! freeze/thaw) onto the cgroup filesystem on behalf of a container or
//! sandbox manager, without ever letting a caller-supplied path escape the
//! control tree.
//!
//! # Modules
//!
//! - `fs` - Hardened open/read/write of control files (openat2 or secure join)
//! - `path` - Lexical cleaning and contained group locations
//! - `cgroups` - cpu, cpuset and freezer drivers plus `SubsystemHandle`
//! - `procs` - Enrolling and listing member processes
//! - `reclaim` - Recursive group removal with backoff
//! - `mounts` - Mount discovery and the memoized layout probes
//! - `config` - Tunables and per-call resource limits
//! - `metrics` - Prometheus counters for absorbed kernel retries
//! - `logging` - Subscriber setup for programs embedding the crate
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use cgplane::{CgroupConfig, ControlFs, ControllerKind, ResourceSpec, SubsystemHandle};
//!
//! let spec = Arc::new(ResourceSpec { cpu_shares: 512, ..ResourceSpec::default() });
//! let root = cgplane::mounts::cgroup_root()?;
//! let cpu = SubsystemHandle::open(
//!     ControllerKind::Cpu,
//!     ControlFs::default(),
//!     &root,
//!     &CgroupConfig::with_path("sandbox/job-1"),
//!     spec,
//! )?;
//! cpu.apply(child_pid)?;
//! cpu.set()?;
//! ```

pub mod cgroups;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod metrics;
pub mod mounts;
pub mod path;
pub mod procs;
pub mod reclaim;
pub mod stats;

// Re-export commonly used types at crate root for convenience
pub use cgroups::{Controller, ControllerKind, Subsystem, SubsystemHandle};
pub use config::{CgroupConfig, FreezerState, ResourceSpec, Settings};
pub use error::{CgroupError, Result};
pub use fs::ControlFs;
pub use path::ControlGroupPath;
pub use stats::Stats;
