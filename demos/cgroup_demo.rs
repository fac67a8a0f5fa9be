//! Walk through the control plane against the host's cgroup tree
//!
//! Run with: sudo cargo run --example cgroup_demo
//! (Requires root and the legacy per-controller layout for cpu/freezer files)

use std::process::Command;
use std::sync::Arc;

use cgplane::mounts::{cgroup_root, get_all_subsystems, is_cgroup2_unified_mode};
use cgplane::{CgroupConfig, ControlFs, ControllerKind, FreezerState, ResourceSpec, SubsystemHandle};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    cgplane::logging::init_logging(None, false)?;

    println!("┌─────────────────────────────────────────┐");
    println!("│  cgplane control plane walkthrough      │");
    println!("└─────────────────────────────────────────┘\n");

    // Using libc directly since nix's geteuid requires the "user" feature
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        eprintln!("Warning: Not running as root (euid={}). cgroup operations may fail.", euid);
        eprintln!("   Run with: sudo cargo run --example cgroup_demo\n");
    }

    println!("1. Probing the control tree...");
    let root = cgroup_root()?;
    let unified = is_cgroup2_unified_mode();
    println!("   root    = {}", root.display());
    println!("   unified = {}", unified);
    if unified {
        eprintln!("   Note: cpu.shares and freezer.state only exist on the legacy layout");
    }
    match get_all_subsystems(&ControlFs::default()) {
        Ok(subsystems) => println!("   controllers: {}", subsystems.join(" ")),
        Err(e) => eprintln!("   ❌ Failed to list controllers: {}", e),
    }

    let spec = Arc::new(ResourceSpec {
        cpu_shares: 512,
        cpu_quota: 200000,
        cpu_period: 100000,
        ..ResourceSpec::default()
    });
    let config = CgroupConfig::with_parent_and_name("cgplane-demo", "job-1");
    let fs = ControlFs::default();

    println!("\n2. Spawning test process...");
    let mut child = Command::new("sleep").arg("30").spawn()?;
    let pid = child.id() as i32;
    println!("   Spawned 'sleep 30' with PID {}", pid);

    println!("\n3. Applying cpu limits (shares=512, quota=200000, period=100000)...");
    let cpu = SubsystemHandle::open(ControllerKind::Cpu, fs.clone(), &root, &config, spec.clone())?;
    match cpu.apply(pid).and_then(|_| cpu.set()) {
        Ok(()) => {
            let group = cpu.path().inner().display();
            println!("   ✅ {} configured, pids: {:?}", group, cpu.pids()?)
        }
        Err(e) => eprintln!("   ❌ Failed to configure cpu: {}", e),
    }

    println!("\n4. Reading statistics...");
    match cpu.stats() {
        Ok(stats) => {
            let throttling = stats.cpu_stats.throttling_data;
            println!("   Periods: {}", throttling.periods);
            println!("   Throttled periods: {}", throttling.throttled_periods);
            println!("   Throttled time: {} ns", throttling.throttled_time);
        }
        Err(e) => eprintln!("   ❌ Failed to read stats: {}", e),
    }

    println!("\n5. Freezing and thawing...");
    let freezer = SubsystemHandle::open(ControllerKind::Freezer, fs, &root, &config, spec)?;
    let cycle = freezer
        .apply(pid)
        .and_then(|_| freezer.freeze(FreezerState::Frozen))
        .and_then(|_| {
            println!("   state: {}", freezer.freezer_state()?);
            freezer.freeze(FreezerState::Thawed)
        })
        .and_then(|_| freezer.freezer_state());
    match cycle {
        Ok(state) => println!("   ✅ state: {}", state),
        Err(e) => eprintln!("   ❌ Freeze cycle failed: {}", e),
    }

    println!("\n6. Cleaning up...");
    let _ = child.kill();
    let _ = child.wait();

    for handle in [cpu, freezer] {
        match handle.destroy() {
            Ok(()) => println!("   ✅ group removed"),
            Err((handle, e)) => {
                eprintln!("   ❌ Failed to remove {}: {}", handle.path().inner().display(), e)
            }
        }
    }

    print!("\n{}", cgplane::metrics::render());

    println!("\n┌─────────────────────────────────────────┐");
    println!("│  ✅ walkthrough complete!               │");
    println!("└─────────────────────────────────────────┘");

    Ok(())
}
