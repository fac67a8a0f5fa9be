//! Prometheus metrics for control-tree access
//!
//! Counters are registered in the default registry the first time they are
//! touched. They record the transient-error retries the control plane
//! absorbs, so a slow or misbehaving kernel shows up on a dashboard instead
//! of only in logs.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Writes to control files that were interrupted (EINTR) and retried.
    pub static ref WRITE_INTERRUPTS: IntCounter = register_int_counter!(
        "cgplane_write_interrupts_total",
        "Control file writes interrupted by a signal and retried"
    ).expect("failed to register WRITE_INTERRUPTS metric");

    /// Opens that went through the user-space secure join instead of openat2.
    pub static ref SECURE_JOIN_FALLBACKS: IntCounter = register_int_counter!(
        "cgplane_secure_join_fallbacks_total",
        "Control file opens resolved with the user-space secure join"
    ).expect("failed to register SECURE_JOIN_FALLBACKS metric");

    /// cgroup.procs writes retried after EINVAL.
    pub static ref ENROLL_RETRIES: IntCounter = register_int_counter!(
        "cgplane_enroll_retries_total",
        "Process enrollments retried after EINVAL"
    ).expect("failed to register ENROLL_RETRIES metric");

    /// freezer.state polls that did not yet show the desired state.
    ///
    /// Labels:
    /// - state: the state being waited for ("FROZEN", "THAWED") or
    ///   "FREEZING" when the kernel reported the transient state
    pub static ref FREEZER_POLLS: IntCounterVec = register_int_counter_vec!(
        "cgplane_freezer_polls_total",
        "freezer.state polls that had to wait for the kernel",
        &["state"]
    ).expect("failed to register FREEZER_POLLS metric");

    /// Paths still present after every removal round.
    pub static ref REMOVE_FAILURES: IntCounter = register_int_counter!(
        "cgplane_remove_failures_total",
        "Control group directories that could not be removed"
    ).expect("failed to register REMOVE_FAILURES metric");
}

/// Render every metric in the default registry in text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
