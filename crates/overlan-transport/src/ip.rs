// ============================================
// File: crates/overlan-transport/src/ip.rs
// ============================================
//! # `ip` Command Helper
//!
//! Kernel devices and bridges are configured through iproute2 rather
//! than netlink. Every invocation goes through [`run`] so failures carry
//! the command line and stderr.

#![cfg(target_os = "linux")]

use std::process::Command;

use tracing::debug;

/// Output fragments meaning the desired state already holds.
const ALREADY_DONE: [&str; 2] = ["File exists", "already"];

/// Runs `ip <args>`; returns stderr as the error text on failure.
pub(crate) fn run(args: &[&str]) -> std::result::Result<(), String> {
    debug!(cmd = %args.join(" "), "ip");
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| format!("ip {}: {e}", args.join(" ")))?;
    if output.status.success() {
        return Ok(());
    }
    Err(format!(
        "ip {}: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

/// Like [`run`] but treats "already exists" answers as success.
pub(crate) fn run_idempotent(args: &[&str]) -> std::result::Result<(), String> {
    match run(args) {
        Err(e) if ALREADY_DONE.iter().any(|m| e.contains(m)) => Ok(()),
        other => other,
    }
}
