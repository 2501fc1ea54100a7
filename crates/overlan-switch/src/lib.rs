// ============================================
// File: crates/overlan-switch/src/lib.rs
// ============================================
//! # Overlan Switch Library
//!
//! ## Creation Reason
//! Central server of the overlay: accepts point connections, logs points
//! into tenant networks and bridges their Ethernet frames onto per-tenant
//! virtual devices.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`switch`]: lifecycle and connection handling
//! - [`worker`]: per-tenant bridge and device loops
//! - [`apps`]: frame pipeline stages
//!   - [`apps::auth`]: login
//!   - [`apps::neighbor`]: MAC/IP learning
//!   - [`apps::request`]: address leases
//!   - [`apps::online`]: activity tracking
//! - [`storage`]: point registry and address pools
//! - [`client`]: connection sessions
//! - [`firewall`]: host forwarding rules
//! - [`config`]: configuration
//! - [`error`]: switch error types
//!
//! ## Data Flow
//! ```text
//! Point → transport → Pipeline → tenant device → Bridge → other devices
//! Point ← transport ← device read loop ←──────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The kernel providers need root or CAP_NET_ADMIN; the software ones
//!   need nothing
//! - Configuration changes require restart
//!
//! ## Last Modified
//! v0.1.0 - Initial switch library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod apps;
pub mod client;
pub mod config;
pub mod error;
pub mod firewall;
pub mod storage;
pub mod switch;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export primary types
pub use client::{Client, ClientStatus};
pub use config::SwitchConfig;
pub use error::{Result, ServerError};
pub use firewall::{FilterRule, MemoryBackend, RuleBackend};
pub use switch::{Collaborators, Switch};
