// ============================================
// File: crates/overlan-common/src/lib.rs
// ============================================
//! # Overlan Common
//!
//! ## Creation Reason
//! Holds the small set of types every overlan crate needs: liveness
//! timestamps, address ranges and the switch identity.
//!
//! ## Main Functionality
//! - [`types`]: `SwitchId`, `IpRange`
//! - [`time`]: `AtomicInstant` for lock-free last-seen tracking, `Timestamp`
//! - [`error`]: `CommonError` and the crate `Result` alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 overlan-switch                      │
//! │                      │                              │
//! │          ┌───────────┴───────────┐                  │
//! │          ▼                       ▼                  │
//! │   overlan-core ◄──────── overlan-transport          │
//! │          │                       │                  │
//! │          └───────────┬───────────┘                  │
//! │                      ▼                              │
//! │              overlan-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies allowed
//! - Everything here is shared by the data plane, keep it allocation-light
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

pub use error::{CommonError, Result};
pub use time::{AtomicInstant, Timestamp};
pub use types::{IpRange, SwitchId};
