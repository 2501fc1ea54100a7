// ============================================
// File: crates/overlan-core/src/lib.rs
// ============================================
//! # Overlan Core - Frame Model
//!
//! ## Creation Reason
//! Every byte that crosses the switch is an Ethernet frame. This crate
//! owns the view of those bytes: header fields, sender extraction for
//! neighbor learning, and the control-frame codec points use to log in
//! and lease addresses.
//!
//! ## Main Functionality
//! - [`protocol::Frame`]: zero-copy frame over `bytes::Bytes`
//! - [`protocol::MacAddr`] / [`protocol::EthernetHeader`]
//! - [`protocol::ControlMessage`]: auth and lease exchange
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 overlan-switch                      │
//! │                      │                              │
//! │          ┌───────────┴───────────┐                  │
//! │          ▼                       ▼                  │
//! │   overlan-core ◄──────── overlan-transport          │
//! │   You are here                   │                  │
//! │          └───────────┬───────────┘                  │
//! │                      ▼                              │
//! │               overlan-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Frame::parse` must never fail: short or odd frames still forward
//! - Control frames are recognised only by the all-zero destination MAC
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;

pub use error::{CoreError, Result};
pub use protocol::{ControlMessage, ControlType, EthernetHeader, Frame, MacAddr, Route};
