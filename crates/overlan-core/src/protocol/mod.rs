// ============================================
// File: crates/overlan-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Main Functionality
//! - [`frame`]: Ethernet frame view and MAC addresses
//! - [`control`]: control messages carried in zero-destination frames
//!
//! ## Frame Layout
//! ```text
//! data frame:     | dst mac (6) | src mac (6) | ethertype (2) | payload ... |
//! control frame:  | 00 00 00 00 00 00 | type (1) | JSON payload ...         |
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod control;
pub mod frame;

pub use control::{AuthRequest, ControlMessage, ControlType, Route};
pub use frame::{EthernetHeader, Frame, MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};
