// ============================================
// File: crates/overlan-switch/src/storage/mod.rs
// ============================================
//! # Storage Registries
//!
//! ## Main Functionality
//! - `PointStore`: authenticated points by client address and uuid
//! - `NetworkStore`: per-tenant address pools and their leases
//!
//! ## ⚠️ Important Note for Next Developer
//! - Lock order is `PointStore` then pool; `PointStore::remove_client`
//!   frees leases inside its own critical section
//!
//! ## Last Modified
//! v0.1.0 - Initial storage registries

pub mod network;
pub mod point;

pub use network::{AddressPool, NetworkStore};
pub use point::{Point, PointStore};
