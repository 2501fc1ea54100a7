// ============================================
// File: crates/overlan-transport/src/lib.rs
// ============================================
//! # Overlan Transport
//!
//! ## Creation Reason
//! Everything the switch reads frames from or writes frames to: tunnel
//! connections from points, per-point virtual devices, and the per-tenant
//! bridges that join those devices.
//!
//! ## Main Functionality
//! - [`traits`]: `Listener`, `FrameStream`, `FrameSink`, `TransportRegistry`
//! - [`tcp`]: framed TCP transport
//! - [`device`]: `VirtualDevice`, `DeviceRegistry`, device providers
//! - [`bridge`]: `Bridge`, `BridgeProviders`, software and kernel bridges
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 overlan-switch                      │
//! │                      │                              │
//! │          ┌───────────┴───────────┐                  │
//! │          ▼                       ▼                  │
//! │   overlan-core ◄──────── overlan-transport          │
//! │                          You are here               │
//! │          └───────────┬───────────┘                  │
//! │                      ▼                              │
//! │               overlan-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Platform Support
//! - Linux: software and kernel providers
//! - Elsewhere: software providers only
//!
//! ## ⚠️ Important Note for Next Developer
//! - Kernel providers need CAP_NET_ADMIN; tests use software providers
//! - Never hold a device or bridge lock across an `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod device;
pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(target_os = "linux")]
mod ip;

pub use bridge::{Bridge, BridgeProviders, BridgeSpec, SoftBridge};
pub use device::{
    CloseOnDrop, DeviceProvider, DeviceProviders, DeviceRegistry, DeviceStatus, MemoryDevice,
    VirtualDevice,
};
pub use error::{Result, TransportError};
pub use tcp::TcpFrameListener;
pub use traits::{Connection, FrameSink, FrameStream, Listener, TransportRegistry};
