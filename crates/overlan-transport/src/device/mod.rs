// ============================================
// File: crates/overlan-transport/src/device/mod.rs
// ============================================
//! # Virtual Devices
//!
//! ## Creation Reason
//! Each authenticated point is backed by one virtual Ethernet device
//! enslaved to its tenant's bridge. Frames from the point are written
//! into the device; frames the bridge sends to the device are read back
//! out and pushed to the point.
//!
//! ## Main Functionality
//! - `VirtualDevice`: device capability set and lifecycle
//! - `DeviceRegistry`: the devices currently open, by name
//! - `DeviceProvider` / `DeviceProviders`: device factories by kind
//! - `CloseOnDrop`: guard that closes a device when a read loop exits
//!
//! ## Lifecycle
//! ```text
//!   open ──► Created ──up()──► Up ──close()──► Closed
//!                               ▲                 │
//!                               └──────up()───────┘  (reopen)
//! ```
//! The registry holds a device from successful open (or reopen) until
//! close.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A device never holds its own lock while calling into its bridge;
//!   bridges call into devices while holding theirs
//! - Devices refer to their bridge weakly
//!
//! ## Last Modified
//! v0.1.0 - Initial device layer

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::bridge::Bridge;
use crate::error::{Result, TransportError};

pub mod memory;

#[cfg(target_os = "linux")]
pub mod linux;

pub use memory::{MemoryDevice, MemoryProvider};

#[cfg(target_os = "linux")]
pub use linux::{KernelTap, KernelTapProvider};

/// Default device MTU.
pub const DEFAULT_MTU: u16 = 1518;

// ============================================
// DeviceStatus
// ============================================

/// Lifecycle state of a virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Opened, not yet up.
    Created,
    /// Passing frames.
    Up,
    /// Closed; reads and writes fail.
    Closed,
}

// ============================================
// VirtualDevice Trait
// ============================================

/// A virtual Ethernet device.
#[async_trait]
pub trait VirtualDevice: Send + Sync + fmt::Debug {
    /// Reads one frame into `buf`, waiting until one is available.
    ///
    /// # Errors
    /// `DeviceClosed` once the device is closed, including while waiting.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes one frame into the device.
    ///
    /// # Errors
    /// `DeviceClosed` if the device is closed.
    async fn write(&self, frame: &[u8]) -> Result<usize>;

    /// Closes the device, detaches it from its bridge and unregisters it.
    /// Closing a closed device is a no-op.
    fn close(&self) -> Result<()>;

    /// Brings the device up; reopens it if it was closed.
    fn up(&self) -> Result<()>;

    /// Device name, unique within a registry.
    fn name(&self) -> &str;

    /// Tenant the device serves.
    fn tenant(&self) -> &str;

    /// Current MTU.
    fn mtu(&self) -> u16;

    /// Changes the MTU.
    fn set_mtu(&self, mtu: u16) -> Result<()>;

    /// Records the bridge this device is enslaved to, or clears it.
    fn slave(&self, bridge: Option<Weak<dyn Bridge>>);

    /// The bridge this device is enslaved to, if it is still alive.
    fn master(&self) -> Option<Arc<dyn Bridge>>;

    /// Lifecycle state.
    fn status(&self) -> DeviceStatus;

    /// Returns `true` while the device is up.
    fn is_up(&self) -> bool {
        self.status() == DeviceStatus::Up
    }

    /// Returns `true` once the device is closed.
    fn is_closed(&self) -> bool {
        self.status() == DeviceStatus::Closed
    }

    /// Queues a frame for `read`, as if the bridge had sent it.
    ///
    /// Only devices driven by an in-process bridge support this.
    fn inject(&self, _frame: Bytes) -> Result<()> {
        Err(TransportError::Unsupported {
            operation: "inject",
            kind: self.name().to_string(),
        })
    }
}

// ============================================
// DeviceRegistry
// ============================================

/// Open devices by name. One registry per switch.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<dyn VirtualDevice>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device. Registering the same name again keeps the
    /// existing entry.
    pub fn add(&self, device: Arc<dyn VirtualDevice>) {
        let name = device.name().to_string();
        self.devices.entry(name).or_insert(device);
    }

    /// Removes a device; returns `true` if it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.devices.remove(name).is_some()
    }

    /// Looks a device up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn VirtualDevice>> {
        self.devices.get(name).map(|d| d.value().clone())
    }

    /// Names of all registered devices, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.devices.iter().map(|d| d.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.list())
            .finish()
    }
}

// ============================================
// Providers
// ============================================

/// Opens devices of one kind.
pub trait DeviceProvider: Send + Sync {
    /// Opens a device for `tenant` and registers it.
    ///
    /// Nothing is registered when opening fails.
    fn open(&self, tenant: &str, mtu: u16) -> Result<Arc<dyn VirtualDevice>>;

    /// Provider kind, matching the bridge kind it pairs with.
    fn kind(&self) -> &'static str;
}

/// Device providers keyed by kind.
#[derive(Clone, Default)]
pub struct DeviceProviders {
    providers: HashMap<String, Arc<dyn DeviceProvider>>,
}

impl DeviceProviders {
    /// Creates an empty provider map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the built-in providers, all registering into `registry`.
    #[must_use]
    pub fn with_defaults(registry: &Arc<DeviceRegistry>) -> Self {
        let mut providers = Self::new();
        providers.register(Arc::new(MemoryProvider::new(registry.clone())));
        #[cfg(target_os = "linux")]
        providers.register(Arc::new(KernelTapProvider::new(registry.clone())));
        providers
    }

    /// Registers or replaces a provider under its kind.
    pub fn register(&mut self, provider: Arc<dyn DeviceProvider>) {
        self.providers.insert(provider.kind().to_string(), provider);
    }

    /// Provider for `kind`.
    ///
    /// # Errors
    /// `UnknownProvider` if none is registered.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn DeviceProvider>> {
        self.providers
            .get(kind)
            .cloned()
            .ok_or_else(|| TransportError::UnknownProvider {
                what: "device",
                key: kind.to_string(),
            })
    }
}

impl fmt::Debug for DeviceProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.providers.keys().collect();
        kinds.sort();
        f.debug_struct("DeviceProviders").field("kinds", &kinds).finish()
    }
}

// ============================================
// CloseOnDrop
// ============================================

/// Closes the wrapped device when dropped.
#[derive(Debug)]
pub struct CloseOnDrop(Arc<dyn VirtualDevice>);

impl CloseOnDrop {
    /// Wraps `device`.
    #[must_use]
    pub fn new(device: Arc<dyn VirtualDevice>) -> Self {
        Self(device)
    }

    /// The guarded device.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn VirtualDevice> {
        &self.0
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Err(e) = self.0.close() {
            debug!(device = %self.0.name(), error = %e, "Close on drop failed");
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_add_is_idempotent() {
        let registry = Arc::new(DeviceRegistry::new());
        let provider = MemoryProvider::new(registry.clone());
        let dev = provider.open("blue", DEFAULT_MTU).unwrap();

        registry.add(dev.clone());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(dev.name()).is_some());
        assert!(registry.remove(dev.name()));
        assert!(!registry.remove(dev.name()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_device_provider() {
        let registry = Arc::new(DeviceRegistry::new());
        let providers = DeviceProviders::with_defaults(&registry);
        assert!(providers.get("software").is_ok());
        assert!(matches!(
            providers.get("vpp"),
            Err(TransportError::UnknownProvider { what: "device", .. })
        ));
    }

    #[test]
    fn test_close_on_drop() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = MemoryProvider::new(registry.clone()).open("blue", DEFAULT_MTU).unwrap();
        {
            let _guard = CloseOnDrop::new(dev.clone());
        }
        assert!(dev.is_closed());
        assert!(registry.is_empty());
    }
}
