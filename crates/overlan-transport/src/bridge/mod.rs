// ============================================
// File: crates/overlan-transport/src/bridge/mod.rs
// ============================================
//! # Bridges
//!
//! ## Creation Reason
//! Every tenant network is one L2 segment. A bridge aggregates the
//! virtual devices of that tenant's points and switches frames between
//! them.
//!
//! ## Main Functionality
//! - `Bridge`: bridge capability set
//! - `BridgeProviders`: bridge factories keyed by kind
//! - [`soft`]: in-process learning switch
//! - [`linux`]: Linux kernel bridge
//!
//! ## ⚠️ Important Note for Next Developer
//! - `add_slave` brings the device up and attaches it while holding the
//!   slave lock; `close` drains the slaves first and closes them after
//!   releasing it, so a device's own detach during close finds nothing
//! - A bridge's kind selects the device provider for its slaves
//!
//! ## Last Modified
//! v0.1.0 - Initial bridge layer

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::device::VirtualDevice;
use crate::error::{Result, TransportError};

pub mod soft;

#[cfg(target_os = "linux")]
pub mod linux;

pub use soft::SoftBridge;

#[cfg(target_os = "linux")]
pub use linux::KernelBridge;

// ============================================
// Bridge Trait
// ============================================

/// An L2 bridge over virtual devices.
pub trait Bridge: Send + Sync + fmt::Debug {
    /// Creates the bridge and assigns `address` (CIDR) if given.
    fn open(&self, address: Option<&str>) -> Result<()>;

    /// Closes every slave, then the bridge itself.
    fn close(&self) -> Result<()>;

    /// Brings `device` up and attaches it. Attaching an attached device
    /// is a no-op.
    fn add_slave(&self, device: Arc<dyn VirtualDevice>) -> Result<()>;

    /// Detaches a device by name; `Ok(false)` if it was not attached.
    fn del_slave(&self, name: &str) -> Result<bool>;

    /// Provider kind.
    fn kind(&self) -> &'static str;

    /// Bridge name.
    fn name(&self) -> &str;

    /// MTU applied to slaves.
    fn mtu(&self) -> u16;

    /// Names of attached devices, sorted.
    fn slaves(&self) -> Vec<String>;

    /// Switches a frame written into slave `ingress`.
    ///
    /// Kernel bridges forward in the kernel and accept the default no-op.
    fn forward(&self, _ingress: &str, _frame: Bytes) -> Result<()> {
        Ok(())
    }
}

// ============================================
// BridgeProviders
// ============================================

/// What a provider needs to build a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    /// Bridge name
    pub name: String,
    /// Slave MTU
    pub mtu: u16,
}

/// Builds a bridge from a spec.
pub type BridgeFactory = Arc<dyn Fn(&BridgeSpec) -> Result<Arc<dyn Bridge>> + Send + Sync>;

/// Bridge factories keyed by kind.
#[derive(Clone, Default)]
pub struct BridgeProviders {
    factories: HashMap<String, BridgeFactory>,
}

impl BridgeProviders {
    /// Creates an empty provider map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the built-in providers: `software`, and `kernel` on Linux.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut providers = Self::new();
        providers.register("software", |spec| {
            Ok(SoftBridge::new(&spec.name, spec.mtu) as Arc<dyn Bridge>)
        });
        #[cfg(target_os = "linux")]
        providers.register("kernel", |spec| {
            Ok(KernelBridge::new(&spec.name, spec.mtu) as Arc<dyn Bridge>)
        });
        providers
    }

    /// Registers or replaces a factory.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&BridgeSpec) -> Result<Arc<dyn Bridge>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Builds a bridge of `kind`; it still has to be opened.
    ///
    /// # Errors
    /// `UnknownProvider` if nothing is registered under `kind`.
    pub fn create(&self, kind: &str, spec: &BridgeSpec) -> Result<Arc<dyn Bridge>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| TransportError::UnknownProvider {
                what: "bridge",
                key: kind.to_string(),
            })?;
        factory(spec)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for BridgeProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeProviders")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_providers() {
        let providers = BridgeProviders::with_defaults();
        assert!(providers.kinds().contains(&"software".to_string()));

        let spec = BridgeSpec {
            name: "br-blue".into(),
            mtu: 1518,
        };
        let bridge = providers.create("software", &spec).unwrap();
        assert_eq!(bridge.kind(), "software");
        assert_eq!(bridge.name(), "br-blue");
        assert!(matches!(
            providers.create("ovs", &spec),
            Err(TransportError::UnknownProvider { what: "bridge", .. })
        ));
    }
}
