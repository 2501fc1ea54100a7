// ============================================
// File: crates/overlan-transport/src/bridge/linux.rs
// ============================================
//! # Linux Kernel Bridge
//!
//! Drives a Linux bridge with `ip link`. The kernel does the switching;
//! this type only creates the bridge, assigns its address and enslaves
//! TAP devices.
//!
//! Requires CAP_NET_ADMIN.

#![cfg(target_os = "linux")]

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::Bridge;
use crate::device::VirtualDevice;
use crate::error::{Result, TransportError};
use crate::ip;

#[derive(Debug, Default)]
struct KernelState {
    open: bool,
    slaves: HashMap<String, Arc<dyn VirtualDevice>>,
}

/// A Linux bridge.
#[derive(Debug)]
pub struct KernelBridge {
    name: String,
    mtu: u16,
    me: Weak<KernelBridge>,
    state: Mutex<KernelState>,
}

impl KernelBridge {
    /// Describes a bridge; nothing is created until `open`.
    #[must_use]
    pub fn new(name: &str, mtu: u16) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            mtu,
            me: me.clone(),
            state: Mutex::new(KernelState::default()),
        })
    }

    fn failed(&self, reason: String) -> TransportError {
        TransportError::bridge_failed(&self.name, reason)
    }
}

impl Bridge for KernelBridge {
    fn open(&self, address: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            return Ok(());
        }
        let mtu = self.mtu.to_string();
        ip::run_idempotent(&["link", "add", "name", &self.name, "type", "bridge"])
            .map_err(|e| self.failed(e))?;
        ip::run(&["link", "set", "dev", &self.name, "mtu", &mtu]).map_err(|e| self.failed(e))?;
        ip::run(&["link", "set", "dev", &self.name, "up"]).map_err(|e| self.failed(e))?;
        if let Some(addr) = address {
            ip::run_idempotent(&["address", "add", addr, "dev", &self.name])
                .map_err(|e| self.failed(e))?;
        }
        state.open = true;
        info!(bridge = %self.name, address = ?address, "Kernel bridge opened");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let slaves: Vec<_> = {
            let mut state = self.state.lock();
            if !state.open {
                return Ok(());
            }
            state.open = false;
            state.slaves.drain().map(|(_, dev)| dev).collect()
        };

        for dev in slaves {
            dev.slave(None);
            if let Err(e) = dev.close() {
                debug!(bridge = %self.name, device = %dev.name(), error = %e, "Slave close failed");
            }
        }
        if let Err(e) = ip::run(&["link", "set", "dev", &self.name, "down"]) {
            warn!(bridge = %self.name, error = %e, "Bridge down failed");
        }
        ip::run(&["link", "del", "dev", &self.name]).map_err(|e| self.failed(e))?;
        info!(bridge = %self.name, "Kernel bridge closed");
        Ok(())
    }

    fn add_slave(&self, device: Arc<dyn VirtualDevice>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::BridgeClosed {
                name: self.name.clone(),
            });
        }
        if state.slaves.contains_key(device.name()) {
            return Ok(());
        }
        device.up()?;
        ip::run(&["link", "set", "dev", device.name(), "master", &self.name])
            .map_err(|e| self.failed(e))?;
        let me: Weak<dyn Bridge> = self.me.clone();
        device.slave(Some(me));
        debug!(bridge = %self.name, device = %device.name(), "Slave attached");
        state.slaves.insert(device.name().to_string(), device);
        Ok(())
    }

    fn del_slave(&self, name: &str) -> Result<bool> {
        let removed = self.state.lock().slaves.remove(name);
        let Some(device) = removed else {
            return Ok(false);
        };
        device.slave(None);
        // The interface may already be gone with its descriptor.
        if let Err(e) = ip::run(&["link", "set", "dev", name, "nomaster"]) {
            debug!(bridge = %self.name, device = %name, error = %e, "nomaster failed");
        }
        debug!(bridge = %self.name, device = %name, "Slave detached");
        Ok(true)
    }

    fn kind(&self) -> &'static str {
        "kernel"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }

    fn slaves(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().slaves.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_bridge() {
        let bridge = KernelBridge::new("br-test", 1518);
        assert_eq!(bridge.kind(), "kernel");
        assert!(bridge.slaves().is_empty());
        // closing a bridge that was never opened touches nothing
        bridge.close().unwrap();
        assert!(!bridge.del_slave("tap0").unwrap());
    }
}
