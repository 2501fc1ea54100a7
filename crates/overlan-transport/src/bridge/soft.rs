// ============================================
// File: crates/overlan-transport/src/bridge/soft.rs
// ============================================
//! # Software Bridge
//!
//! ## Creation Reason
//! Switches frames between in-memory devices without touching the host
//! network stack. Used where the switch runs unprivileged and in tests.
//!
//! ## Forwarding
//! - Source MACs are learned on the ingress slave
//! - Known unicast goes to its learned slave, or is filtered when that
//!   slave is the ingress
//! - Broadcast, multicast and unknown unicast are flooded to every other
//!   slave
//! - Entries older than the aging time are ignored and swept on learn
//!
//! ## Last Modified
//! v0.1.0 - Initial software bridge

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use overlan_core::protocol::{Frame, MacAddr};

use super::Bridge;
use crate::device::VirtualDevice;
use crate::error::{Result, TransportError};

/// Default FDB aging time (IEEE 802.1D).
pub const DEFAULT_AGING_TIME_SECS: u64 = 300;

// ============================================
// Forwarding Database
// ============================================

#[derive(Debug)]
struct FdbEntry {
    port: String,
    last_seen: Instant,
}

#[derive(Debug)]
struct Fdb {
    entries: HashMap<MacAddr, FdbEntry>,
    max_age: Duration,
}

impl Fdb {
    fn learn(&mut self, mac: MacAddr, port: &str) {
        if mac.is_multicast() || mac.is_zero() {
            return;
        }
        let now = Instant::now();
        let max_age = self.max_age;
        self.entries
            .retain(|_, e| now.duration_since(e.last_seen) <= max_age);
        match self.entries.get_mut(&mac) {
            Some(entry) => {
                if entry.port != port {
                    debug!(mac = %mac, from = %entry.port, to = %port, "MAC moved");
                    entry.port = port.to_string();
                }
                entry.last_seen = now;
            }
            None => {
                self.entries.insert(
                    mac,
                    FdbEntry {
                        port: port.to_string(),
                        last_seen: now,
                    },
                );
            }
        }
    }

    fn lookup(&self, mac: &MacAddr) -> Option<&str> {
        self.entries
            .get(mac)
            .filter(|e| e.last_seen.elapsed() <= self.max_age)
            .map(|e| e.port.as_str())
    }

    fn remove_port(&mut self, port: &str) {
        self.entries.retain(|_, e| e.port != port);
    }
}

// ============================================
// SoftBridge
// ============================================

#[derive(Debug, Default)]
struct SoftState {
    open: bool,
    address: Option<String>,
    slaves: HashMap<String, Arc<dyn VirtualDevice>>,
}

/// In-process learning bridge.
#[derive(Debug)]
pub struct SoftBridge {
    name: String,
    mtu: u16,
    me: Weak<SoftBridge>,
    state: Mutex<SoftState>,
    fdb: Mutex<Fdb>,
}

impl SoftBridge {
    /// Creates a closed bridge with the default aging time.
    #[must_use]
    pub fn new(name: &str, mtu: u16) -> Arc<Self> {
        Self::with_aging(name, mtu, Duration::from_secs(DEFAULT_AGING_TIME_SECS))
    }

    /// Creates a closed bridge with a custom aging time.
    #[must_use]
    pub fn with_aging(name: &str, mtu: u16, max_age: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            mtu,
            me: me.clone(),
            state: Mutex::new(SoftState::default()),
            fdb: Mutex::new(Fdb {
                entries: HashMap::new(),
                max_age,
            }),
        })
    }

    /// Slave a MAC was learned on, if the entry is still fresh.
    #[must_use]
    pub fn lookup(&self, mac: &MacAddr) -> Option<String> {
        self.fdb.lock().lookup(mac).map(str::to_string)
    }

    /// Address assigned at open.
    #[must_use]
    pub fn address(&self) -> Option<String> {
        self.state.lock().address.clone()
    }
}

impl Bridge for SoftBridge {
    fn open(&self, address: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        state.open = true;
        state.address = address.map(str::to_string);
        info!(bridge = %self.name, address = ?address, "Software bridge opened");
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
        self.fdb.lock().entries.clear();

        for dev in slaves {
            dev.slave(None);
            if let Err(e) = dev.close() {
                debug!(bridge = %self.name, device = %dev.name(), error = %e, "Slave close failed");
            }
        }
        info!(bridge = %self.name, "Software bridge closed");
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
        self.fdb.lock().remove_port(name);
        device.slave(None);
        debug!(bridge = %self.name, device = %name, "Slave detached");
        Ok(true)
    }

    fn kind(&self) -> &'static str {
        "software"
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

    fn forward(&self, ingress: &str, frame: Bytes) -> Result<()> {
        let parsed = Frame::parse(frame);
        let Some(header) = parsed.ethernet().copied() else {
            trace!(bridge = %self.name, len = parsed.len(), "Runt frame dropped");
            return Ok(());
        };

        let egress: Option<String> = {
            let mut fdb = self.fdb.lock();
            fdb.learn(header.src, ingress);
            if header.dst.is_multicast() {
                None
            } else {
                fdb.lookup(&header.dst).map(str::to_string)
            }
        };

        let targets: Vec<Arc<dyn VirtualDevice>> = {
            let state = self.state.lock();
            if !state.open {
                return Err(TransportError::BridgeClosed {
                    name: self.name.clone(),
                });
            }
            match egress {
                Some(port) if port == ingress => Vec::new(),
                Some(port) => state.slaves.get(&port).cloned().into_iter().collect(),
                None => state
                    .slaves
                    .iter()
                    .filter(|(name, _)| name.as_str() != ingress)
                    .map(|(_, dev)| dev.clone())
                    .collect(),
            }
        };

        let data = parsed.into_bytes();
        for dev in targets {
            if let Err(e) = dev.inject(data.clone()) {
                trace!(bridge = %self.name, device = %dev.name(), error = %e, "Delivery failed");
            }
        }
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProvider, DeviceRegistry, MemoryProvider};

    fn frame(dst: [u8; 6], src: [u8; 6]) -> Bytes {
        let mut raw = Vec::new();
        raw.extend_from_slice(&dst);
        raw.extend_from_slice(&src);
        raw.extend_from_slice(&[0x08, 0x00]);
        raw.extend_from_slice(&[0u8; 20]);
        raw.into()
    }

    fn setup(n: usize) -> (Arc<SoftBridge>, Vec<Arc<dyn VirtualDevice>>, Arc<DeviceRegistry>) {
        let registry = Arc::new(DeviceRegistry::new());
        let provider = MemoryProvider::new(registry.clone());
        let bridge = SoftBridge::new("br-blue", 1518);
        bridge.open(None).unwrap();
        let devs: Vec<_> = (0..n)
            .map(|_| {
                let dev = provider.open("blue", 1518).unwrap();
                bridge.add_slave(dev.clone()).unwrap();
                dev
            })
            .collect();
        (bridge, devs, registry)
    }

    async fn read(dev: &Arc<dyn VirtualDevice>) -> Bytes {
        let mut buf = [0u8; 2048];
        let n = dev.read(&mut buf).await.unwrap();
        Bytes::copy_from_slice(&buf[..n])
    }

    const A: [u8; 6] = [2, 0, 0, 0, 0, 0xa];
    const B: [u8; 6] = [2, 0, 0, 0, 0, 0xb];

    #[tokio::test]
    async fn test_broadcast_floods_except_ingress() {
        let (_bridge, devs, _) = setup(3);
        let f = frame([0xff; 6], A);
        devs[0].write(&f).await.unwrap();

        assert_eq!(read(&devs[1]).await, f);
        assert_eq!(read(&devs[2]).await, f);
        let mut buf = [0u8; 64];
        let pending = tokio::time::timeout(Duration::from_millis(20), devs[0].read(&mut buf)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_learned_unicast_is_not_flooded() {
        let (bridge, devs, _) = setup(3);
        devs[1].write(&frame([0xff; 6], B)).await.unwrap();
        assert_eq!(bridge.lookup(&MacAddr(B)).as_deref(), Some(devs[1].name()));
        // drain the flood copies
        read(&devs[0]).await;
        read(&devs[2]).await;

        let f = frame(B, A);
        devs[0].write(&f).await.unwrap();
        assert_eq!(read(&devs[1]).await, f);

        let mut buf = [0u8; 64];
        let other = tokio::time::timeout(Duration::from_millis(20), devs[2].read(&mut buf)).await;
        assert!(other.is_err());
    }

    #[test]
    fn test_entries_age_out() {
        let bridge = SoftBridge::with_aging("br-t", 1518, Duration::from_millis(1));
        bridge.open(None).unwrap();
        bridge.fdb.lock().learn(MacAddr(A), "sw0");
        std::thread::sleep(Duration::from_millis(5));
        assert!(bridge.lookup(&MacAddr(A)).is_none());
    }

    #[test]
    fn test_close_closes_slaves() {
        let (bridge, devs, registry) = setup(2);
        assert_eq!(registry.len(), 2);

        bridge.close().unwrap();
        assert!(devs.iter().all(|d| d.is_closed()));
        assert!(registry.is_empty());
        assert!(bridge.slaves().is_empty());
        bridge.close().unwrap();
    }

    #[test]
    fn test_device_close_detaches() {
        let (bridge, devs, _) = setup(2);
        devs[0].close().unwrap();
        assert_eq!(bridge.slaves(), vec![devs[1].name().to_string()]);
        assert!(!bridge.del_slave(devs[0].name()).unwrap());
    }

    #[test]
    fn test_add_slave_requires_open_bridge() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = MemoryProvider::new(registry).open("blue", 1518).unwrap();
        let bridge = SoftBridge::new("br-x", 1518);
        assert!(matches!(
            bridge.add_slave(dev.clone()),
            Err(TransportError::BridgeClosed { .. })
        ));

        bridge.open(Some("10.0.0.1/24")).unwrap();
        bridge.add_slave(dev.clone()).unwrap();
        bridge.add_slave(dev.clone()).unwrap();
        assert!(dev.is_up());
        assert_eq!(bridge.slaves().len(), 1);
        assert_eq!(bridge.address().as_deref(), Some("10.0.0.1/24"));
    }
}
