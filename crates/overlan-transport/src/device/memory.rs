// ============================================
// File: crates/overlan-transport/src/device/memory.rs
// ============================================
//! # In-Memory Device
//!
//! ## Creation Reason
//! The software bridge needs devices that live entirely in process:
//! writes go to the bridge, frames the bridge delivers are queued until
//! the point's read loop picks them up. No privileges required, so this
//! is also the device every test uses.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The receive queue is bounded; a full queue drops the newest frame
//! - `read` registers for wakeups before checking state so a concurrent
//!   `close` is never missed
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory device

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{DeviceProvider, DeviceRegistry, DeviceStatus, VirtualDevice};
use crate::bridge::Bridge;
use crate::error::{Result, TransportError};

/// Frames held for a reader before new ones are dropped.
pub const RX_QUEUE_LIMIT: usize = 1024;

// ============================================
// MemoryDevice
// ============================================

struct DeviceState {
    status: DeviceStatus,
    mtu: u16,
    master: Option<Weak<dyn Bridge>>,
}

/// A virtual device backed by an in-memory queue.
pub struct MemoryDevice {
    name: String,
    tenant: String,
    me: Weak<MemoryDevice>,
    registry: Arc<DeviceRegistry>,
    state: Mutex<DeviceState>,
    rx: Mutex<VecDeque<Bytes>>,
    rx_ready: Notify,
}

impl MemoryDevice {
    fn new(
        name: String,
        tenant: &str,
        mtu: u16,
        registry: Arc<DeviceRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            tenant: tenant.to_string(),
            me: me.clone(),
            registry,
            state: Mutex::new(DeviceState {
                status: DeviceStatus::Created,
                mtu,
                master: None,
            }),
            rx: Mutex::new(VecDeque::new()),
            rx_ready: Notify::new(),
        })
    }

    fn register(&self) {
        if let Some(me) = self.me.upgrade() {
            self.registry.add(me);
        }
    }

    /// Frames waiting to be read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }
}

#[async_trait]
impl VirtualDevice for MemoryDevice {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let ready = self.rx_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if self.is_closed() {
                return Err(TransportError::device_closed(&self.name));
            }
            if let Some(frame) = self.rx.lock().pop_front() {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                return Ok(len);
            }

            ready.await;
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<usize> {
        let master = {
            let state = self.state.lock();
            if state.status == DeviceStatus::Closed {
                return Err(TransportError::device_closed(&self.name));
            }
            state.master.as_ref().and_then(Weak::upgrade)
        };

        match master {
            Some(bridge) => bridge.forward(&self.name, Bytes::copy_from_slice(frame))?,
            None => trace!(device = %self.name, "No bridge, frame discarded"),
        }
        Ok(frame.len())
    }

    fn close(&self) -> Result<()> {
        let master = {
            let mut state = self.state.lock();
            if state.status == DeviceStatus::Closed {
                return Ok(());
            }
            state.status = DeviceStatus::Closed;
            self.registry.remove(&self.name);
            state.master.take().and_then(|b| b.upgrade())
        };

        self.rx.lock().clear();
        self.rx_ready.notify_waiters();

        if let Some(bridge) = master {
            bridge.del_slave(&self.name)?;
        }
        debug!(device = %self.name, tenant = %self.tenant, "Device closed");
        Ok(())
    }

    fn up(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            DeviceStatus::Up => {}
            DeviceStatus::Created => state.status = DeviceStatus::Up,
            DeviceStatus::Closed => {
                state.status = DeviceStatus::Up;
                self.register();
                debug!(device = %self.name, "Device reopened");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }

    fn mtu(&self) -> u16 {
        self.state.lock().mtu
    }

    fn set_mtu(&self, mtu: u16) -> Result<()> {
        self.state.lock().mtu = mtu;
        Ok(())
    }

    fn slave(&self, bridge: Option<Weak<dyn Bridge>>) {
        self.state.lock().master = bridge;
    }

    fn master(&self) -> Option<Arc<dyn Bridge>> {
        self.state.lock().master.as_ref().and_then(Weak::upgrade)
    }

    fn status(&self) -> DeviceStatus {
        self.state.lock().status
    }

    fn inject(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::device_closed(&self.name));
        }
        {
            let mut rx = self.rx.lock();
            if rx.len() >= RX_QUEUE_LIMIT {
                return Err(TransportError::DeviceWriteFailed {
                    name: self.name.clone(),
                    reason: "receive queue full".into(),
                });
            }
            rx.push_back(frame);
        }
        self.rx_ready.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("name", &self.name)
            .field("tenant", &self.tenant)
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}

// ============================================
// MemoryProvider
// ============================================

/// Opens `MemoryDevice`s named `sw0`, `sw1`, ...
#[derive(Debug)]
pub struct MemoryProvider {
    registry: Arc<DeviceRegistry>,
    next: AtomicU32,
}

impl MemoryProvider {
    /// Creates a provider registering into `registry`.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            next: AtomicU32::new(0),
        }
    }
}

impl DeviceProvider for MemoryProvider {
    fn open(&self, tenant: &str, mtu: u16) -> Result<Arc<dyn VirtualDevice>> {
        let name = format!("sw{}", self.next.fetch_add(1, Ordering::Relaxed));
        let device: Arc<dyn VirtualDevice> =
            MemoryDevice::new(name, tenant, mtu, self.registry.clone());
        self.registry.add(device.clone());
        debug!(device = %device.name(), tenant = %tenant, "Device opened");
        Ok(device)
    }

    fn kind(&self) -> &'static str {
        "software"
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open(registry: &Arc<DeviceRegistry>) -> Arc<dyn VirtualDevice> {
        MemoryProvider::new(registry.clone()).open("blue", 1500).unwrap()
    }

    #[tokio::test]
    async fn test_inject_then_read() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry);
        dev.up().unwrap();

        dev.inject(Bytes::from_static(b"frame")).unwrap();
        let mut buf = [0u8; 64];
        let n = dev.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"frame");
    }

    #[tokio::test]
    async fn test_close_wakes_reader() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry);
        dev.up().unwrap();

        let reader = {
            let dev = dev.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                dev.read(&mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        dev.close().unwrap();

        let res = reader.await.unwrap();
        assert!(matches!(res, Err(TransportError::DeviceClosed { .. })));
    }

    #[tokio::test]
    async fn test_closed_device_rejects_io() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry);
        dev.close().unwrap();
        dev.close().unwrap();

        assert!(matches!(dev.write(b"x").await, Err(TransportError::DeviceClosed { .. })));
        let mut buf = [0u8; 8];
        assert!(matches!(dev.read(&mut buf).await, Err(TransportError::DeviceClosed { .. })));
        assert!(dev.inject(Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_reopen_registers_once() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry);
        assert_eq!(registry.len(), 1);

        dev.up().unwrap();
        dev.close().unwrap();
        assert!(registry.is_empty());

        dev.up().unwrap();
        dev.up().unwrap();
        assert!(dev.is_up());
        assert_eq!(registry.list(), vec![dev.name().to_string()]);
    }

    #[test]
    fn test_provider_names_are_unique() {
        let registry = Arc::new(DeviceRegistry::new());
        let provider = MemoryProvider::new(registry.clone());
        let a = provider.open("blue", 1500).unwrap();
        let b = provider.open("blue", 1500).unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(registry.len(), 2);
        assert_eq!(a.mtu(), 1500);
        a.set_mtu(1400).unwrap();
        assert_eq!(a.mtu(), 1400);
    }
}
