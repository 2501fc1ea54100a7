// ============================================
// File: crates/overlan-switch/src/worker.rs
// ============================================
//! # Tenant Worker
//!
//! ## Creation Reason
//! Each tenant network gets one worker owning its bridge. The worker
//! creates devices on that bridge for authenticated points and runs the
//! loops copying device frames back to the point's connection.
//!
//! ## Main Functionality
//! - `start()`: opens the bridge with its configured address
//! - `new_tap()` / `free_tap()`: attach and detach devices
//! - `read_tap()`: device → client copy loop
//! - `stop()`: aborts every copy loop
//!
//! ## ⚠️ Important Note for Next Developer
//! - Copy loops hold a `CloseOnDrop` guard; aborting a loop closes its
//!   device
//! - The device provider is chosen by the bridge kind
//!
//! ## Last Modified
//! v0.1.0 - Initial worker

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use overlan_transport::device::{CloseOnDrop, DeviceProviders};
use overlan_transport::tcp::MAX_FRAME_LEN;
use overlan_transport::{Bridge, VirtualDevice};

use crate::client::Client;
use crate::error::Result;

/// Bridge and device loops of one tenant.
pub struct Worker {
    tenant: String,
    address: Option<String>,
    bridge: Arc<dyn Bridge>,
    devices: Arc<DeviceProviders>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Creates a worker; the bridge is opened by `start()`.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        bridge: Arc<dyn Bridge>,
        address: Option<String>,
        devices: Arc<DeviceProviders>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            address,
            bridge,
            devices,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Tenant network name.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[must_use]
    #[allow(missing_docs)]
    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    /// Opens the bridge.
    ///
    /// # Errors
    /// Bridge provider errors.
    pub fn start(&self) -> Result<()> {
        self.bridge.open(self.address.as_deref())?;
        info!(
            tenant = %self.tenant,
            bridge = %self.bridge.name(),
            kind = self.bridge.kind(),
            "Worker started"
        );
        Ok(())
    }

    /// Opens a device and attaches it to the bridge. A device that
    /// cannot be attached is closed again.
    ///
    /// # Errors
    /// Unknown device provider, device creation or attach failures.
    pub fn new_tap(&self) -> Result<Arc<dyn VirtualDevice>> {
        let provider = self.devices.get(self.bridge.kind())?;
        let device = provider.open(&self.tenant, self.bridge.mtu())?;

        if let Err(e) = self.bridge.add_slave(device.clone()) {
            if let Err(close) = device.close() {
                debug!(device = %device.name(), error = %close, "Device close failed");
            }
            return Err(e.into());
        }
        debug!(tenant = %self.tenant, device = %device.name(), "Device attached");
        Ok(device)
    }

    /// Detaches `device`; an already detached device is fine.
    ///
    /// # Errors
    /// Bridge provider errors.
    pub fn free_tap(&self, device: &Arc<dyn VirtualDevice>) -> Result<()> {
        if self.bridge.del_slave(device.name())? {
            debug!(tenant = %self.tenant, device = %device.name(), "Device detached");
        } else {
            debug!(tenant = %self.tenant, device = %device.name(), "Device already detached");
        }
        Ok(())
    }

    /// Spawns the loop copying frames from `device` to `client`. The loop
    /// ends on a read or send error and always closes the device.
    pub fn read_tap(&self, device: Arc<dyn VirtualDevice>, client: Arc<Client>) {
        let tenant = self.tenant.clone();
        let handle = tokio::spawn(async move {
            let guard = CloseOnDrop::new(device);
            let device = guard.device();
            let mut buf = vec![0u8; MAX_FRAME_LEN];
            loop {
                let len = match device.read(&mut buf).await {
                    Ok(len) => len,
                    Err(e) => {
                        debug!(tenant = %tenant, device = %device.name(), error = %e, "Device read ended");
                        break;
                    }
                };
                trace!(device = %device.name(), client = %client.addr(), len, "Device frame");
                if let Err(e) = client.send(&buf[..len]).await {
                    debug!(tenant = %tenant, client = %client.addr(), error = %e, "Client send failed");
                    break;
                }
            }
        });

        let mut loops = self.loops.lock();
        loops.retain(|h| !h.is_finished());
        loops.push(handle);
    }

    /// Copy loops still running.
    #[must_use]
    pub fn active_loops(&self) -> usize {
        self.loops.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Aborts every copy loop.
    pub fn stop(&self) {
        let loops = std::mem::take(&mut *self.loops.lock());
        let count = loops.len();
        for handle in loops {
            handle.abort();
        }
        info!(tenant = %self.tenant, loops = count, "Worker stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("tenant", &self.tenant)
            .field("bridge", &self.bridge.name())
            .field("slaves", &self.bridge.slaves())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use overlan_transport::{DeviceRegistry, SoftBridge};

    use crate::testing::client;

    fn worker() -> (Worker, Arc<DeviceRegistry>) {
        let registry = Arc::new(DeviceRegistry::new());
        let devices = Arc::new(DeviceProviders::with_defaults(&registry));
        let bridge: Arc<dyn Bridge> = SoftBridge::new("br-corp", 1518);
        (Worker::new("corp", bridge, None, devices), registry)
    }

    #[test]
    fn test_new_tap_requires_started_bridge() {
        let (worker, registry) = worker();
        assert!(worker.new_tap().is_err());
        assert!(registry.is_empty());

        worker.start().unwrap();
        let device = worker.new_tap().unwrap();
        assert!(device.is_up());
        assert_eq!(device.tenant(), "corp");
        assert_eq!(worker.bridge().slaves(), vec![device.name().to_string()]);
    }

    #[test]
    fn test_free_tap_twice() {
        let (worker, _) = worker();
        worker.start().unwrap();
        let device = worker.new_tap().unwrap();
        worker.free_tap(&device).unwrap();
        worker.free_tap(&device).unwrap();
        assert!(worker.bridge().slaves().is_empty());
    }

    #[tokio::test]
    async fn test_read_tap_forwards_and_closes_on_stop() {
        let (worker, registry) = worker();
        worker.start().unwrap();
        let device = worker.new_tap().unwrap();
        let (client, mut rx) = client("10.9.0.1:4000");

        worker.read_tap(device.clone(), client);
        let frame = Bytes::from_static(&[0xff; 60]);
        device.inject(frame.clone()).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, frame);

        worker.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(device.is_closed());
        assert!(registry.is_empty());
    }
}
