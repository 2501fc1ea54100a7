// ============================================
// File: crates/overlan-switch/src/storage/point.rs
// ============================================
//! # Point Registry
//!
//! ## Creation Reason
//! Tracks authenticated points and which client address currently holds
//! each uuid, so that a stale connection closing after its uuid has
//! reconnected elsewhere cannot release the new holder's lease.
//!
//! ## Main Functionality
//! - `Point`: per-session forwarding state
//! - `PointStore`: address and uuid indexes behind one lock
//!
//! ## ⚠️ Important Note for Next Developer
//! - The newest `add()` for a uuid becomes its holder
//! - `remove_client()` runs its callback under the store lock; keep it
//!   short and never call back into the store from it
//!
//! ## Last Modified
//! v0.1.0 - Initial point registry

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use overlan_common::{AtomicInstant, Timestamp};
use overlan_transport::VirtualDevice;

// ============================================
// Point
// ============================================

/// An authenticated remote endpoint.
pub struct Point {
    /// Stable point identity.
    pub uuid: String,
    /// Address of the owning client connection.
    pub client: SocketAddr,
    /// Tenant network.
    pub network: String,
    /// Human readable name.
    pub alias: String,
    /// Device bridging this point into its tenant.
    pub device: Arc<dyn VirtualDevice>,
    /// Login time.
    pub connected_at: Timestamp,
    lease: RwLock<Option<Ipv4Addr>>,
    last_seen: AtomicInstant,
    rx_frames: AtomicU64,
    tx_frames: AtomicU64,
}

impl Point {
    /// Creates a point for `client`.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        client: SocketAddr,
        network: impl Into<String>,
        alias: impl Into<String>,
        device: Arc<dyn VirtualDevice>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            client,
            network: network.into(),
            alias: alias.into(),
            device,
            connected_at: Timestamp::now(),
            lease: RwLock::new(None),
            last_seen: AtomicInstant::now(),
            rx_frames: AtomicU64::new(0),
            tx_frames: AtomicU64::new(0),
        }
    }

    /// Leased address, once the point asked for one.
    #[must_use]
    pub fn lease(&self) -> Option<Ipv4Addr> {
        *self.lease.read()
    }

    pub fn set_lease(&self, address: Ipv4Addr) {
        *self.lease.write() = Some(address);
    }

    /// Marks the point as active.
    pub fn touch(&self) {
        self.last_seen.touch();
    }

    /// Time since the point was last active.
    #[must_use]
    pub fn idle(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    pub fn record_rx(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames received from the point.
    #[must_use]
    pub fn rx_frames(&self) -> u64 {
        self.rx_frames.load(Ordering::Relaxed)
    }

    /// Frames sent to the point.
    #[must_use]
    pub fn tx_frames(&self) -> u64 {
        self.tx_frames.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Point")
            .field("uuid", &self.uuid)
            .field("client", &self.client)
            .field("network", &self.network)
            .field("device", &self.device.name())
            .field("lease", &self.lease())
            .finish()
    }
}

// ============================================
// PointStore
// ============================================

#[derive(Default)]
struct Indexes {
    by_addr: HashMap<SocketAddr, Arc<Point>>,
    holders: HashMap<String, SocketAddr>,
}

/// Points by client address, plus the current holder of each uuid.
#[derive(Default)]
pub struct PointStore {
    inner: Mutex<Indexes>,
}

impl PointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `point`; its client becomes the holder of its uuid.
    pub fn add(&self, point: Arc<Point>) {
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.holders.insert(point.uuid.clone(), point.client) {
            if prev != point.client {
                debug!(uuid = %point.uuid, from = %prev, to = %point.client, "Point moved");
            }
        }
        inner.by_addr.insert(point.client, point);
    }

    /// Removes the point of `addr`; clears the uuid holder only if it is
    /// still `addr`.
    pub fn del(&self, addr: &SocketAddr) -> Option<Arc<Point>> {
        self.remove_client(addr, |_| {}).map(|(point, _)| point)
    }

    /// Removes the point of `addr`. If `addr` still holds the point's uuid,
    /// the holder entry is cleared and `on_current` runs before the lock
    /// is released. Returns the point and whether it was current.
    pub fn remove_client<F>(&self, addr: &SocketAddr, on_current: F) -> Option<(Arc<Point>, bool)>
    where
        F: FnOnce(&Point),
    {
        let mut inner = self.inner.lock();
        let point = inner.by_addr.remove(addr)?;
        let current = inner.holders.get(&point.uuid) == Some(addr);
        if current {
            inner.holders.remove(&point.uuid);
            on_current(&point);
        }
        Some((point, current))
    }

    /// Runs `f` on the point of `addr` if `addr` holds the point's uuid,
    /// with the store locked.
    pub fn with_current<R>(&self, addr: &SocketAddr, f: impl FnOnce(&Point) -> R) -> Option<R> {
        let inner = self.inner.lock();
        let point = inner.by_addr.get(addr)?;
        (inner.holders.get(&point.uuid) == Some(addr)).then(|| f(point))
    }

    /// Uuid of the point bound to `addr`.
    #[must_use]
    pub fn get_uuid(&self, addr: &SocketAddr) -> Option<String> {
        self.inner.lock().by_addr.get(addr).map(|p| p.uuid.clone())
    }

    /// Client address currently holding `uuid`.
    #[must_use]
    pub fn get_addr(&self, uuid: &str) -> Option<SocketAddr> {
        self.inner.lock().holders.get(uuid).copied()
    }

    #[must_use]
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<Point>> {
        self.inner.lock().by_addr.get(addr).cloned()
    }

    /// Every point, ordered by client address.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Point>> {
        let mut points: Vec<_> = self.inner.lock().by_addr.values().cloned().collect();
        points.sort_by_key(|p| p.client);
        points
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().by_addr.len()
    }
}

impl std::fmt::Debug for PointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointStore")
            .field("count", &self.count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use overlan_transport::device::{DeviceProvider, DeviceRegistry, MemoryProvider};

    fn point(uuid: &str, client: &str) -> Arc<Point> {
        let provider = MemoryProvider::new(Arc::new(DeviceRegistry::new()));
        let device = provider.open("corp", 1518).unwrap();
        Arc::new(Point::new(uuid, client.parse().unwrap(), "corp", "p", device))
    }

    #[test]
    fn test_add_and_lookup() {
        let store = PointStore::new();
        let p = point("u1", "10.9.0.1:4000");
        store.add(p.clone());

        assert_eq!(store.count(), 1);
        assert_eq!(store.get_uuid(&p.client).as_deref(), Some("u1"));
        assert_eq!(store.get_addr("u1"), Some(p.client));
        assert!(store.get(&p.client).is_some());
    }

    #[test]
    fn test_stale_client_is_not_current() {
        let store = PointStore::new();
        let old = point("u1", "10.9.0.1:4000");
        let new = point("u1", "10.9.0.2:4000");
        store.add(old.clone());
        store.add(new.clone());

        let mut freed = false;
        let (_, current) = store.remove_client(&old.client, |_| freed = true).unwrap();
        assert!(!current);
        assert!(!freed);
        assert_eq!(store.get_addr("u1"), Some(new.client));

        let (_, current) = store.remove_client(&new.client, |_| freed = true).unwrap();
        assert!(current);
        assert!(freed);
        assert_eq!(store.get_addr("u1"), None);
    }

    #[test]
    fn test_with_current_skips_stale_client() {
        let store = PointStore::new();
        let old = point("u1", "10.9.0.1:4000");
        let new = point("u1", "10.9.0.2:4000");
        store.add(old.clone());
        assert_eq!(store.with_current(&old.client, |p| p.client), Some(old.client));

        store.add(new.clone());
        assert_eq!(store.with_current(&old.client, |p| p.client), None);
        assert_eq!(store.with_current(&new.client, |p| p.client), Some(new.client));
        assert_eq!(store.with_current(&"10.9.0.3:4000".parse().unwrap(), |_| ()), None);
    }

    #[test]
    fn test_double_delete() {
        let store = PointStore::new();
        let p = point("u1", "10.9.0.1:4000");
        store.add(p.clone());
        assert!(store.del(&p.client).is_some());
        assert!(store.del(&p.client).is_none());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_counters() {
        let p = point("u1", "10.9.0.1:4000");
        p.record_rx();
        p.record_rx();
        p.record_tx();
        p.set_lease(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(p.rx_frames(), 2);
        assert_eq!(p.tx_frames(), 1);
        assert_eq!(p.lease(), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }
}
