// ============================================
// File: crates/overlan-switch/src/apps/neighbor.rs
// ============================================
//! # Neighbor Learning
//!
//! ## Creation Reason
//! Records which point owns which MAC/IPv4 pair, learned from ARP and
//! IPv4 frames sent by authenticated points. Used for listing.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Entries are keyed by (network, MAC); tenants never share entries
//! - Expired entries are invisible to lookups even before a sweep
//!
//! ## Last Modified
//! v0.1.0 - Initial neighbor table

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use overlan_core::protocol::{Frame, MacAddr};

use super::{DropReason, FrameHook};
use crate::client::Client;

#[derive(Debug, Clone)]
struct Learned {
    ip: Ipv4Addr,
    uuid: String,
    client: SocketAddr,
    last_seen: Instant,
}

/// A neighbor as reported by `NeighborTable::list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborEntry {
    /// Tenant network
    pub network: String,
    /// Learned hardware address
    pub mac: MacAddr,
    /// Address seen behind `mac`
    pub ip: Ipv4Addr,
    /// Point that sent it
    pub uuid: String,
    /// Connection it arrived on
    pub client: SocketAddr,
    /// Seconds since last seen.
    pub age_secs: u64,
}

/// Learned neighbors of every tenant.
#[derive(Debug)]
pub struct NeighborTable {
    entries: Mutex<HashMap<(String, MacAddr), Learned>>,
    aging: Duration,
}

impl NeighborTable {
    /// Creates a table expiring entries after `aging`.
    #[must_use]
    pub fn new(aging: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            aging,
        }
    }

    /// Inserts or refreshes a neighbor.
    pub fn learn(&self, network: &str, mac: MacAddr, ip: Ipv4Addr, uuid: &str, client: SocketAddr) {
        let now = Instant::now();
        let aging = self.aging;
        let mut entries = self.entries.lock();
        entries.retain(|_, e| now.duration_since(e.last_seen) <= aging);

        let key = (network.to_string(), mac);
        match entries.get_mut(&key) {
            Some(entry) => {
                if entry.ip != ip || entry.client != client {
                    debug!(network = %network, mac = %mac, ip = %ip, client = %client, "Neighbor changed");
                }
                entry.ip = ip;
                entry.uuid = uuid.to_string();
                entry.client = client;
                entry.last_seen = now;
            }
            None => {
                trace!(network = %network, mac = %mac, ip = %ip, "Neighbor learned");
                entries.insert(
                    key,
                    Learned {
                        ip,
                        uuid: uuid.to_string(),
                        client,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Fresh entry for `mac` in `network`.
    #[must_use]
    pub fn lookup(&self, network: &str, mac: &MacAddr) -> Option<NeighborEntry> {
        let entries = self.entries.lock();
        let key = (network.to_string(), *mac);
        entries
            .get(&key)
            .filter(|e| e.last_seen.elapsed() <= self.aging)
            .map(|e| Self::entry(&key, e))
    }

    /// Drops expired entries; returns how many.
    pub fn sweep(&self) -> usize {
        let aging = self.aging;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.last_seen.elapsed() <= aging);
        before - entries.len()
    }

    /// Drops everything learned from `client`.
    pub fn forget_client(&self, client: &SocketAddr) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.client != *client);
        before - entries.len()
    }

    /// Fresh entries, ordered by network then MAC.
    #[must_use]
    pub fn list(&self) -> Vec<NeighborEntry> {
        let entries = self.entries.lock();
        let mut out: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() <= self.aging)
            .map(|(k, e)| Self::entry(k, e))
            .collect();
        out.sort_by(|a, b| (&a.network, a.mac).cmp(&(&b.network, b.mac)));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry((network, mac): &(String, MacAddr), e: &Learned) -> NeighborEntry {
        NeighborEntry {
            network: network.clone(),
            mac: *mac,
            ip: e.ip,
            uuid: e.uuid.clone(),
            client: e.client,
            age_secs: e.last_seen.elapsed().as_secs(),
        }
    }
}

/// Pipeline stage learning neighbors from authenticated traffic.
#[derive(Debug)]
pub struct Neighbor {
    table: Arc<NeighborTable>,
}

impl Neighbor {
    #[must_use]
    pub fn new(table: Arc<NeighborTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl FrameHook for Neighbor {
    fn name(&self) -> &'static str {
        "neighbor"
    }

    async fn on_frame(&self, client: &Arc<Client>, frame: &Frame) -> Result<(), DropReason> {
        let Some(point) = client.point() else {
            return Ok(());
        };
        if let Some((mac, ip)) = frame.sender() {
            if !mac.is_multicast() && !mac.is_zero() && !ip.is_unspecified() {
                self.table.learn(&point.network, mac, ip, &point.uuid, client.addr());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_learn_and_lookup() {
        let table = NeighborTable::new(Duration::from_secs(60));
        table.learn("corp", MAC, Ipv4Addr::new(10, 0, 0, 5), "u1", addr("1.1.1.1:1"));

        let entry = table.lookup("corp", &MAC).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(entry.uuid, "u1");
        assert!(table.lookup("lab", &MAC).is_none());

        table.learn("corp", MAC, Ipv4Addr::new(10, 0, 0, 6), "u1", addr("1.1.1.1:1"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.list()[0].ip, Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn test_expired_entries_hidden_and_swept() {
        let table = NeighborTable::new(Duration::from_millis(1));
        table.learn("corp", MAC, Ipv4Addr::new(10, 0, 0, 5), "u1", addr("1.1.1.1:1"));
        std::thread::sleep(Duration::from_millis(5));

        assert!(table.lookup("corp", &MAC).is_none());
        assert!(table.list().is_empty());
        assert_eq!(table.sweep(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_forget_client() {
        let table = NeighborTable::new(Duration::from_secs(60));
        table.learn("corp", MAC, Ipv4Addr::new(10, 0, 0, 5), "u1", addr("1.1.1.1:1"));
        table.learn("corp", MacAddr([2, 0, 0, 0, 0, 2]), Ipv4Addr::new(10, 0, 0, 7), "u2", addr("2.2.2.2:2"));

        assert_eq!(table.forget_client(&addr("1.1.1.1:1")), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.forget_client(&addr("1.1.1.1:1")), 0);
    }
}
