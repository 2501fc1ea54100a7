// ============================================
// File: crates/overlan-switch/src/storage/network.rs
// ============================================
//! # Address Pools
//!
//! ## Creation Reason
//! Each tenant hands out addresses from its configured subnet. Leases are
//! keyed by point uuid so that a reconnecting point gets its address back.
//!
//! ## Allocation Strategy
//! - Reserved addresses and the bridge address are never leased
//! - Freed addresses are reused, lowest first, before the pool extends
//! - Otherwise first-fit from a high-water cursor
//! - `assign()` for a uuid that already holds a lease returns that lease
//!
//! ## Last Modified
//! v0.1.0 - Initial address pool implementation

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;

use parking_lot::Mutex;
use tracing::{debug, warn};

use overlan_common::IpRange;

use crate::config::NetworkConfig;
use crate::error::{Result, ServerError};

// ============================================
// AddressPool
// ============================================

#[derive(Debug)]
struct PoolState {
    /// Next never-leased offset into the range.
    cursor: u64,
    freed: BTreeSet<Ipv4Addr>,
    leases: HashMap<String, Ipv4Addr>,
}

/// Address pool of one tenant network.
#[derive(Debug)]
pub struct AddressPool {
    network: String,
    range: IpRange,
    netmask: Ipv4Addr,
    excluded: HashSet<Ipv4Addr>,
    state: Mutex<PoolState>,
}

impl AddressPool {
    /// Creates a pool over `range`, never leasing `excluded`.
    #[must_use]
    pub fn new(
        network: impl Into<String>,
        range: IpRange,
        netmask: Ipv4Addr,
        excluded: impl IntoIterator<Item = Ipv4Addr>,
    ) -> Self {
        Self {
            network: network.into(),
            range,
            netmask,
            excluded: excluded.into_iter().filter(|ip| range.contains(*ip)).collect(),
            state: Mutex::new(PoolState {
                cursor: 0,
                freed: BTreeSet::new(),
                leases: HashMap::new(),
            }),
        }
    }

    /// Builds the pool of `config`, if it has a subnet.
    ///
    /// # Errors
    /// Fails if the subnet range is inverted.
    pub fn from_config(config: &NetworkConfig) -> Result<Option<Self>> {
        let Some(subnet) = &config.subnet else {
            return Ok(None);
        };
        let excluded = config
            .reserved
            .iter()
            .copied()
            .chain(config.bridge.if_addr());
        Ok(Some(Self::new(
            &config.name,
            subnet.range()?,
            subnet.netmask,
            excluded,
        )))
    }

    /// Leases an address to `uuid`, or returns the one it already holds.
    ///
    /// # Errors
    /// `PoolExhausted` if every address is taken.
    pub fn assign(&self, uuid: &str) -> Result<Ipv4Addr> {
        let mut state = self.state.lock();
        if let Some(ip) = state.leases.get(uuid) {
            return Ok(*ip);
        }

        let ip = match state.freed.pop_first() {
            Some(ip) => ip,
            None => loop {
                if state.cursor >= self.range.len() {
                    warn!(network = %self.network, leases = state.leases.len(), "Address pool exhausted");
                    return Err(ServerError::PoolExhausted {
                        network: self.network.clone(),
                    });
                }
                // cursor < range.len() <= 2^32
                let ip = Ipv4Addr::from(u32::from(self.range.start()) + state.cursor as u32);
                state.cursor += 1;
                if !self.excluded.contains(&ip) {
                    break ip;
                }
            },
        };

        state.leases.insert(uuid.to_string(), ip);
        debug!(network = %self.network, uuid = %uuid, address = %ip, "Address leased");
        Ok(ip)
    }

    /// Releases the lease of `uuid`. Returns `false` if it held none.
    pub fn free(&self, uuid: &str) -> bool {
        let mut state = self.state.lock();
        match state.leases.remove(uuid) {
            Some(ip) => {
                state.freed.insert(ip);
                debug!(network = %self.network, uuid = %uuid, address = %ip, "Address released");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn lease_of(&self, uuid: &str) -> Option<Ipv4Addr> {
        self.state.lock().leases.get(uuid).copied()
    }

    /// Addresses still available.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.capacity() - self.state.lock().leases.len() as u64
    }

    /// Leasable addresses in total.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.range.len() - self.excluded.len() as u64
    }

    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }
}

// ============================================
// NetworkStore
// ============================================

/// Address pools of every tenant.
///
/// A uuid leases in at most one network at a time; `owners` records which.
/// Lock order: `owners`, then a pool.
#[derive(Debug, Default)]
pub struct NetworkStore {
    pools: HashMap<String, AddressPool>,
    owners: Mutex<HashMap<String, String>>,
}

impl NetworkStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds pools for every network with a subnet.
    ///
    /// # Errors
    /// Fails on an inverted subnet range.
    pub fn from_config<'a>(networks: impl IntoIterator<Item = &'a NetworkConfig>) -> Result<Self> {
        let mut store = Self::new();
        for net in networks {
            if let Some(pool) = AddressPool::from_config(net)? {
                store.insert(pool);
            }
        }
        Ok(store)
    }

    /// Adds or replaces the pool of `pool.network()`.
    pub fn insert(&mut self, pool: AddressPool) {
        self.pools.insert(pool.network.clone(), pool);
    }

    #[must_use]
    pub fn pool(&self, network: &str) -> Option<&AddressPool> {
        self.pools.get(network)
    }

    /// Leases an address in `network` to `uuid`. A lease the uuid holds in
    /// another network is released first.
    ///
    /// # Errors
    /// `UnknownNetwork` if the network has no pool, `PoolExhausted` if it is full.
    pub fn assign(&self, network: &str, uuid: &str) -> Result<Ipv4Addr> {
        let pool = self
            .pools
            .get(network)
            .ok_or_else(|| ServerError::UnknownNetwork {
                network: network.to_string(),
            })?;

        let mut owners = self.owners.lock();
        if let Some(prev) = owners.get(uuid).filter(|prev| prev.as_str() != network) {
            if self.pools.get(prev).is_some_and(|old| old.free(uuid)) {
                debug!(uuid = %uuid, from = %prev, to = %network, "Lease moved");
            }
        }
        match pool.assign(uuid) {
            Ok(ip) => {
                owners.insert(uuid.to_string(), network.to_string());
                Ok(ip)
            }
            Err(e) => {
                owners.remove(uuid);
                Err(e)
            }
        }
    }

    /// Releases the lease of `uuid` if it is held in `network`.
    pub fn free_addr(&self, network: &str, uuid: &str) -> Option<Ipv4Addr> {
        let mut owners = self.owners.lock();
        if owners.get(uuid).map(String::as_str) != Some(network) {
            return None;
        }
        owners.remove(uuid);
        let pool = self.pools.get(network)?;
        let ip = pool.lease_of(uuid)?;
        pool.free(uuid).then_some(ip)
    }

    /// Current lease of `uuid`.
    #[must_use]
    pub fn get_addr(&self, uuid: &str) -> Option<Ipv4Addr> {
        let owners = self.owners.lock();
        let network = owners.get(uuid)?;
        self.pools.get(network)?.lease_of(uuid)
    }

    /// Network `uuid` currently leases in.
    #[must_use]
    pub fn network_of(&self, uuid: &str) -> Option<String> {
        self.owners.lock().get(uuid).cloned()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(excluded: &[Ipv4Addr]) -> AddressPool {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 4)).unwrap();
        AddressPool::new("corp", range, Ipv4Addr::new(255, 255, 255, 0), excluded.iter().copied())
    }

    #[test]
    fn test_first_fit_skips_excluded() {
        let pool = pool(&[Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.assign("a").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pool.assign("b").unwrap(), Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_assign_is_idempotent() {
        let pool = pool(&[]);
        let first = pool.assign("a").unwrap();
        assert_eq!(pool.assign("a").unwrap(), first);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_freed_reused_before_extending() {
        let pool = pool(&[]);
        pool.assign("a").unwrap();
        let b = pool.assign("b").unwrap();
        assert!(pool.free("b"));
        assert!(!pool.free("b"));
        assert_eq!(pool.assign("c").unwrap(), b);
        assert_eq!(pool.assign("d").unwrap(), Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_exhaustion() {
        let pool = pool(&[Ipv4Addr::new(10, 0, 0, 4)]);
        for uuid in ["a", "b", "c"] {
            pool.assign(uuid).unwrap();
        }
        let err = pool.assign("d").unwrap_err();
        assert!(matches!(err, ServerError::PoolExhausted { .. }));
        assert!(err.is_retryable());
    }

    fn store() -> NetworkStore {
        let mut store = NetworkStore::new();
        store.insert(pool(&[]));
        let range = IpRange::new(Ipv4Addr::new(10, 1, 0, 1), Ipv4Addr::new(10, 1, 0, 4)).unwrap();
        store.insert(AddressPool::new(
            "lab",
            range,
            Ipv4Addr::new(255, 255, 255, 0),
            Vec::new(),
        ));
        store
    }

    #[test]
    fn test_store_free_addr() {
        let store = store();

        let ip = store.assign("corp", "a").unwrap();
        assert_eq!(store.get_addr("a"), Some(ip));
        assert_eq!(store.free_addr("lab", "a"), None);
        assert_eq!(store.get_addr("a"), Some(ip));
        assert_eq!(store.free_addr("corp", "a"), Some(ip));
        assert_eq!(store.free_addr("corp", "a"), None);
        assert!(matches!(
            store.assign("guest", "a"),
            Err(ServerError::UnknownNetwork { .. })
        ));
    }

    #[test]
    fn test_lease_moves_between_networks() {
        let store = store();
        store.assign("corp", "a").unwrap();
        let lab = store.assign("lab", "a").unwrap();

        assert_eq!(store.network_of("a").as_deref(), Some("lab"));
        assert_eq!(store.get_addr("a"), Some(lab));
        assert_eq!(store.pool("corp").unwrap().lease_of("a"), None);
        assert_eq!(store.pool("corp").unwrap().available(), 4);

        // the old network no longer owns the uuid
        assert_eq!(store.free_addr("corp", "a"), None);
        assert_eq!(store.free_addr("lab", "a"), Some(lab));
        assert_eq!(store.pool("lab").unwrap().available(), 4);
        assert_eq!(store.network_of("a"), None);
    }

    #[test]
    fn test_failed_move_leaves_no_lease() {
        let store = store();
        for uuid in ["x", "y", "z", "w"] {
            store.assign("lab", uuid).unwrap();
        }
        store.assign("corp", "a").unwrap();

        assert!(store.assign("lab", "a").is_err());
        assert_eq!(store.get_addr("a"), None);
        assert_eq!(store.pool("corp").unwrap().available(), 4);
    }
}
