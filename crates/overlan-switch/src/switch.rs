// ============================================
// File: crates/overlan-switch/src/switch.rs
// ============================================
//! # Switch Orchestrator
//!
//! ## Creation Reason
//! Ties the transport listener, the frame pipeline, the tenant workers
//! and the firewall together and manages their lifecycle.
//!
//! ## Switch Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Switch                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────────────────────┐   │
//! │  │ Accept Task  │──▶│ Connection Task (one per client) │   │
//! │  └──────────────┘   │  recv ─▶ Pipeline ─▶ device write│   │
//! │                     └──────────────────────────────────┘   │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ Pipeline: Auth ─▶ Neighbor ─▶ Request ─▶ Online      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐    │
//! │  │ Worker corp  │ │ Worker lab   │ │ Neighbor Sweep   │    │
//! │  │ bridge+loops │ │ bridge+loops │ │ Task             │    │
//! │  └──────────────┘ └──────────────┘ └──────────────────┘    │
//! │  ┌──────────┐ ┌──────────────┐ ┌──────────┐                │
//! │  │ Points   │ │ Address Pools│ │ Firewall │                │
//! │  └──────────┘ └──────────────┘ └──────────┘                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shutdown Order
//! 1. Stop accepting
//! 2. Remove firewall rules
//! 3. Close every tenant bridge (closes its devices)
//! 4. Close the listener and wait for connection tasks
//! 5. Stop every worker
//!
//! ## ⚠️ Important Note for Next Developer
//! - The tenant map lock is never held across an `.await`
//! - A second `start()` without `stop()` is rejected
//! - Firewall rules are derived once, on the first `start()`
//!
//! ## Last Modified
//! v0.1.0 - Initial switch implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use overlan_common::SwitchId;
use overlan_core::protocol::Frame;
use overlan_transport::{
    BridgeProviders, BridgeSpec, Connection, DeviceProviders, DeviceRegistry, Listener,
    TransportRegistry, VirtualDevice,
};

use crate::apps::{
    Auth, Authenticator, CredentialTable, Neighbor, NeighborEntry, NeighborTable, Online,
    OnlinePoint, Pipeline, Request, Switcher,
};
use crate::client::{Client, ClientStatus};
use crate::config::SwitchConfig;
use crate::error::{Result, ServerError};
use crate::firewall::{masquerade_rules, FilterRule, Firewall, IptablesBackend, RuleBackend};
use crate::storage::{AddressPool, NetworkStore, Point, PointStore};
use crate::worker::Worker;

/// How long `stop()` waits for a background task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Collaborators
// ============================================

/// Pluggable pieces of a switch.
pub struct Collaborators {
    /// Bridge factories by provider kind.
    pub bridges: BridgeProviders,
    /// Listener factories by protocol.
    pub transports: TransportRegistry,
    /// Where firewall rules are installed.
    pub rules: Arc<dyn RuleBackend>,
    /// Login check; the configured credential table when `None`.
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            bridges: BridgeProviders::with_defaults(),
            transports: TransportRegistry::with_defaults(),
            rules: Arc::new(IptablesBackend),
            authenticator: None,
        }
    }
}

// ============================================
// Topology
// ============================================

/// Tenant workers, shared with the auth stage.
struct Topology {
    workers: RwLock<HashMap<String, Arc<Worker>>>,
}

impl Switcher for Topology {
    fn new_tap(&self, tenant: &str) -> Result<Arc<dyn VirtualDevice>> {
        let workers = self.workers.read();
        let worker = workers
            .get(tenant)
            .ok_or_else(|| ServerError::bridge_not_found(tenant))?;
        worker.new_tap()
    }

    fn free_tap(&self, device: &Arc<dyn VirtualDevice>) -> Result<()> {
        let workers = self.workers.read();
        let worker = workers
            .get(device.tenant())
            .ok_or_else(|| ServerError::bridge_not_found(device.tenant()))?;
        worker.free_tap(device)
    }

    fn read_tap(&self, device: Arc<dyn VirtualDevice>, client: Arc<Client>) -> Result<()> {
        let workers = self.workers.read();
        let worker = workers
            .get(device.tenant())
            .ok_or_else(|| ServerError::bridge_not_found(device.tenant()))?;
        worker.read_tap(device, client);
        Ok(())
    }
}

// ============================================
// Switch
// ============================================

struct Running {
    listener: Arc<dyn Listener>,
    local_addr: Option<SocketAddr>,
    stop: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// The overlay switch.
///
/// # Lifecycle
/// 1. Create with `Switch::new(config, collaborators)` and wrap in `Arc`
/// 2. `start()` opens bridges, binds the listener, installs rules
/// 3. `stop().await` tears everything down again
pub struct Switch {
    config: SwitchConfig,
    id: SwitchId,
    created: Instant,
    registry: Arc<DeviceRegistry>,
    devices: Arc<DeviceProviders>,
    bridges: BridgeProviders,
    transports: TransportRegistry,
    topology: Arc<Topology>,
    points: Arc<PointStore>,
    networks: Arc<NetworkStore>,
    neighbors: Arc<NeighborTable>,
    online: Arc<Online>,
    pipeline: Pipeline,
    firewall: Firewall,
    init: Once,
    running: Mutex<Option<Running>>,
}

impl Switch {
    /// Builds a switch from `config`.
    ///
    /// # Errors
    /// Fails if a network's address pool cannot be built.
    pub fn new(config: SwitchConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            bridges,
            transports,
            rules,
            authenticator,
        } = collaborators;

        let registry = Arc::new(DeviceRegistry::new());
        let devices = Arc::new(DeviceProviders::with_defaults(&registry));
        let topology = Arc::new(Topology {
            workers: RwLock::new(HashMap::new()),
        });
        let points = Arc::new(PointStore::new());
        let networks = Arc::new(NetworkStore::from_config(&config.network)?);
        let neighbors = Arc::new(NeighborTable::new(Duration::from_secs(
            config.neighbor.aging_secs,
        )));
        let online = Arc::new(Online::new(points.clone()));
        let authenticator = authenticator
            .unwrap_or_else(|| Arc::new(CredentialTable::from_config(&config.network)));

        let switcher: Arc<dyn Switcher> = topology.clone();
        let pipeline = Pipeline::new()
            .with(Arc::new(Auth::new(
                switcher,
                points.clone(),
                authenticator,
                &config.alias,
            )))
            .with(Arc::new(Neighbor::new(neighbors.clone())))
            .with(Arc::new(Request::new(
                networks.clone(),
                points.clone(),
                &config.network,
            )))
            .with(online.clone());

        Ok(Self {
            id: SwitchId::generate(),
            created: Instant::now(),
            registry,
            devices,
            bridges,
            transports,
            topology,
            points,
            networks,
            neighbors,
            online,
            pipeline,
            firewall: Firewall::new(rules),
            init: Once::new(),
            running: Mutex::new(None),
            config,
        })
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Opens tenant bridges, binds the listener and installs firewall
    /// rules. Tenants whose bridge cannot be opened are skipped.
    ///
    /// # Errors
    /// `AlreadyStarted` if running, `StartupFailed` if the listener cannot
    /// be bound.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        self.init.call_once(|| self.initialize());

        let workers = self.open_workers();
        let tenants = workers.len();
        *self.topology.workers.write() = workers;

        let listener = match self.transports.bind(&self.config.protocol, self.config.listen) {
            Ok(listener) => listener,
            Err(e) => {
                for worker in self.take_workers().values() {
                    Self::close_bridge(worker);
                }
                return Err(ServerError::startup_failed(format!(
                    "{} listener on {}: {e}",
                    self.config.protocol, self.config.listen
                )));
            }
        };
        let local_addr = listener.local_addr().ok();

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            ("accept", self.spawn_accept_task(listener.clone(), stop_rx.clone())),
            ("neighbor", self.spawn_sweep_task(stop_rx)),
        ];

        self.firewall.start();

        *running = Some(Running {
            listener,
            local_addr,
            stop,
            tasks,
        });
        info!(
            id = %self.id,
            alias = %self.config.alias,
            protocol = %self.config.protocol,
            addr = ?local_addr,
            tenants,
            "Switch started"
        );
        Ok(())
    }

    /// Stops the switch.
    ///
    /// # Errors
    /// `AlreadyStopped` if not running.
    pub async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Err(ServerError::AlreadyStopped);
        };
        info!(id = %self.id, "Stopping switch");

        running.stop.send_replace(true);
        self.firewall.stop();

        let workers = self.take_workers();
        for worker in workers.values() {
            Self::close_bridge(worker);
        }

        if let Err(e) = running.listener.shutdown().await {
            warn!(error = %e, "Listener shutdown error");
        }
        for (name, task) in running.tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!(task = name, "Task completed"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
                Err(_) => warn!(task = name, "Task timed out during shutdown"),
            }
        }

        for worker in workers.values() {
            worker.stop();
        }
        info!(id = %self.id, "Switch stopped");
        Ok(())
    }

    /// Returns `true` between `start()` and `stop()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Declares the firewall rules derived from tenant bridges and routes,
    /// followed by the configured ones.
    fn initialize(&self) {
        for net in &self.config.network {
            let (Some(source), Some(if_addr)) = (&net.bridge.address, net.bridge.if_addr()) else {
                continue;
            };
            for route in &net.routes {
                if route.nexthop == Some(if_addr) {
                    self.firewall.declare(masquerade_rules(source, &route.prefix));
                }
            }
        }
        self.firewall.declare(self.config.firewall.iter().cloned());
        debug!(rules = self.firewall.rules().len(), "Switch initialized");
    }

    fn open_workers(&self) -> HashMap<String, Arc<Worker>> {
        let mut workers = HashMap::new();
        for net in &self.config.network {
            let spec = BridgeSpec {
                name: net.bridge.name.clone(),
                mtu: net.bridge.mtu,
            };
            let worker = match self.bridges.create(&net.bridge.provider, &spec) {
                Ok(bridge) => Worker::new(
                    &net.name,
                    bridge,
                    net.bridge.address.clone(),
                    self.devices.clone(),
                ),
                Err(e) => {
                    warn!(tenant = %net.name, error = %e, "Tenant skipped");
                    continue;
                }
            };
            if let Err(e) = worker.start() {
                warn!(tenant = %net.name, error = %e, "Tenant skipped");
                continue;
            }
            workers.insert(net.name.clone(), Arc::new(worker));
        }
        workers
    }

    fn take_workers(&self) -> HashMap<String, Arc<Worker>> {
        std::mem::take(&mut *self.topology.workers.write())
    }

    fn close_bridge(worker: &Worker) {
        match worker.bridge().close() {
            Ok(()) => debug!(tenant = %worker.tenant(), "Bridge closed"),
            Err(e) => error!(tenant = %worker.tenant(), error = %e, "Bridge close failed"),
        }
    }

    // ========================================
    // Background tasks
    // ========================================

    fn spawn_accept_task(
        self: &Arc<Self>,
        listener: Arc<dyn Listener>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let switch = Arc::clone(self);
        tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => {
                            let task = Arc::clone(&switch).serve(conn, stop.clone());
                            connections.spawn(task);
                        }
                        Err(e) if e.is_closed() || !listener.is_active() => break,
                        Err(e) => warn!(error = %e, "Accept failed"),
                    },
                }
            }
            debug!(connections = connections.len(), "Accept task draining");
            while connections.join_next().await.is_some() {}
            debug!("Accept task exiting");
        })
    }

    fn spawn_sweep_task(self: &Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let neighbors = Arc::clone(&self.neighbors);
        let period = Duration::from_secs((self.config.neighbor.aging_secs / 2).max(1));
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = timer.tick() => {
                        let expired = neighbors.sweep();
                        if expired > 0 {
                            debug!(expired, remaining = neighbors.len(), "Neighbors swept");
                        }
                    }
                }
            }
            debug!("Neighbor sweep task exiting");
        })
    }

    /// Runs one connection until it ends or the switch stops.
    async fn serve(self: Arc<Self>, conn: Connection, mut stop: watch::Receiver<bool>) {
        let Connection {
            peer, mut stream, sink, ..
        } = conn;
        let client = Arc::new(Client::new(sink));
        self.on_client(&client);

        if !*stop.borrow() {
            loop {
                let received = tokio::select! {
                    _ = stop.changed() => break,
                    received = stream.recv() => received,
                };
                match received {
                    Ok(Some(data)) => {
                        if let Err(e) = self.read_client(&client, Frame::parse(data)).await {
                            if e.is_connection_fatal() {
                                warn!(client = %peer, error = %e, "Connection failed");
                                break;
                            }
                            debug!(client = %peer, error = %e, "Frame rejected");
                        }
                    }
                    Ok(None) => {
                        debug!(client = %peer, "Connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!(client = %peer, error = %e, "Connection receive failed");
                        break;
                    }
                }
            }
        }
        self.on_close(&client).await;
    }

    // ========================================
    // Client events
    // ========================================

    /// A new connection was accepted.
    pub fn on_client(&self, client: &Arc<Client>) {
        client.set_status(ClientStatus::Connected);
        info!(client = %client.addr(), "Client connected");
    }

    /// Processes one frame from `client`. Dropped frames are not errors.
    ///
    /// # Errors
    /// `PointNotFound` for a data frame without a bound point; device
    /// write errors, which end the connection.
    pub async fn read_client(&self, client: &Arc<Client>, frame: Frame) -> Result<()> {
        match self.pipeline.run(client, &frame).await {
            Ok(()) => {}
            Err(ServerError::Protocol(reason)) => {
                debug!(client = %client.addr(), reason = %reason, "Frame dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        if frame.is_control() {
            return Ok(());
        }
        let point = client.point().ok_or(ServerError::PointNotFound {
            client: client.addr(),
        })?;
        point.device.write(frame.bytes()).await?;
        Ok(())
    }

    /// Tears down everything bound to `client`. The lease of its uuid is
    /// released only while `client` is still the uuid's holder.
    pub async fn on_close(&self, client: &Arc<Client>) {
        let addr = client.addr();
        client.set_status(ClientStatus::Closed);

        let networks = &self.networks;
        if let Some((point, current)) = self.points.remove_client(&addr, |point| {
            if let Some(address) = networks.free_addr(&point.network, &point.uuid) {
                debug!(uuid = %point.uuid, network = %point.network, address = %address, "Lease released");
            }
        }) {
            if !current {
                debug!(client = %addr, uuid = %point.uuid, "Stale point removed, lease kept");
            }
        }
        self.neighbors.forget_client(&addr);

        if let Some(point) = client.take_point() {
            if let Err(e) = self.free_tap(&point.device) {
                debug!(client = %addr, error = %e, "Device not detached");
            }
            if let Err(e) = point.device.close() {
                debug!(client = %addr, error = %e, "Device close failed");
            }
        }
        if let Err(e) = client.close().await {
            debug!(client = %addr, error = %e, "Client close failed");
        }
        info!(client = %addr, "Client closed");
    }

    // ========================================
    // Devices
    // ========================================

    /// Opens a device on `tenant`'s bridge.
    ///
    /// # Errors
    /// `BridgeNotFound` for an unknown tenant.
    pub fn new_tap(&self, tenant: &str) -> Result<Arc<dyn VirtualDevice>> {
        self.topology.new_tap(tenant)
    }

    /// Detaches `device` from its tenant's bridge.
    ///
    /// # Errors
    /// `BridgeNotFound` for an unknown tenant.
    pub fn free_tap(&self, device: &Arc<dyn VirtualDevice>) -> Result<()> {
        self.topology.free_tap(device)
    }

    // ========================================
    // Queries
    // ========================================

    /// Name announced in auth replies.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    /// Random identity of this instance.
    #[must_use]
    pub const fn id(&self) -> SwitchId {
        self.id
    }

    /// Time since the switch was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.created.elapsed()
    }

    /// Bound listener address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().and_then(|r| r.local_addr)
    }

    #[must_use]
    #[allow(missing_docs)]
    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Tenants with an open bridge, sorted.
    #[must_use]
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<_> = self.topology.workers.read().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Registered points.
    #[must_use]
    pub fn points(&self) -> Vec<Arc<Point>> {
        self.points.list()
    }

    /// Client address currently holding `uuid`.
    #[must_use]
    pub fn point_addr(&self, uuid: &str) -> Option<SocketAddr> {
        self.points.get_addr(uuid)
    }

    /// Address leased to `uuid`, in any tenant.
    #[must_use]
    pub fn lease(&self, uuid: &str) -> Option<std::net::Ipv4Addr> {
        self.networks.get_addr(uuid)
    }

    /// Addresses still free in `network`'s pool.
    #[must_use]
    pub fn available(&self, network: &str) -> Option<u64> {
        self.networks.pool(network).map(AddressPool::available)
    }

    /// Names of open devices, sorted.
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Activity of every point.
    #[must_use]
    pub fn online(&self) -> Vec<OnlinePoint> {
        self.online.list()
    }

    /// Learned neighbors.
    #[must_use]
    pub fn neighbors(&self) -> Vec<NeighborEntry> {
        self.neighbors.list()
    }

    /// Declared firewall rules.
    #[must_use]
    pub fn firewall_rules(&self) -> Vec<FilterRule> {
        self.firewall.rules()
    }
}

impl std::fmt::Debug for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switch")
            .field("id", &self.id)
            .field("alias", &self.config.alias)
            .field("listen", &self.config.listen)
            .field("tenants", &self.tenants())
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::firewall::MemoryBackend;

    fn config() -> SwitchConfig {
        let mut config = SwitchConfig::default();
        config.listen = "127.0.0.1:0".parse().unwrap();
        for name in ["corp", "lab"] {
            let mut net = NetworkConfig::new(name);
            net.bridge.provider = "software".into();
            config.network.push(net);
        }
        config
    }

    fn collaborators(rules: Arc<MemoryBackend>) -> Collaborators {
        Collaborators {
            rules,
            ..Collaborators::default()
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let rules = Arc::new(MemoryBackend::new());
        let switch = Arc::new(Switch::new(config(), collaborators(rules)).unwrap());

        switch.start().unwrap();
        assert!(switch.is_running());
        assert!(switch.local_addr().is_some());
        assert_eq!(switch.tenants(), vec!["corp", "lab"]);
        assert!(matches!(switch.start(), Err(ServerError::AlreadyStarted)));

        switch.stop().await.unwrap();
        assert!(!switch.is_running());
        assert!(switch.tenants().is_empty());
        assert!(matches!(switch.stop().await, Err(ServerError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_unknown_provider_skips_tenant() {
        let mut config = config();
        config.network[1].bridge.provider = "vpp".into();
        let switch = Arc::new(
            Switch::new(config, collaborators(Arc::new(MemoryBackend::new()))).unwrap(),
        );

        switch.start().unwrap();
        assert_eq!(switch.tenants(), vec!["corp"]);
        assert!(switch.new_tap("lab").unwrap_err().is_resource_error());
        switch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_masquerade_rules_derived_from_routes() {
        let mut config = config();
        let corp = &mut config.network[0];
        corp.bridge.address = Some("10.1.0.1/24".into());
        corp.routes = vec![
            crate::config::RouteConfig {
                prefix: "192.168.10.0/24".into(),
                nexthop: None,
            },
            crate::config::RouteConfig {
                prefix: "172.16.0.0/16".into(),
                nexthop: Some("10.1.0.254".parse().unwrap()),
            },
        ];
        config.apply_defaults();
        config.firewall.push(FilterRule::new("filter", "INPUT"));

        let rules = Arc::new(MemoryBackend::new());
        let switch = Arc::new(Switch::new(config, collaborators(rules.clone())).unwrap());
        switch.start().unwrap();

        let declared = switch.firewall_rules();
        assert_eq!(declared.len(), 4);
        assert_eq!(declared[0].dest.as_deref(), Some("192.168.10.0/24"));
        assert_eq!(declared[0].source.as_deref(), Some("10.1.0.1/24"));
        assert_eq!(declared[3].chain, "INPUT");
        assert_eq!(rules.installed().len(), 4);

        switch.stop().await.unwrap();
        assert!(rules.installed().is_empty());
    }
}
