// ============================================
// File: crates/overlan-switch/src/config.rs
// ============================================
//! # Switch Configuration
//!
//! ## Creation Reason
//! The switch is constructed from a fully populated configuration: the
//! listener, every tenant network with its bridge, address pool, routes
//! and credentials, plus extra firewall rules.
//!
//! ## Main Functionality
//! - `SwitchConfig`: top-level configuration
//! - TOML file loading and parsing
//! - Defaulting (bridge names, providers, route next hops)
//! - Validation
//!
//! ## Example Configuration
//! ```toml
//! alias = "hub-1"
//! protocol = "tcp"
//! listen = "0.0.0.0:10002"
//!
//! [[network]]
//! name = "corp"
//! reserved = ["10.1.0.1"]
//!
//! [network.bridge]
//! provider = "kernel"
//! address = "10.1.0.1/24"
//!
//! [network.subnet]
//! start = "10.1.0.10"
//! end = "10.1.0.200"
//! netmask = "255.255.255.0"
//!
//! [[network.routes]]
//! prefix = "192.168.10.0/24"
//!
//! [[network.credentials]]
//! username = "alice"
//! password = "secret"
//!
//! [[firewall]]
//! table = "nat"
//! chain = "POSTROUTING"
//! source = "10.1.0.0/24"
//! jump = "MASQUERADE"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `apply_defaults()` runs before `validate()`; code past loading can
//!   rely on `bridge.name` being set
//! - A network without credentials accepts every login
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use overlan_common::types::IpRange;
use overlan_core::protocol::Route;
use overlan_transport::device::DEFAULT_MTU;

use crate::error::{Result, ServerError};
use crate::firewall::FilterRule;

const MIN_MTU: u16 = 576;
const MAX_MTU: u16 = 9000;

// ============================================
// SwitchConfig
// ============================================

/// Main switch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Human readable switch name.
    #[serde(default = "default_alias")]
    pub alias: String,

    /// Transport protocol for point connections.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Tenant networks.
    #[serde(default)]
    pub network: Vec<NetworkConfig>,

    /// Extra firewall rules, installed after the derived ones.
    #[serde(default)]
    pub firewall: Vec<FilterRule>,

    /// Neighbor learning.
    #[serde(default)]
    pub neighbor: NeighborConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_alias() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "overlan".to_string())
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 10002))
}

impl SwitchConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e))?;

        let config = Self::parse(&content, &path_str)?;
        info!(networks = config.network.len(), "Configuration loaded");
        Ok(config)
    }

    /// Loads configuration from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| ServerError::config_load(origin, e))?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fills in values derived from other fields.
    pub fn apply_defaults(&mut self) {
        for net in &mut self.network {
            net.apply_defaults();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.protocol.is_empty() {
            return Err(ServerError::config_invalid("protocol", "cannot be empty"));
        }

        let mut names = HashSet::new();
        for net in &self.network {
            net.validate()?;
            if !names.insert(net.name.as_str()) {
                return Err(ServerError::config_invalid(
                    "network.name",
                    format!("duplicate network '{}'", net.name),
                ));
            }
        }

        if self.neighbor.aging_secs == 0 {
            return Err(ServerError::config_invalid(
                "neighbor.aging_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Looks up a tenant network.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.network.iter().find(|n| n.name == name)
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            alias: default_alias(),
            protocol: default_protocol(),
            listen: default_listen(),
            network: Vec::new(),
            firewall: Vec::new(),
            neighbor: NeighborConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// One tenant network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Tenant name.
    pub name: String,

    /// Bridge carrying the tenant's devices.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Address pool handed out by lease requests.
    #[serde(default)]
    pub subnet: Option<SubnetConfig>,

    /// Addresses never leased.
    #[serde(default)]
    pub reserved: Vec<Ipv4Addr>,

    /// Routes pushed to points.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Accepted logins; empty means open.
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl NetworkConfig {
    /// A network with default bridge settings and nothing else.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut net = Self {
            name: name.into(),
            bridge: BridgeConfig::default(),
            subnet: None,
            reserved: Vec::new(),
            routes: Vec::new(),
            credentials: Vec::new(),
        };
        net.apply_defaults();
        net
    }

    pub(crate) fn apply_defaults(&mut self) {
        if self.bridge.name.is_empty() {
            self.bridge.name = format!("br-{}", self.name);
        }
        let if_addr = self.bridge.if_addr();
        for route in &mut self.routes {
            if route.nexthop.is_none() {
                route.nexthop = if_addr;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ServerError::config_invalid("network.name", "cannot be empty"));
        }
        self.bridge.validate(&self.name)?;
        if let Some(subnet) = &self.subnet {
            subnet.range().map_err(|e| {
                ServerError::config_invalid(format!("network.{}.subnet", self.name), e.to_string())
            })?;
        }
        for route in &self.routes {
            if route.prefix.is_empty() {
                return Err(ServerError::config_invalid(
                    format!("network.{}.routes", self.name),
                    "prefix cannot be empty",
                ));
            }
        }
        Ok(())
    }

    /// Routes in the form pushed to points.
    #[must_use]
    pub fn lease_routes(&self) -> Vec<Route> {
        self.routes
            .iter()
            .map(|r| Route {
                prefix: r.prefix.clone(),
                nexthop: r.nexthop.map(|h| h.to_string()).unwrap_or_default(),
            })
            .collect()
    }
}

// ============================================
// BridgeConfig
// ============================================

/// Bridge section of a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge device name, `br-<network>` when empty.
    #[serde(default)]
    pub name: String,

    /// Bridge provider kind.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// MTU applied to slave devices.
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Bridge address in CIDR notation, e.g. `10.1.0.1/24`.
    #[serde(default)]
    pub address: Option<String>,
}

fn default_provider() -> String {
    "kernel".to_string()
}

fn default_mtu() -> u16 {
    DEFAULT_MTU
}

impl BridgeConfig {
    /// Address part of `address`, without prefix length.
    #[must_use]
    pub fn if_addr(&self) -> Option<Ipv4Addr> {
        let address = self.address.as_deref()?;
        address.split('/').next()?.parse().ok()
    }

    fn validate(&self, network: &str) -> Result<()> {
        let field = |name: &str| format!("network.{network}.bridge.{name}");
        if self.provider.is_empty() {
            return Err(ServerError::config_invalid(field("provider"), "cannot be empty"));
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(ServerError::config_invalid(
                field("mtu"),
                format!("must be between {MIN_MTU} and {MAX_MTU}"),
            ));
        }
        if let Some(address) = &self.address {
            let valid_prefix = address
                .split_once('/')
                .map_or(true, |(_, p)| p.parse::<u8>().is_ok_and(|p| p <= 32));
            if self.if_addr().is_none() || !valid_prefix {
                return Err(ServerError::config_invalid(
                    field("address"),
                    format!("'{address}' is not an IPv4 address"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: default_provider(),
            mtu: default_mtu(),
            address: None,
        }
    }
}

// ============================================
// Subnet / Routes / Credentials
// ============================================

/// Lease range of a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// First leasable address.
    pub start: Ipv4Addr,
    /// Last leasable address.
    pub end: Ipv4Addr,
    /// Netmask handed out with leases.
    pub netmask: Ipv4Addr,
}

impl SubnetConfig {
    /// The lease range.
    ///
    /// # Errors
    /// Fails if `start` is after `end`.
    pub fn range(&self) -> overlan_common::Result<IpRange> {
        IpRange::new(self.start, self.end)
    }
}

/// Route pushed to points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Destination prefix.
    pub prefix: String,
    /// Next hop, the bridge address when omitted.
    #[serde(default)]
    pub nexthop: Option<Ipv4Addr>,
}

/// A login accepted by a network.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// ============================================
// NeighborConfig / LoggingConfig
// ============================================

/// Neighbor table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborConfig {
    /// Seconds before a learned neighbor expires.
    #[serde(default = "default_aging_secs")]
    pub aging_secs: u64,
}

fn default_aging_secs() -> u64 {
    300
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            aging_secs: default_aging_secs(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        alias = "hub-1"
        listen = "127.0.0.1:10002"

        [[network]]
        name = "corp"
        reserved = ["10.1.0.12"]

        [network.bridge]
        provider = "software"
        address = "10.1.0.1/24"

        [network.subnet]
        start = "10.1.0.10"
        end = "10.1.0.20"
        netmask = "255.255.255.0"

        [[network.routes]]
        prefix = "192.168.10.0/24"

        [[network.routes]]
        prefix = "172.16.0.0/16"
        nexthop = "10.1.0.254"

        [[network.credentials]]
        username = "alice"
        password = "secret"

        [[network]]
        name = "lab"

        [[firewall]]
        chain = "FORWARD"
        jump = "ACCEPT"
    "#;

    #[test]
    fn test_default_config() {
        let config = SwitchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol, "tcp");
        assert_eq!(config.listen.port(), 10002);
        assert_eq!(config.neighbor.aging_secs, 300);
    }

    #[test]
    fn test_sample_config() {
        let config = SwitchConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.alias, "hub-1");
        assert_eq!(config.network.len(), 2);
        assert_eq!(config.firewall.len(), 1);

        let corp = config.network("corp").unwrap();
        assert_eq!(corp.bridge.name, "br-corp");
        assert_eq!(corp.bridge.mtu, 1518);
        assert_eq!(corp.bridge.if_addr(), Some(Ipv4Addr::new(10, 1, 0, 1)));
        assert_eq!(corp.subnet.as_ref().unwrap().range().unwrap().len(), 11);

        let routes = corp.lease_routes();
        assert_eq!(routes[0].nexthop, "10.1.0.1");
        assert_eq!(routes[1].nexthop, "10.1.0.254");

        let lab = config.network("lab").unwrap();
        assert_eq!(lab.bridge.provider, "kernel");
        assert!(lab.credentials.is_empty());
    }

    #[test]
    fn test_duplicate_network_rejected() {
        let toml = r#"
            [[network]]
            name = "corp"
            [[network]]
            name = "corp"
        "#;
        let err = SwitchConfig::from_str(toml).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_mtu = "[[network]]\nname = \"a\"\n[network.bridge]\nmtu = 100\n";
        assert!(SwitchConfig::from_str(bad_mtu).is_err());

        let bad_addr = "[[network]]\nname = \"a\"\n[network.bridge]\naddress = \"10.0.0.1/40\"\n";
        assert!(SwitchConfig::from_str(bad_addr).is_err());

        let bad_range = r#"
            [[network]]
            name = "a"
            [network.subnet]
            start = "10.0.0.9"
            end = "10.0.0.1"
            netmask = "255.255.255.0"
        "#;
        assert!(SwitchConfig::from_str(bad_range).is_err());
    }

    #[test]
    fn test_credentials_hidden_from_debug() {
        let cred = Credential {
            username: "alice".into(),
            password: "secret".into(),
        };
        assert!(!format!("{cred:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = SwitchConfig::load("/nonexistent/overlan.toml").await.unwrap_err();
        assert!(matches!(err, ServerError::ConfigLoad { .. }));
    }
}
