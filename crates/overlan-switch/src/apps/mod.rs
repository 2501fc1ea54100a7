// ============================================
// File: crates/overlan-switch/src/apps/mod.rs
// ============================================
//! # Frame Pipeline
//!
//! ## Creation Reason
//! Every frame received from a client passes through a fixed sequence of
//! hooks before it may reach a tenant device. Each hook either lets the
//! frame continue or drops it.
//!
//! ## Main Functionality
//! - `FrameHook`: one pipeline stage
//! - `Pipeline`: ordered stages with short-circuit on drop
//! - `Switcher`: device operations the stages need from the switch
//! - `Authenticator` / `CredentialTable`: login verification
//!
//! ## Stage Order
//! ```text
//! Auth ──▶ Neighbor ──▶ Request ──▶ Online
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Stages run inline in the connection task; many connections run the
//!   same stage concurrently, so each stage locks only its own state
//! - A drop is silent toward the peer
//!
//! ## Last Modified
//! v0.1.0 - Initial pipeline

pub mod auth;
pub mod neighbor;
pub mod online;
pub mod request;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use overlan_core::protocol::{AuthRequest, Frame};
use overlan_transport::VirtualDevice;

use crate::client::Client;
use crate::config::{Credential, NetworkConfig};
use crate::error::Result;

pub use auth::Auth;
pub use neighbor::{Neighbor, NeighborEntry, NeighborTable};
pub use online::{Online, OnlinePoint};
pub use request::Request;

// ============================================
// DropReason
// ============================================

/// Why a stage dropped a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropReason {
    /// Stage name.
    pub stage: &'static str,
    /// Human readable cause.
    pub reason: String,
}

impl DropReason {
    #[must_use]
    pub fn new(stage: &'static str, reason: impl ToString) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

impl std::error::Error for DropReason {}

// ============================================
// FrameHook / Pipeline
// ============================================

/// One pipeline stage.
#[async_trait]
pub trait FrameHook: Send + Sync {
    /// Stage name, used in drop reasons and logs.
    fn name(&self) -> &'static str;

    /// Inspects `frame` from `client`.
    ///
    /// # Errors
    /// A `DropReason` stops the frame here.
    async fn on_frame(&self, client: &Arc<Client>, frame: &Frame) -> std::result::Result<(), DropReason>;
}

/// Ordered list of stages.
#[derive(Default, Clone)]
pub struct Pipeline {
    hooks: Vec<Arc<dyn FrameHook>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn with(mut self, hook: Arc<dyn FrameHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Runs every stage in order, stopping at the first drop.
    ///
    /// # Errors
    /// `ServerError::Protocol` with the first stage's `DropReason`.
    pub async fn run(&self, client: &Arc<Client>, frame: &Frame) -> Result<()> {
        for hook in &self.hooks {
            hook.on_frame(client, frame).await?;
            trace!(client = %client.addr(), stage = hook.name(), "Frame passed");
        }
        Ok(())
    }

    /// Stage names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("hooks", &self.names()).finish()
    }
}

// ============================================
// Switcher
// ============================================

/// Device operations the switch offers to its stages.
pub trait Switcher: Send + Sync {
    /// Opens a device on `tenant`'s bridge.
    ///
    /// # Errors
    /// `BridgeNotFound` for an unknown tenant, device errors otherwise.
    fn new_tap(&self, tenant: &str) -> Result<Arc<dyn VirtualDevice>>;

    /// Detaches a device from its tenant's bridge.
    ///
    /// # Errors
    /// `BridgeNotFound` for an unknown tenant.
    fn free_tap(&self, device: &Arc<dyn VirtualDevice>) -> Result<()>;

    /// Starts copying frames from `device` to `client`.
    ///
    /// # Errors
    /// `BridgeNotFound` for an unknown tenant.
    fn read_tap(&self, device: Arc<dyn VirtualDevice>, client: Arc<Client>) -> Result<()>;
}

// ============================================
// Authenticator
// ============================================

/// Verifies point logins.
pub trait Authenticator: Send + Sync {
    /// Returns `true` if `request` may join its network.
    fn authenticate(&self, request: &AuthRequest) -> bool;
}

/// Logins from configuration, per network. A network listed with no
/// credentials accepts everyone; an unlisted network accepts no one.
#[derive(Debug, Default, Clone)]
pub struct CredentialTable {
    networks: HashMap<String, Vec<Credential>>,
}

impl CredentialTable {
    /// Builds the table from network configs.
    #[must_use]
    pub fn from_config<'a>(networks: impl IntoIterator<Item = &'a NetworkConfig>) -> Self {
        Self {
            networks: networks
                .into_iter()
                .map(|n| (n.name.clone(), n.credentials.clone()))
                .collect(),
        }
    }
}

impl Authenticator for CredentialTable {
    fn authenticate(&self, request: &AuthRequest) -> bool {
        match self.networks.get(&request.network) {
            Some(creds) if creds.is_empty() => true,
            Some(creds) => creds
                .iter()
                .any(|c| c.username == request.username && c.password == request.password),
            None => false,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::error::ServerError;

    use crate::testing::client;

    struct Record {
        name: &'static str,
        drop: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl FrameHook for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_frame(&self, _: &Arc<Client>, _: &Frame) -> std::result::Result<(), DropReason> {
            self.seen.lock().push(self.name);
            if self.drop {
                return Err(DropReason::new(self.name, "test"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pipeline_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stage = |name, drop| -> Arc<dyn FrameHook> {
            Arc::new(Record {
                name,
                drop,
                seen: seen.clone(),
            })
        };
        let pipeline = Pipeline::new()
            .with(stage("a", false))
            .with(stage("b", true))
            .with(stage("c", false));
        assert_eq!(pipeline.names(), vec!["a", "b", "c"]);

        let (client, _rx) = client("10.9.0.1:4000");
        let frame = Frame::parse(bytes::Bytes::from_static(&[0u8; 20]));
        let err = pipeline.run(&client, &frame).await.unwrap_err();

        assert!(err.is_protocol_error());
        assert!(!err.is_connection_fatal());
        assert!(matches!(err, ServerError::Protocol(reason) if reason == DropReason::new("b", "test")));
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_credential_table() {
        let mut corp = NetworkConfig::new("corp");
        corp.credentials.push(Credential {
            username: "alice".into(),
            password: "secret".into(),
        });
        let lab = NetworkConfig::new("lab");
        let table = CredentialTable::from_config([&corp, &lab]);

        let request = |network: &str, password: &str| AuthRequest {
            uuid: "u1".into(),
            network: network.into(),
            username: "alice".into(),
            password: password.into(),
            alias: String::new(),
        };
        assert!(table.authenticate(&request("corp", "secret")));
        assert!(!table.authenticate(&request("corp", "wrong")));
        assert!(table.authenticate(&request("lab", "anything")));
        assert!(!table.authenticate(&request("guest", "secret")));
    }
}
