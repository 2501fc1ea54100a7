// ============================================
// File: crates/overlan-switch/src/apps/auth.rs
// ============================================
//! # Authentication
//!
//! ## Creation Reason
//! First pipeline stage. Frames from a client that has not logged in are
//! dropped unless they are a valid `AuthRequest`.
//!
//! ## Login Flow
//! ```text
//! AuthRequest ─▶ verify ─▶ new_tap(network) ─▶ bind Point ─▶ read_tap
//!             ─▶ register ─▶ Authenticated ─▶ AuthReply
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every failure is a silent drop; the peer gets no reply
//! - The point is registered only once its read loop runs. Registering
//!   takes over the uuid from any earlier client, so a failed login must
//!   leave the store untouched
//! - If binding fails after the device was opened, the device is closed
//!
//! ## Last Modified
//! v0.1.0 - Initial authentication stage

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use overlan_core::protocol::{ControlMessage, Frame};

use super::{Authenticator, DropReason, FrameHook, Switcher};
use crate::client::{Client, ClientStatus};
use crate::storage::{Point, PointStore};

const STAGE: &str = "auth";

/// Pipeline stage logging points in.
pub struct Auth {
    switcher: Arc<dyn Switcher>,
    points: Arc<PointStore>,
    authenticator: Arc<dyn Authenticator>,
    alias: String,
}

impl Auth {
    /// Creates the stage; `alias` is reported in replies.
    #[must_use]
    pub fn new(
        switcher: Arc<dyn Switcher>,
        points: Arc<PointStore>,
        authenticator: Arc<dyn Authenticator>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            switcher,
            points,
            authenticator,
            alias: alias.into(),
        }
    }
}

#[async_trait]
impl FrameHook for Auth {
    fn name(&self) -> &'static str {
        STAGE
    }

    async fn on_frame(&self, client: &Arc<Client>, frame: &Frame) -> Result<(), DropReason> {
        if client.is_authenticated() {
            return Ok(());
        }
        if !frame.is_control() {
            return Err(DropReason::new(STAGE, "not authenticated"));
        }

        let request = match ControlMessage::decode(frame) {
            Ok(ControlMessage::AuthRequest(request)) => request,
            Ok(other) => {
                return Err(DropReason::new(
                    STAGE,
                    format!("{} before login", other.kind().as_str()),
                ))
            }
            Err(e) => return Err(DropReason::new(STAGE, e)),
        };

        if !self.authenticator.authenticate(&request) {
            return Err(DropReason::new(
                STAGE,
                format!("login refused for '{}' on '{}'", request.username, request.network),
            ));
        }

        let device = self
            .switcher
            .new_tap(&request.network)
            .map_err(|e| DropReason::new(STAGE, e))?;

        let point = Arc::new(Point::new(
            &request.uuid,
            client.addr(),
            &request.network,
            &request.alias,
            device.clone(),
        ));
        client.bind_point(point.clone());

        if let Err(e) = self.switcher.read_tap(device.clone(), client.clone()) {
            client.take_point();
            if let Err(close) = device.close() {
                debug!(device = %device.name(), error = %close, "Device close failed");
            }
            return Err(DropReason::new(STAGE, e));
        }
        self.points.add(point);
        client.set_status(ClientStatus::Authenticated);

        info!(
            client = %client.addr(),
            uuid = %request.uuid,
            network = %request.network,
            device = %device.name(),
            "Point authenticated"
        );

        let reply = ControlMessage::AuthReply {
            network: request.network,
            alias: self.alias.clone(),
        };
        match reply.encode() {
            Ok(bytes) => {
                if let Err(e) = client.send(&bytes).await {
                    debug!(client = %client.addr(), error = %e, "Auth reply not sent");
                }
            }
            Err(e) => debug!(client = %client.addr(), error = %e, "Auth reply not encoded"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth").field("alias", &self.alias).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlan_transport::device::{DeviceProvider, DeviceRegistry, MemoryProvider};
    use overlan_transport::VirtualDevice;

    use crate::apps::CredentialTable;
    use crate::config::NetworkConfig;
    use crate::error::{Result, ServerError};
    use crate::testing::client;

    struct Taps {
        provider: MemoryProvider,
        fail_reads: bool,
    }

    impl Switcher for Taps {
        fn new_tap(&self, tenant: &str) -> Result<Arc<dyn VirtualDevice>> {
            Ok(self.provider.open(tenant, 1518)?)
        }

        fn free_tap(&self, _: &Arc<dyn VirtualDevice>) -> Result<()> {
            Ok(())
        }

        fn read_tap(&self, device: Arc<dyn VirtualDevice>, _: Arc<Client>) -> Result<()> {
            if self.fail_reads {
                return Err(ServerError::bridge_not_found(device.tenant()));
            }
            Ok(())
        }
    }

    fn auth(fail_reads: bool) -> (Auth, Arc<PointStore>, Arc<DeviceRegistry>) {
        let registry = Arc::new(DeviceRegistry::new());
        let taps = Taps {
            provider: MemoryProvider::new(registry.clone()),
            fail_reads,
        };
        let points = Arc::new(PointStore::new());
        let table = CredentialTable::from_config([&NetworkConfig::new("corp")]);
        let auth = Auth::new(Arc::new(taps), points.clone(), Arc::new(table), "hub");
        (auth, points, registry)
    }

    fn login(uuid: &str) -> Frame {
        let request = ControlMessage::AuthRequest(overlan_core::protocol::AuthRequest {
            uuid: uuid.into(),
            network: "corp".into(),
            username: "alice".into(),
            password: String::new(),
            alias: "laptop".into(),
        });
        Frame::parse(request.encode().unwrap())
    }

    #[tokio::test]
    async fn test_login_registers_point() {
        let (auth, points, _) = auth(false);
        let (c, mut rx) = client("10.9.0.1:4000");

        auth.on_frame(&c, &login("u1")).await.unwrap();

        assert!(c.is_authenticated());
        assert_eq!(c.status(), ClientStatus::Authenticated);
        assert_eq!(points.get_addr("u1"), Some(c.addr()));
        let reply = ControlMessage::decode(&Frame::parse(rx.recv().await.unwrap())).unwrap();
        assert_eq!(
            reply,
            ControlMessage::AuthReply {
                network: "corp".into(),
                alias: "hub".into()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_read_tap_keeps_previous_holder() {
        let (auth, points, registry) = auth(true);
        let (held, _) = client("10.9.0.1:4000");
        let elsewhere = MemoryProvider::new(Arc::new(DeviceRegistry::new()));
        let device = elsewhere.open("corp", 1518).unwrap();
        points.add(Arc::new(Point::new("u1", held.addr(), "corp", "old", device)));

        let (c, mut rx) = client("10.9.0.2:4000");
        let err = auth.on_frame(&c, &login("u1")).await.unwrap_err();

        assert_eq!(err.stage, STAGE);
        assert!(!c.is_authenticated());
        assert_eq!(points.get_addr("u1"), Some(held.addr()));
        assert!(points.get(&c.addr()).is_none());
        assert_eq!(points.count(), 1);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_data_before_login_is_dropped() {
        let (auth, points, registry) = auth(false);
        let (c, _) = client("10.9.0.1:4000");
        let frame = Frame::parse(bytes::Bytes::from_static(&[0xff; 60]));

        let err = auth.on_frame(&c, &frame).await.unwrap_err();
        assert_eq!(err.reason, "not authenticated");
        assert_eq!(points.count(), 0);
        assert!(registry.is_empty());
    }
}
