// ============================================
// File: crates/overlan-switch/src/apps/request.rs
// ============================================
//! # Lease Requests
//!
//! ## Creation Reason
//! Authenticated points ask for an address with a `LeaseRequest`
//! control frame. The reply carries the address, the tenant netmask and
//! the tenant routes.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leases are keyed by point uuid; asking again returns the same one
//! - A uuid leases in one network at a time; leasing elsewhere moves it
//! - Only the client currently holding the uuid may lease. The check and
//!   the assignment run under the point store lock, the same lock the
//!   switch frees leases under on close
//! - Leases are released by the switch when the holding client closes
//!
//! ## Last Modified
//! v0.1.0 - Initial lease handling

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use overlan_core::protocol::{ControlMessage, ControlType, Frame, Route};

use super::{DropReason, FrameHook};
use crate::client::Client;
use crate::config::NetworkConfig;
use crate::storage::{NetworkStore, PointStore};

const STAGE: &str = "request";

/// Pipeline stage answering lease requests.
#[derive(Debug)]
pub struct Request {
    networks: Arc<NetworkStore>,
    points: Arc<PointStore>,
    routes: HashMap<String, Vec<Route>>,
}

impl Request {
    /// Creates the stage; routes come from `configs`.
    #[must_use]
    pub fn new<'a>(
        networks: Arc<NetworkStore>,
        points: Arc<PointStore>,
        configs: impl IntoIterator<Item = &'a NetworkConfig>,
    ) -> Self {
        Self {
            networks,
            points,
            routes: configs
                .into_iter()
                .map(|n| (n.name.clone(), n.lease_routes()))
                .collect(),
        }
    }
}

#[async_trait]
impl FrameHook for Request {
    fn name(&self) -> &'static str {
        STAGE
    }

    async fn on_frame(&self, client: &Arc<Client>, frame: &Frame) -> Result<(), DropReason> {
        if frame.control_type() != Some(ControlType::LeaseRequest as u8) {
            return Ok(());
        }
        let Some(point) = client.point() else {
            return Ok(());
        };
        ControlMessage::decode(frame).map_err(|e| DropReason::new(STAGE, e))?;

        let address = self
            .points
            .with_current(&client.addr(), |current| {
                self.networks.assign(&current.network, &current.uuid)
            })
            .ok_or_else(|| {
                DropReason::new(STAGE, format!("{} no longer holds {}", client.addr(), point.uuid))
            })?
            .map_err(|e| DropReason::new(STAGE, e))?;
        point.set_lease(address);

        let netmask = self
            .networks
            .pool(&point.network)
            .map(|p| p.netmask())
            .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
        let reply = ControlMessage::LeaseReply {
            address,
            netmask,
            routes: self.routes.get(&point.network).cloned().unwrap_or_default(),
        }
        .encode()
        .map_err(|e| DropReason::new(STAGE, e))?;

        info!(client = %client.addr(), uuid = %point.uuid, address = %address, "Address leased");
        if let Err(e) = client.send(&reply).await {
            debug!(client = %client.addr(), error = %e, "Lease reply not sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use bytes::Bytes;
    use overlan_transport::device::{DeviceProvider, DeviceRegistry, MemoryProvider};

    use crate::config::{RouteConfig, SubnetConfig};
    use crate::storage::Point;
    use crate::testing::client;

    struct Fixture {
        request: Request,
        points: Arc<PointStore>,
        networks: Arc<NetworkStore>,
        provider: MemoryProvider,
    }

    fn fixture() -> Fixture {
        let mut corp = NetworkConfig::new("corp");
        corp.bridge.address = Some("10.0.0.1/24".into());
        corp.subnet = Some(SubnetConfig {
            start: Ipv4Addr::new(10, 0, 0, 1),
            end: Ipv4Addr::new(10, 0, 0, 9),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        });
        corp.routes.push(RouteConfig {
            prefix: "192.168.10.0/24".into(),
            nexthop: None,
        });
        corp.apply_defaults();

        let networks = Arc::new(NetworkStore::from_config([&corp]).unwrap());
        let points = Arc::new(PointStore::new());
        Fixture {
            request: Request::new(networks.clone(), points.clone(), [&corp]),
            points,
            networks,
            provider: MemoryProvider::new(Arc::new(DeviceRegistry::new())),
        }
    }

    impl Fixture {
        fn login(&self, uuid: &str, c: &Arc<Client>) -> Arc<Point> {
            let device = self.provider.open("corp", 1518).unwrap();
            let point = Arc::new(Point::new(uuid, c.addr(), "corp", "p", device));
            c.bind_point(point.clone());
            self.points.add(point.clone());
            point
        }
    }

    fn lease_request() -> Frame {
        Frame::parse(ControlMessage::LeaseRequest { uuid: None }.encode().unwrap())
    }

    #[tokio::test]
    async fn test_other_frames_pass_through() {
        let f = fixture();
        let (c, mut rx) = client("10.9.0.1:4000");
        f.login("u1", &c);

        let data = Frame::parse(Bytes::from_static(&[0xff; 60]));
        let reply = ControlMessage::AuthReply {
            network: "corp".into(),
            alias: "hub".into(),
        };
        f.request.on_frame(&c, &data).await.unwrap();
        f.request
            .on_frame(&c, &Frame::parse(reply.encode().unwrap()))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(f.networks.get_addr("u1"), None);
    }

    #[tokio::test]
    async fn test_lease_request_without_point() {
        let f = fixture();
        let (c, mut rx) = client("10.9.0.1:4000");

        f.request.on_frame(&c, &lease_request()).await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(f.networks.pool("corp").unwrap().available(), 8);
    }

    #[tokio::test]
    async fn test_lease_reply() {
        let f = fixture();
        let (c, mut rx) = client("10.9.0.1:4000");
        let point = f.login("u1", &c);

        f.request.on_frame(&c, &lease_request()).await.unwrap();
        f.request.on_frame(&c, &lease_request()).await.unwrap();

        let expected = ControlMessage::LeaseReply {
            address: Ipv4Addr::new(10, 0, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            routes: vec![Route {
                prefix: "192.168.10.0/24".into(),
                nexthop: "10.0.0.1".into(),
            }],
        };
        for _ in 0..2 {
            let got = ControlMessage::decode(&Frame::parse(rx.recv().await.unwrap())).unwrap();
            assert_eq!(got, expected);
        }
        assert_eq!(point.lease(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(f.networks.pool("corp").unwrap().available(), 7);
    }

    #[tokio::test]
    async fn test_stale_client_cannot_lease() {
        let f = fixture();
        let (old, mut old_rx) = client("10.9.0.1:4000");
        let (new, _) = client("10.9.0.2:4000");
        f.login("u1", &old);
        f.login("u1", &new);

        let err = f.request.on_frame(&old, &lease_request()).await.unwrap_err();

        assert_eq!(err.stage, STAGE);
        assert!(old_rx.try_recv().is_err());
        assert_eq!(f.networks.get_addr("u1"), None);
    }
}
