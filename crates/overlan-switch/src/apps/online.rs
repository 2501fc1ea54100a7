// ============================================
// File: crates/overlan-switch/src/apps/online.rs
// ============================================
//! # Online Tracking
//!
//! Last stage of the pipeline. Marks the sending point as active and
//! counts its frames; never drops anything.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use overlan_common::Timestamp;
use overlan_core::protocol::Frame;

use super::{DropReason, FrameHook};
use crate::client::Client;
use crate::storage::{Point, PointStore};

/// Activity snapshot of one point. Field meanings follow [`Point`].
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct OnlinePoint {
    pub uuid: String,
    pub alias: String,
    pub network: String,
    pub client: SocketAddr,
    pub device: String,
    pub lease: Option<Ipv4Addr>,
    pub connected_at: Timestamp,
    pub idle_secs: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
}

impl From<&Point> for OnlinePoint {
    fn from(p: &Point) -> Self {
        Self {
            uuid: p.uuid.clone(),
            alias: p.alias.clone(),
            network: p.network.clone(),
            client: p.client,
            device: p.device.name().to_string(),
            lease: p.lease(),
            connected_at: p.connected_at,
            idle_secs: p.idle().as_secs(),
            rx_frames: p.rx_frames(),
            tx_frames: p.tx_frames(),
        }
    }
}

/// Pipeline stage recording point activity.
#[derive(Debug)]
pub struct Online {
    points: Arc<PointStore>,
}

impl Online {
    #[must_use]
    pub fn new(points: Arc<PointStore>) -> Self {
        Self { points }
    }

    /// Every registered point.
    #[must_use]
    pub fn list(&self) -> Vec<OnlinePoint> {
        self.points.list().iter().map(|p| OnlinePoint::from(p.as_ref())).collect()
    }

    /// Points silent for at least `after`.
    #[must_use]
    pub fn idle(&self, after: Duration) -> Vec<OnlinePoint> {
        self.points
            .list()
            .iter()
            .filter(|p| p.idle() >= after)
            .map(|p| OnlinePoint::from(p.as_ref()))
            .collect()
    }
}

#[async_trait]
impl FrameHook for Online {
    fn name(&self) -> &'static str {
        "online"
    }

    async fn on_frame(&self, client: &Arc<Client>, _frame: &Frame) -> Result<(), DropReason> {
        if let Some(point) = client.point() {
            point.touch();
            point.record_rx();
        }
        Ok(())
    }
}
