// ============================================
// File: crates/overlan-switch/src/client.rs
// ============================================
//! # Client Sessions
//!
//! ## Creation Reason
//! One `Client` per accepted transport connection. It carries the
//! connection's outbound sink and, once authenticated, the point bound
//! to it.
//!
//! ## Main Functionality
//! - `ClientStatus`: connection lifecycle
//! - `Client`: address, sink, status and point slot
//!
//! ## ⚠️ Important Note for Next Developer
//! - The point slot is written only by the auth stage
//! - `addr()` is the identity used by every registry
//!
//! ## Last Modified
//! v0.1.0 - Initial client session

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use overlan_common::Timestamp;
use overlan_transport::FrameSink;

use crate::error::Result;
use crate::storage::Point;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Accepted, not yet announced.
    Connecting,
    /// Announced to the switch.
    Connected,
    /// Logged in; a point is bound.
    Authenticated,
    /// Torn down.
    Closed,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A connected transport session.
pub struct Client {
    addr: SocketAddr,
    sink: Arc<dyn FrameSink>,
    status: RwLock<ClientStatus>,
    point: RwLock<Option<Arc<Point>>>,
    connected_at: Timestamp,
}

impl Client {
    /// Creates a client writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            addr: sink.peer_addr(),
            sink,
            status: RwLock::new(ClientStatus::Connecting),
            point: RwLock::new(None),
            connected_at: Timestamp::now(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub const fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    #[must_use]
    pub fn status(&self) -> ClientStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ClientStatus) {
        let prev = std::mem::replace(&mut *self.status.write(), status);
        if prev != status {
            debug!(client = %self.addr, from = %prev, to = %status, "Client status");
        }
    }

    /// Point bound by a successful login.
    #[must_use]
    pub fn point(&self) -> Option<Arc<Point>> {
        self.point.read().clone()
    }

    pub(crate) fn bind_point(&self, point: Arc<Point>) {
        *self.point.write() = Some(point);
    }

    pub(crate) fn take_point(&self) -> Option<Arc<Point>> {
        self.point.write().take()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.point.read().is_some()
    }

    /// Sends one frame to the remote end.
    ///
    /// # Errors
    /// Transport errors from the sink.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        self.sink.send(frame).await?;
        if let Some(point) = self.point() {
            point.record_tx();
        }
        Ok(())
    }

    /// Closes the outbound side.
    ///
    /// # Errors
    /// Transport errors from the sink.
    pub async fn close(&self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.addr)
            .field("status", &self.status())
            .field("point", &self.point().map(|p| p.uuid.clone()))
            .finish()
    }
}
