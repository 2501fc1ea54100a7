// ============================================
// File: crates/overlan-switch/src/testing.rs
// ============================================
//! Helpers shared by unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use overlan_transport::{FrameSink, TransportError};

use crate::client::Client;

/// Sink delivering every sent frame to a channel.
pub(crate) struct ChannelSink {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    closed: AtomicBool,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: &[u8]) -> overlan_transport::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed { peer: self.peer });
        }
        self.tx
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| TransportError::ConnectionClosed { peer: self.peer })
    }

    async fn close(&self) -> overlan_transport::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// A client whose outbound frames land in the returned receiver.
pub(crate) fn client(addr: &str) -> (Arc<Client>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink {
        peer: addr.parse().unwrap(),
        tx,
        closed: AtomicBool::new(false),
    });
    (Arc::new(Client::new(sink)), rx)
}
