// ============================================
// File: crates/overlan-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The switch does not care how frames reach it. A listener hands out
//! connections, each split into a receive half owned by the connection
//! task and a send half shared with device read loops.
//!
//! ## Main Functionality
//! - `Listener`: accepts tunnel connections
//! - `FrameStream`: ordered inbound frames of one connection
//! - `FrameSink`: outbound frames of one connection, shareable
//! - `TransportRegistry`: protocol name to listener factory
//!
//! ## ⚠️ Important Note for Next Developer
//! - `FrameSink::send` may be called concurrently; implementations must
//!   keep whole frames contiguous on the wire
//! - `FrameStream::recv` returning `Ok(None)` means orderly close
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TransportError};

// ============================================
// Frame Halves
// ============================================

/// Outbound half of a tunnel connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sends one frame to the peer.
    ///
    /// # Errors
    /// Returns error if the connection is gone or the frame is too large.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Closes the outbound direction. Closing twice is not an error.
    async fn close(&self) -> Result<()>;

    /// Address of the remote peer.
    fn peer_addr(&self) -> SocketAddr;
}

/// Inbound half of a tunnel connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receives the next frame; `Ok(None)` once the peer has closed.
    ///
    /// # Errors
    /// Returns error on I/O failure or a malformed header.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// An accepted tunnel connection.
pub struct Connection {
    /// Remote address, the client's identity
    pub peer: SocketAddr,
    /// Inbound frames
    pub stream: Box<dyn FrameStream>,
    /// Outbound frames
    pub sink: Arc<dyn FrameSink>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish_non_exhaustive()
    }
}

// ============================================
// Listener
// ============================================

/// A bound listening endpoint.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next connection.
    ///
    /// # Errors
    /// `ShuttingDown` once `shutdown` has been called.
    async fn accept(&self) -> Result<Connection>;

    /// Address this listener is bound to.
    ///
    /// # Errors
    /// Returns error if the address cannot be determined.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Stops accepting; pending and future `accept` calls fail.
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` until `shutdown` is called.
    fn is_active(&self) -> bool;
}

// ============================================
// TransportRegistry
// ============================================

/// Binds a listener on an address.
pub type ListenerFactory = Arc<dyn Fn(SocketAddr) -> Result<Arc<dyn Listener>> + Send + Sync>;

/// Listener factories keyed by protocol name.
///
/// `with_defaults()` registers `tcp`. Other framings register their own
/// factory under a new key.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, ListenerFactory>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in transports.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", |addr| {
            let listener = crate::tcp::TcpFrameListener::bind(addr)?;
            Ok(Arc::new(listener) as Arc<dyn Listener>)
        });
        registry
    }

    /// Registers or replaces a factory.
    pub fn register<F>(&mut self, protocol: impl Into<String>, factory: F)
    where
        F: Fn(SocketAddr) -> Result<Arc<dyn Listener>> + Send + Sync + 'static,
    {
        self.factories.insert(protocol.into(), Arc::new(factory));
    }

    /// Binds a listener for `protocol`.
    ///
    /// # Errors
    /// `UnknownProvider` if nothing is registered under `protocol`, or the
    /// factory's own bind error.
    pub fn bind(&self, protocol: &str, addr: SocketAddr) -> Result<Arc<dyn Listener>> {
        let factory = self
            .factories
            .get(protocol)
            .ok_or_else(|| TransportError::UnknownProvider {
                what: "transport",
                key: protocol.to_string(),
            })?;
        factory(addr)
    }

    /// Registered protocol names.
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}
