// ============================================
// File: crates/overlan-core/src/protocol/control.rs
// ============================================
//! # Control Messages
//!
//! ## Creation Reason
//! Points log in and request an address in-band, over the same frame
//! stream as their data. A control frame has an all-zero destination MAC,
//! a one-byte type and a JSON body.
//!
//! ## Main Functionality
//! - `ControlType`: type byte registry
//! - `ControlMessage`: typed messages with `encode` / `decode`
//!
//! ## Last Modified
//! v0.1.0 - Initial control messages

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::protocol::frame::{Frame, CONTROL_HEADER_LEN};

/// Control type byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlType {
    /// Point login.
    AuthRequest = 0x01,
    /// Login accepted.
    AuthReply = 0x02,
    /// Address request.
    LeaseRequest = 0x03,
    /// Address granted.
    LeaseReply = 0x04,
}

impl ControlType {
    /// Maps a type byte to a `ControlType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::AuthRequest),
            0x02 => Some(Self::AuthReply),
            0x03 => Some(Self::LeaseRequest),
            0x04 => Some(Self::LeaseReply),
            _ => None,
        }
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequest => "auth-request",
            Self::AuthReply => "auth-reply",
            Self::LeaseRequest => "lease-request",
            Self::LeaseReply => "lease-reply",
        }
    }
}

/// A route pushed to points in lease replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination prefix, e.g. `192.168.10.0/24`
    pub prefix: String,
    /// Gateway inside the overlay
    pub nexthop: String,
}

/// Login credentials sent by a point.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Stable point identity
    pub uuid: String,
    /// Tenant network to join
    pub network: String,
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
    /// Human-readable point name
    #[serde(default)]
    pub alias: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("uuid", &self.uuid)
            .field("network", &self.network)
            .field("username", &self.username)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// A control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Point login.
    AuthRequest(AuthRequest),
    /// Login accepted.
    AuthReply {
        /// Network joined
        network: String,
        /// Alias of the switch
        alias: String,
    },
    /// Address request; `uuid` is informational.
    LeaseRequest {
        /// Requesting point
        uuid: Option<String>,
    },
    /// Address granted.
    LeaseReply {
        /// Leased address
        address: Ipv4Addr,
        /// Tenant netmask
        netmask: Ipv4Addr,
        /// Routes reachable through the overlay
        routes: Vec<Route>,
    },
}

#[derive(Serialize, Deserialize)]
struct AuthReplyBody {
    network: String,
    alias: String,
}

#[derive(Serialize, Deserialize, Default)]
struct LeaseRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct LeaseReplyBody {
    address: Ipv4Addr,
    netmask: Ipv4Addr,
    #[serde(default)]
    routes: Vec<Route>,
}

impl ControlMessage {
    /// Type byte of this message.
    #[must_use]
    pub const fn kind(&self) -> ControlType {
        match self {
            Self::AuthRequest(_) => ControlType::AuthRequest,
            Self::AuthReply { .. } => ControlType::AuthReply,
            Self::LeaseRequest { .. } => ControlType::LeaseRequest,
            Self::LeaseReply { .. } => ControlType::LeaseReply,
        }
    }

    /// Encodes the message into a control frame.
    ///
    /// # Errors
    /// Only if JSON serialization fails, which the message types here
    /// cannot trigger in practice.
    pub fn encode(&self) -> Result<Bytes> {
        let kind = self.kind();
        let body = match self {
            Self::AuthRequest(req) => serde_json::to_vec(req),
            Self::AuthReply { network, alias } => serde_json::to_vec(&AuthReplyBody {
                network: network.clone(),
                alias: alias.clone(),
            }),
            Self::LeaseRequest { uuid } => {
                serde_json::to_vec(&LeaseRequestBody { uuid: uuid.clone() })
            }
            Self::LeaseReply {
                address,
                netmask,
                routes,
            } => serde_json::to_vec(&LeaseReplyBody {
                address: *address,
                netmask: *netmask,
                routes: routes.clone(),
            }),
        }
        .map_err(|e| CoreError::invalid_payload(kind.as_str(), e))?;

        let mut buf = BytesMut::with_capacity(CONTROL_HEADER_LEN + body.len());
        buf.put_bytes(0, 6);
        buf.put_u8(kind as u8);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decodes a control frame.
    ///
    /// An empty `LeaseRequest` body is accepted.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let byte = frame.control_type().ok_or(CoreError::NotControl)?;
        let kind = ControlType::from_byte(byte).ok_or(CoreError::UnknownControlType(byte))?;
        let body = frame.payload();
        let invalid = |e: serde_json::Error| CoreError::invalid_payload(kind.as_str(), e);

        let msg = match kind {
            ControlType::AuthRequest => Self::AuthRequest(serde_json::from_slice(&body).map_err(invalid)?),
            ControlType::AuthReply => {
                let b: AuthReplyBody = serde_json::from_slice(&body).map_err(invalid)?;
                Self::AuthReply {
                    network: b.network,
                    alias: b.alias,
                }
            }
            ControlType::LeaseRequest => {
                let b: LeaseRequestBody = if body.is_empty() {
                    LeaseRequestBody::default()
                } else {
                    serde_json::from_slice(&body).map_err(invalid)?
                };
                Self::LeaseRequest { uuid: b.uuid }
            }
            ControlType::LeaseReply => {
                let b: LeaseReplyBody = serde_json::from_slice(&body).map_err(invalid)?;
                Self::LeaseReply {
                    address: b.address,
                    netmask: b.netmask,
                    routes: b.routes,
                }
            }
        };
        Ok(msg)
    }
}
