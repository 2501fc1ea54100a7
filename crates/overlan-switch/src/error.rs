// ============================================
// File: crates/overlan-switch/src/error.rs
// ============================================
//! # Switch Error Types
//!
//! ## Propagation Policy
//! - Transport errors end the connection that raised them
//! - Protocol errors drop the frame; the connection survives
//! - Resource errors surface to the caller; other tenants carry on
//!
//! `is_connection_fatal()` is the one place that policy is encoded.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::net::SocketAddr;

use thiserror::Error;

use overlan_common::error::CommonError;
use overlan_core::error::CoreError;
use overlan_transport::error::TransportError;

use crate::apps::DropReason;

/// Result type for switch operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Switch error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Not found bridge {tenant}")]
    BridgeNotFound { tenant: String },

    #[error("Resource unavailable: {reason}")]
    Resource { reason: String },

    #[error("No point bound to client {client}")]
    PointNotFound { client: SocketAddr },

    #[error("Frame dropped: {0}")]
    Protocol(#[from] DropReason),

    #[error("Address pool for network '{network}' exhausted")]
    PoolExhausted { network: String },

    #[error("Unknown network '{network}'")]
    UnknownNetwork { network: String },

    #[error("Switch already started")]
    AlreadyStarted,

    #[error("already closed")]
    AlreadyStopped,

    #[error("Switch failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn config_load(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn bridge_not_found(tenant: impl Into<String>) -> Self {
        Self::BridgeNotFound {
            tenant: tenant.into(),
        }
    }

    pub fn resource(reason: impl Into<String>) -> Self {
        Self::Resource {
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Missing tenants, exhausted pools and device creation failures.
    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        match self {
            Self::BridgeNotFound { .. }
            | Self::Resource { .. }
            | Self::PoolExhausted { .. }
            | Self::UnknownNetwork { .. } => true,
            Self::Transport(e) => matches!(
                e,
                TransportError::DeviceCreateFailed { .. } | TransportError::UnknownProvider { .. }
            ),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Core(_))
    }

    /// Returns `true` if the connection that produced this error must be
    /// torn down.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::PoolExhausted { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/overlan/switch.toml", "file not found");
        assert!(err.to_string().contains("/etc/overlan/switch.toml"));
        assert_eq!(ServerError::bridge_not_found("corp").to_string(), "Not found bridge corp");
        assert_eq!(ServerError::AlreadyStopped.to_string(), "already closed");
    }

    #[test]
    fn test_error_classification() {
        assert!(ServerError::bridge_not_found("corp").is_resource_error());
        assert!(!ServerError::bridge_not_found("corp").is_connection_fatal());

        let closed = ServerError::from(TransportError::device_closed("sw0"));
        assert!(closed.is_connection_fatal());

        let dropped = ServerError::Protocol(DropReason::new("auth", "not authenticated"));
        assert!(dropped.is_protocol_error());
        assert!(!dropped.is_connection_fatal());

        let missing = ServerError::PointNotFound {
            client: "127.0.0.1:4000".parse().unwrap(),
        };
        assert!(!missing.is_connection_fatal());
        assert!(ServerError::config_invalid("listen", "bad").is_config_error());
    }
}
