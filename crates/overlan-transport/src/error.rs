// ============================================
// File: crates/overlan-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! One error type for everything below the switch: tunnel connections,
//! virtual devices and bridges.
//!
//! ## Error Categories
//! 1. **Connection Errors**: bind, send, receive, framing
//! 2. **Device Errors**: create, configure, read/write, closed
//! 3. **Bridge Errors**: open/close failures, closed bridge
//! 4. **Configuration Errors**: unknown provider, invalid values
//!
//! ## ⚠️ Important Note for Next Developer
//! - `DeviceClosed` is the only error a closed device may return from
//!   `read`/`write`; callers use `is_closed()` to end loops quietly
//! - Device creation usually needs CAP_NET_ADMIN
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use overlan_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Connection Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Send operation failed.
    #[error("Failed to send to {dest}: {reason}")]
    SendFailed {
        /// Destination address
        dest: SocketAddr,
        /// Why send failed
        reason: String,
    },

    /// Receive operation failed.
    #[error("Failed to receive from {peer}: {reason}")]
    ReceiveFailed {
        /// Remote address
        peer: SocketAddr,
        /// Why receive failed
        reason: String,
    },

    /// Peer closed the connection.
    #[error("Connection to {peer} closed")]
    ConnectionClosed {
        /// Remote address
        peer: SocketAddr,
    },

    /// Frame does not fit the wire header.
    #[error("Frame too large: max {max} bytes, got {actual}")]
    FrameTooLarge {
        /// Largest encodable frame
        max: usize,
        /// Frame length
        actual: usize,
    },

    /// Frame header did not start with the expected magic.
    #[error("Bad frame magic 0x{0:04x}")]
    BadMagic(u16),

    /// Listener was shut down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Device Errors
    // ========================================

    /// Failed to create a virtual device.
    #[error("Failed to create device for '{tenant}': {reason}")]
    DeviceCreateFailed {
        /// Tenant the device was for
        tenant: String,
        /// Why creation failed
        reason: String,
    },

    /// Failed to configure a virtual device.
    #[error("Failed to configure device '{name}': {reason}")]
    DeviceConfigFailed {
        /// Device name
        name: String,
        /// Why configuration failed
        reason: String,
    },

    /// Device is closed.
    #[error("Device '{name}' is closed")]
    DeviceClosed {
        /// Device name
        name: String,
    },

    /// Device read failed.
    #[error("Device '{name}' read failed: {reason}")]
    DeviceReadFailed {
        /// Device name
        name: String,
        /// Why read failed
        reason: String,
    },

    /// Device write failed.
    #[error("Device '{name}' write failed: {reason}")]
    DeviceWriteFailed {
        /// Device name
        name: String,
        /// Why write failed
        reason: String,
    },

    /// Operation is not provided by this device or bridge kind.
    #[error("{operation} is not supported by {kind}")]
    Unsupported {
        /// What was attempted
        operation: &'static str,
        /// Provider kind
        kind: String,
    },

    // ========================================
    // Bridge Errors
    // ========================================

    /// Bridge is closed.
    #[error("Bridge '{name}' is closed")]
    BridgeClosed {
        /// Bridge name
        name: String,
    },

    /// Bridge operation failed.
    #[error("Bridge '{name}': {reason}")]
    BridgeFailed {
        /// Bridge name
        name: String,
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Configuration Errors
    // ========================================

    /// No provider registered under this key.
    #[error("Unknown {what} provider '{key}'")]
    UnknownProvider {
        /// Registry name
        what: &'static str,
        /// Requested key
        key: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Configuration field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl ToString) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.to_string(),
        }
    }

    /// Creates a `DeviceCreateFailed` error.
    pub fn device_create_failed(tenant: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceCreateFailed {
            tenant: tenant.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `DeviceConfigFailed` error.
    pub fn device_config_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceConfigFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `DeviceClosed` error.
    pub fn device_closed(name: impl Into<String>) -> Self {
        Self::DeviceClosed { name: name.into() }
    }

    /// Creates a `BridgeFailed` error.
    pub fn bridge_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::BridgeFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` when the other end is gone: a closed connection,
    /// device, bridge or listener.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed { .. }
            | Self::DeviceClosed { .. }
            | Self::BridgeClosed { .. }
            | Self::ShuttingDown => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a virtual device error.
    #[must_use]
    pub const fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceCreateFailed { .. }
                | Self::DeviceConfigFailed { .. }
                | Self::DeviceClosed { .. }
                | Self::DeviceReadFailed { .. }
                | Self::DeviceWriteFailed { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::bind_failed("127.0.0.1:10002".parse().unwrap(), "address in use");
        assert!(err.to_string().contains("127.0.0.1:10002"));
        assert!(err.to_string().contains("address in use"));
        assert_eq!(
            TransportError::device_closed("sw0").to_string(),
            "Device 'sw0' is closed"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(TransportError::device_closed("sw0").is_closed());
        assert!(TransportError::device_closed("sw0").is_device_error());
        assert!(TransportError::ShuttingDown.is_closed());
        assert!(!TransportError::BadMagic(0x1234).is_closed());

        let eof: TransportError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(eof.is_closed());
        assert!(!eof.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        let transport_err: TransportError = io_err.into();
        assert!(transport_err.is_retryable());
    }
}
