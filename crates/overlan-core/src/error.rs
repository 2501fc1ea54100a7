// ============================================
// File: crates/overlan-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Errors raised while interpreting frames. Data frames never produce
//! them; only control-frame decoding can fail.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use overlan_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Errors from frame and control-message handling.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Frame is too short for the requested view.
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Not a control frame.
    #[error("Not a control frame")]
    NotControl,

    /// Control type byte is not known.
    #[error("Unknown control type: 0x{0:02x}")]
    UnknownControlType(u8),

    /// Control payload did not decode.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Control type that was being decoded
        kind: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    /// Creates a `TooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::TooShort { expected, actual }
    }

    /// Creates an `InvalidPayload` error.
    pub fn invalid_payload(kind: &'static str, reason: impl ToString) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the peer sent something it should not have.
    ///
    /// Every variant except wrapped common errors qualifies; callers drop
    /// the frame and keep the connection.
    #[must_use]
    pub const fn is_peer_error(&self) -> bool {
        !matches!(self, Self::Common(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CoreError::UnknownControlType(0x7f).to_string(),
            "Unknown control type: 0x7f"
        );
        let err = CoreError::too_short(14, 3);
        assert!(err.to_string().contains("14"));
        assert!(err.is_peer_error());
    }
}
