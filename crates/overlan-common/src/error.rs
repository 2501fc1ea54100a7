// ============================================
// File: crates/overlan-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Errors raised by the shared types (range parsing, identifier decoding)
//! that higher crates wrap through `#[from]`.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors shared across overlan crates.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// An address range whose start lies after its end.
    #[error("Invalid range {start} - {end}")]
    InvalidRange {
        /// First address of the range
        start: String,
        /// Last address of the range
        end: String,
    },

    /// Failed to decode data.
    #[error("Decoding error: {context}: {details}")]
    Decoding {
        /// What was being decoded
        context: String,
        /// Error details
        details: String,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error was caused by caller-supplied data.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::InvalidRange { .. } | Self::Decoding { .. }
        )
    }
}

impl From<base64::DecodeError> for CommonError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Decoding {
            context: "base64".into(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_input("subnet.start", "not an IPv4 address");
        assert!(err.to_string().contains("subnet.start"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_range_error_display() {
        let err = CommonError::InvalidRange {
            start: "10.0.0.9".into(),
            end: "10.0.0.1".into(),
        };
        assert_eq!(err.to_string(), "Invalid range 10.0.0.9 - 10.0.0.1");
    }
}
