//! # Validation Errors
//!
//! Raised when untrusted input is turned into one of the core newtypes.

use thiserror::Error;

/// Input could not be converted into a validated core type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier was empty or whitespace only.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier was being validated ("tool", "user").
        kind: &'static str,
    },

    /// Identifier exceeded the maximum length.
    #[error("{kind} must not exceed {max} characters (got {actual})")]
    TooLong {
        /// Which identifier was being validated.
        kind: &'static str,
        /// Maximum permitted length.
        max: usize,
        /// Length of the rejected input.
        actual: usize,
    },

    /// Identifier contained a control character.
    #[error("{kind} must not contain control characters")]
    ControlCharacter {
        /// Which identifier was being validated.
        kind: &'static str,
    },

    /// Lease or charge ID was not a UUID.
    #[error("invalid {kind} id {value:?}: {reason}")]
    InvalidId {
        /// Which identifier was being parsed ("lease", "charge").
        kind: &'static str,
        /// The rejected input.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Timestamp was malformed, out of range, or not UTC.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
