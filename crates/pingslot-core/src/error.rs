//! # Error Types
//!
//! Domain-specific error types for pingslot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pingslot-core errors (this file)                                      │
//! │  ├── CoreError        - Identity / configuration domain errors         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  pingslot-node errors (separate crate)                                 │
//! │  ├── EngineError      - Status returned by a protocol engine call      │
//! │  └── NodeError        - Startup, config and fatal dispatch failures    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → NodeError → exit code             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state machines themselves cannot fail: flag and counter mutators are
//! infallible, and a rejected class switch is a transition, not an error.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The device EUI is all zeroes, i.e. it was never provisioned.
    ///
    /// ## When This Occurs
    /// - The factory identifier could not be read and no override was set
    /// - The configuration file still carries the placeholder value
    #[error("Device EUI is not set (all zeroes). Set your network credentials first.")]
    ZeroedDeviceEui,

    /// Ping-slot periodicity outside the range the network accepts.
    #[error("Ping-slot periodicity {value} exceeds maximum {max}")]
    InvalidPeriodicity { value: u8, max: u8 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised while parsing identities and keys from configuration text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Hex value decoded to the wrong number of bytes.
    #[error("{field} must be {expected} bytes, got {actual}")]
    WrongLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid format (e.g., non-hex characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
