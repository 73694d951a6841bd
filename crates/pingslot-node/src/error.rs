//! # Node Error Types
//!
//! Error types for the endpoint runtime and the protocol-engine contract.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Node Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Startup      │  │     Session             │ │
//! │  │  (fatal)        │  │    (fatal)      │  │                         │ │
//! │  │  InvalidConfig  │  │  EngineInit     │  │  UnknownEvent (fatal)   │ │
//! │  │  ConfigLoad     │  │  ConnectRejected│  │  ChannelError           │ │
//! │  │  Core (EUI)     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  EngineError - status of a single engine call. Never fatal:     │   │
//! │  │  handled where the call is made (log + state-machine reaction). │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use pingslot_core::CoreError;

/// Result type alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Result type alias for protocol-engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Engine Error
// =============================================================================

/// Non-OK status returned by a protocol-engine call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Sending now would violate the duty cycle.
    #[error("Duty cycle violation, engine would block")]
    WouldBlock,

    /// Engine is busy with another operation.
    #[error("Engine busy")]
    Busy,

    /// Nothing to read or report.
    #[error("No data available")]
    NoData,

    /// Request not supported by the engine or the network.
    #[error("Unsupported request: {0}")]
    Unsupported(String),

    /// Generic rejection with the engine's status code.
    #[error("Engine rejected request (code {0})")]
    Rejected(i32),
}

// =============================================================================
// Node Error
// =============================================================================

/// Errors that end (or prevent) a session.
#[derive(Debug, Error)]
pub enum NodeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Identity or parameter rejected by the domain layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Startup Errors
    // =========================================================================
    /// The protocol engine failed to initialize.
    #[error("Protocol engine initialization failed: {0}")]
    EngineInitFailed(EngineError),

    /// The engine refused to start the join procedure.
    #[error("Connection error: {0}")]
    ConnectRejected(EngineError),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The engine delivered an event the controller does not know.
    #[error("Unknown protocol event (code {0}), refusing to continue")]
    UnknownEvent(u16),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for NodeError {
    fn from(err: toml::ser::Error) -> Self {
        NodeError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl NodeError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::ConfigLoadFailed(_)
                | NodeError::ConfigSaveFailed(_)
                | NodeError::Core(_)
        )
    }

    /// Process exit code reported for this error.
    ///
    /// ```text
    ///  2  configuration / identity     4  connect rejected
    ///  3  engine initialization        70 unknown protocol event
    ///  1  anything else
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_config_error() => 2,
            NodeError::EngineInitFailed(_) => 3,
            NodeError::ConnectRejected(_) => 4,
            NodeError::UnknownEvent(_) => 70,
            _ => 1,
        }
    }
}
