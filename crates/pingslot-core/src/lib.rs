//! # pingslot-core: Pure Class / Beacon State Logic
//!
//! This crate holds the state machines of the endpoint controller as plain
//! data with zero I/O dependencies. The protocol engine, timers and the
//! event loop live in `pingslot-node`; everything here is deterministic.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Endpoint Controller Layers                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               Protocol Engine (external, callbacks)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ EventKind                              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           pingslot-node: event loop + dispatcher                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ pingslot-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   sync    │  │   class   │  │  backoff  │  │   │
//! │  │   │ Eui64     │  │ flags     │  │ A ⇄ B     │  │ coalesce  │  │   │
//! │  │   │ EventKind │  │ counters  │  │ duty floor│  │ max(a, b) │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO ENGINE CALLS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Device class, identity, event kinds, duty cycle
//! - [`sync`] - Synchronization flags and session counters
//! - [`class`] - Class A/B transition rules
//! - [`backoff`] - Send coalescing and delay selection
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use pingslot_core::{BackoffScheduler, DutyCycle, DeviceClass};
//! use std::time::Duration;
//!
//! let duty = DutyCycle::default();
//! let mut scheduler = BackoffScheduler::new();
//!
//! // The network asks for 3s, the Class-A floor is 10s: the floor wins.
//! let delay = scheduler.request_send(duty.floor_for(DeviceClass::A), Some(Duration::from_secs(3)));
//! assert_eq!(delay, Some(Duration::from_secs(10)));
//!
//! // A second request while the first is armed is coalesced.
//! assert_eq!(scheduler.request_send(duty.class_a, None), None);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod class;
pub mod error;
pub mod sync;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use backoff::BackoffScheduler;
pub use class::{ClassBPolicy, ClassController, EnterBlocker};
pub use error::{CoreError, CoreResult, ValidationError};
pub use sync::{MissPolicy, SyncCounters, SyncState, SyncTracker};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default application port for uplinks and downlinks.
pub const DEFAULT_APP_PORT: u8 = 15;

/// Default minimum interval between sends while in Class A (milliseconds).
pub const DEFAULT_CLASS_A_DUTY_CYCLE_MS: u64 = 10_000;

/// Default minimum interval between sends while in Class B (milliseconds).
///
/// Longer than Class A: the radio also spends airtime listening in ping
/// slots, so uplinks are spaced further apart.
pub const DEFAULT_CLASS_B_DUTY_CYCLE_MS: u64 = 30_000;

/// Largest ping-slot periodicity the network accepts (one slot every 2^7 s).
pub const MAX_PING_SLOT_PERIODICITY: u8 = 7;

/// Size of the buffer used to drain one received frame.
pub const RX_BUFFER_SIZE: usize = 255;
