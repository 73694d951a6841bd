//! # pingslot-node: Event Loop for the Class A/B Endpoint Controller
//!
//! This crate drives a wireless protocol engine for a battery-powered
//! endpoint. It joins the network, sends uplinks at a duty-cycle-bounded
//! rate and climbs from Class A to Class B once device time, the ping slot
//! and a beacon are in place, falling back when any of them is lost.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Endpoint Node                                   │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   Node (runtime.rs)                              │  │
//! │  │                                                                  │  │
//! │  │  One tokio mpsc queue, one consumer                              │  │
//! │  │  Send timers, join retry, status watch channel                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Dispatcher    │  │ ProtocolEngine │  │  PayloadSource         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Transition     │  │ connect / send │  │ Bytes for the next     │    │
//! │  │ table, A ⇄ B   │  │ beacon / class │  │ uplink                 │    │
//! │  │ send re-arm    │  │ (SimulatedEng.)│  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATE (pingslot-core):                                                │
//! │  • ClassController  - class + duty-cycle floor                         │
//! │  • SyncTracker      - time / ping slot / beacon flags + counters       │
//! │  • BackoffScheduler - at most one armed send                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + environment configuration
//! - [`dispatcher`] - Event transition table
//! - [`engine`] - Protocol engine contract
//! - [`error`] - Node and engine error types
//! - [`payload`] - Uplink payload sources
//! - [`runtime`] - Event loop, timers, status
//! - [`sim`] - In-process simulated engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pingslot_node::{CounterPayload, Node, NodeConfig, SimulatedEngine};
//!
//! let config = NodeConfig::load(None)?;
//! let mut node = Node::new(config, SimulatedEngine::new(), CounterPayload::default());
//! let sender = node.event_sender();
//! node.engine_mut().attach(sender);
//!
//! let handle = node.handle();
//! let summary = node.run().await?;
//! println!("Class at exit: {}", summary.status.class);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod payload;
pub mod runtime;
pub mod sim;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{NodeConfig, RevertAction};
pub use dispatcher::{ControllerState, DispatchPolicy, Dispatcher, Reaction};
pub use engine::{BeaconInfo, ConnectStatus, ProtocolEngine, Received};
pub use error::{EngineError, EngineResult, NodeError, NodeResult};
pub use payload::{CounterPayload, PayloadSource};
pub use runtime::{EventSender, Node, NodeHandle, NodeStatus, QueueItem, SessionEnd, SessionSummary};
pub use sim::{EngineCall, SimulatedEngine};
