//! # Protocol Engine Contract
//!
//! The narrow interface the controller uses to drive the wireless protocol
//! stack. The engine owns join, encryption, MAC commands and the radio; the
//! controller only issues requests and reacts to the events the engine
//! posts back.
//!
//! ## Request / Event Pairs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Request (non-blocking)            Completes as event                   │
//! │  ──────────────────────            ──────────────────                   │
//! │  connect                           Connected | JoinFailure              │
//! │  send                              TxDone | TxFailed(*)                 │
//! │  request_device_time               DeviceTimeSynced                     │
//! │  request_ping_slot_info            PingSlotSynced                       │
//! │  enable_beacon_acquisition         BeaconFound | BeaconNotFound         │
//! │  set_device_class                  (status only)                        │
//! │                                                                         │
//! │  Queries (immediate): backoff_hint, receive, last_beacon               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call returns a status that the caller inspects immediately.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use pingslot_core::{Credentials, DeviceClass, Eui64, MessageFlags};

use crate::error::EngineResult;

/// Seconds between the Unix epoch and the GPS epoch (1980-01-06T00:00:00Z).
const GPS_EPOCH_UNIX_SECS: i64 = 315_964_800;

/// Outcome of a successful `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Join procedure started; result arrives as an event.
    InProgress,
    /// Session already established (e.g. restored keys).
    Connected,
}

/// Metadata of one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub port: u8,
    pub flags: MessageFlags,
}

/// Last decoded beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeaconInfo {
    /// Network time carried by the beacon, seconds since the GPS epoch.
    pub gps_time_secs: u32,
    /// Gateway-specific info field, uninterpreted.
    pub gateway_specific: Vec<u8>,
}

impl BeaconInfo {
    /// Beacon time as a UTC timestamp (leap seconds not applied).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(GPS_EPOCH_UNIX_SECS + i64::from(self.gps_time_secs), 0)
            .single()
    }
}

/// Requests the controller issues into the protocol stack.
///
/// Implementations must not block: long-running work completes later as an
/// event posted into the node's queue.
pub trait ProtocolEngine {
    /// Brings up the stack. Failure is fatal at startup.
    fn initialize(&mut self) -> EngineResult<()>;

    /// Starts the over-the-air join.
    fn connect(&mut self, dev_eui: &Eui64, credentials: &Credentials) -> EngineResult<ConnectStatus>;

    /// Enqueues an uplink. Returns the number of bytes scheduled.
    fn send(&mut self, port: u8, payload: &[u8], flags: MessageFlags) -> EngineResult<usize>;

    /// Drains one received frame into `buf`. Only valid after `RxDone`.
    fn receive(&mut self, buf: &mut [u8]) -> EngineResult<Received>;

    /// Minimum wait before the next legal uplink.
    fn backoff_hint(&mut self) -> EngineResult<Duration>;

    fn request_device_time(&mut self) -> EngineResult<()>;

    /// Asks the network to confirm a ping slot every 2^`periodicity` seconds.
    fn request_ping_slot_info(&mut self, periodicity: u8) -> EngineResult<()>;

    fn enable_beacon_acquisition(&mut self) -> EngineResult<()>;

    fn set_device_class(&mut self, class: DeviceClass) -> EngineResult<()>;

    fn last_beacon(&mut self) -> EngineResult<BeaconInfo>;
}
