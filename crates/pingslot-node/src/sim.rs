//! # Simulated Protocol Engine
//!
//! An in-process [`ProtocolEngine`] that records every call and can play the
//! network's part by posting the matching completion events back into the
//! node's queue.
//!
//! ## Auto-Responses
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Call                          Posted event                             │
//! │  ────                          ────────────                             │
//! │  connect                       Connected (JoinFailure while the         │
//! │                                configured join failures last)           │
//! │  send (accepted)               TxDone                                   │
//! │  request_device_time           DeviceTimeSynced                         │
//! │  request_ping_slot_info        PingSlotSynced                           │
//! │  enable_beacon_acquisition     BeaconFound                              │
//! │  set_device_class              nothing                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Without an attached [`EventSender`] the engine only records calls, which
//! is how the dispatcher tests drive it.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};

use pingslot_core::{Credentials, DeviceClass, EventKind, Eui64, MessageFlags};

use crate::engine::{BeaconInfo, ConnectStatus, ProtocolEngine, Received};
use crate::error::{EngineError, EngineResult};
use crate::runtime::EventSender;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Initialize,
    Connect(Eui64),
    Send {
        port: u8,
        payload: Vec<u8>,
        flags: MessageFlags,
    },
    Receive,
    BackoffHint,
    RequestDeviceTime,
    RequestPingSlotInfo(u8),
    EnableBeaconAcquisition,
    SetDeviceClass(DeviceClass),
    LastBeacon,
}

/// Scriptable stand-in for a radio protocol stack.
#[derive(Debug)]
pub struct SimulatedEngine {
    calls: Vec<EngineCall>,
    backoff_hint: Option<Duration>,
    init_error: Option<EngineError>,
    connect_error: Option<EngineError>,
    connect_status: ConnectStatus,
    join_failures: u32,
    rejected_sends: u32,
    reject_class_b: bool,
    downlinks: VecDeque<(u8, Vec<u8>)>,
    beacon: BeaconInfo,
    class: DeviceClass,
    events: Option<EventSender>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        SimulatedEngine {
            calls: Vec::new(),
            backoff_hint: Some(Duration::ZERO),
            init_error: None,
            connect_error: None,
            connect_status: ConnectStatus::InProgress,
            join_failures: 0,
            rejected_sends: 0,
            reject_class_b: false,
            downlinks: VecDeque::new(),
            beacon: BeaconInfo {
                gps_time_secs: 1_300_000_000,
                gateway_specific: vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
            },
            class: DeviceClass::A,
            events: None,
        }
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    pub fn with_backoff_hint(mut self, hint: Duration) -> Self {
        self.backoff_hint = Some(hint);
        self
    }

    /// Every backoff query fails.
    pub fn with_failing_backoff_hint(mut self) -> Self {
        self.backoff_hint = None;
        self
    }

    pub fn failing_init(mut self, err: EngineError) -> Self {
        self.init_error = Some(err);
        self
    }

    pub fn rejecting_connect(mut self, err: EngineError) -> Self {
        self.connect_error = Some(err);
        self
    }

    /// `connect` reports an already established session.
    pub fn already_connected(mut self) -> Self {
        self.connect_status = ConnectStatus::Connected;
        self
    }

    /// The next `count` joins end in `JoinFailure`.
    pub fn with_join_failures(mut self, count: u32) -> Self {
        self.join_failures = count;
        self
    }

    /// The next `count` sends return `WouldBlock`.
    pub fn rejecting_sends(mut self, count: u32) -> Self {
        self.rejected_sends = count;
        self
    }

    pub fn rejecting_class_b(mut self) -> Self {
        self.reject_class_b = true;
        self
    }

    /// Queues a frame for the next `receive`.
    pub fn with_downlink(mut self, port: u8, payload: Vec<u8>) -> Self {
        self.downlinks.push_back((port, payload));
        self
    }

    /// Posts completion events into the node's queue.
    pub fn attach(&mut self, events: EventSender) {
        self.events = Some(events);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    /// Number of `send` calls, accepted or not.
    pub fn sends(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, EngineCall::Send { .. }))
            .count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Class most recently accepted by `set_device_class`.
    pub fn device_class(&self) -> DeviceClass {
        self.class
    }

    fn respond(&self, event: EventKind) {
        if let Some(events) = &self.events {
            trace!(event = %event, "Simulated engine posting event");
            if events.post(event).is_err() {
                debug!(event = %event, "Node queue closed, dropping simulated event");
            }
        }
    }
}

impl ProtocolEngine for SimulatedEngine {
    fn initialize(&mut self) -> EngineResult<()> {
        self.calls.push(EngineCall::Initialize);
        match self.init_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn connect(&mut self, dev_eui: &Eui64, _credentials: &Credentials) -> EngineResult<ConnectStatus> {
        self.calls.push(EngineCall::Connect(*dev_eui));
        if let Some(err) = self.connect_error.clone() {
            return Err(err);
        }

        if self.join_failures > 0 {
            self.join_failures -= 1;
            self.respond(EventKind::JoinFailure);
            return Ok(ConnectStatus::InProgress);
        }

        if self.connect_status == ConnectStatus::InProgress {
            self.respond(EventKind::Connected);
        }
        Ok(self.connect_status)
    }

    fn send(&mut self, port: u8, payload: &[u8], flags: MessageFlags) -> EngineResult<usize> {
        self.calls.push(EngineCall::Send {
            port,
            payload: payload.to_vec(),
            flags,
        });

        if self.rejected_sends > 0 {
            self.rejected_sends -= 1;
            return Err(EngineError::WouldBlock);
        }

        self.respond(EventKind::TxDone);
        Ok(payload.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> EngineResult<Received> {
        self.calls.push(EngineCall::Receive);
        let (port, payload) = self.downlinks.pop_front().ok_or(EngineError::NoData)?;
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(Received {
            len,
            port,
            flags: MessageFlags::Unconfirmed,
        })
    }

    fn backoff_hint(&mut self) -> EngineResult<Duration> {
        self.calls.push(EngineCall::BackoffHint);
        self.backoff_hint.ok_or(EngineError::NoData)
    }

    fn request_device_time(&mut self) -> EngineResult<()> {
        self.calls.push(EngineCall::RequestDeviceTime);
        self.respond(EventKind::DeviceTimeSynced);
        Ok(())
    }

    fn request_ping_slot_info(&mut self, periodicity: u8) -> EngineResult<()> {
        self.calls.push(EngineCall::RequestPingSlotInfo(periodicity));
        self.respond(EventKind::PingSlotSynced);
        Ok(())
    }

    fn enable_beacon_acquisition(&mut self) -> EngineResult<()> {
        self.calls.push(EngineCall::EnableBeaconAcquisition);
        self.respond(EventKind::BeaconFound);
        Ok(())
    }

    fn set_device_class(&mut self, class: DeviceClass) -> EngineResult<()> {
        self.calls.push(EngineCall::SetDeviceClass(class));
        if class == DeviceClass::B && self.reject_class_b {
            return Err(EngineError::Unsupported("Class B not enabled on network".into()));
        }
        self.class = class;
        Ok(())
    }

    fn last_beacon(&mut self) -> EngineResult<BeaconInfo> {
        self.calls.push(EngineCall::LastBeacon);
        Ok(self.beacon.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::default()
    }

    #[test]
    fn test_records_calls() {
        let mut engine = SimulatedEngine::new();
        engine.initialize().unwrap();
        engine.request_ping_slot_info(4).unwrap();
        engine.request_ping_slot_info(4).unwrap();

        assert_eq!(engine.calls()[0], EngineCall::Initialize);
        assert_eq!(engine.count(&EngineCall::RequestPingSlotInfo(4)), 2);

        engine.clear_calls();
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_scripted_failures() {
        let mut engine = SimulatedEngine::new()
            .failing_init(EngineError::Busy)
            .rejecting_sends(1)
            .with_failing_backoff_hint()
            .rejecting_class_b();

        assert_eq!(engine.initialize(), Err(EngineError::Busy));
        assert_eq!(engine.send(15, &[1], MessageFlags::Unconfirmed), Err(EngineError::WouldBlock));
        assert_eq!(engine.send(15, &[1], MessageFlags::Unconfirmed), Ok(1));
        assert!(engine.backoff_hint().is_err());
        assert!(engine.set_device_class(DeviceClass::B).is_err());
        assert_eq!(engine.device_class(), DeviceClass::A);
    }

    #[test]
    fn test_receive_drains_queued_frames() {
        let mut engine = SimulatedEngine::new().with_downlink(7, vec![0xca, 0xfe]);
        let mut buf = [0u8; 8];

        let rx = engine.receive(&mut buf).unwrap();
        assert_eq!((rx.len, rx.port), (2, 7));
        assert_eq!(&buf[..2], &[0xca, 0xfe]);
        assert_eq!(engine.receive(&mut buf), Err(EngineError::NoData));
    }

    #[test]
    fn test_connect_status() {
        let eui = Eui64::new([0, 0x80, 0, 0, 4, 0, 0x39, 0x96]);
        let mut engine = SimulatedEngine::new().already_connected();
        assert_eq!(engine.connect(&eui, &credentials()), Ok(ConnectStatus::Connected));
        assert_eq!(engine.calls()[0], EngineCall::Connect(eui));

        let mut engine = SimulatedEngine::new().rejecting_connect(EngineError::Rejected(-1));
        assert_eq!(engine.connect(&eui, &credentials()), Err(EngineError::Rejected(-1)));
    }
}
