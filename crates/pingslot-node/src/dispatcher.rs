//! # Event Dispatcher
//!
//! The transition table of the controller. Every event the protocol engine
//! posts (and every send timer that fires) lands here, one at a time, and
//! is turned into engine requests, state mutations and a [`Reaction`] for
//! the runtime loop.
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Event                  Action                                          │
//! │  ─────                  ──────                                          │
//! │  Connected              request ping slot + device time, arm send       │
//! │  Disconnected           stop the session                                │
//! │  TxDone / TxFailed(*)   re-arm send                                     │
//! │  RxDone                 drain frame, rx_count += 1                      │
//! │  RxFailed(*)            log                                             │
//! │  JoinFailure            log, hand retry to the host                     │
//! │  DeviceTimeSynced       time sync, B floor, enable beacon acquisition   │
//! │  PingSlotSynced         ping-slot sync, try A → B if beacon locked      │
//! │  BeaconNotFound         miss, drop lock, fall back to A, re-arm send    │
//! │  BeaconFound            lock, try A → B                                 │
//! │  BeaconLockContinuing   lock (no transition)                            │
//! │  BeaconMiss             miss (demote only at the miss limit)            │
//! │  ClassBReverted         fall back to A, then the revert action          │
//! │  Unknown(code)          fatal                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time-First Sequencing (strict policy)
//! ```text
//!   Connected ──▶ request_device_time
//!                      │
//!   DeviceTimeSynced ◀─┘──▶ enable_beacon_acquisition
//!                      └──▶ request_ping_slot_info
//!
//!   PingSlotSynced / BeaconFound without device time: ignored (warn)
//! ```
//!
//! Engine call failures never abort the session: they are logged and, where
//! the call was a class switch, turned into a downgrade.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use pingslot_core::{
    BackoffScheduler, ClassController, DeviceClass, EnterBlocker, EventKind, MessageFlags,
    RxFailure, SyncTracker, RX_BUFFER_SIZE,
};

use crate::config::{NodeConfig, RevertAction};
use crate::engine::{BeaconInfo, ProtocolEngine};
use crate::error::{EngineError, NodeError, NodeResult};
use crate::payload::PayloadSource;

// =============================================================================
// Reaction
// =============================================================================

/// What the runtime loop must do after an item was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing beyond what the dispatcher already did.
    Continue,
    /// Start a timer that fires a send after the given delay.
    ArmSend(Duration),
    /// End the session cleanly.
    Stop,
    /// The join was refused; retrying is up to the host.
    JoinFailed,
}

// =============================================================================
// Dispatch Policy
// =============================================================================

/// The slice of configuration the transition table reads.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub class_b_enabled: bool,
    pub ping_slot_periodicity: u8,
    pub revert_action: RevertAction,
    pub beacon_miss_limit: u32,
    pub port: u8,
    pub flags: MessageFlags,
}

impl From<&NodeConfig> for DispatchPolicy {
    fn from(config: &NodeConfig) -> Self {
        DispatchPolicy {
            class_b_enabled: config.class_b.enabled,
            ping_slot_periodicity: config.class_b.ping_slot_periodicity,
            revert_action: config.class_b.revert_action,
            beacon_miss_limit: config.class_b.beacon_miss_limit,
            port: config.uplink.port,
            flags: config.message_flags(),
        }
    }
}

// =============================================================================
// Controller State
// =============================================================================

/// All mutable controller state. Owned by exactly one [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct ControllerState {
    class: ClassController,
    sync: SyncTracker,
    scheduler: BackoffScheduler,
    joined: bool,
    last_beacon: Option<DateTime<Utc>>,
    uplinks_sent: u64,
}

impl ControllerState {
    fn new(config: &NodeConfig) -> Self {
        ControllerState {
            class: ClassController::new(config.duty_cycle(), config.class_b_policy()),
            sync: SyncTracker::new(config.class_b.miss_policy),
            scheduler: BackoffScheduler::new(),
            joined: false,
            last_beacon: None,
            uplinks_sent: 0,
        }
    }

    pub fn class(&self) -> &ClassController {
        &self.class
    }

    pub fn sync(&self) -> &SyncTracker {
        &self.sync
    }

    pub fn scheduler(&self) -> &BackoffScheduler {
        &self.scheduler
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Network time of the most recent decoded beacon.
    pub fn last_beacon(&self) -> Option<DateTime<Utc>> {
        self.last_beacon
    }

    /// Uplinks the engine accepted this session.
    pub fn uplinks_sent(&self) -> u64 {
        self.uplinks_sent
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Applies the transition table to one event at a time.
pub struct Dispatcher {
    state: ControllerState,
    policy: DispatchPolicy,
    payload: Box<dyn PayloadSource>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(config: &NodeConfig, payload: Box<dyn PayloadSource>) -> Self {
        Dispatcher {
            state: ControllerState::new(config),
            policy: DispatchPolicy::from(config),
            payload,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    fn strict(&self) -> bool {
        self.state.class.policy().require_time_sync
    }

    /// Handles one engine event.
    ///
    /// Only an unknown event is an error; everything else is absorbed into
    /// the state machine.
    pub fn on_event<E>(&mut self, engine: &mut E, event: EventKind) -> NodeResult<Reaction>
    where
        E: ProtocolEngine + ?Sized,
    {
        trace!(event = %event, class = %self.state.class.class(), "Dispatching event");

        let reaction = match event {
            EventKind::Connected => self.on_connected(engine),
            EventKind::Disconnected => {
                info!("Disconnected from network, ending session");
                self.state.joined = false;
                Reaction::Stop
            }
            EventKind::TxDone => {
                debug!("Uplink transmitted");
                self.arm_send(engine)
            }
            EventKind::TxFailed(kind) => {
                warn!(failure = ?kind, "Uplink failed");
                self.arm_send(engine)
            }
            EventKind::RxDone => {
                self.drain_frame(engine);
                Reaction::Continue
            }
            EventKind::RxFailed(kind) => {
                match kind {
                    RxFailure::Timeout => debug!("Receive window timed out"),
                    RxFailure::Error => warn!("Receive error"),
                }
                Reaction::Continue
            }
            EventKind::JoinFailure => {
                error!("Join failed, check credentials and network coverage");
                self.state.joined = false;
                Reaction::JoinFailed
            }
            EventKind::DeviceTimeSynced => self.on_device_time_synced(engine),
            EventKind::PingSlotSynced => self.on_ping_slot_synced(engine),
            EventKind::BeaconNotFound => {
                warn!("Beacon not found");
                self.state.sync.mark_beacon_lost();
                self.state.sync.clear_beacon_lock();
                self.fall_back_to_a(engine);
                if self.policy.class_b_enabled {
                    request(engine, "device time", |e| e.request_device_time());
                }
                self.arm_send(engine)
            }
            EventKind::BeaconFound => {
                if self.accept_beacon(engine) {
                    info!(locks = self.state.sync.counters().beacon_lock_count, "Beacon found");
                    self.try_enter_b(engine);
                }
                Reaction::Continue
            }
            EventKind::BeaconLockContinuing => {
                if self.accept_beacon(engine) {
                    trace!("Beacon lock continuing");
                }
                Reaction::Continue
            }
            EventKind::BeaconMiss => self.on_beacon_miss(engine),
            EventKind::ClassBReverted => self.on_class_b_reverted(engine),
            EventKind::Unknown(code) => {
                error!(code, "Unknown protocol event");
                return Err(NodeError::UnknownEvent(code));
            }
        };

        Ok(reaction)
    }

    /// Executes an armed send.
    ///
    /// Clears the pending flag first; a rejected send is re-armed so the
    /// session never stalls.
    pub fn perform_send<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        if !self.state.scheduler.begin_send() {
            trace!("Send timer fired with nothing armed");
            return Reaction::Continue;
        }

        if !self.state.joined {
            debug!("Not joined, dropping scheduled send");
            return Reaction::Continue;
        }

        let payload = self.payload.next_payload();
        match engine.send(self.policy.port, &payload, self.policy.flags) {
            Ok(bytes) => {
                self.state.uplinks_sent += 1;
                info!(bytes, port = self.policy.port, class = %self.state.class.class(), "Uplink scheduled");
                Reaction::Continue
            }
            Err(EngineError::WouldBlock) => {
                debug!("Duty cycle would be violated, re-arming send");
                self.arm_send(engine)
            }
            Err(e) => {
                warn!(error = %e, "Send rejected, re-arming");
                self.arm_send(engine)
            }
        }
    }

    // =========================================================================
    // Event Handlers
    // =========================================================================

    fn on_connected<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        info!("Connected to network");
        self.state.joined = true;

        if self.policy.class_b_enabled {
            if !self.strict() {
                self.request_ping_slot(engine);
            }
            request(engine, "device time", |e| e.request_device_time());
        }

        self.arm_send(engine)
    }

    fn on_device_time_synced<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        info!("Device time synchronized");
        self.state.sync.mark_time_synced();

        if self.policy.class_b_enabled {
            self.state.class.prefer_class_b_floor();
            request(engine, "beacon acquisition", |e| e.enable_beacon_acquisition());
            if self.strict() && !self.state.sync.is_ping_slot_synced() {
                self.request_ping_slot(engine);
            }
        }

        Reaction::Continue
    }

    fn on_ping_slot_synced<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        if self.strict() && !self.state.sync.is_time_synced() {
            warn!("Ping slot confirmed before device time, ignoring");
            return Reaction::Continue;
        }

        info!("Ping slot synchronized");
        self.state.sync.mark_ping_slot_synced();
        if self.state.sync.is_beacon_locked() {
            self.try_enter_b(engine);
        }
        Reaction::Continue
    }

    fn on_beacon_miss<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        self.state.sync.mark_beacon_lost();
        let misses = self.state.sync.consecutive_misses();
        warn!(consecutive = misses, "Beacon missed");

        let limit = self.policy.beacon_miss_limit;
        if limit > 0 && misses >= limit && self.state.class.class() == DeviceClass::B {
            warn!(limit, "Beacon miss limit reached, leaving Class B");
            self.state.sync.clear_beacon_lock();
            self.fall_back_to_a(engine);
            return self.arm_send(engine);
        }

        Reaction::Continue
    }

    fn on_class_b_reverted<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        warn!(action = %self.policy.revert_action, "Engine reverted to Class A");
        self.state.class.demote(&mut self.state.sync);

        match self.policy.revert_action {
            RevertAction::ReacquireBeacon if self.policy.class_b_enabled => {
                request(engine, "beacon acquisition", |e| e.enable_beacon_acquisition());
                Reaction::Continue
            }
            RevertAction::ReacquireBeacon => Reaction::Continue,
            RevertAction::SendNow => {
                if self.state.scheduler.is_pending() {
                    debug!("Send already armed, reverting without an extra uplink");
                    Reaction::Continue
                } else {
                    self.state.scheduler.request_send(Duration::ZERO, None);
                    self.perform_send(engine)
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Arms the next send at `max(floor, hint)`, or coalesces into the
    /// pending one.
    fn arm_send<E>(&mut self, engine: &mut E) -> Reaction
    where
        E: ProtocolEngine + ?Sized,
    {
        if self.state.scheduler.is_pending() {
            trace!("Send already armed, coalescing");
            return Reaction::Continue;
        }

        let hint = match engine.backoff_hint() {
            Ok(hint) => Some(hint),
            Err(e) => {
                debug!(error = %e, "Backoff hint unavailable, using the duty-cycle floor");
                None
            }
        };

        let floor = self.state.class.floor();
        match self.state.scheduler.request_send(floor, hint) {
            Some(delay) => {
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    floor_ms = floor.as_millis() as u64,
                    "Next send armed"
                );
                Reaction::ArmSend(delay)
            }
            None => Reaction::Continue,
        }
    }

    fn drain_frame<E>(&mut self, engine: &mut E)
    where
        E: ProtocolEngine + ?Sized,
    {
        let mut buf = [0u8; RX_BUFFER_SIZE];
        match engine.receive(&mut buf) {
            Ok(rx) => {
                self.state.sync.mark_rx();
                let len = rx.len.min(buf.len());
                debug!(
                    len,
                    port = rx.port,
                    flags = ?rx.flags,
                    payload = %hex::encode(&buf[..len]),
                    "Frame received"
                );
            }
            Err(e) => warn!(error = %e, "Receive after RxDone failed"),
        }
    }

    /// Records a beacon. Under the strict policy a beacon without device
    /// time is ignored and device time is requested instead.
    fn accept_beacon<E>(&mut self, engine: &mut E) -> bool
    where
        E: ProtocolEngine + ?Sized,
    {
        if self.strict() && !self.state.sync.is_time_synced() {
            warn!("Beacon reported before device time, ignoring");
            if self.policy.class_b_enabled {
                request(engine, "device time", |e| e.request_device_time());
            }
            return false;
        }

        self.state.sync.mark_beacon_found();
        self.record_beacon(engine);
        true
    }

    fn record_beacon<E>(&mut self, engine: &mut E)
    where
        E: ProtocolEngine + ?Sized,
    {
        match engine.last_beacon() {
            Ok(beacon) => self.note_beacon(&beacon),
            Err(e) => debug!(error = %e, "Beacon metadata unavailable"),
        }
    }

    fn note_beacon(&mut self, beacon: &BeaconInfo) {
        match beacon.timestamp() {
            Some(ts) => {
                debug!(gps_time = beacon.gps_time_secs, time = %ts, "Beacon time");
                self.state.last_beacon = Some(ts);
            }
            None => debug!(gps_time = beacon.gps_time_secs, "Beacon time out of range"),
        }
    }

    /// Attempts A → B. Missing preconditions are requested from the engine.
    fn try_enter_b<E>(&mut self, engine: &mut E)
    where
        E: ProtocolEngine + ?Sized,
    {
        if !self.policy.class_b_enabled {
            return;
        }

        match self.state.class.check_enter_b(&self.state.sync.state()) {
            Ok(()) => match engine.set_device_class(DeviceClass::B) {
                Ok(()) => {
                    self.state.class.confirm_b();
                    info!(floor_ms = self.state.class.floor().as_millis() as u64, "Switched to Class B");
                }
                Err(e) => {
                    warn!(error = %e, "Engine refused Class B, staying in Class A");
                    self.state.class.reject_b(&mut self.state.sync);
                }
            },
            Err(EnterBlocker::AlreadyInB) => trace!("Already in Class B"),
            Err(EnterBlocker::PingSlotNotSynced) => {
                debug!(blocker = %EnterBlocker::PingSlotNotSynced, "Class B deferred");
                if self.strict() && !self.state.sync.is_time_synced() {
                    request(engine, "device time", |e| e.request_device_time());
                } else {
                    self.request_ping_slot(engine);
                }
            }
            Err(EnterBlocker::DeviceTimeNotSynced) => {
                debug!(blocker = %EnterBlocker::DeviceTimeNotSynced, "Class B deferred");
                request(engine, "device time", |e| e.request_device_time());
            }
        }
    }

    /// Demotes to Class A and tells the engine if the device was in B.
    fn fall_back_to_a<E>(&mut self, engine: &mut E)
    where
        E: ProtocolEngine + ?Sized,
    {
        if self.state.class.demote(&mut self.state.sync) {
            info!("Switched to Class A");
            request(engine, "class A switch", |e| e.set_device_class(DeviceClass::A));
        }
    }

    fn request_ping_slot<E>(&mut self, engine: &mut E)
    where
        E: ProtocolEngine + ?Sized,
    {
        let periodicity = self.policy.ping_slot_periodicity;
        request(engine, "ping slot info", |e| e.request_ping_slot_info(periodicity));
    }
}

/// Issues a fire-and-forget engine request, logging a rejection.
fn request<E, F>(engine: &mut E, what: &'static str, call: F)
where
    E: ProtocolEngine + ?Sized,
    F: FnOnce(&mut E) -> Result<(), EngineError>,
{
    match call(engine) {
        Ok(()) => trace!(request = what, "Engine request issued"),
        Err(e) => warn!(request = what, error = %e, "Engine request rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::CounterPayload;
    use crate::sim::{EngineCall, SimulatedEngine};
    use pingslot_core::{MissPolicy, TxFailure};
    use proptest::prelude::*;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.device.dev_eui = "0080000004003996".parse().unwrap();
        config
    }

    fn strict_config() -> NodeConfig {
        let mut config = config();
        config.class_b.require_time_sync = true;
        config
    }

    fn dispatcher(config: &NodeConfig) -> Dispatcher {
        Dispatcher::new(config, Box::new(CounterPayload::default()))
    }

    fn feed(d: &mut Dispatcher, engine: &mut SimulatedEngine, events: &[EventKind]) -> Vec<Reaction> {
        events
            .iter()
            .map(|event| d.on_event(engine, *event).unwrap())
            .collect()
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[test]
    fn test_connected_requests_time_and_arms_one_send() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();

        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected]);

        assert!(!d.state().sync().is_ping_slot_synced());
        assert_eq!(engine.count(&EngineCall::RequestDeviceTime), 1);
        assert_eq!(reactions, vec![Reaction::ArmSend(Duration::from_secs(10))]);
        assert!(d.state().scheduler().is_pending());
        assert_eq!(d.state().scheduler().armed_total(), 1);
    }

    #[test]
    fn test_beacon_after_ping_slot_enters_class_b() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();

        feed(
            &mut d,
            &mut engine,
            &[EventKind::Connected, EventKind::PingSlotSynced, EventKind::BeaconFound],
        );

        assert_eq!(d.state().class().class(), DeviceClass::B);
        assert_eq!(d.state().sync().counters().beacon_lock_count, 1);
        assert_eq!(engine.count(&EngineCall::SetDeviceClass(DeviceClass::B)), 1);
        assert_eq!(d.state().class().floor(), Duration::from_secs(30));
        assert!(d.state().last_beacon().is_some());
    }

    #[test]
    fn test_beacon_not_found_in_b_falls_back() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();

        feed(
            &mut d,
            &mut engine,
            &[
                EventKind::Connected,
                EventKind::DeviceTimeSynced,
                EventKind::PingSlotSynced,
                EventKind::BeaconFound,
            ],
        );
        assert_eq!(d.state().class().class(), DeviceClass::B);
        let misses = d.state().sync().counters().beacon_miss_count;

        feed(&mut d, &mut engine, &[EventKind::BeaconNotFound]);

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert!(!d.state().sync().is_time_synced());
        assert_eq!(d.state().sync().counters().beacon_miss_count, misses + 1);
        assert_eq!(d.state().class().floor(), Duration::from_secs(10));
        assert_eq!(engine.count(&EngineCall::SetDeviceClass(DeviceClass::A)), 1);
    }

    #[test]
    fn test_tx_done_arms_sends_one_at_a_time() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::Connected]);

        for round in 0..3 {
            assert!(d.state().scheduler().is_pending());
            assert_eq!(d.perform_send(&mut engine), Reaction::Continue);
            assert!(!d.state().scheduler().is_pending());

            let reaction = d.on_event(&mut engine, EventKind::TxDone).unwrap();
            assert!(matches!(reaction, Reaction::ArmSend(_)), "round {}", round);
        }

        assert_eq!(d.state().scheduler().armed_total(), 4);
        assert_eq!(d.state().uplinks_sent(), 3);
    }

    #[test]
    fn test_tx_done_while_pending_coalesces() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::Connected]);

        let reactions = feed(
            &mut d,
            &mut engine,
            &[EventKind::TxDone, EventKind::TxFailed(TxFailure::Timeout)],
        );

        assert_eq!(reactions, vec![Reaction::Continue, Reaction::Continue]);
        assert_eq!(d.state().scheduler().armed_total(), 1);
    }

    #[test]
    fn test_unknown_event_is_fatal() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();

        let result = d.on_event(&mut engine, EventKind::Unknown(99));
        assert!(matches!(result, Err(NodeError::UnknownEvent(99))));
    }

    #[test]
    fn test_disconnected_stops() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected, EventKind::Disconnected]);
        assert_eq!(reactions[1], Reaction::Stop);
        assert!(!d.state().is_joined());
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    #[test]
    fn test_delay_uses_larger_backoff_hint() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new().with_backoff_hint(Duration::from_secs(42));

        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected]);
        assert_eq!(reactions, vec![Reaction::ArmSend(Duration::from_secs(42))]);
    }

    #[test]
    fn test_failed_hint_counts_as_zero() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new().with_failing_backoff_hint();

        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected]);
        assert_eq!(reactions, vec![Reaction::ArmSend(Duration::from_secs(10))]);
    }

    #[test]
    fn test_rejected_send_is_rearmed() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new().rejecting_sends(1);
        feed(&mut d, &mut engine, &[EventKind::Connected]);

        assert!(matches!(d.perform_send(&mut engine), Reaction::ArmSend(_)));
        assert!(d.state().scheduler().is_pending());
        assert_eq!(d.state().uplinks_sent(), 0);

        assert_eq!(d.perform_send(&mut engine), Reaction::Continue);
        assert_eq!(d.state().uplinks_sent(), 1);
    }

    #[test]
    fn test_send_after_join_failure_is_dropped() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected, EventKind::JoinFailure]);
        assert_eq!(reactions[1], Reaction::JoinFailed);

        assert_eq!(d.perform_send(&mut engine), Reaction::Continue);
        assert!(!d.state().scheduler().is_pending());
        assert_eq!(engine.sends(), 0);
    }

    #[test]
    fn test_device_time_moves_floor_to_class_b() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::Connected, EventKind::DeviceTimeSynced]);

        assert!(d.state().sync().is_time_synced());
        assert_eq!(d.state().class().floor(), Duration::from_secs(30));
        assert_eq!(engine.count(&EngineCall::EnableBeaconAcquisition), 1);
    }

    // =========================================================================
    // Class B Transitions
    // =========================================================================

    #[test]
    fn test_beacon_without_ping_slot_requests_it() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::BeaconFound]);

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert_eq!(engine.count(&EngineCall::RequestPingSlotInfo(4)), 1);
    }

    #[test]
    fn test_ping_slot_without_lock_stays_in_a() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::Connected, EventKind::PingSlotSynced]);

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert!(d.state().sync().is_ping_slot_synced());
    }

    #[test]
    fn test_rejected_class_switch_downgrades() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new().rejecting_class_b();

        feed(
            &mut d,
            &mut engine,
            &[
                EventKind::Connected,
                EventKind::DeviceTimeSynced,
                EventKind::PingSlotSynced,
                EventKind::BeaconFound,
            ],
        );

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert!(!d.state().sync().is_time_synced());
        assert_eq!(d.state().class().floor(), Duration::from_secs(10));
    }

    #[test]
    fn test_repeated_beacon_not_found_in_a_is_idempotent() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::Connected]);

        feed(&mut d, &mut engine, &[EventKind::BeaconNotFound]);
        let class = d.state().class().class();
        let sync = d.state().sync().state();
        let floor = d.state().class().floor();

        feed(&mut d, &mut engine, &[EventKind::BeaconNotFound, EventKind::BeaconNotFound]);

        assert_eq!(d.state().class().class(), class);
        assert_eq!(d.state().sync().state(), sync);
        assert_eq!(d.state().class().floor(), floor);
        assert_eq!(d.state().sync().counters().beacon_miss_count, 3);
        assert_eq!(engine.count(&EngineCall::SetDeviceClass(DeviceClass::A)), 0);
        assert_eq!(d.state().scheduler().armed_total(), 1);
    }

    #[test]
    fn test_single_miss_keeps_lock_by_default() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::BeaconFound, EventKind::BeaconMiss]);

        assert!(d.state().sync().is_beacon_locked());
        assert_eq!(d.state().sync().counters().beacon_miss_count, 1);
    }

    #[test]
    fn test_single_miss_clears_lock_with_clear_policy() {
        let mut config = config();
        config.class_b.miss_policy = MissPolicy::ClearLock;
        let mut d = dispatcher(&config);
        let mut engine = SimulatedEngine::new();
        feed(&mut d, &mut engine, &[EventKind::BeaconFound, EventKind::BeaconMiss]);

        assert!(!d.state().sync().is_beacon_locked());
        assert_eq!(d.state().class().class(), DeviceClass::A);
    }

    #[test]
    fn test_miss_limit_demotes_class_b() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(
            &mut d,
            &mut engine,
            &[EventKind::Connected, EventKind::PingSlotSynced, EventKind::BeaconFound],
        );
        assert_eq!(d.state().class().class(), DeviceClass::B);

        feed(&mut d, &mut engine, &[EventKind::BeaconMiss, EventKind::BeaconMiss]);
        assert_eq!(d.state().class().class(), DeviceClass::B);

        feed(&mut d, &mut engine, &[EventKind::BeaconMiss]);
        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert!(!d.state().sync().is_beacon_locked());
        assert_eq!(d.state().sync().counters().beacon_miss_count, 3);
    }

    #[test]
    fn test_beacon_resets_consecutive_misses() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(
            &mut d,
            &mut engine,
            &[
                EventKind::Connected,
                EventKind::PingSlotSynced,
                EventKind::BeaconFound,
                EventKind::BeaconMiss,
                EventKind::BeaconMiss,
                EventKind::BeaconLockContinuing,
                EventKind::BeaconMiss,
                EventKind::BeaconMiss,
            ],
        );
        assert_eq!(d.state().class().class(), DeviceClass::B);
        assert_eq!(d.state().sync().consecutive_misses(), 2);
    }

    #[test]
    fn test_revert_reacquires_beacon() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new();
        feed(
            &mut d,
            &mut engine,
            &[EventKind::Connected, EventKind::PingSlotSynced, EventKind::BeaconFound],
        );
        engine.clear_calls();

        let reaction = d.on_event(&mut engine, EventKind::ClassBReverted).unwrap();

        assert_eq!(reaction, Reaction::Continue);
        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert_eq!(engine.count(&EngineCall::EnableBeaconAcquisition), 1);
        assert_eq!(engine.sends(), 0);
    }

    #[test]
    fn test_revert_send_now() {
        let mut config = config();
        config.class_b.revert_action = RevertAction::SendNow;
        let mut d = dispatcher(&config);
        let mut engine = SimulatedEngine::new();
        feed(
            &mut d,
            &mut engine,
            &[EventKind::Connected, EventKind::PingSlotSynced, EventKind::BeaconFound],
        );
        d.perform_send(&mut engine);
        assert_eq!(engine.sends(), 1);

        feed(&mut d, &mut engine, &[EventKind::ClassBReverted]);

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert_eq!(engine.sends(), 2);
        assert!(!d.state().scheduler().is_pending());
    }

    #[test]
    fn test_class_b_disabled_stays_class_a() {
        let mut config = config();
        config.class_b.enabled = false;
        let mut d = dispatcher(&config);
        let mut engine = SimulatedEngine::new();

        feed(
            &mut d,
            &mut engine,
            &[
                EventKind::Connected,
                EventKind::DeviceTimeSynced,
                EventKind::PingSlotSynced,
                EventKind::BeaconFound,
            ],
        );

        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert_eq!(d.state().class().floor(), Duration::from_secs(10));
        assert_eq!(engine.count(&EngineCall::RequestDeviceTime), 0);
        assert_eq!(engine.count(&EngineCall::EnableBeaconAcquisition), 0);
        assert_eq!(engine.count(&EngineCall::SetDeviceClass(DeviceClass::B)), 0);
    }

    #[test]
    fn test_revert_with_class_b_disabled_leaves_beacon_alone() {
        let mut config = config();
        config.class_b.enabled = false;
        let mut d = dispatcher(&config);
        let mut engine = SimulatedEngine::new();

        let reactions = feed(&mut d, &mut engine, &[EventKind::Connected, EventKind::ClassBReverted]);

        assert_eq!(reactions[1], Reaction::Continue);
        assert_eq!(d.state().class().class(), DeviceClass::A);
        assert_eq!(engine.count(&EngineCall::EnableBeaconAcquisition), 0);
    }

    #[test]
    fn test_rx_done_counts_drained_frames() {
        let mut d = dispatcher(&config());
        let mut engine = SimulatedEngine::new().with_downlink(3, vec![0xde, 0xad]);

        feed(&mut d, &mut engine, &[EventKind::RxDone, EventKind::RxDone]);

        assert_eq!(d.state().sync().counters().rx_count, 1);
        assert_eq!(engine.count(&EngineCall::Receive), 2);
    }

    // =========================================================================
    // Strict (time-first) Policy
    // =========================================================================

    #[test]
    fn test_strict_defers_ping_slot_until_device_time() {
        let mut d = dispatcher(&strict_config());
        let mut engine = SimulatedEngine::new();

        feed(&mut d, &mut engine, &[EventKind::Connected]);
        assert_eq!(engine.count(&EngineCall::RequestPingSlotInfo(4)), 0);
        assert_eq!(engine.count(&EngineCall::RequestDeviceTime), 1);

        feed(&mut d, &mut engine, &[EventKind::DeviceTimeSynced]);
        assert_eq!(engine.count(&EngineCall::RequestPingSlotInfo(4)), 1);
    }

    #[test]
    fn test_strict_ignores_ping_slot_without_time() {
        let mut d = dispatcher(&strict_config());
        let mut engine = SimulatedEngine::new();

        feed(&mut d, &mut engine, &[EventKind::PingSlotSynced, EventKind::BeaconFound]);

        assert!(!d.state().sync().is_ping_slot_synced());
        assert!(!d.state().sync().is_beacon_locked());
        assert_eq!(d.state().sync().counters().beacon_lock_count, 0);
        assert_eq!(d.state().class().class(), DeviceClass::A);
    }

    #[test]
    fn test_strict_full_sequence_enters_b() {
        let mut d = dispatcher(&strict_config());
        let mut engine = SimulatedEngine::new();

        feed(
            &mut d,
            &mut engine,
            &[
                EventKind::Connected,
                EventKind::DeviceTimeSynced,
                EventKind::PingSlotSynced,
                EventKind::BeaconFound,
            ],
        );

        assert_eq!(d.state().class().class(), DeviceClass::B);
    }

    fn any_event() -> impl Strategy<Value = EventKind> {
        (0u16..18).prop_map(EventKind::from_code)
    }

    proptest! {
        #[test]
        fn strict_sync_flags_never_outlive_device_time(
            events in proptest::collection::vec(any_event(), 0..64),
            reject in any::<bool>(),
        ) {
            let mut d = dispatcher(&strict_config());
            let mut engine = if reject {
                SimulatedEngine::new().rejecting_class_b()
            } else {
                SimulatedEngine::new()
            };

            for event in events {
                if let Reaction::ArmSend(_) = d.on_event(&mut engine, event).unwrap() {
                    d.perform_send(&mut engine);
                }

                let sync = d.state().sync().state();
                if !sync.device_time_synced {
                    prop_assert!(!sync.ping_slot_synced);
                    prop_assert!(!sync.beacon_locked);
                }
            }
        }

        #[test]
        fn class_b_only_with_ping_slot(
            events in proptest::collection::vec(any_event(), 0..64),
        ) {
            let mut d = dispatcher(&config());
            let mut engine = SimulatedEngine::new();
            let mut ping_slot_seen = false;
            let mut previous = d.state().sync().counters();

            for event in events {
                ping_slot_seen |= event == EventKind::PingSlotSynced;
                let was_pending = d.state().scheduler().is_pending();

                let reaction = d.on_event(&mut engine, event).unwrap();
                if was_pending {
                    prop_assert!(!matches!(reaction, Reaction::ArmSend(_)));
                }
                if event == EventKind::TxDone {
                    d.perform_send(&mut engine);
                }

                if d.state().class().class() == DeviceClass::B {
                    prop_assert!(ping_slot_seen);
                }
                let counters = d.state().sync().counters();
                prop_assert!(counters.beacon_lock_count >= previous.beacon_lock_count);
                prop_assert!(counters.beacon_miss_count >= previous.beacon_miss_count);
                prop_assert!(counters.rx_count >= previous.rx_count);
                previous = counters;
            }
        }
    }
}
