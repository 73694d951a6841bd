//! # Node Runtime
//!
//! The single-consumer event loop that owns the protocol engine and the
//! dispatcher for one session.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Node Runtime                                  │
//! │                                                                         │
//! │   engine callbacks ──┐                                                  │
//! │   (EventSender)      │                                                  │
//! │                      ▼                                                  │
//! │   send timers ──▶ ┌──────────────────┐     ┌──────────────────────┐    │
//! │   join retry  ──▶ │  mpsc queue      │────▶│  Dispatcher          │    │
//! │   NodeHandle  ──▶ │  (strict FIFO)   │     │  (transition table)  │    │
//! │                   └──────────────────┘     └──────────┬───────────┘    │
//! │                                                       │ Reaction       │
//! │                                                       ▼                │
//! │   ┌──────────────────────────────────────────────────────────────────┐ │
//! │   │  ArmSend(d)  → spawn sleep(d), then post SendDue                 │ │
//! │   │  JoinFailed  → exponential backoff, then post Rejoin             │ │
//! │   │                (at most one pending; unjoined once exhausted)    │ │
//! │   │  Stop        → end session                                       │ │
//! │   └──────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! │   After every item: NodeStatus published on a watch channel            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timers are never cancelled. The dispatcher's pending-send flag makes sure
//! only one of them is ever live. A timer that fires after [`Node::run`] has
//! returned still lands in the queue, where it stays unread unless `run` is
//! called again.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use pingslot_core::{DeviceClass, EventKind, Eui64, SyncCounters, SyncState};

use crate::config::NodeConfig;
use crate::dispatcher::{Dispatcher, Reaction};
use crate::engine::{ConnectStatus, ProtocolEngine};
use crate::error::{NodeError, NodeResult};
use crate::payload::PayloadSource;

// =============================================================================
// Queue Items
// =============================================================================

/// Work items serialized through the node's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    /// An event reported by the protocol engine.
    Event(EventKind),
    /// An armed send timer fired.
    SendDue,
    /// The join backoff elapsed.
    Rejoin,
    /// Stop the loop.
    Shutdown,
}

/// Cloneable producer side of the node queue.
///
/// Engine bindings post their completion events through this.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl EventSender {
    /// Posts an engine event. Never blocks.
    pub fn post(&self, event: EventKind) -> NodeResult<()> {
        self.push(QueueItem::Event(event))
    }

    /// Posts an event by its raw engine code.
    pub fn post_code(&self, code: u16) -> NodeResult<()> {
        self.post(EventKind::from_code(code))
    }

    fn push(&self, item: QueueItem) -> NodeResult<()> {
        self.tx
            .send(item)
            .map_err(|_| NodeError::ChannelError("Node queue closed".into()))
    }
}

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of the controller, published after every item.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub session_id: Uuid,
    pub dev_eui: Eui64,
    pub running: bool,
    pub joined: bool,
    pub join_attempts: u32,
    pub rejoin_pending: bool,
    pub class: DeviceClass,
    pub duty_floor_ms: u64,
    pub sync: SyncState,
    pub counters: SyncCounters,
    pub send_pending: bool,
    pub sends_armed: u64,
    pub uplinks_sent: u64,
    pub last_beacon: Option<DateTime<Utc>>,
    pub events_processed: u64,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// The engine reported `Disconnected`.
    Disconnected,
    /// [`NodeHandle::shutdown`] was called.
    Shutdown,
}

/// Result of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub status: NodeStatus,
}

// =============================================================================
// Node Handle
// =============================================================================

/// Handle for observing and steering a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    sender: EventSender,
    status_rx: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    /// Returns the latest published status.
    pub fn status(&self) -> NodeStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Injects an engine event.
    pub fn post(&self, event: EventKind) -> NodeResult<()> {
        self.sender.post(event)
    }

    /// Asks the loop to stop after the items already queued.
    pub fn shutdown(&self) -> NodeResult<()> {
        self.sender.push(QueueItem::Shutdown)
    }
}

// =============================================================================
// Node
// =============================================================================

/// One endpoint session: engine, dispatcher and queue.
pub struct Node<E: ProtocolEngine> {
    config: NodeConfig,
    engine: E,
    dispatcher: Dispatcher,
    sender: EventSender,
    queue: mpsc::UnboundedReceiver<QueueItem>,
    status_tx: watch::Sender<NodeStatus>,
    session_id: Uuid,
    join_backoff: ExponentialBackoff,
    join_attempts: u32,
    rejoin_pending: bool,
    events_processed: u64,
    started: bool,
}

impl<E: ProtocolEngine> Node<E> {
    /// Creates a node. Nothing touches the engine until [`Node::start`].
    pub fn new<P>(config: NodeConfig, engine: E, payload: P) -> Self
    where
        P: PayloadSource + 'static,
    {
        let (tx, queue) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(&config, Box::new(payload));
        let mut join_backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(config.join.initial_backoff_ms),
            max_interval: Duration::from_secs(config.join.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        join_backoff.reset();
        let session_id = Uuid::new_v4();

        let node = Node {
            config,
            engine,
            dispatcher,
            sender: EventSender { tx },
            queue,
            status_tx: watch::channel(placeholder_status(session_id)).0,
            session_id,
            join_backoff,
            join_attempts: 0,
            rejoin_pending: false,
            events_processed: 0,
            started: false,
        };
        node.publish(false);
        node
    }

    /// Producer for engine callbacks.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            sender: self.sender.clone(),
            status_rx: self.status_tx.subscribe(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Validates the identity, brings up the engine and starts the join.
    ///
    /// Every failure here is fatal for the session.
    pub fn start(&mut self) -> NodeResult<()> {
        self.config.validate()?;

        info!(
            session_id = %self.session_id,
            dev_eui = %self.config.device.dev_eui,
            class_b = self.config.class_b.enabled,
            require_time_sync = self.config.class_b.require_time_sync,
            "Starting endpoint"
        );

        self.engine.initialize().map_err(|e| {
            error!(error = %e, "Protocol engine initialization failed");
            NodeError::EngineInitFailed(e)
        })?;

        self.join_attempts = 1;
        let status = self
            .engine
            .connect(&self.config.device.dev_eui, &self.config.credentials())
            .map_err(|e| {
                error!(error = %e, "Connection error");
                NodeError::ConnectRejected(e)
            })?;
        self.on_connect_status(status)?;

        self.started = true;
        self.publish(true);
        Ok(())
    }

    /// Runs the session until it stops, fails, or is shut down.
    ///
    /// Calls [`Node::start`] first if it has not been called yet.
    pub async fn run(&mut self) -> NodeResult<SessionSummary> {
        if !self.started {
            self.start()?;
        }

        let span = info_span!(
            "session",
            session_id = %self.session_id,
            dev_eui = %self.config.device.dev_eui
        );
        let result = self.run_loop().instrument(span).await;
        self.publish(false);

        match &result {
            Ok(summary) => info!(
                end = ?summary.end,
                class = %summary.status.class,
                uplinks = summary.status.uplinks_sent,
                "Session ended"
            ),
            Err(e) => error!(error = %e, "Session failed"),
        }
        result
    }

    async fn run_loop(&mut self) -> NodeResult<SessionSummary> {
        let end = loop {
            let Some(item) = self.queue.recv().await else {
                return Err(NodeError::ChannelError("Node queue closed".into()));
            };

            let reaction = match item {
                QueueItem::Shutdown => {
                    info!("Shutdown requested");
                    break SessionEnd::Shutdown;
                }
                QueueItem::SendDue => self.dispatcher.perform_send(&mut self.engine),
                QueueItem::Rejoin => {
                    self.rejoin()?;
                    Reaction::Continue
                }
                QueueItem::Event(event) => {
                    self.events_processed += 1;
                    if event == EventKind::Connected {
                        self.join_attempts = 0;
                        self.join_backoff.reset();
                    }
                    self.dispatcher.on_event(&mut self.engine, event)?
                }
            };

            match reaction {
                Reaction::Continue => {}
                Reaction::ArmSend(delay) => self.schedule(delay, QueueItem::SendDue),
                Reaction::JoinFailed => self.schedule_rejoin(),
                Reaction::Stop => break SessionEnd::Disconnected,
            }

            self.publish(true);
        };

        Ok(SessionSummary {
            end,
            status: self.snapshot(false),
        })
    }

    // =========================================================================
    // Join Retry
    // =========================================================================

    fn on_connect_status(&mut self, status: ConnectStatus) -> NodeResult<()> {
        match status {
            ConnectStatus::InProgress => {
                debug!(attempt = self.join_attempts, "Join in progress");
                Ok(())
            }
            ConnectStatus::Connected => {
                debug!("Session already established");
                self.sender.post(EventKind::Connected)
            }
        }
    }

    /// Arms one join retry. Once `join.max_attempts` is reached the node
    /// stays unjoined and keeps serving the queue until a `Connected`
    /// arrives from elsewhere.
    fn schedule_rejoin(&mut self) {
        if self.rejoin_pending {
            debug!(attempt = self.join_attempts, "Rejoin already pending");
            return;
        }

        let limit = self.config.join.max_attempts.max(1);
        if self.join_attempts >= limit {
            error!(
                attempts = self.join_attempts,
                "Join retries exhausted, staying unjoined"
            );
            return;
        }

        let delay = self
            .join_backoff
            .next_backoff()
            .unwrap_or_else(|| Duration::from_secs(self.config.join.max_backoff_secs));
        info!(
            next_attempt = self.join_attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "Retrying join after backoff"
        );
        self.rejoin_pending = true;
        self.schedule(delay, QueueItem::Rejoin);
    }

    fn rejoin(&mut self) -> NodeResult<()> {
        self.rejoin_pending = false;
        self.join_attempts += 1;
        match self
            .engine
            .connect(&self.config.device.dev_eui, &self.config.credentials())
        {
            Ok(status) => self.on_connect_status(status),
            Err(e) => {
                warn!(error = %e, attempt = self.join_attempts, "Join attempt rejected");
                self.schedule_rejoin();
                Ok(())
            }
        }
    }

    // =========================================================================
    // Timers & Status
    // =========================================================================

    fn schedule(&self, delay: Duration, item: QueueItem) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.push(item).is_err() {
                debug!(?item, "Node stopped before timer fired");
            }
        });
    }

    fn snapshot(&self, running: bool) -> NodeStatus {
        let state = self.dispatcher.state();
        NodeStatus {
            session_id: self.session_id,
            dev_eui: self.config.device.dev_eui,
            running,
            joined: state.is_joined(),
            join_attempts: self.join_attempts,
            rejoin_pending: self.rejoin_pending,
            class: state.class().class(),
            duty_floor_ms: state.class().floor().as_millis() as u64,
            sync: state.sync().state(),
            counters: state.sync().counters(),
            send_pending: state.scheduler().is_pending(),
            sends_armed: state.scheduler().armed_total(),
            uplinks_sent: state.uplinks_sent(),
            last_beacon: state.last_beacon(),
            events_processed: self.events_processed,
        }
    }

    fn publish(&self, running: bool) {
        self.status_tx.send_replace(self.snapshot(running));
    }
}

fn placeholder_status(session_id: Uuid) -> NodeStatus {
    NodeStatus {
        session_id,
        dev_eui: Eui64::default(),
        running: false,
        joined: false,
        join_attempts: 0,
        rejoin_pending: false,
        class: DeviceClass::A,
        duty_floor_ms: 0,
        sync: SyncState::default(),
        counters: SyncCounters::default(),
        send_pending: false,
        sends_armed: 0,
        uplinks_sent: 0,
        last_beacon: None,
        events_processed: 0,
    }
}
