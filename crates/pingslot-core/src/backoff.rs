//! # Backoff Scheduler
//!
//! Decides how long to wait before the next uplink and coalesces schedule
//! requests so at most one send is ever armed.
//!
//! ## Delay Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Send Scheduling                                 │
//! │                                                                         │
//! │  request_send(floor, hint)                                             │
//! │        │                                                                │
//! │        ├── send already armed? ──yes──▶ None (coalesced)               │
//! │        │                                                                │
//! │        ▼ no                                                             │
//! │  delay = max(floor, hint or 0)                                         │
//! │  send_queued = true                                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Some(delay) ──▶ caller arms one timer                                 │
//! │                                                                         │
//! │  begin_send() when the timer fires: send_queued = false                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler never sleeps; the runtime owns the actual timer.

use std::time::Duration;

/// Pending-send flag plus the delay rule.
#[derive(Debug, Clone, Default)]
pub struct BackoffScheduler {
    send_queued: bool,
    armed_total: u64,
}

impl BackoffScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a send no sooner than `max(floor, hint)` from now.
    ///
    /// A missing hint (the engine query failed) counts as zero. Returns the
    /// delay to arm, or `None` when a send is already pending.
    pub fn request_send(&mut self, floor: Duration, hint: Option<Duration>) -> Option<Duration> {
        if self.send_queued {
            return None;
        }
        self.send_queued = true;
        self.armed_total += 1;
        Some(floor.max(hint.unwrap_or(Duration::ZERO)))
    }

    /// Marks the armed send as executing. Returns false if nothing was armed.
    pub fn begin_send(&mut self) -> bool {
        std::mem::replace(&mut self.send_queued, false)
    }

    pub fn is_pending(&self) -> bool {
        self.send_queued
    }

    /// Number of timers armed this session.
    pub fn armed_total(&self) -> u64 {
        self.armed_total
    }
}
