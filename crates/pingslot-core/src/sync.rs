//! # Synchronization Tracker
//!
//! Holds the three independent sync flags and the session counters.
//!
//! ## Flags and Counters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Synchronization State                            │
//! │                                                                         │
//! │  FLAGS (set / cleared)               COUNTERS (never decrease)          │
//! │  ─────────────────────               ─────────────────────────          │
//! │  device_time_synced                  beacon_lock_count                  │
//! │  ping_slot_synced                    beacon_miss_count                  │
//! │  beacon_locked                       rx_count                           │
//! │                                                                         │
//! │  consecutive_misses: resets on every beacon lock, feeds the             │
//! │  beacon-miss limit policy; not a session counter                        │
//! │                                                                         │
//! │  BEACON MISS POLICY                                                    │
//! │  ───────────────────                                                   │
//! │  KeepLock  - a miss only counts; lock held until BeaconNotFound        │
//! │  ClearLock - every miss drops the lock                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Miss Policy
// =============================================================================

/// What a single beacon miss does to `beacon_locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Count the miss, keep the lock until an explicit loss.
    #[default]
    KeepLock,
    /// Count the miss and drop the lock.
    ClearLock,
}

impl std::fmt::Display for MissPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissPolicy::KeepLock => write!(f, "keep_lock"),
            MissPolicy::ClearLock => write!(f, "clear_lock"),
        }
    }
}

impl std::str::FromStr for MissPolicy {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep_lock" | "keep" => Ok(MissPolicy::KeepLock),
            "clear_lock" | "clear" => Ok(MissPolicy::ClearLock),
            _ => Err(crate::ValidationError::NotAllowed {
                field: "miss_policy".to_string(),
                allowed: vec!["keep_lock".to_string(), "clear_lock".to_string()],
            }),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// The three sync flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub device_time_synced: bool,
    pub ping_slot_synced: bool,
    pub beacon_locked: bool,
}

/// Session counters. Reset only by restarting the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCounters {
    pub beacon_lock_count: u64,
    pub beacon_miss_count: u64,
    pub rx_count: u64,
}

// =============================================================================
// Tracker
// =============================================================================

/// Sync flags plus counters, mutated only through the methods below.
#[derive(Debug, Clone, Default)]
pub struct SyncTracker {
    state: SyncState,
    counters: SyncCounters,
    consecutive_misses: u32,
    miss_policy: MissPolicy,
}

impl SyncTracker {
    pub fn new(miss_policy: MissPolicy) -> Self {
        SyncTracker {
            miss_policy,
            ..Default::default()
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    pub fn miss_policy(&self) -> MissPolicy {
        self.miss_policy
    }

    /// Misses since the last successful beacon.
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn is_time_synced(&self) -> bool {
        self.state.device_time_synced
    }

    pub fn is_ping_slot_synced(&self) -> bool {
        self.state.ping_slot_synced
    }

    pub fn is_beacon_locked(&self) -> bool {
        self.state.beacon_locked
    }

    pub fn mark_time_synced(&mut self) {
        self.state.device_time_synced = true;
    }

    pub fn clear_time_synced(&mut self) {
        self.state.device_time_synced = false;
    }

    pub fn mark_ping_slot_synced(&mut self) {
        self.state.ping_slot_synced = true;
    }

    pub fn clear_ping_slot_synced(&mut self) {
        self.state.ping_slot_synced = false;
    }

    /// Records a decoded beacon.
    pub fn mark_beacon_found(&mut self) {
        self.counters.beacon_lock_count = self.counters.beacon_lock_count.saturating_add(1);
        self.state.beacon_locked = true;
        self.consecutive_misses = 0;
    }

    /// Records a missed beacon; clears the lock only under [`MissPolicy::ClearLock`].
    pub fn mark_beacon_lost(&mut self) {
        self.counters.beacon_miss_count = self.counters.beacon_miss_count.saturating_add(1);
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if self.miss_policy == MissPolicy::ClearLock {
            self.state.beacon_locked = false;
        }
    }

    /// Drops the lock regardless of policy (explicit loss).
    pub fn clear_beacon_lock(&mut self) {
        self.state.beacon_locked = false;
    }

    pub fn mark_rx(&mut self) {
        self.counters.rx_count = self.counters.rx_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_initial_state() {
        let tracker = SyncTracker::default();
        assert_eq!(tracker.state(), SyncState::default());
        assert_eq!(tracker.counters(), SyncCounters::default());
        assert_eq!(tracker.miss_policy(), MissPolicy::KeepLock);
    }

    #[test]
    fn test_beacon_found_sets_lock_and_counts() {
        let mut tracker = SyncTracker::default();
        tracker.mark_beacon_found();
        tracker.mark_beacon_found();
        assert!(tracker.is_beacon_locked());
        assert_eq!(tracker.counters().beacon_lock_count, 2);
    }

    #[test]
    fn test_keep_lock_policy_survives_miss() {
        let mut tracker = SyncTracker::new(MissPolicy::KeepLock);
        tracker.mark_beacon_found();
        tracker.mark_beacon_lost();
        assert!(tracker.is_beacon_locked());
        assert_eq!(tracker.counters().beacon_miss_count, 1);
        assert_eq!(tracker.consecutive_misses(), 1);
    }

    #[test]
    fn test_clear_lock_policy_drops_lock_on_miss() {
        let mut tracker = SyncTracker::new(MissPolicy::ClearLock);
        tracker.mark_beacon_found();
        tracker.mark_beacon_lost();
        assert!(!tracker.is_beacon_locked());
        assert_eq!(tracker.counters().beacon_miss_count, 1);
    }

    #[test]
    fn test_consecutive_misses_reset_on_lock() {
        let mut tracker = SyncTracker::default();
        tracker.mark_beacon_lost();
        tracker.mark_beacon_lost();
        assert_eq!(tracker.consecutive_misses(), 2);
        tracker.mark_beacon_found();
        assert_eq!(tracker.consecutive_misses(), 0);
        assert_eq!(tracker.counters().beacon_miss_count, 2);
    }

    #[test]
    fn test_flags_are_independent() {
        let mut tracker = SyncTracker::default();
        tracker.mark_time_synced();
        tracker.mark_ping_slot_synced();
        tracker.clear_time_synced();
        assert!(!tracker.is_time_synced());
        assert!(tracker.is_ping_slot_synced());
    }

    #[test]
    fn test_miss_policy_parsing() {
        assert_eq!("keep_lock".parse::<MissPolicy>().unwrap(), MissPolicy::KeepLock);
        assert_eq!("CLEAR".parse::<MissPolicy>().unwrap(), MissPolicy::ClearLock);
        assert!("sometimes".parse::<MissPolicy>().is_err());
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        TimeSynced,
        TimeCleared,
        PingSlot,
        Found,
        Lost,
        ClearLock,
        Rx,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::TimeSynced),
            Just(Op::TimeCleared),
            Just(Op::PingSlot),
            Just(Op::Found),
            Just(Op::Lost),
            Just(Op::ClearLock),
            Just(Op::Rx),
        ]
    }

    proptest! {
        #[test]
        fn counters_never_decrease(
            ops in proptest::collection::vec(op_strategy(), 0..64),
            clear in any::<bool>()
        ) {
            let policy = if clear { MissPolicy::ClearLock } else { MissPolicy::KeepLock };
            let mut tracker = SyncTracker::new(policy);
            let mut last = tracker.counters();
            for op in ops {
                match op {
                    Op::TimeSynced => tracker.mark_time_synced(),
                    Op::TimeCleared => tracker.clear_time_synced(),
                    Op::PingSlot => tracker.mark_ping_slot_synced(),
                    Op::Found => tracker.mark_beacon_found(),
                    Op::Lost => tracker.mark_beacon_lost(),
                    Op::ClearLock => tracker.clear_beacon_lock(),
                    Op::Rx => tracker.mark_rx(),
                }
                let now = tracker.counters();
                prop_assert!(now.beacon_lock_count >= last.beacon_lock_count);
                prop_assert!(now.beacon_miss_count >= last.beacon_miss_count);
                prop_assert!(now.rx_count >= last.rx_count);
                last = now;
            }
        }
    }
}
