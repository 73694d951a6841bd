//! # Class Controller
//!
//! Owns the operating class and the duty-cycle floor, and decides when the
//! device may move between Class A and Class B.
//!
//! ## State Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Class A / Class B Transitions                      │
//! │                                                                         │
//! │                 beacon acquired, ping slot synced                       │
//! │                 (+ device time, strict policy)                          │
//! │  ┌────────────┐  engine accepts switch   ┌────────────┐                 │
//! │  │  CLASS A   │ ───────────────────────▶ │  CLASS B   │                 │
//! │  │ (initial)  │                          │            │                 │
//! │  └─────┬──────┘ ◀─────────────────────── └────────────┘                 │
//! │        │          engine reverted /                                     │
//! │        │          beacon not found /                                    │
//! │        │          miss limit reached                                    │
//! │        │                                                                │
//! │        └── engine rejects switch: stay A, drop time sync,               │
//! │            floor back to Class-A interval                               │
//! │                                                                         │
//! │  Every path into A clears device-time sync and resets the floor.       │
//! │  Under the strict policy ping-slot sync and the beacon lock are        │
//! │  cleared with it, so neither outlives device_time_synced.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::{SyncState, SyncTracker};
use crate::types::{DeviceClass, DutyCycle};

// =============================================================================
// Policy
// =============================================================================

/// Deployment profile for the A → B upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassBPolicy {
    /// Device time is a hard precondition for Class B (time-first
    /// sequencing). When false it only steers the duty-cycle floor.
    pub require_time_sync: bool,
}

impl ClassBPolicy {
    pub fn strict() -> Self {
        ClassBPolicy {
            require_time_sync: true,
        }
    }

    pub fn advisory() -> Self {
        ClassBPolicy {
            require_time_sync: false,
        }
    }
}

/// Why an A → B attempt could not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterBlocker {
    AlreadyInB,
    PingSlotNotSynced,
    DeviceTimeNotSynced,
}

impl std::fmt::Display for EnterBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnterBlocker::AlreadyInB => write!(f, "already in class B"),
            EnterBlocker::PingSlotNotSynced => write!(f, "ping slot not synced"),
            EnterBlocker::DeviceTimeNotSynced => write!(f, "device time not synced"),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Current class plus the floor used for the next send decision.
#[derive(Debug, Clone)]
pub struct ClassController {
    class: DeviceClass,
    floor: Duration,
    duty: DutyCycle,
    policy: ClassBPolicy,
}

impl ClassController {
    pub fn new(duty: DutyCycle, policy: ClassBPolicy) -> Self {
        ClassController {
            class: DeviceClass::A,
            floor: duty.class_a,
            duty,
            policy,
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Duty-cycle floor for the next scheduling decision.
    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn duty(&self) -> DutyCycle {
        self.duty
    }

    pub fn policy(&self) -> ClassBPolicy {
        self.policy
    }

    /// Checks the preconditions for A → B against the current sync flags.
    pub fn check_enter_b(&self, sync: &SyncState) -> Result<(), EnterBlocker> {
        if self.class == DeviceClass::B {
            return Err(EnterBlocker::AlreadyInB);
        }
        if !sync.ping_slot_synced {
            return Err(EnterBlocker::PingSlotNotSynced);
        }
        if self.policy.require_time_sync && !sync.device_time_synced {
            return Err(EnterBlocker::DeviceTimeNotSynced);
        }
        Ok(())
    }

    /// The engine accepted the switch: enter B with the Class-B floor.
    ///
    /// Callers must have passed [`ClassController::check_enter_b`] first.
    pub fn confirm_b(&mut self) {
        self.class = DeviceClass::B;
        self.floor = self.duty.class_b;
    }

    /// The engine refused the switch: stay in A and drop time sync.
    pub fn reject_b(&mut self, sync: &mut SyncTracker) {
        self.class = DeviceClass::A;
        self.lose_time_sync(sync);
    }

    /// Moves to Class A. Returns true if the device was in B.
    ///
    /// Idempotent in A apart from the sync reset.
    pub fn demote(&mut self, sync: &mut SyncTracker) -> bool {
        let was_b = self.class == DeviceClass::B;
        self.class = DeviceClass::A;
        self.lose_time_sync(sync);
        was_b
    }

    /// Device time arrived: steer the floor toward the Class-B interval.
    pub fn prefer_class_b_floor(&mut self) {
        self.floor = self.duty.class_b;
    }

    fn lose_time_sync(&mut self, sync: &mut SyncTracker) {
        sync.clear_time_synced();
        if self.policy.require_time_sync {
            sync.clear_ping_slot_synced();
            sync.clear_beacon_lock();
        }
        self.floor = self.duty.class_a;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(time: bool, ping: bool) -> SyncTracker {
        let mut sync = SyncTracker::default();
        if time {
            sync.mark_time_synced();
        }
        if ping {
            sync.mark_ping_slot_synced();
        }
        sync
    }

    #[test]
    fn test_starts_in_class_a_with_class_a_floor() {
        let controller = ClassController::new(DutyCycle::default(), ClassBPolicy::default());
        assert_eq!(controller.class(), DeviceClass::A);
        assert_eq!(controller.floor(), DutyCycle::default().class_a);
    }

    #[test]
    fn test_enter_b_requires_ping_slot() {
        let controller = ClassController::new(DutyCycle::default(), ClassBPolicy::advisory());
        let sync = synced(true, false);
        assert_eq!(
            controller.check_enter_b(&sync.state()),
            Err(EnterBlocker::PingSlotNotSynced)
        );
        let sync = synced(false, true);
        assert_eq!(controller.check_enter_b(&sync.state()), Ok(()));
    }

    #[test]
    fn test_strict_policy_requires_device_time() {
        let controller = ClassController::new(DutyCycle::default(), ClassBPolicy::strict());
        let sync = synced(false, true);
        assert_eq!(
            controller.check_enter_b(&sync.state()),
            Err(EnterBlocker::DeviceTimeNotSynced)
        );
        let sync = synced(true, true);
        assert_eq!(controller.check_enter_b(&sync.state()), Ok(()));
    }

    #[test]
    fn test_confirm_b_switches_floor() {
        let duty = DutyCycle::default();
        let mut controller = ClassController::new(duty, ClassBPolicy::default());
        controller.confirm_b();
        assert_eq!(controller.class(), DeviceClass::B);
        assert_eq!(controller.floor(), duty.class_b);
        assert_eq!(
            controller.check_enter_b(&synced(true, true).state()),
            Err(EnterBlocker::AlreadyInB)
        );
    }

    #[test]
    fn test_reject_b_downgrades() {
        let duty = DutyCycle::default();
        let mut controller = ClassController::new(duty, ClassBPolicy::advisory());
        let mut sync = synced(true, true);
        controller.prefer_class_b_floor();
        controller.reject_b(&mut sync);
        assert_eq!(controller.class(), DeviceClass::A);
        assert_eq!(controller.floor(), duty.class_a);
        assert!(!sync.is_time_synced());
        assert!(sync.is_ping_slot_synced());
    }

    #[test]
    fn test_demote_is_idempotent() {
        let mut controller = ClassController::new(DutyCycle::default(), ClassBPolicy::advisory());
        let mut sync = synced(true, true);
        controller.confirm_b();
        assert!(controller.demote(&mut sync));
        assert!(!controller.demote(&mut sync));
        assert_eq!(controller.class(), DeviceClass::A);
        assert!(!sync.is_time_synced());
    }

    #[test]
    fn test_strict_demote_clears_ping_slot() {
        let mut controller = ClassController::new(DutyCycle::default(), ClassBPolicy::strict());
        let mut sync = synced(true, true);
        controller.confirm_b();
        sync.mark_beacon_found();
        controller.demote(&mut sync);
        assert!(!sync.is_ping_slot_synced());
        assert!(!sync.is_beacon_locked());
    }
}
