//! # Endpoint Configuration
//!
//! Configuration management for the endpoint controller.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PINGSLOT_DEV_EUI=00-80-00-00-04-00-39-96                           │
//! │     PINGSLOT_CLASS_B=false                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pingslot/endpoint.toml (Linux)                           │
//! │     ~/Library/Application Support/io.pingslot.endpoint/... (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Class B enabled, advisory time sync, 10s / 30s duty cycle          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! dev_eui = "00-80-00-00-04-00-39-96"
//! app_eui = "00-25-0C-00-00-01-00-01"
//! app_key = "B5E71B6C21709043125FD1C56EE0A463"
//!
//! [uplink]
//! port = 15
//! confirmed = false
//!
//! [duty_cycle]
//! class_a_ms = 10000
//! class_b_ms = 30000
//!
//! [class_b]
//! enabled = true
//! require_time_sync = false
//! ping_slot_periodicity = 4
//! miss_policy = "keep_lock"        # keep_lock | clear_lock
//! revert_action = "reacquire_beacon" # reacquire_beacon | send_now
//! beacon_miss_limit = 3            # 0 disables
//!
//! [join]
//! max_attempts = 3                 # 0 never retries
//! initial_backoff_ms = 5000
//! max_backoff_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use pingslot_core::{
    AppKey, ClassBPolicy, CoreError, Credentials, DutyCycle, Eui64, MessageFlags, MissPolicy,
    DEFAULT_APP_PORT, DEFAULT_CLASS_A_DUTY_CYCLE_MS,
    DEFAULT_CLASS_B_DUTY_CYCLE_MS, MAX_PING_SLOT_PERIODICITY,
};

use crate::error::{NodeError, NodeResult};

// =============================================================================
// Revert Action
// =============================================================================

/// What the controller does right after the engine drops it back to Class A.
///
/// ## Mode Comparison
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  REACQUIRE_BEACON (Default)          │  SEND_NOW                        │
/// │  ──────────────────────────          │  ────────                        │
/// │  • Re-enables beacon acquisition     │  • Sends an uplink right away    │
/// │  • Climbs back to B on next beacon   │  • Gives the network a fresh     │
/// │  • No extra airtime                  │    downlink window in Class A    │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertAction {
    #[default]
    ReacquireBeacon,
    SendNow,
}

impl std::fmt::Display for RevertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertAction::ReacquireBeacon => write!(f, "reacquire_beacon"),
            RevertAction::SendNow => write!(f, "send_now"),
        }
    }
}

impl std::str::FromStr for RevertAction {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reacquire_beacon" | "reacquire" | "beacon" => Ok(RevertAction::ReacquireBeacon),
            "send_now" | "send" => Ok(RevertAction::SendNow),
            other => Err(NodeError::InvalidConfig(format!(
                "Unknown revert action: '{}'. Valid options: reacquire_beacon, send_now",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Settings
// =============================================================================

/// Identity and credentials. Out of scope for the controller itself; handed
/// to the engine at join time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device EUI. All zeroes means "not provisioned" and refuses to start.
    #[serde(default)]
    pub dev_eui: Eui64,

    /// Join / application EUI.
    #[serde(default)]
    pub app_eui: Eui64,

    /// Application root key.
    #[serde(default)]
    pub app_key: AppKey,
}

// =============================================================================
// Uplink Settings
// =============================================================================

/// Uplink framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkSettings {
    /// Application port (1-223).
    #[serde(default = "default_port")]
    pub port: u8,

    /// Request network acknowledgement for every uplink.
    #[serde(default)]
    pub confirmed: bool,
}

fn default_port() -> u8 {
    DEFAULT_APP_PORT
}

impl Default for UplinkSettings {
    fn default() -> Self {
        UplinkSettings {
            port: default_port(),
            confirmed: false,
        }
    }
}

// =============================================================================
// Duty Cycle Settings
// =============================================================================

/// Application duty-cycle floors per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutyCycleSettings {
    #[serde(default = "default_class_a_ms")]
    pub class_a_ms: u64,

    #[serde(default = "default_class_b_ms")]
    pub class_b_ms: u64,
}

fn default_class_a_ms() -> u64 {
    DEFAULT_CLASS_A_DUTY_CYCLE_MS
}

fn default_class_b_ms() -> u64 {
    DEFAULT_CLASS_B_DUTY_CYCLE_MS
}

impl Default for DutyCycleSettings {
    fn default() -> Self {
        DutyCycleSettings {
            class_a_ms: default_class_a_ms(),
            class_b_ms: default_class_b_ms(),
        }
    }
}

// =============================================================================
// Class B Settings
// =============================================================================

/// Beacon / ping-slot behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassBSettings {
    /// Attempt Class B at all. When false the device stays in Class A and
    /// never requests device time, ping slots or beacons.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Device time is a hard precondition for Class B.
    #[serde(default)]
    pub require_time_sync: bool,

    /// Ping slot every 2^n seconds (0-7).
    #[serde(default = "default_periodicity")]
    pub ping_slot_periodicity: u8,

    /// Effect of a single beacon miss on the lock.
    #[serde(default)]
    pub miss_policy: MissPolicy,

    /// Reaction to an engine-initiated Class B → A reversion.
    #[serde(default)]
    pub revert_action: RevertAction,

    /// Consecutive misses that demote a Class B device (0 disables).
    #[serde(default = "default_miss_limit")]
    pub beacon_miss_limit: u32,
}

fn default_true() -> bool {
    true
}

fn default_periodicity() -> u8 {
    4
}

fn default_miss_limit() -> u32 {
    3
}

impl Default for ClassBSettings {
    fn default() -> Self {
        ClassBSettings {
            enabled: true,
            require_time_sync: false,
            ping_slot_periodicity: default_periodicity(),
            miss_policy: MissPolicy::default(),
            revert_action: RevertAction::default(),
            beacon_miss_limit: default_miss_limit(),
        }
    }
}

// =============================================================================
// Join Settings
// =============================================================================

/// Host-side join retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSettings {
    /// Total join attempts including the first (0 or 1 = never retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration (milliseconds) between attempts.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    5_000
}

fn default_max_backoff() -> u64 {
    300
}

impl Default for JoinSettings {
    fn default() -> Self {
        JoinSettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub uplink: UplinkSettings,

    #[serde(default)]
    pub duty_cycle: DutyCycleSettings,

    #[serde(default)]
    pub class_b: ClassBSettings,

    #[serde(default)]
    pub join: JoinSettings,
}

impl NodeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (endpoint.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> NodeResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading endpoint config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> NodeResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| NodeError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NodeError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| NodeError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Endpoint config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> NodeResult<()> {
        if self.device.dev_eui.is_zeroed() {
            return Err(CoreError::ZeroedDeviceEui.into());
        }

        if self.uplink.port == 0 || self.uplink.port > 223 {
            return Err(NodeError::InvalidConfig(format!(
                "uplink port must be between 1 and 223, got {}",
                self.uplink.port
            )));
        }

        if self.duty_cycle.class_a_ms == 0 {
            return Err(NodeError::InvalidConfig(
                "class_a_ms must be greater than 0".into(),
            ));
        }

        if self.duty_cycle.class_b_ms < self.duty_cycle.class_a_ms {
            return Err(NodeError::InvalidConfig(format!(
                "class_b_ms ({}) must not be shorter than class_a_ms ({})",
                self.duty_cycle.class_b_ms, self.duty_cycle.class_a_ms
            )));
        }

        if self.class_b.ping_slot_periodicity > MAX_PING_SLOT_PERIODICITY {
            return Err(CoreError::InvalidPeriodicity {
                value: self.class_b.ping_slot_periodicity,
                max: MAX_PING_SLOT_PERIODICITY,
            }
            .into());
        }

        Ok(())
    }

    /// Applies `PINGSLOT_*` overrides read through `lookup`.
    ///
    /// Malformed identities are errors; malformed numbers and switches are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> NodeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(eui) = lookup("PINGSLOT_DEV_EUI") {
            debug!(dev_eui = %eui, "Overriding device EUI from environment");
            self.device.dev_eui = Eui64::parse_field("dev_eui", &eui).map_err(CoreError::from)?;
        }

        if let Some(eui) = lookup("PINGSLOT_APP_EUI") {
            self.device.app_eui = Eui64::parse_field("app_eui", &eui).map_err(CoreError::from)?;
        }

        if let Some(key) = lookup("PINGSLOT_APP_KEY") {
            self.device.app_key = key.parse::<AppKey>().map_err(CoreError::from)?;
        }

        if let Some(port) = lookup("PINGSLOT_APP_PORT") {
            match port.parse::<u8>() {
                Ok(p) => self.uplink.port = p,
                Err(_) => warn!(port = %port, "Ignoring malformed PINGSLOT_APP_PORT"),
            }
        }

        if let Some(enabled) = lookup("PINGSLOT_CLASS_B") {
            match parse_switch(&enabled) {
                Some(v) => self.class_b.enabled = v,
                None => warn!(value = %enabled, "Ignoring malformed PINGSLOT_CLASS_B"),
            }
        }

        if let Some(strict) = lookup("PINGSLOT_REQUIRE_TIME_SYNC") {
            match parse_switch(&strict) {
                Some(v) => self.class_b.require_time_sync = v,
                None => warn!(value = %strict, "Ignoring malformed PINGSLOT_REQUIRE_TIME_SYNC"),
            }
        }

        if let Some(policy) = lookup("PINGSLOT_MISS_POLICY") {
            match policy.parse::<MissPolicy>() {
                Ok(p) => self.class_b.miss_policy = p,
                Err(e) => warn!(error = %e, "Ignoring PINGSLOT_MISS_POLICY"),
            }
        }

        if let Some(action) = lookup("PINGSLOT_REVERT_ACTION") {
            match action.parse::<RevertAction>() {
                Ok(a) => self.class_b.revert_action = a,
                Err(e) => warn!(error = %e, "Ignoring PINGSLOT_REVERT_ACTION"),
            }
        }

        Ok(())
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "pingslot", "endpoint")
            .map(|dirs| dirs.config_dir().join("endpoint.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn duty_cycle(&self) -> DutyCycle {
        DutyCycle::new(
            Duration::from_millis(self.duty_cycle.class_a_ms),
            Duration::from_millis(self.duty_cycle.class_b_ms),
        )
    }

    pub fn class_b_policy(&self) -> ClassBPolicy {
        ClassBPolicy {
            require_time_sync: self.class_b.require_time_sync,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            app_eui: self.device.app_eui,
            app_key: self.device.app_key.clone(),
        }
    }

    pub fn message_flags(&self) -> MessageFlags {
        if self.uplink.confirmed {
            MessageFlags::Confirmed
        } else {
            MessageFlags::Unconfirmed
        }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
