//! # Domain Types
//!
//! Value types shared by every layer of the controller: the operating
//! class, the device identity, the events the protocol engine delivers and
//! the duty-cycle floors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ValidationError;
use crate::{DEFAULT_CLASS_A_DUTY_CYCLE_MS, DEFAULT_CLASS_B_DUTY_CYCLE_MS};

// =============================================================================
// Device Class
// =============================================================================

/// Operating class of the endpoint.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  CLASS A (initial)                 │  CLASS B                           │
/// │  ─────────────────                 │  ────────                          │
/// │  • Listens only after an uplink    │  • Also listens in ping slots      │
/// │  • Short duty-cycle floor          │  • Needs a locked beacon           │
/// │  • No beacon required              │  • Longer duty-cycle floor         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceClass {
    #[default]
    A,
    B,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::A => write!(f, "A"),
            DeviceClass::B => write!(f, "B"),
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// 64-bit extended unique identifier (device EUI, join/application EUI).
///
/// Parsed from hex text; `-`, `:` and spaces between digits are ignored so
/// both `0080000004003996` and `00-80-00-00-04-00-39-96` are accepted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Eui64([u8; 8]);

impl Eui64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Eui64(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Returns true if every byte is zero (identity never provisioned).
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parses an EUI, naming `field` in the error.
    pub fn parse_field(field: &str, text: &str) -> Result<Self, ValidationError> {
        parse_hex::<8>(field, text).map(Eui64)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", self)
    }
}

impl FromStr for Eui64 {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field("eui", s)
    }
}

impl TryFrom<String> for Eui64 {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Eui64> for String {
    fn from(eui: Eui64) -> Self {
        eui.to_string()
    }
}

/// 128-bit application root key. Never printed.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppKey([u8; 16]);

impl AppKey {
    pub const fn new(bytes: [u8; 16]) -> Self {
        AppKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppKey(<redacted>)")
    }
}

impl FromStr for AppKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<16>("app_key", s).map(AppKey)
    }
}

impl TryFrom<String> for AppKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AppKey> for String {
    fn from(key: AppKey) -> Self {
        hex::encode_upper(key.0)
    }
}

/// Network credentials handed to the engine at join time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub app_eui: Eui64,
    pub app_key: AppKey,
}

fn parse_hex<const N: usize>(field: &str, text: &str) -> Result<[u8; N], ValidationError> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | ' '))
        .collect();

    if digits.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let bytes = hex::decode(&digits).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    let actual = bytes.len();
    <[u8; N]>::try_from(bytes).map_err(|_| ValidationError::WrongLength {
        field: field.to_string(),
        expected: N,
        actual,
    })
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let digits = hex::encode_upper(bytes);
    for i in 0..bytes.len() {
        if i > 0 {
            f.write_str("-")?;
        }
        f.write_str(&digits[2 * i..2 * i + 2])?;
    }
    Ok(())
}

// =============================================================================
// Events
// =============================================================================

/// Why an uplink failed, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxFailure {
    Timeout,
    Error,
    CryptoError,
    SchedulingError,
}

/// Why a receive window failed, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxFailure {
    Timeout,
    Error,
}

/// One asynchronous notification from the protocol engine.
///
/// ## Wire Codes
/// Engines that report events as integers are mapped with
/// [`EventKind::from_code`]; any code outside the table becomes
/// [`EventKind::Unknown`], which the dispatcher treats as fatal.
///
/// ```text
///  0 Connected            7 RxDone              14 BeaconFound
///  1 Disconnected         8 RxFailed(Timeout)   15 BeaconLockContinuing
///  2 TxDone               9 RxFailed(Error)     16 BeaconMiss
///  3 TxFailed(Timeout)   10 JoinFailure         17 ClassBReverted
///  4 TxFailed(Error)     11 DeviceTimeSynced
///  5 TxFailed(Crypto)    12 PingSlotSynced
///  6 TxFailed(Sched)     13 BeaconNotFound
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    TxDone,
    TxFailed(TxFailure),
    RxDone,
    RxFailed(RxFailure),
    JoinFailure,
    DeviceTimeSynced,
    PingSlotSynced,
    BeaconNotFound,
    BeaconFound,
    BeaconLockContinuing,
    BeaconMiss,
    ClassBReverted,
    Unknown(u16),
}

impl EventKind {
    /// Maps a raw engine event code.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => EventKind::Connected,
            1 => EventKind::Disconnected,
            2 => EventKind::TxDone,
            3 => EventKind::TxFailed(TxFailure::Timeout),
            4 => EventKind::TxFailed(TxFailure::Error),
            5 => EventKind::TxFailed(TxFailure::CryptoError),
            6 => EventKind::TxFailed(TxFailure::SchedulingError),
            7 => EventKind::RxDone,
            8 => EventKind::RxFailed(RxFailure::Timeout),
            9 => EventKind::RxFailed(RxFailure::Error),
            10 => EventKind::JoinFailure,
            11 => EventKind::DeviceTimeSynced,
            12 => EventKind::PingSlotSynced,
            13 => EventKind::BeaconNotFound,
            14 => EventKind::BeaconFound,
            15 => EventKind::BeaconLockContinuing,
            16 => EventKind::BeaconMiss,
            17 => EventKind::ClassBReverted,
            other => EventKind::Unknown(other),
        }
    }

    /// Inverse of [`EventKind::from_code`].
    pub fn code(&self) -> u16 {
        match self {
            EventKind::Connected => 0,
            EventKind::Disconnected => 1,
            EventKind::TxDone => 2,
            EventKind::TxFailed(TxFailure::Timeout) => 3,
            EventKind::TxFailed(TxFailure::Error) => 4,
            EventKind::TxFailed(TxFailure::CryptoError) => 5,
            EventKind::TxFailed(TxFailure::SchedulingError) => 6,
            EventKind::RxDone => 7,
            EventKind::RxFailed(RxFailure::Timeout) => 8,
            EventKind::RxFailed(RxFailure::Error) => 9,
            EventKind::JoinFailure => 10,
            EventKind::DeviceTimeSynced => 11,
            EventKind::PingSlotSynced => 12,
            EventKind::BeaconNotFound => 13,
            EventKind::BeaconFound => 14,
            EventKind::BeaconLockContinuing => 15,
            EventKind::BeaconMiss => 16,
            EventKind::ClassBReverted => 17,
            EventKind::Unknown(code) => *code,
        }
    }

    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::TxDone => "tx_done",
            EventKind::TxFailed(_) => "tx_failed",
            EventKind::RxDone => "rx_done",
            EventKind::RxFailed(_) => "rx_failed",
            EventKind::JoinFailure => "join_failure",
            EventKind::DeviceTimeSynced => "device_time_synced",
            EventKind::PingSlotSynced => "ping_slot_synced",
            EventKind::BeaconNotFound => "beacon_not_found",
            EventKind::BeaconFound => "beacon_found",
            EventKind::BeaconLockContinuing => "beacon_lock_continuing",
            EventKind::BeaconMiss => "beacon_miss",
            EventKind::ClassBReverted => "class_b_reverted",
            EventKind::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::TxFailed(kind) => write!(f, "tx_failed({:?})", kind),
            EventKind::RxFailed(kind) => write!(f, "rx_failed({:?})", kind),
            EventKind::Unknown(code) => write!(f, "unknown({})", code),
            other => f.write_str(other.name()),
        }
    }
}

// =============================================================================
// Uplink Flags
// =============================================================================

/// Whether the network must acknowledge an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFlags {
    #[default]
    Unconfirmed,
    Confirmed,
}

// =============================================================================
// Duty Cycle
// =============================================================================

/// Minimum inter-send intervals per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    pub class_a: Duration,
    pub class_b: Duration,
}

impl DutyCycle {
    pub fn new(class_a: Duration, class_b: Duration) -> Self {
        DutyCycle { class_a, class_b }
    }

    /// Returns the floor that applies to `class`.
    pub fn floor_for(&self, class: DeviceClass) -> Duration {
        match class {
            DeviceClass::A => self.class_a,
            DeviceClass::B => self.class_b,
        }
    }
}

impl Default for DutyCycle {
    fn default() -> Self {
        DutyCycle {
            class_a: Duration::from_millis(DEFAULT_CLASS_A_DUTY_CYCLE_MS),
            class_b: Duration::from_millis(DEFAULT_CLASS_B_DUTY_CYCLE_MS),
        }
    }
}
