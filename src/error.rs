//! Unified error types for the nutrient tank and hydroponic box firmware.
//!
//! Follows embedded best practice: a single `Error` enum that every subsystem
//! can convert into, keeping the top-level control loop's error handling
//! uniform. All variants are `Copy` so they can be cheaply passed through the
//! safety supervisor and state machines without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in either core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Command shape or configuration value is invalid.
    InvalidArg,
    /// Coordinator command slot already holds an in-flight command.
    Busy,
    /// A pump guard denied the start, or stopped an in-flight run.
    PumpBlocked(BlockReason),
    /// Required sensor is absent or reporting a fault.
    SensorFault,
    /// Required sensor reading is older than its staleness bound.
    SensorStale,
    /// A host-side bounded operation did not complete in time.
    Timeout,
    /// Hydroponic scheduler fault flag.
    Scheduler(SchedulerFault),
    /// Configuration failed validation or could not be loaded.
    Config(ConfigError),
    /// Durable storage read/write/CRC failure.
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg => write!(f, "invalid argument"),
            Self::Busy => write!(f, "busy"),
            Self::PumpBlocked(reason) => write!(f, "pump blocked: {reason}"),
            Self::SensorFault => write!(f, "sensor fault"),
            Self::SensorStale => write!(f, "sensor stale"),
            Self::Timeout => write!(f, "timeout"),
            Self::Scheduler(e) => write!(f, "scheduler: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pump guard block reasons
// ---------------------------------------------------------------------------

/// Reason a pump guard denied a start or stopped an in-flight run.
/// Priority order when more than one condition holds: sensor fault,
/// staleness, low volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockReason {
    #[default]
    None,
    SensorFault,
    LowVolume,
    StaleLevel,
    /// Main tank at or above its high threshold (additions/return refused).
    TankFull,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SensorFault => write!(f, "sensor fault"),
            Self::LowVolume => write!(f, "low volume"),
            Self::StaleLevel => write!(f, "stale level"),
            Self::TankFull => write!(f, "tank full"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hydroponic scheduler faults
// ---------------------------------------------------------------------------

/// Independent scheduler error bits. Sticky until the underlying condition
/// clears; a nonzero combination drives a single error LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerFault {
    Rtc = 0b0000_0001,
    Dht22 = 0b0000_0010,
    Eeprom = 0b0000_0100,
    McuTemp = 0b0000_1000,
}

impl SchedulerFault {
    /// Return the bitmask for this fault.
    #[must_use]
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SchedulerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtc => write!(f, "RTC fault"),
            Self::Dht22 => write!(f, "DHT22 fault"),
            Self::Eeprom => write!(f, "EEPROM fault"),
            Self::McuTemp => write!(f, "MCU temperature fault"),
        }
    }
}

impl From<SchedulerFault> for Error {
    fn from(e: SchedulerFault) -> Self {
        Self::Scheduler(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ValidationFailed(&'static str),
    NotFound,
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(why) => write!(f, "validation failed: {why}"),
            Self::NotFound => write!(f, "not found"),
            Self::Corrupted => write!(f, "corrupted"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Durable storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    OutOfRange,
    IoError,
    CrcMismatch,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "record not found"),
            Self::OutOfRange => write!(f, "address out of range"),
            Self::IoError => write!(f, "i/o error"),
            Self::CrcMismatch => write!(f, "crc mismatch"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
