//! Hexagonal port traits (§6, §10.5).
//!
//! Both cores are generic over these traits so they can be driven by a host
//! test harness with fake implementations, without any real peripherals.

use crate::error::Result;

/// A binary switch driving one pump, valve, or lamp. Idempotent at the
/// logical level — the core never infers hardware state from unsolicited
/// reads; it only trusts the last successful transition (§6).
pub trait ActuatorPort {
    fn turn_on(&mut self) -> Result<()>;
    fn turn_off(&mut self) -> Result<()>;
}

/// Read-only scalar sensor used for pH, TDS, and temperature (§6 "Sensor
/// ADC/bus drivers"). Errors lift the per-axis freshness state until a
/// successful read.
pub trait AnalogSensorPort {
    fn read(&mut self) -> Result<i32>;
}

/// Ultrasonic/ToF distance reader for a tank level slot (§6 "Distance
/// sensor"). Returns the raw distance in millimeters; mapping to volume is
/// owned by [`crate::domain::tank_level::TankLevel`], not the driver.
pub trait DistanceSensorPort {
    fn read_distance_mm(&mut self) -> Result<u32>;
}

/// DS3231-shaped real-time clock (§6 "RTC").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day_of_week: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmMode {
    MinuteOfHour(u8),
    HourAndMinute(u8, u8),
}

pub trait RtcPort {
    fn get_time(&mut self) -> Result<RtcTime>;
    fn set_time(&mut self, time: RtcTime) -> Result<()>;
    fn set_alarm1(&mut self, mode: AlarmMode) -> Result<()>;
    fn set_alarm2(&mut self, mode: AlarmMode) -> Result<()>;
    fn enable_interrupts(&mut self, alarm1: bool, alarm2: bool) -> Result<()>;
    fn get_flags(&mut self) -> Result<(bool, bool)>;
    fn clear_flags(&mut self) -> Result<()>;
}

/// Page-writable EEPROM-like durable store (§6 "Durable store"). The
/// adapter is responsible for splitting reads/writes across any internal
/// page or block boundary and for polling readiness after a write; callers
/// may treat a single `read`/`write` call as one atomic logical operation.
pub trait DurableStorePort {
    fn total_size(&self) -> usize;
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<()>;
    fn write(&mut self, addr: u16, buf: &[u8]) -> Result<()>;
}

/// Optional line-oriented command interface (§6 "Command wire/CLI").
/// Auxiliary — not required for core operation.
pub trait CommandLinePort {
    /// Returns `Ok(None)` if no complete line is buffered yet.
    fn read_line(&mut self) -> Result<Option<heapless::String<64>>>;
    fn write_line(&mut self, line: &str) -> Result<()>;
}
