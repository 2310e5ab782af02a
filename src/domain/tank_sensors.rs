//! Tank Sensors Aggregator (§3, §4.3): freshness-tracked scalar readings
//! for temperature, pH, and TDS.

use crate::time_util;

/// Bitmask selecting a subset of [`TankSensors`] axes for `are_fresh`/
/// `are_newer_than` queries.
pub mod axis {
    pub const TEMPERATURE: u8 = 0b001;
    pub const PH: u8 = 0b010;
    pub const TDS: u8 = 0b100;
    pub const ALL: u8 = TEMPERATURE | PH | TDS;
}

/// One scalar reading with validity and last-update tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct TankSensorValue {
    valid: bool,
    updated_at_ms: u32,
    value: i32,
}

impl TankSensorValue {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub const fn value(&self) -> i32 {
        self.value
    }

    #[must_use]
    pub const fn updated_at_ms(&self) -> u32 {
        self.updated_at_ms
    }

    fn update(&mut self, now: u32, value: i32) {
        self.valid = true;
        self.updated_at_ms = now;
        self.value = value;
    }

    fn is_fresh(&self, now: u32, stale_timeout_ms: u32) -> bool {
        self.valid
            && (stale_timeout_ms == 0 || time_util::elapsed(now, self.updated_at_ms) <= stale_timeout_ms)
    }
}

/// Temperature in milli-Celsius, pH in units ×1000, TDS in ppm — each with
/// its own last-update timestamp and validity flag, sharing one staleness
/// bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct TankSensors {
    temperature_mc: TankSensorValue,
    ph_x1000: TankSensorValue,
    tds_ppm: TankSensorValue,
    stale_timeout_ms: u32,
}

impl TankSensors {
    #[must_use]
    pub const fn new(stale_timeout_ms: u32) -> Self {
        Self {
            temperature_mc: TankSensorValue {
                valid: false,
                updated_at_ms: 0,
                value: 0,
            },
            ph_x1000: TankSensorValue {
                valid: false,
                updated_at_ms: 0,
                value: 0,
            },
            tds_ppm: TankSensorValue {
                valid: false,
                updated_at_ms: 0,
                value: 0,
            },
            stale_timeout_ms,
        }
    }

    pub fn update_temperature_mc(&mut self, now: u32, temperature_mc: i32) {
        self.temperature_mc.update(now, temperature_mc);
    }

    pub fn update_ph_x1000(&mut self, now: u32, ph_x1000: i32) {
        self.ph_x1000.update(now, ph_x1000);
    }

    pub fn update_tds_ppm(&mut self, now: u32, tds_ppm: i32) {
        self.tds_ppm.update(now, tds_ppm);
    }

    #[must_use]
    pub const fn temperature_mc(&self) -> TankSensorValue {
        self.temperature_mc
    }

    #[must_use]
    pub const fn ph_x1000(&self) -> TankSensorValue {
        self.ph_x1000
    }

    #[must_use]
    pub const fn tds_ppm(&self) -> TankSensorValue {
        self.tds_ppm
    }

    #[must_use]
    pub fn is_fresh_temperature(&self, now: u32) -> bool {
        self.temperature_mc.is_fresh(now, self.stale_timeout_ms)
    }

    #[must_use]
    pub fn is_fresh_ph(&self, now: u32) -> bool {
        self.ph_x1000.is_fresh(now, self.stale_timeout_ms)
    }

    #[must_use]
    pub fn is_fresh_tds(&self, now: u32) -> bool {
        self.tds_ppm.is_fresh(now, self.stale_timeout_ms)
    }

    /// All axes selected by `mask` are fresh.
    #[must_use]
    pub fn are_fresh(&self, now: u32, mask: u8) -> bool {
        (mask & axis::TEMPERATURE == 0 || self.is_fresh_temperature(now))
            && (mask & axis::PH == 0 || self.is_fresh_ph(now))
            && (mask & axis::TDS == 0 || self.is_fresh_tds(now))
    }

    /// All axes selected by `mask` were updated strictly after `after`.
    /// Used by the Recipe Controller to tell whether its input is genuinely
    /// new since the previous step (§4.3).
    #[must_use]
    pub fn are_newer_than(&self, after: u32, mask: u8) -> bool {
        let newer = |v: TankSensorValue| v.valid && time_util::elapsed(v.updated_at_ms, after) > 0;
        (mask & axis::TEMPERATURE == 0 || newer(self.temperature_mc))
            && (mask & axis::PH == 0 || newer(self.ph_x1000))
            && (mask & axis::TDS == 0 || newer(self.tds_ppm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_query_false_before_first_update() {
        let sensors = TankSensors::new(1000);
        assert!(!sensors.is_fresh_ph(0));
    }

    #[test]
    fn updates_set_validity_and_timestamp() {
        let mut sensors = TankSensors::new(1000);
        sensors.update_ph_x1000(10, 6_500);
        assert!(sensors.ph_x1000().is_valid());
        assert_eq!(sensors.ph_x1000().value(), 6_500);
        assert_eq!(sensors.ph_x1000().updated_at_ms(), 10);
    }

    #[test]
    fn staleness_bound_applies_per_axis() {
        let mut sensors = TankSensors::new(100);
        sensors.update_tds_ppm(0, 800);
        assert!(sensors.is_fresh_tds(100));
        assert!(!sensors.is_fresh_tds(101));
    }

    #[test]
    fn are_fresh_checks_selected_mask_only() {
        let mut sensors = TankSensors::new(100);
        sensors.update_ph_x1000(0, 6_000);
        // TDS never updated, but we don't ask about it.
        assert!(sensors.are_fresh(50, axis::PH));
        assert!(!sensors.are_fresh(50, axis::PH | axis::TDS));
    }

    #[test]
    fn are_newer_than_detects_new_reading() {
        let mut sensors = TankSensors::new(0);
        sensors.update_tds_ppm(100, 800);
        assert!(sensors.are_newer_than(50, axis::TDS));
        assert!(!sensors.are_newer_than(150, axis::TDS));
    }

    #[test]
    fn zero_timeout_means_unbounded_freshness() {
        let mut sensors = TankSensors::new(0);
        sensors.update_temperature_mc(0, 22_000);
        assert!(sensors.is_fresh_temperature(u32::MAX));
    }
}
