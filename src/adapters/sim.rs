//! Host-simulation stand-ins for the external-collaborator ports (§6):
//! pump/valve/lamp switches, the pH ADC, the ultrasonic distance sensors,
//! and the DS3231 RTC. Real deployments replace every type in this module
//! with a driver for the actual part; none of that driver logic belongs
//! here (§6 scopes it out), so these exist only to let the cooperative
//! loop in `main.rs` and integration tests run without hardware, the same
//! role `not(target_os = "espidf")` branches play elsewhere in `adapters/`.

use crate::error::Result;
use crate::ports::{ActuatorPort, AnalogSensorPort, AlarmMode, DistanceSensorPort, RtcPort, RtcTime};

/// A switch with no real-world effect beyond recording its own state —
/// stands in for a pump, valve, or lamp driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimSwitch {
    on: bool,
}

impl SimSwitch {
    #[must_use]
    pub const fn new() -> Self {
        Self { on: false }
    }

    #[must_use]
    pub const fn is_on(&self) -> bool {
        self.on
    }
}

impl ActuatorPort for SimSwitch {
    fn turn_on(&mut self) -> Result<()> {
        self.on = true;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<()> {
        self.on = false;
        Ok(())
    }
}

/// Distance reading fed in by whatever is driving the simulation (a test,
/// or `main.rs`'s demo data feed) rather than read off a real transducer.
#[derive(Debug, Default)]
pub struct SimDistanceSensor {
    pub distance_mm: u32,
}

impl SimDistanceSensor {
    #[must_use]
    pub const fn new(distance_mm: u32) -> Self {
        Self { distance_mm }
    }
}

impl DistanceSensorPort for SimDistanceSensor {
    fn read_distance_mm(&mut self) -> Result<u32> {
        Ok(self.distance_mm)
    }
}

/// Raw ADC counts fed in externally — stands in for the pH probe's ADC.
#[derive(Debug, Default)]
pub struct SimAnalogSensor {
    pub raw: i32,
}

impl SimAnalogSensor {
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self { raw }
    }
}

impl AnalogSensorPort for SimAnalogSensor {
    fn read(&mut self) -> Result<i32> {
        Ok(self.raw)
    }
}

/// Free-running clock advanced one minute at a time by the host loop,
/// standing in for a DS3231 whose alarms the loop would otherwise wait on.
pub struct SimRtc {
    time: RtcTime,
}

const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

impl SimRtc {
    #[must_use]
    pub const fn new(start: RtcTime) -> Self {
        Self { time: start }
    }

    fn is_leap(year: u16) -> bool {
        year % 4 == 0
    }

    fn days_in(&self, month: u8, year: u16) -> u8 {
        if month == 2 && Self::is_leap(year) {
            29
        } else {
            DAYS_IN_MONTH[(month - 1) as usize]
        }
    }

    /// Advance by one minute, rolling over seconds/hours/day/month/year and
    /// wrapping `day_of_week` through 1..=7.
    pub fn advance_one_minute(&mut self) {
        self.time.seconds = 0;
        self.time.minutes += 1;
        if self.time.minutes >= 60 {
            self.time.minutes = 0;
            self.time.hours += 1;
            if self.time.hours >= 24 {
                self.time.hours = 0;
                self.time.day_of_week = if self.time.day_of_week >= 7 {
                    1
                } else {
                    self.time.day_of_week + 1
                };
                self.time.day += 1;
                if self.time.day > self.days_in(self.time.month, self.time.year) {
                    self.time.day = 1;
                    self.time.month += 1;
                    if self.time.month > 12 {
                        self.time.month = 1;
                        self.time.year += 1;
                    }
                }
            }
        }
    }
}

impl RtcPort for SimRtc {
    fn get_time(&mut self) -> Result<RtcTime> {
        Ok(self.time)
    }

    fn set_time(&mut self, time: RtcTime) -> Result<()> {
        self.time = time;
        Ok(())
    }

    fn set_alarm1(&mut self, _mode: AlarmMode) -> Result<()> {
        Ok(())
    }

    fn set_alarm2(&mut self, _mode: AlarmMode) -> Result<()> {
        Ok(())
    }

    fn enable_interrupts(&mut self, _alarm1: bool, _alarm2: bool) -> Result<()> {
        Ok(())
    }

    fn get_flags(&mut self) -> Result<(bool, bool)> {
        Ok((false, false))
    }

    fn clear_flags(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_tracks_last_call() {
        let mut sw = SimSwitch::new();
        assert!(!sw.is_on());
        sw.turn_on().unwrap();
        assert!(sw.is_on());
        sw.turn_off().unwrap();
        assert!(!sw.is_on());
    }

    #[test]
    fn rtc_rolls_over_hour_and_day() {
        let mut rtc = SimRtc::new(RtcTime {
            seconds: 0,
            minutes: 59,
            hours: 23,
            day_of_week: 7,
            day: 28,
            month: 2,
            year: 2026,
        });
        rtc.advance_one_minute();
        let t = rtc.get_time().unwrap();
        assert_eq!(t.minutes, 0);
        assert_eq!(t.hours, 0);
        assert_eq!(t.day, 1);
        assert_eq!(t.month, 3);
        assert_eq!(t.day_of_week, 1);
    }

    #[test]
    fn rtc_respects_leap_year_february() {
        let mut rtc = SimRtc::new(RtcTime {
            seconds: 0,
            minutes: 59,
            hours: 23,
            day_of_week: 1,
            day: 29,
            month: 2,
            year: 2028,
        });
        rtc.advance_one_minute();
        let t = rtc.get_time().unwrap();
        assert_eq!(t.day, 1);
        assert_eq!(t.month, 3);
    }
}
