//! Hydroponic Scheduler (§3, §4.6): a minute-tick light-schedule
//! controller with EEPROM-backed power-outage deficit compensation.
//!
//! Time handling, the overlap computation, and the persistence cadence
//! are grounded on `examples/original_source/systems/hydroponic_box/`;
//! the deficit-accounting state machine itself is new on top of that
//! (the original firmware only restores the last light state across a
//! reboot, it does not compensate for missed light).

pub mod storage;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerFault};
use crate::ports::{ActuatorPort, DurableStorePort, RtcTime};
use crate::time_util;

const MIN_PER_DAY: u32 = 1_440;
const DAYS_PER_COMMON_YEAR: u32 = 365;
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

const fn is_leap_year(year: u16) -> bool {
    year % 4 == 0
}

fn days_since_2000(year: u16, month: u8, day: u8) -> u32 {
    let mut days = 0u32;
    let mut y = 2000u16;
    while y < year {
        days += if is_leap_year(y) { DAYS_PER_COMMON_YEAR + 1 } else { DAYS_PER_COMMON_YEAR };
        y += 1;
    }
    for m in 1..month {
        days += DAYS_IN_MONTH[(m - 1) as usize];
        if m == 2 && is_leap_year(year) {
            days += 1;
        }
    }
    days + u32::from(day.saturating_sub(1))
}

/// Minutes elapsed since 2000-01-01 00:00 UTC, per the DS3231's
/// closed-interval calendar rules (§4.6 "Time base").
#[must_use]
pub fn minute_index_since_2000(t: RtcTime) -> u32 {
    days_since_2000(t.year, t.month, t.day) * MIN_PER_DAY
        + u32::from(t.hours) * 60
        + u32::from(t.minutes)
}

/// `true` if `minute_of_day` falls in `[on_hour, off_hour)` in hours,
/// with midnight-crossing windows supported. `on_hour == off_hour` means
/// "always on" (§4.6 "Overlap computation").
#[must_use]
pub fn is_in_light_window(minute_of_day: u32, on_hour: u8, off_hour: u8) -> bool {
    if on_hour == off_hour {
        return true;
    }
    let on_min = u32::from(on_hour) * 60;
    let off_min = u32::from(off_hour) * 60;
    if on_min < off_min {
        minute_of_day >= on_min && minute_of_day < off_min
    } else {
        minute_of_day >= on_min || minute_of_day < off_min
    }
}

fn overlap_range(a_lo: u32, a_hi: u32, b_lo: u32, b_hi: u32) -> u32 {
    let lo = a_lo.max(b_lo);
    let hi = a_hi.min(b_hi);
    hi.saturating_sub(lo)
}

/// Minutes of `[start, end)` (minute indices since 2000) that fall inside
/// the light window, walked day by day (§4.6 "Overlap computation").
#[must_use]
pub fn light_window_overlap_minutes(start: u32, end: u32, on_hour: u8, off_hour: u8) -> u32 {
    if end <= start {
        return 0;
    }
    if on_hour == off_hour {
        return end - start;
    }

    let mut total = 0u32;
    let first_day = start / MIN_PER_DAY;
    let last_day = (end - 1) / MIN_PER_DAY;
    let mut day = first_day;
    while day <= last_day {
        let day_start = day * MIN_PER_DAY;
        let seg_lo = start.max(day_start);
        let seg_hi = end.min(day_start + MIN_PER_DAY);

        let on_min = u32::from(on_hour) * 60;
        let off_min = u32::from(off_hour) * 60;
        if on_min < off_min {
            total += overlap_range(seg_lo, seg_hi, day_start + on_min, day_start + off_min);
        } else {
            total += overlap_range(seg_lo, seg_hi, day_start + on_min, day_start + MIN_PER_DAY);
            total += overlap_range(seg_lo, seg_hi, day_start, day_start + off_min);
        }
        day += 1;
    }
    total
}

/// Which RTC alarm boundary should be armed next, given the current hour
/// (§4.6 "Minute tick behaviors", re-arming Alarm-2).
#[must_use]
pub const fn next_boundary_hour(current_hour: u8, on_hour: u8, off_hour: u8) -> u8 {
    if is_hour_in_window(current_hour, on_hour, off_hour) {
        off_hour
    } else {
        on_hour
    }
}

const fn is_hour_in_window(hour: u8, on_hour: u8, off_hour: u8) -> bool {
    if on_hour == off_hour {
        return true;
    }
    if on_hour < off_hour {
        hour >= on_hour && hour < off_hour
    } else {
        hour >= on_hour || hour < off_hour
    }
}

/// Runtime state for the light-schedule controller. One instance per
/// Hydroponic Box (§5 "Shared resources").
pub struct HydroponicScheduler {
    cfg: SchedulerConfig,
    boot_count: u32,
    last_processed_min: Option<u32>,
    minutes_since_write: u32,
    deficit_minutes: u32,
    outage_count: u32,
    compensation_active: bool,
    light_on: bool,
    error_flags: u8,
}

impl HydroponicScheduler {
    /// Load the durable record (if any), detect a power-loss gap and
    /// accumulate missed-light deficit, decide the initial light state,
    /// and force a write (§4.6 "forced at boot").
    pub fn init(
        cfg: SchedulerConfig,
        now: RtcTime,
        store: &mut impl DurableStorePort,
        addr: u16,
    ) -> Result<Self> {
        let now_min = minute_index_since_2000(now);
        let prior = storage::load(store, addr).ok();

        let (boot_count, deficit_minutes, outage_count) = match prior {
            Some(rec) => {
                let mut deficit = rec.deficit_minutes;
                let mut outages = rec.outage_count;
                if time_util::elapsed(now_min, rec.last_alive_min) > cfg.power_loss_detect_min {
                    outages = outages.saturating_add(1);
                    let missed = light_window_overlap_minutes(
                        rec.last_alive_min,
                        now_min,
                        cfg.light_on_hour,
                        cfg.light_off_hour,
                    );
                    deficit = deficit.saturating_add(missed).min(cfg.max_deficit_minutes);
                }
                (rec.boot_count.saturating_add(1), deficit, outages)
            }
            None => (1, 0, 0),
        };

        let minute_of_day = now_min % MIN_PER_DAY;
        let in_window = is_in_light_window(minute_of_day, cfg.light_on_hour, cfg.light_off_hour);
        let compensation_active = !in_window && deficit_minutes > 0;
        let light_on = in_window || compensation_active;

        let mut scheduler = Self {
            cfg,
            boot_count,
            last_processed_min: Some(now_min),
            minutes_since_write: 0,
            deficit_minutes,
            outage_count,
            compensation_active,
            light_on,
            error_flags: 0,
        };
        scheduler.persist(store, addr, now_min)?;
        Ok(scheduler)
    }

    #[must_use]
    pub const fn is_light_on(&self) -> bool {
        self.light_on
    }

    #[must_use]
    pub const fn is_compensating(&self) -> bool {
        self.compensation_active
    }

    #[must_use]
    pub const fn deficit_minutes(&self) -> u32 {
        self.deficit_minutes
    }

    #[must_use]
    pub const fn outage_count(&self) -> u32 {
        self.outage_count
    }

    #[must_use]
    pub const fn boot_count(&self) -> u32 {
        self.boot_count
    }

    #[must_use]
    pub const fn error_flags(&self) -> u8 {
        self.error_flags
    }

    pub fn set_rtc_fault(&mut self) {
        self.error_flags |= SchedulerFault::Rtc.mask();
    }

    pub fn clear_rtc_fault(&mut self) {
        self.error_flags &= !SchedulerFault::Rtc.mask();
    }

    /// Alarm-1 per-minute handler (§4.6 "Minute tick behaviors"): update
    /// deficit/compensation, toggle the light if needed, and persist
    /// when due. `dht_ok`/`mcu_temp_ok` only drive the error-flag bits;
    /// the readings themselves are presentation and out of scope here.
    pub fn process_minute(
        &mut self,
        now: RtcTime,
        dht_ok: bool,
        mcu_temp_ok: Option<bool>,
        store: &mut impl DurableStorePort,
        addr: u16,
        light: &mut impl ActuatorPort,
    ) -> Result<()> {
        if dht_ok {
            self.error_flags &= !SchedulerFault::Dht22.mask();
        } else {
            self.error_flags |= SchedulerFault::Dht22.mask();
        }
        if let Some(ok) = mcu_temp_ok {
            if ok {
                self.error_flags &= !SchedulerFault::McuTemp.mask();
            } else {
                self.error_flags |= SchedulerFault::McuTemp.mask();
            }
        }

        let now_min = minute_index_since_2000(now);
        let prev_min = self.last_processed_min.unwrap_or(now_min);
        let elapsed = time_util::elapsed(now_min, prev_min).min(60);

        let minute_of_day = now_min % MIN_PER_DAY;
        let in_window = is_in_light_window(minute_of_day, self.cfg.light_on_hour, self.cfg.light_off_hour);

        let was_compensating = self.compensation_active;
        let was_exhausted = self.deficit_minutes == 0;

        if was_compensating && !in_window {
            self.deficit_minutes = self.deficit_minutes.saturating_sub(elapsed);
        }

        self.compensation_active = !in_window && self.deficit_minutes > 0;
        let new_light_on = in_window || self.compensation_active;

        let forced_write = was_compensating != self.compensation_active
            || was_exhausted != (self.deficit_minutes == 0);

        if new_light_on != self.light_on {
            if new_light_on {
                light.turn_on()?;
            } else {
                light.turn_off()?;
            }
            self.light_on = new_light_on;
        }

        self.last_processed_min = Some(now_min);
        self.minutes_since_write = self.minutes_since_write.saturating_add(elapsed.max(1));

        if forced_write || self.minutes_since_write >= self.cfg.heartbeat_period_min {
            self.persist(store, addr, now_min)?;
        }
        Ok(())
    }

    fn persist(&mut self, store: &mut impl DurableStorePort, addr: u16, now_min: u32) -> Result<()> {
        let rec = storage::StorageRecord::new(
            self.boot_count,
            now_min,
            self.deficit_minutes,
            self.outage_count,
            self.light_on,
        );
        match storage::save(store, addr, rec) {
            Ok(()) => {
                self.error_flags &= !SchedulerFault::Eeprom.mask();
                self.minutes_since_write = 0;
                Ok(())
            }
            Err(e) => {
                self.error_flags |= SchedulerFault::Eeprom.mask();
                Err(e)
            }
        }
    }
}
