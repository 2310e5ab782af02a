//! Pump Unit (§3, §4.1): a bound binary actuator with a calibrated flow
//! rate and a maximum continuous run bound.

use crate::error::{Error, Result};
use crate::ports::ActuatorPort;
use crate::time_util;

/// Time-metered or volume-metered run of a binary actuator.
///
/// Invariants (§8): `is_running ⇒ elapsed ≤ requested_duration_ms ≤
/// max_run_time_ms` (when the cap is nonzero); `delivered_ul ≤
/// flow_ul_per_s · elapsed_ms / 1000 + 1`.
#[derive(Debug, Clone, Copy)]
pub struct PumpUnit {
    flow_ul_per_s: u32,
    max_run_time_ms: u32,
    is_running: bool,
    start_ms: u32,
    requested_duration_ms: u32,
    requested_volume_ul: u32,
    estimated_delivered_ul: u32,
}

impl PumpUnit {
    /// `flow_ul_per_s == 0` forbids volume-metered operations on this pump
    /// (§6 "Pump flow calibration"). `max_run_time_ms == 0` means no cap.
    #[must_use]
    pub const fn new(flow_ul_per_s: u32, max_run_time_ms: u32) -> Self {
        Self {
            flow_ul_per_s,
            max_run_time_ms,
            is_running: false,
            start_ms: 0,
            requested_duration_ms: 0,
            requested_volume_ul: 0,
            estimated_delivered_ul: 0,
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.is_running
    }

    #[must_use]
    pub const fn estimated_delivered_ul(&self) -> u32 {
        self.estimated_delivered_ul
    }

    #[must_use]
    pub const fn flow_ul_per_s(&self) -> u32 {
        self.flow_ul_per_s
    }

    /// Start a time-metered run. Fails if the actuator's ON call fails, if
    /// `duration_ms` is zero, or if the unit is already running. The
    /// effective duration is clamped to `max_run_time_ms` when set.
    pub fn start_for_ms(
        &mut self,
        now: u32,
        duration_ms: u32,
        actuator: &mut impl ActuatorPort,
    ) -> Result<()> {
        if self.is_running {
            return Err(Error::Busy);
        }
        if duration_ms == 0 {
            return Err(Error::InvalidArg);
        }

        let effective = if self.max_run_time_ms > 0 {
            duration_ms.min(self.max_run_time_ms)
        } else {
            duration_ms
        };

        actuator.turn_on()?;

        self.is_running = true;
        self.start_ms = now;
        self.requested_duration_ms = effective;
        self.requested_volume_ul = 0;
        self.estimated_delivered_ul = 0;
        Ok(())
    }

    /// Start a volume-metered run. Computes `duration = ceil(volume_ul *
    /// 1000 / flow_ul_per_s)`, then delegates to [`Self::start_for_ms`].
    /// Returns the actual duration used (after any `max_run_time_ms` clamp).
    pub fn start_for_volume_ul(
        &mut self,
        now: u32,
        volume_ul: u32,
        actuator: &mut impl ActuatorPort,
    ) -> Result<u32> {
        if self.flow_ul_per_s == 0 {
            return Err(Error::InvalidArg);
        }

        let numerator = u64::from(volume_ul) * 1000;
        let duration_ms = numerator.div_ceil(u64::from(self.flow_ul_per_s));
        let duration_ms = u32::try_from(duration_ms).unwrap_or(u32::MAX);

        self.start_for_ms(now, duration_ms, actuator)?;
        self.requested_volume_ul = volume_ul;
        Ok(self.requested_duration_ms)
    }

    /// Attempt to stop. Only on a successful OFF call is `is_running`
    /// cleared; a failed OFF leaves the unit marked running so the caller's
    /// safety loop retries every tick (§4.1 "Failure semantics").
    pub fn stop(&mut self, actuator: &mut impl ActuatorPort) -> Result<()> {
        actuator.turn_off()?;
        self.is_running = false;
        Ok(())
    }

    /// No-op if not running. Updates `estimated_delivered_ul` saturating at
    /// `u32::MAX`, and stops when elapsed reaches the requested duration or
    /// the safety cap.
    pub fn tick(&mut self, now: u32, actuator: &mut impl ActuatorPort) -> Result<()> {
        if !self.is_running {
            return Ok(());
        }

        let elapsed_ms = time_util::elapsed(now, self.start_ms);
        self.estimated_delivered_ul = u32::try_from(
            u64::from(self.flow_ul_per_s) * u64::from(elapsed_ms) / 1000,
        )
        .unwrap_or(u32::MAX);

        let duration_reached = elapsed_ms >= self.requested_duration_ms;
        let cap_reached = self.max_run_time_ms > 0 && elapsed_ms >= self.max_run_time_ms;

        if duration_reached || cap_reached {
            self.stop(actuator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeActuator {
        on_calls: u32,
        off_calls: u32,
        fail_off: bool,
    }

    impl ActuatorPort for FakeActuator {
        fn turn_on(&mut self) -> Result<()> {
            self.on_calls += 1;
            Ok(())
        }
        fn turn_off(&mut self) -> Result<()> {
            self.off_calls += 1;
            if self.fail_off {
                Err(Error::Timeout)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn start_for_ms_rejects_zero_duration() {
        let mut pump = PumpUnit::new(1000, 0);
        let mut act = FakeActuator::default();
        assert_eq!(pump.start_for_ms(0, 0, &mut act), Err(Error::InvalidArg));
    }

    #[test]
    fn start_for_ms_rejects_when_already_running() {
        let mut pump = PumpUnit::new(1000, 0);
        let mut act = FakeActuator::default();
        pump.start_for_ms(0, 1000, &mut act).unwrap();
        assert_eq!(pump.start_for_ms(0, 1000, &mut act), Err(Error::Busy));
    }

    #[test]
    fn start_for_ms_clamps_to_max_run_time() {
        let mut pump = PumpUnit::new(1000, 500);
        let mut act = FakeActuator::default();
        pump.start_for_ms(0, 10_000, &mut act).unwrap();
        pump.tick(500, &mut act).unwrap();
        assert!(!pump.is_running());
        assert_eq!(act.off_calls, 1);
    }

    #[test]
    fn start_for_volume_computes_ceil_duration() {
        let mut pump = PumpUnit::new(1000, 0); // 1000 uL/s
        let mut act = FakeActuator::default();
        // 500_000 uL at 1000 uL/s = 500_000 ms
        let dur = pump.start_for_volume_ul(0, 500_000, &mut act).unwrap();
        assert_eq!(dur, 500_000);
    }

    #[test]
    fn start_for_volume_rejects_zero_flow() {
        let mut pump = PumpUnit::new(0, 0);
        let mut act = FakeActuator::default();
        assert_eq!(
            pump.start_for_volume_ul(0, 1000, &mut act),
            Err(Error::InvalidArg)
        );
    }

    #[test]
    fn failed_off_leaves_pump_marked_running() {
        let mut pump = PumpUnit::new(1000, 0);
        let mut act = FakeActuator {
            fail_off: true,
            ..Default::default()
        };
        pump.start_for_ms(0, 1000, &mut act).unwrap();
        assert_eq!(pump.stop(&mut act), Err(Error::Timeout));
        assert!(pump.is_running());
    }

    #[test]
    fn tick_stops_exactly_at_requested_duration() {
        let mut pump = PumpUnit::new(1000, 0);
        let mut act = FakeActuator::default();
        pump.start_for_ms(0, 1000, &mut act).unwrap();
        pump.tick(999, &mut act).unwrap();
        assert!(pump.is_running());
        pump.tick(1000, &mut act).unwrap();
        assert!(!pump.is_running());
    }

    #[test]
    fn delivered_tracks_flow_times_elapsed() {
        let mut pump = PumpUnit::new(2000, 0);
        let mut act = FakeActuator::default();
        pump.start_for_ms(0, 10_000, &mut act).unwrap();
        pump.tick(500, &mut act).unwrap();
        assert_eq!(pump.estimated_delivered_ul(), 1000);
    }

    #[test]
    fn tick_is_wrap_safe() {
        let mut pump = PumpUnit::new(1000, 0);
        let mut act = FakeActuator::default();
        let start = 0xFFFF_FFF0;
        pump.start_for_ms(start, 100, &mut act).unwrap();
        pump.tick(start.wrapping_add(50), &mut act).unwrap();
        assert!(!pump.is_running());
    }
}
