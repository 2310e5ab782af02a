//! Log-based event sink adapters.
//!
//! Writes structured coordinator/scheduler events to the ESP-IDF logger
//! (which goes to UART / USB-CDC in production). A future MQTT or BLE
//! adapter would consume the same event types.

use log::{info, warn};

use crate::events::{NutrientTankEvent, NutrientTankEventKind};
use crate::hydroponic::HydroponicScheduler;

/// Adapter that logs every [`NutrientTankEvent`] drained from the
/// coordinator's event ring to the serial console.
pub struct TankEventLogSink;

impl TankEventLogSink {
    pub fn new() -> Self {
        Self
    }

    pub fn emit(&mut self, event: &NutrientTankEvent) {
        let main_ul = event.main_volume_ul;
        let return_ul = event.return_volume_ul;
        match event.kind {
            NutrientTankEventKind::MainLevelOk => {
                info!("TANK | main=OK | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::MainLevelLow => {
                warn!("TANK | main=LOW | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::MainLevelCritical => {
                warn!("TANK | main=CRITICAL | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::MainLevelHigh => {
                info!("TANK | main=HIGH | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::ReturnLevelOk => {
                info!("TANK | return=OK | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::ReturnLevelHigh => {
                warn!("TANK | return=HIGH | main={main_ul}uL return={return_ul}uL");
            }
            NutrientTankEventKind::RequestReturn => {
                info!("TANK | request return-to-main | return={return_ul}uL");
            }
            NutrientTankEventKind::RequestRefill => {
                info!("TANK | request main refill | main={main_ul}uL");
            }
            NutrientTankEventKind::OperationBlocked(reason) => {
                warn!("TANK | blocked | reason={reason}");
            }
            NutrientTankEventKind::CommandCompleted => {
                info!("TANK | command completed");
            }
            NutrientTankEventKind::EmergencyStopped => {
                warn!("TANK | EMERGENCY STOP");
            }
            NutrientTankEventKind::Error(e) => {
                warn!("TANK | error | {e}");
            }
        }
    }
}

impl Default for TankEventLogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs hydroponic scheduler state after every `process_minute` tick. Only
/// logs on a change so a steady-state run doesn't spam the console once a
/// minute.
pub struct HydroponicLogSink {
    last_light_on: Option<bool>,
    last_compensating: Option<bool>,
    last_error_flags: u8,
}

impl HydroponicLogSink {
    pub fn new() -> Self {
        Self {
            last_light_on: None,
            last_compensating: None,
            last_error_flags: 0,
        }
    }

    pub fn observe(&mut self, sched: &HydroponicScheduler) {
        let light_on = sched.is_light_on();
        if self.last_light_on != Some(light_on) {
            info!("HYDRO | light={}", if light_on { "ON" } else { "OFF" });
            self.last_light_on = Some(light_on);
        }

        let compensating = sched.is_compensating();
        if self.last_compensating != Some(compensating) {
            if compensating {
                warn!(
                    "HYDRO | compensation started | deficit={}min outages={}",
                    sched.deficit_minutes(),
                    sched.outage_count()
                );
            } else {
                info!("HYDRO | compensation cleared");
            }
            self.last_compensating = Some(compensating);
        }

        let flags = sched.error_flags();
        if flags != self.last_error_flags {
            if flags == 0 {
                info!("HYDRO | faults cleared");
            } else {
                warn!("HYDRO | fault flags=0b{flags:08b}");
            }
            self.last_error_flags = flags;
        }
    }
}

impl Default for HydroponicLogSink {
    fn default() -> Self {
        Self::new()
    }
}
