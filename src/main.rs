//! Host/demo entry point — cooperative loop driving the Nutrient Tank
//! Coordinator and the Hydroponic Scheduler (§5, §10.5).
//!
//! Pumps, valves, and the light are driven through `ActuatorPort`, which a
//! real build backs with GPIO/relay output; the pH ADC, the ultrasonic
//! distance sensors, and the DS3231 RTC are external collaborators (§6)
//! with no driver reimplemented here, so this binary runs them against the
//! `adapters::sim` stand-ins. Wiring real drivers in is an integration
//! step for whoever deploys this onto a board, not something this crate
//! guesses at.
#![deny(unused_must_use)]

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod events;
pub mod hydroponic;
pub mod ports;
pub mod time_util;

pub mod adapters;

use std::time::Duration;

use config::{CoordinatorConfig, SchedulerConfig, MAX_NUTRIENTS};
use coordinator::{Command, CoordinatorActuators, NutrientTankCoordinator};
use domain::pump_unit::PumpUnit;
use domain::recipe::DoseKind;
use domain::tank_level::TankLevel;
use events::NutrientTankEvent;
use hydroponic::HydroponicScheduler;
use ports::{ActuatorPort, DistanceSensorPort, RtcPort, RtcTime};

use adapters::log_sink::{HydroponicLogSink, TankEventLogSink};
use adapters::sim::{SimAnalogSensor, SimDistanceSensor, SimRtc, SimSwitch};
use adapters::storage::EepromAdapter;
use adapters::time::Esp32TimeAdapter;
use ports::AnalogSensorPort;

/// `error::Error` stays `std::error::Error`-free so the library half of
/// this crate keeps compiling on `no_std` targets; the binary just needs a
/// display-based bridge into `anyhow`.
trait IntoAnyhow<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T> IntoAnyhow<T> for error::Result<T> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Placeholder distance→volume mapping for the demo tanks. The exact
/// conversion formula for a real reservoir's geometry is out of scope
/// (§9 non-goals); this is just enough to exercise the hysteresis ladder.
fn demo_tank_mapping(distance_mm: u32) -> u32 {
    const TANK_HEIGHT_MM: u32 = 600;
    const TANK_CROSS_SECTION_UL_PER_MM: u32 = 15_000;
    TANK_HEIGHT_MM.saturating_sub(distance_mm) * TANK_CROSS_SECTION_UL_PER_MM
}

struct SimActuators {
    water: SimSwitch,
    nutrients: [SimSwitch; MAX_NUTRIENTS],
    ph_up: SimSwitch,
    ph_down: SimSwitch,
    drain: SimSwitch,
    return_pump: SimSwitch,
    circulation: SimSwitch,
    air: SimSwitch,
}

impl SimActuators {
    fn new() -> Self {
        Self {
            water: SimSwitch::new(),
            nutrients: [SimSwitch::new(); MAX_NUTRIENTS],
            ph_up: SimSwitch::new(),
            ph_down: SimSwitch::new(),
            drain: SimSwitch::new(),
            return_pump: SimSwitch::new(),
            circulation: SimSwitch::new(),
            air: SimSwitch::new(),
        }
    }
}

impl CoordinatorActuators for SimActuators {
    fn water(&mut self) -> &mut dyn ActuatorPort {
        &mut self.water
    }
    fn nutrient(&mut self, index: usize) -> &mut dyn ActuatorPort {
        &mut self.nutrients[index]
    }
    fn ph_up(&mut self) -> &mut dyn ActuatorPort {
        &mut self.ph_up
    }
    fn ph_down(&mut self) -> &mut dyn ActuatorPort {
        &mut self.ph_down
    }
    fn drain(&mut self) -> &mut dyn ActuatorPort {
        &mut self.drain
    }
    fn return_pump(&mut self) -> &mut dyn ActuatorPort {
        &mut self.return_pump
    }
    fn circulation(&mut self) -> &mut dyn ActuatorPort {
        &mut self.circulation
    }
    fn air(&mut self) -> &mut dyn ActuatorPort {
        &mut self.air
    }
}

/// A tiny subset of the §6 line protocol, enough to demonstrate the wiring
/// from `CommandLinePort` into `submit_command`. "help" lists the rest.
fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()?.to_ascii_uppercase().as_str() {
        "AIR" => Some(Command::AerateForMs(parts.next()?.parse().ok()?)),
        "CIRC" => match parts.next()?.to_ascii_uppercase().as_str() {
            "ON" => Some(Command::CirculationSet(true)),
            "OFF" => Some(Command::CirculationSet(false)),
            _ => None,
        },
        "ESTOP" => Some(Command::EmergencyStop),
        "CTRL" => match parts.next()?.to_ascii_uppercase().as_str() {
            "START" => Some(Command::ControlStart),
            "STOP" => Some(Command::ControlStop),
            _ => None,
        },
        "DOSE" => {
            let kind = match parts.next()?.to_ascii_uppercase().as_str() {
                "WATER" => DoseKind::Water,
                "PHUP" => DoseKind::PhUp,
                "PHDOWN" => DoseKind::PhDown,
                "DRAIN" => DoseKind::Drain,
                "RETURN" => DoseKind::Return,
                "NUTRIENT" => DoseKind::Nutrient,
                _ => return None,
            };
            let volume_ul: u32 = parts.next()?.parse().ok()?;
            Some(Command::DoseVolume {
                kind,
                nutrient_index: if kind == DoseKind::Nutrient {
                    Some(0)
                } else {
                    None
                },
                volume_ul,
            })
        }
        _ => None,
    }
}

fn main() -> anyhow::Result<()> {
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }

    log::info!("nutrient tank / hydroponic box controller starting");

    let coordinator_cfg = CoordinatorConfig::default();
    let stale_ms = coordinator_cfg.sensor_stale_timeout_ms;
    let mut coordinator = NutrientTankCoordinator::new(
        coordinator_cfg,
        TankLevel::new(Some(demo_tank_mapping), stale_ms),
        TankLevel::new(Some(demo_tank_mapping), stale_ms),
        PumpUnit::new(500, 30_000),
        core::array::from_fn(|_| PumpUnit::new(50, 10_000)),
        PumpUnit::new(10, 5_000),
        PumpUnit::new(10, 5_000),
        PumpUnit::new(2_000, 60_000),
        PumpUnit::new(2_000, 60_000),
        PumpUnit::new(0, 3_600_000),
        PumpUnit::new(0, 600_000),
    );
    let mut actuators = SimActuators::new();
    let mut main_distance = SimDistanceSensor::new(300);
    let mut return_distance = SimDistanceSensor::new(50);
    let mut ph_sensor = SimAnalogSensor::new(6_800);
    let mut tds_sensor = SimAnalogSensor::new(650);
    let mut temperature_sensor = SimAnalogSensor::new(21_500);

    let mut rtc = SimRtc::new(RtcTime {
        seconds: 0,
        minutes: 0,
        hours: 6,
        day_of_week: 1,
        day: 1,
        month: 1,
        year: 2026,
    });
    let mut eeprom = EepromAdapter::new(256);
    let mut light = SimSwitch::new();
    let mut hydro = HydroponicScheduler::init(
        SchedulerConfig::default(),
        rtc.get_time().anyhow()?,
        &mut eeprom,
        0,
    )
    .anyhow()?;

    let mut tank_log = TankEventLogSink::new();
    let mut hydro_log = HydroponicLogSink::new();
    let time_adapter = Esp32TimeAdapter::new();

    #[cfg(not(target_os = "espidf"))]
    let mut cli = adapters::cli::FakeCliAdapter::new();

    let mut ms_since_minute = 0u32;
    const TICK_MS: u32 = 250;

    loop {
        std::thread::sleep(Duration::from_millis(u64::from(TICK_MS)));

        let now_ms = time_adapter.now_ms();
        coordinator.update_main_distance(now_ms, main_distance.read_distance_mm().unwrap_or(0));
        coordinator.update_return_distance(now_ms, return_distance.read_distance_mm().unwrap_or(0));
        if let Ok(ph_x1000) = ph_sensor.read() {
            coordinator.update_ph_x1000(now_ms, ph_x1000);
        }
        if let Ok(tds_ppm) = tds_sensor.read() {
            coordinator.update_tds_ppm(now_ms, tds_ppm);
        }
        if let Ok(temperature_mc) = temperature_sensor.read() {
            coordinator.update_temperature_mc(now_ms, temperature_mc);
        }

        coordinator
            .process(now_ms, &mut actuators, |event: NutrientTankEvent| {
                tank_log.emit(&event);
            })
            .anyhow()?;

        ms_since_minute += TICK_MS;
        if ms_since_minute >= 60_000 {
            ms_since_minute = 0;
            rtc.advance_one_minute();
            hydro
                .process_minute(
                    rtc.get_time().anyhow()?,
                    true,
                    Some(true),
                    &mut eeprom,
                    0,
                    &mut light,
                )
                .anyhow()?;
            hydro_log.observe(&hydro);
        }

        #[cfg(not(target_os = "espidf"))]
        while let Some(line) = ports::CommandLinePort::read_line(&mut cli).anyhow()? {
            match parse_command(line.as_str()) {
                Some(cmd) => match coordinator.submit_command(cmd) {
                    Ok(()) => ports::CommandLinePort::write_line(&mut cli, "OK").anyhow()?,
                    Err(e) => {
                        ports::CommandLinePort::write_line(&mut cli, &format!("ERR {e}")).anyhow()?
                    }
                },
                None => ports::CommandLinePort::write_line(&mut cli, "ERR unrecognized").anyhow()?,
            }
        }
    }
}
