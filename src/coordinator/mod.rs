//! Nutrient Tank Coordinator (§3, §4.5): the closed-loop, safety-gated,
//! event-driven coordinator that drives every pump touching the main
//! reservoir.
//!
//! Generalizes the teacher's function-pointer FSM (`fsm/mod.rs`) into an
//! explicit `match` over a small state enum — the command surface here
//! (single-slot queue, policy-gated start, multi-phase settle) doesn't need
//! a full state table, but keeps the same "one state owns the tick"
//! discipline and the same safety-supervisor-before-states ordering
//! (`safety.rs`): guards tick, then levels, then permissions, then command
//! progress (§5 "Ordering guarantees").

use crate::config::{CoordinatorConfig, RecipeTargets, MAX_NUTRIENTS};
use crate::domain::pump_guard::{PumpGuard, SensorFaultPolicy};
use crate::domain::pump_unit::PumpUnit;
use crate::domain::recipe::{DoseKind, RecipeController, RecipeStep};
use crate::domain::tank_level::TankLevel;
use crate::domain::tank_sensors::TankSensors;
use crate::error::{BlockReason, Error, Result};
use crate::events::{NutrientTankEvent, NutrientTankEventKind};
use crate::ports::ActuatorPort;
use crate::time_util;

/// Fixed duration of one automatic circulation slice (§4.5 "Automatic
/// policies").
pub const CIRCULATION_SLICE_MS: u32 = 60_000;

/// Everything the coordinator needs to drive the ten physical pumps it
/// owns. A host test harness implements this with fakes; hardware builds
/// implement it over real GPIO/relay drivers.
pub trait CoordinatorActuators {
    fn water(&mut self) -> &mut dyn ActuatorPort;
    fn nutrient(&mut self, index: usize) -> &mut dyn ActuatorPort;
    fn ph_up(&mut self) -> &mut dyn ActuatorPort;
    fn ph_down(&mut self) -> &mut dyn ActuatorPort;
    fn drain(&mut self) -> &mut dyn ActuatorPort;
    fn return_pump(&mut self) -> &mut dyn ActuatorPort;
    fn circulation(&mut self) -> &mut dyn ActuatorPort;
    fn air(&mut self) -> &mut dyn ActuatorPort;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Executing,
    AerateAfterDose,
    WaitSettle,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainLevelState {
    Ok,
    Low,
    Critical,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnLevelState {
    Ok,
    High,
}

/// Command surface (§4.5 "Command surface").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AerateForMs(u32),
    CirculationSet(bool),
    DoseVolume {
        kind: DoseKind,
        nutrient_index: Option<u8>,
        volume_ul: u32,
    },
    /// Arm the Recipe Controller's closed-loop dosing; always accepted,
    /// independent of the command slot (§4.4, §4.5).
    ControlStart,
    /// Disarm the Recipe Controller, discarding any in-progress mix.
    ControlStop,
    EmergencyStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivePump {
    Water,
    Nutrient(u8),
    PhUp,
    PhDown,
    Drain,
    Return,
    Air,
}

#[derive(Debug, Clone, Copy)]
struct ActiveCommand {
    pump: ActivePump,
    requires_mix_after: bool,
    pure_aeration: bool,
    /// Dispatched by `advance_recipe` rather than a directly submitted
    /// command; its completion must be reported back via
    /// `RecipeController::on_dose_result` (§4.4).
    from_recipe: bool,
}

const fn circulation_or_drain_allowed(main_state: MainLevelState) -> bool {
    matches!(main_state, MainLevelState::Ok | MainLevelState::High)
}

const fn additions_allowed(main_state: MainLevelState) -> bool {
    !matches!(main_state, MainLevelState::High)
}

/// Runtime state for the coordinator. One instance owns all mutable state
/// for the main/return tanks and the ten pumps that touch them (§5 "Shared
/// resources").
pub struct NutrientTankCoordinator {
    cfg: CoordinatorConfig,
    state: CoordinatorState,

    main_level: TankLevel,
    return_level: TankLevel,
    main_sticky_low: bool,
    return_sticky_high: bool,
    prev_main_state: Option<MainLevelState>,
    prev_return_state: Option<ReturnLevelState>,

    water: PumpGuard,
    nutrients: [PumpGuard; MAX_NUTRIENTS],
    ph_up: PumpGuard,
    ph_down: PumpGuard,
    drain: PumpGuard,
    return_pump: PumpGuard,
    circulation: PumpGuard,
    air: PumpGuard,

    sensors: TankSensors,
    recipe: RecipeController,
    recipe_targets: RecipeTargets,

    circulation_requested: bool,
    pending_command: Option<Command>,
    active: Option<ActiveCommand>,
    wait_until_ms: u32,
    emergency_stop_pending: bool,
}

impl NutrientTankCoordinator {
    /// Wraps each raw pump in its own Pump Guard (§3, §4.2): pumps drawing
    /// from an external supply with no reservoir sensor (water, nutrients,
    /// pH correctors, air) get an unconditional guard; `drain`/`circulation`
    /// stay gated by the coordinator's own main-level policy
    /// (`apply_circulation_policy`/`enforce_drain_permission`) rather than a
    /// duplicated guard-level check; `return_pump` gets a guard mirroring
    /// `return_level`, the one pump with no other continuous fault check.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: CoordinatorConfig,
        main_level: TankLevel,
        return_level: TankLevel,
        water: PumpUnit,
        nutrients: [PumpUnit; MAX_NUTRIENTS],
        ph_up: PumpUnit,
        ph_down: PumpUnit,
        drain: PumpUnit,
        return_pump: PumpUnit,
        circulation: PumpUnit,
        air: PumpUnit,
    ) -> Self {
        let stale_ms = cfg.sensor_stale_timeout_ms;
        let unconditional = |pump: PumpUnit| PumpGuard::new(pump, None, 0, SensorFaultPolicy::Ignore);
        Self {
            water: unconditional(water),
            nutrients: nutrients.map(unconditional),
            ph_up: unconditional(ph_up),
            ph_down: unconditional(ph_down),
            drain: unconditional(drain),
            circulation: unconditional(circulation),
            air: unconditional(air),
            return_pump: PumpGuard::new(return_pump, Some(return_level), 0, SensorFaultPolicy::Block),

            sensors: TankSensors::new(stale_ms),
            recipe: RecipeController::new(),
            recipe_targets: RecipeTargets::default(),

            cfg,
            state: CoordinatorState::Idle,
            main_level,
            return_level,
            main_sticky_low: false,
            return_sticky_high: false,
            prev_main_state: None,
            prev_return_state: None,
            circulation_requested: false,
            pending_command: None,
            active: None,
            wait_until_ms: 0,
            emergency_stop_pending: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CoordinatorState {
        self.state
    }

    #[must_use]
    pub const fn main_volume_ul(&self) -> u32 {
        self.main_level.volume_ul()
    }

    #[must_use]
    pub const fn return_volume_ul(&self) -> u32 {
        self.return_level.volume_ul()
    }

    #[must_use]
    pub const fn has_active_command(&self) -> bool {
        self.active.is_some()
    }

    pub fn update_main_distance(&mut self, now: u32, distance_mm: u32) {
        self.main_level.update_distance(now, distance_mm);
    }

    /// Also forwarded to the `return_pump` guard's own mirrored level copy
    /// (§4.2), the one pump whose continuous fault interlock depends on it.
    pub fn update_return_distance(&mut self, now: u32, distance_mm: u32) {
        self.return_level.update_distance(now, distance_mm);
        self.return_pump.update_distance(now, distance_mm);
    }

    pub fn set_main_sensor_fault(&mut self, now: u32) {
        self.main_level.set_sensor_fault(now);
    }

    pub fn clear_main_sensor_fault(&mut self) {
        self.main_level.clear_sensor_fault();
    }

    pub fn set_return_sensor_fault(&mut self, now: u32) {
        self.return_level.set_sensor_fault(now);
        self.return_pump.set_sensor_fault(now);
    }

    pub fn clear_return_sensor_fault(&mut self) {
        self.return_level.clear_sensor_fault();
        self.return_pump.clear_sensor_fault();
    }

    /// Feed a fresh Tank Sensors reading (§4.3); `ph_x1000`/`tds_ppm`/
    /// `temperature_mc` is whichever axis this call updates.
    pub fn update_ph_x1000(&mut self, now: u32, ph_x1000: i32) {
        self.sensors.update_ph_x1000(now, ph_x1000);
    }

    pub fn update_tds_ppm(&mut self, now: u32, tds_ppm: i32) {
        self.sensors.update_tds_ppm(now, tds_ppm);
    }

    pub fn update_temperature_mc(&mut self, now: u32, temperature_mc: i32) {
        self.sensors.update_temperature_mc(now, temperature_mc);
    }

    pub fn set_recipe_targets(&mut self, targets: RecipeTargets) {
        self.recipe_targets = targets;
    }

    #[must_use]
    pub const fn recipe_targets(&self) -> RecipeTargets {
        self.recipe_targets
    }

    #[must_use]
    pub const fn recipe_active(&self) -> bool {
        self.recipe.is_active()
    }

    /// Only way to leave `Stopped` (§5 "Cancellation / timeouts").
    pub fn reset(&mut self) -> Result<()> {
        if self.state != CoordinatorState::Stopped {
            return Err(Error::InvalidArg);
        }
        self.state = CoordinatorState::Idle;
        self.pending_command = None;
        self.active = None;
        self.emergency_stop_pending = false;
        Ok(())
    }

    /// Accept or reject a command (§4.5 "Command state machine", §8
    /// "Coordinator single-slot rule"). `EMERGENCY_STOP`, `CIRCULATION_SET`,
    /// and `CONTROL_START`/`STOP` are always accepted, independent of the
    /// command slot. Everything else requires the slot to be free.
    pub fn submit_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::EmergencyStop => {
                self.emergency_stop_pending = true;
                Ok(())
            }
            Command::CirculationSet(on) => {
                self.circulation_requested = on;
                Ok(())
            }
            Command::ControlStart => {
                self.recipe.start();
                Ok(())
            }
            Command::ControlStop => {
                self.recipe.stop();
                Ok(())
            }
            Command::AerateForMs(duration_ms) => {
                if duration_ms == 0 {
                    return Err(Error::InvalidArg);
                }
                self.submit_slot_command(cmd)
            }
            Command::DoseVolume {
                kind,
                nutrient_index,
                volume_ul,
            } => {
                if volume_ul == 0 {
                    return Err(Error::InvalidArg);
                }
                if matches!(kind, DoseKind::Nutrient) {
                    match nutrient_index {
                        Some(idx) if (idx as usize) < MAX_NUTRIENTS => {}
                        _ => return Err(Error::InvalidArg),
                    }
                }
                self.submit_slot_command(cmd)
            }
        }
    }

    fn submit_slot_command(&mut self, cmd: Command) -> Result<()> {
        if self.state == CoordinatorState::Stopped {
            return Err(Error::Busy);
        }
        if !matches!(self.state, CoordinatorState::Idle | CoordinatorState::WaitSettle) {
            return Err(Error::Busy);
        }
        // A fresh command submitted during the settle wait pre-empts it —
        // the pump work is already done, only the timer remains.
        self.state = CoordinatorState::Idle;
        self.pending_command = Some(cmd);
        Ok(())
    }

    /// Advance the coordinator by one tick. Ordering is fixed by §5/§4.5:
    /// guards (pumps) tick, then level state, then circulation policy,
    /// then drain permission, then command progress.
    pub fn process(
        &mut self,
        now: u32,
        act: &mut impl CoordinatorActuators,
        mut emit: impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        if self.emergency_stop_pending {
            self.emergency_stop_pending = false;
            self.do_emergency_stop(act, &mut emit);
            return Ok(());
        }
        if self.state == CoordinatorState::Stopped {
            return Ok(());
        }

        self.water.tick(now, act.water())?;
        for i in 0..MAX_NUTRIENTS {
            self.nutrients[i].tick(now, act.nutrient(i))?;
        }
        self.ph_up.tick(now, act.ph_up())?;
        self.ph_down.tick(now, act.ph_down())?;
        self.drain.tick(now, act.drain())?;
        self.return_pump.tick(now, act.return_pump())?;
        self.circulation.tick(now, act.circulation())?;
        self.air.tick(now, act.air())?;

        let main_state = self.compute_main_state(now);
        let return_state = self.compute_return_state();
        self.emit_level_transition_events(main_state, return_state, &mut emit);

        self.apply_circulation_policy(now, main_state, act, &mut emit)?;
        self.enforce_drain_permission(now, main_state, act, &mut emit)?;
        self.advance_command_state_machine(now, main_state, act, &mut emit)?;

        Ok(())
    }

    // -- Level computation --------------------------------------------

    fn compute_main_state(&mut self, now: u32) -> MainLevelState {
        if !self.main_level.has_mapping() {
            self.main_sticky_low = false;
            return MainLevelState::Ok;
        }
        if self.main_level.is_sensor_fault() || self.main_level.is_stale(now) {
            self.main_sticky_low = true;
            return MainLevelState::Critical;
        }

        let lp = &self.cfg.level_policy;
        let v = self.main_level.volume_ul();
        let state = if v <= lp.main_critical_ul {
            MainLevelState::Critical
        } else if self.main_sticky_low && v <= lp.main_resume_ul {
            MainLevelState::Low
        } else if v < lp.main_low_ul {
            MainLevelState::Low
        } else if v > lp.main_high_ul {
            MainLevelState::High
        } else {
            MainLevelState::Ok
        };
        self.main_sticky_low = matches!(state, MainLevelState::Low | MainLevelState::Critical);
        state
    }

    fn compute_return_state(&mut self) -> ReturnLevelState {
        if !self.return_level.has_mapping() {
            self.return_sticky_high = false;
            return ReturnLevelState::Ok;
        }

        let lp = &self.cfg.level_policy;
        let v = self.return_level.volume_ul();
        let state = if self.return_sticky_high && v < lp.return_resume_ul {
            ReturnLevelState::Ok
        } else if self.return_sticky_high || v >= lp.return_request_ul {
            ReturnLevelState::High
        } else {
            ReturnLevelState::Ok
        };
        self.return_sticky_high = state == ReturnLevelState::High;
        state
    }

    fn main_block_reason(&self, now: u32) -> BlockReason {
        if !self.main_level.has_mapping() {
            return BlockReason::None;
        }
        if self.main_level.is_sensor_fault() {
            BlockReason::SensorFault
        } else if self.main_level.is_stale(now) {
            BlockReason::StaleLevel
        } else {
            BlockReason::LowVolume
        }
    }

    fn emit_event(
        &self,
        emit: &mut impl FnMut(NutrientTankEvent),
        kind: NutrientTankEventKind,
    ) {
        emit(NutrientTankEvent {
            kind,
            main_volume_ul: self.main_level.volume_ul(),
            return_volume_ul: self.return_level.volume_ul(),
        });
    }

    fn emit_level_transition_events(
        &mut self,
        main_state: MainLevelState,
        return_state: ReturnLevelState,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) {
        if self.prev_main_state != Some(main_state) {
            let kind = match main_state {
                MainLevelState::Ok => NutrientTankEventKind::MainLevelOk,
                MainLevelState::Low => NutrientTankEventKind::MainLevelLow,
                MainLevelState::Critical => NutrientTankEventKind::MainLevelCritical,
                MainLevelState::High => NutrientTankEventKind::MainLevelHigh,
            };
            self.emit_event(emit, kind);

            let was_blocked = matches!(
                self.prev_main_state,
                Some(MainLevelState::Low) | Some(MainLevelState::Critical)
            );
            let now_blocked = matches!(main_state, MainLevelState::Low | MainLevelState::Critical);
            if now_blocked && !was_blocked {
                self.emit_event(emit, NutrientTankEventKind::RequestReturn);
                if self.return_level.volume_ul() <= self.cfg.level_policy.return_resume_ul {
                    self.emit_event(emit, NutrientTankEventKind::RequestRefill);
                }
            }
            self.prev_main_state = Some(main_state);
        }

        if self.prev_return_state != Some(return_state) {
            let kind = match return_state {
                ReturnLevelState::Ok => NutrientTankEventKind::ReturnLevelOk,
                ReturnLevelState::High => NutrientTankEventKind::ReturnLevelHigh,
            };
            self.emit_event(emit, kind);
            if return_state == ReturnLevelState::High
                && self.prev_return_state != Some(ReturnLevelState::High)
            {
                self.emit_event(emit, NutrientTankEventKind::RequestReturn);
            }
            self.prev_return_state = Some(return_state);
        }
    }

    // -- Policies -------------------------------------------------------

    fn apply_circulation_policy(
        &mut self,
        now: u32,
        main_state: MainLevelState,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        let allowed = circulation_or_drain_allowed(main_state);

        if self.circulation_requested && allowed && !self.circulation.is_running() {
            match self
                .circulation
                .start_for_ms(now, CIRCULATION_SLICE_MS, act.circulation())
            {
                Ok(()) | Err(Error::Busy) => {}
                Err(e) => return Err(e),
            }
        }

        if self.circulation.is_running() && (!self.circulation_requested || !allowed) {
            self.circulation.stop(act.circulation())?;
            if !allowed {
                let reason = self.main_block_reason(now);
                self.emit_event(emit, NutrientTankEventKind::OperationBlocked(reason));
            }
        }
        Ok(())
    }

    fn enforce_drain_permission(
        &mut self,
        now: u32,
        main_state: MainLevelState,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        if self.drain.is_running() && !circulation_or_drain_allowed(main_state) {
            self.drain.stop(act.drain())?;
            let reason = self.main_block_reason(now);
            self.emit_event(emit, NutrientTankEventKind::OperationBlocked(reason));
            if matches!(self.active, Some(a) if a.pump == ActivePump::Drain) {
                self.active = None;
                self.state = CoordinatorState::Idle;
            }
        }
        Ok(())
    }

    // -- Command state machine ------------------------------------------

    fn advance_command_state_machine(
        &mut self,
        now: u32,
        main_state: MainLevelState,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        match self.state {
            CoordinatorState::Idle => {
                if let Some(cmd) = self.pending_command.take() {
                    self.start_command(now, cmd, main_state, act, emit)?;
                } else if self.recipe.is_active() {
                    self.advance_recipe(now, main_state, act, emit)?;
                }
            }
            CoordinatorState::Executing => {
                let Some(active) = self.active else {
                    self.state = CoordinatorState::Idle;
                    return Ok(());
                };
                if !self.pump_is_running(active.pump) {
                    if active.from_recipe {
                        self.recipe.on_dose_result(true);
                    }
                    if active.requires_mix_after {
                        self.air.start_for_ms(
                            now,
                            self.cfg.timing.after_dose_aerate_ms.max(1),
                            act.air(),
                        )?;
                        self.active = Some(ActiveCommand {
                            pump: ActivePump::Air,
                            requires_mix_after: false,
                            pure_aeration: false,
                            from_recipe: false,
                        });
                        self.state = CoordinatorState::AerateAfterDose;
                    } else if active.pure_aeration && self.cfg.timing.after_aerate_settle_ms > 0 {
                        self.wait_until_ms =
                            now.wrapping_add(self.cfg.timing.after_aerate_settle_ms);
                        self.active = None;
                        self.state = CoordinatorState::WaitSettle;
                        self.emit_event(emit, NutrientTankEventKind::CommandCompleted);
                    } else {
                        self.active = None;
                        self.state = CoordinatorState::Idle;
                        self.emit_event(emit, NutrientTankEventKind::CommandCompleted);
                    }
                }
            }
            CoordinatorState::AerateAfterDose => {
                if !self.air.is_running() {
                    self.wait_until_ms = now.wrapping_add(self.cfg.timing.after_dose_settle_ms);
                    self.active = None;
                    self.state = CoordinatorState::WaitSettle;
                    self.emit_event(emit, NutrientTankEventKind::CommandCompleted);
                }
            }
            CoordinatorState::WaitSettle => {
                if time_util::reached(now, self.wait_until_ms) {
                    self.state = CoordinatorState::Idle;
                }
            }
            CoordinatorState::Stopped => {}
        }
        Ok(())
    }

    fn start_command(
        &mut self,
        now: u32,
        cmd: Command,
        main_state: MainLevelState,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        let (pump, requires_mix_after, pure_aeration, result) = match cmd {
            Command::AerateForMs(duration_ms) => {
                let r = self.air.start_for_ms(now, duration_ms, act.air());
                (ActivePump::Air, false, true, r)
            }
            Command::DoseVolume {
                kind,
                nutrient_index,
                volume_ul,
            } => {
                let pump = Self::active_pump_for_dose(kind, nutrient_index);
                if let Some(reason) = self.dose_permission_denial(kind, main_state) {
                    self.emit_event(emit, NutrientTankEventKind::OperationBlocked(reason));
                    return Ok(());
                }
                let requires_mix = !matches!(kind, DoseKind::Drain);
                let r = self
                    .start_pump_for_volume(pump, now, volume_ul, act)
                    .map(|_| ());
                (pump, requires_mix, false, r)
            }
            Command::CirculationSet(_) | Command::ControlStart | Command::ControlStop | Command::EmergencyStop => {
                unreachable!("handled directly in submit_command")
            }
        };

        match result {
            Ok(()) => {
                self.active = Some(ActiveCommand {
                    pump,
                    requires_mix_after,
                    pure_aeration,
                    from_recipe: false,
                });
                self.state = CoordinatorState::Executing;
            }
            Err(_) => {
                // Already-running or bad-calibration start; the actuator
                // itself raised nothing level-related, so no BlockReason
                // applies beyond "did not start".
                self.emit_event(emit, NutrientTankEventKind::OperationBlocked(BlockReason::None));
            }
        }
        Ok(())
    }

    /// Drives the Recipe Controller one step when it's active and the
    /// command slot is otherwise free (§4.4): ask for the next dose,
    /// dispatch it through the same permission/pump-start path manual
    /// commands use, and report the outcome back so `next_step` can
    /// continue the mix on the following tick.
    fn advance_recipe(
        &mut self,
        now: u32,
        main_state: MainLevelState,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) -> Result<()> {
        let ph = self
            .sensors
            .is_fresh_ph(now)
            .then(|| self.sensors.ph_x1000().value());
        let tds = self
            .sensors
            .is_fresh_tds(now)
            .then(|| self.sensors.tds_ppm().value());
        let main_volume_ul = self.main_level.volume_ul();

        let step = self
            .recipe
            .next_step(ph, tds, main_volume_ul, &self.cfg.recipe, &self.recipe_targets);

        match step {
            RecipeStep::Dose {
                kind,
                nutrient_index,
                volume_ul,
            } => {
                let pump = Self::active_pump_for_dose(kind, nutrient_index);
                if let Some(reason) = self.dose_permission_denial(kind, main_state) {
                    self.recipe.on_dose_result(false);
                    self.emit_event(emit, NutrientTankEventKind::OperationBlocked(reason));
                    return Ok(());
                }
                match self.start_pump_for_volume(pump, now, volume_ul, act) {
                    Ok(_) => {
                        self.active = Some(ActiveCommand {
                            pump,
                            requires_mix_after: !matches!(kind, DoseKind::Drain),
                            pure_aeration: false,
                            from_recipe: true,
                        });
                        self.state = CoordinatorState::Executing;
                    }
                    Err(_) => {
                        self.recipe.on_dose_result(false);
                        self.emit_event(emit, NutrientTankEventKind::OperationBlocked(BlockReason::None));
                    }
                }
            }
            RecipeStep::Error => {
                self.emit_event(emit, NutrientTankEventKind::OperationBlocked(BlockReason::None));
            }
            RecipeStep::Done | RecipeStep::None => {}
        }
        Ok(())
    }

    fn dose_permission_denial(&self, kind: DoseKind, main_state: MainLevelState) -> Option<BlockReason> {
        match kind {
            DoseKind::Drain => {
                if circulation_or_drain_allowed(main_state) {
                    None
                } else {
                    Some(BlockReason::LowVolume)
                }
            }
            DoseKind::Return => {
                if main_state == MainLevelState::High
                    || self.main_level.volume_ul() >= self.cfg.level_policy.main_block_return_ul
                {
                    Some(BlockReason::TankFull)
                } else {
                    None
                }
            }
            DoseKind::Water | DoseKind::Nutrient | DoseKind::PhUp | DoseKind::PhDown => {
                if additions_allowed(main_state) {
                    None
                } else {
                    Some(BlockReason::TankFull)
                }
            }
        }
    }

    fn active_pump_for_dose(kind: DoseKind, nutrient_index: Option<u8>) -> ActivePump {
        match kind {
            DoseKind::Water => ActivePump::Water,
            DoseKind::PhUp => ActivePump::PhUp,
            DoseKind::PhDown => ActivePump::PhDown,
            DoseKind::Drain => ActivePump::Drain,
            DoseKind::Return => ActivePump::Return,
            // Validated at submit time: index is always `Some` and in range.
            DoseKind::Nutrient => ActivePump::Nutrient(nutrient_index.unwrap_or(0)),
        }
    }

    fn pump_is_running(&self, pump: ActivePump) -> bool {
        match pump {
            ActivePump::Water => self.water.is_running(),
            ActivePump::Nutrient(i) => self.nutrients[i as usize].is_running(),
            ActivePump::PhUp => self.ph_up.is_running(),
            ActivePump::PhDown => self.ph_down.is_running(),
            ActivePump::Drain => self.drain.is_running(),
            ActivePump::Return => self.return_pump.is_running(),
            ActivePump::Air => self.air.is_running(),
        }
    }

    fn start_pump_for_volume(
        &mut self,
        pump: ActivePump,
        now: u32,
        volume_ul: u32,
        act: &mut impl CoordinatorActuators,
    ) -> Result<u32> {
        match pump {
            ActivePump::Water => self.water.start_for_volume_ul(now, volume_ul, act.water()),
            ActivePump::Nutrient(i) => {
                self.nutrients[i as usize].start_for_volume_ul(now, volume_ul, act.nutrient(i as usize))
            }
            ActivePump::PhUp => self.ph_up.start_for_volume_ul(now, volume_ul, act.ph_up()),
            ActivePump::PhDown => self.ph_down.start_for_volume_ul(now, volume_ul, act.ph_down()),
            ActivePump::Drain => self.drain.start_for_volume_ul(now, volume_ul, act.drain()),
            ActivePump::Return => {
                self.return_pump.start_for_volume_ul(now, volume_ul, act.return_pump())
            }
            ActivePump::Air => Err(Error::InvalidArg),
        }
    }

    fn do_emergency_stop(
        &mut self,
        act: &mut impl CoordinatorActuators,
        emit: &mut impl FnMut(NutrientTankEvent),
    ) {
        let _ = self.water.stop(act.water());
        for i in 0..MAX_NUTRIENTS {
            let _ = self.nutrients[i].stop(act.nutrient(i));
        }
        let _ = self.ph_up.stop(act.ph_up());
        let _ = self.ph_down.stop(act.ph_down());
        let _ = self.drain.stop(act.drain());
        let _ = self.return_pump.stop(act.return_pump());
        let _ = self.circulation.stop(act.circulation());
        let _ = self.air.stop(act.air());

        self.circulation_requested = false;
        self.pending_command = None;
        self.active = None;
        self.recipe.stop();
        self.state = CoordinatorState::Stopped;
        self.emit_event(emit, NutrientTankEventKind::EmergencyStopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LevelPolicyConfig, TimingConfig};

    #[derive(Default)]
    struct FakeActuator {
        on_calls: u32,
        off_calls: u32,
    }

    impl ActuatorPort for FakeActuator {
        fn turn_on(&mut self) -> Result<()> {
            self.on_calls += 1;
            Ok(())
        }
        fn turn_off(&mut self) -> Result<()> {
            self.off_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeActuators {
        water: FakeActuator,
        nutrients: [FakeActuator; MAX_NUTRIENTS],
        ph_up: FakeActuator,
        ph_down: FakeActuator,
        drain: FakeActuator,
        return_pump: FakeActuator,
        circulation: FakeActuator,
        air: FakeActuator,
    }

    impl CoordinatorActuators for FakeActuators {
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

    fn identity_mapping(distance_mm: u32) -> u32 {
        distance_mm
    }

    fn test_cfg() -> CoordinatorConfig {
        CoordinatorConfig {
            level_policy: LevelPolicyConfig {
                main_low_ul: 2_000_000,
                main_resume_ul: 3_000_000,
                main_critical_ul: 500_000,
                main_high_ul: 8_000_000,
                main_block_return_ul: 8_000_000,
                return_request_ul: 5_000_000,
                return_resume_ul: 3_000_000,
            },
            timing: TimingConfig {
                after_dose_aerate_ms: 10_000,
                after_dose_settle_ms: 5_000,
                after_aerate_settle_ms: 5_000,
            },
            ..CoordinatorConfig::default()
        }
    }

    fn new_coordinator(cfg: CoordinatorConfig) -> NutrientTankCoordinator {
        NutrientTankCoordinator::new(
            cfg,
            TankLevel::new(Some(identity_mapping), 0),
            TankLevel::new(Some(identity_mapping), 0),
            PumpUnit::new(1_000, 0),
            [PumpUnit::new(1_000, 0); MAX_NUTRIENTS],
            PumpUnit::new(1_000, 0),
            PumpUnit::new(1_000, 0),
            PumpUnit::new(1_000, 0),
            PumpUnit::new(1_000, 0),
            PumpUnit::new(1_000, 0),
            PumpUnit::new(1_000, 0),
        )
    }

    #[test]
    fn scenario_dose_water_with_aeration() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 5_000_000);

        co.submit_command(Command::DoseVolume {
            kind: DoseKind::Water,
            nutrient_index: None,
            volume_ul: 500_000,
        })
        .unwrap();

        let mut events = Vec::new();
        co.process(0, &mut act, |e| events.push(e)).unwrap(); // starts pump
        assert_eq!(co.state(), CoordinatorState::Executing);

        co.process(500_000, &mut act, |e| events.push(e)).unwrap(); // pump stops, air starts
        assert_eq!(co.state(), CoordinatorState::AerateAfterDose);

        co.process(510_000, &mut act, |e| events.push(e)).unwrap(); // air stops, wait armed
        assert_eq!(co.state(), CoordinatorState::WaitSettle);

        co.process(514_999, &mut act, |e| events.push(e)).unwrap();
        assert_eq!(co.state(), CoordinatorState::WaitSettle);

        co.process(515_000, &mut act, |e| events.push(e)).unwrap();
        assert_eq!(co.state(), CoordinatorState::Idle);
    }

    #[test]
    fn scenario_low_main_blocks_circulation_until_resumed() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 1_500_000); // below main_low

        co.submit_command(Command::CirculationSet(true)).unwrap();
        co.process(0, &mut act, |_| {}).unwrap();
        assert_eq!(act.circulation.on_calls, 0);

        co.update_main_distance(1, 3_200_000); // above resume
        co.process(1, &mut act, |_| {}).unwrap();
        assert_eq!(act.circulation.on_calls, 1);
    }

    #[test]
    fn scenario_return_blocked_by_main_high() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 8_100_000); // above main_high

        co.submit_command(Command::DoseVolume {
            kind: DoseKind::Return,
            nutrient_index: None,
            volume_ul: 500_000,
        })
        .unwrap();

        let mut events = Vec::new();
        co.process(0, &mut act, |e| events.push(e)).unwrap();
        assert_eq!(co.state(), CoordinatorState::Idle);
        assert_eq!(act.return_pump.on_calls, 0);
        assert!(events.iter().any(|e| matches!(
            e.kind,
            NutrientTankEventKind::OperationBlocked(BlockReason::TankFull)
        )));
    }

    #[test]
    fn scenario_emergency_stop_during_doseflow() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 5_000_000);

        co.submit_command(Command::DoseVolume {
            kind: DoseKind::Nutrient,
            nutrient_index: Some(1),
            volume_ul: 500_000,
        })
        .unwrap();
        co.process(0, &mut act, |_| {}).unwrap();
        assert!(co.has_active_command());

        co.submit_command(Command::EmergencyStop).unwrap();
        co.process(1, &mut act, |_| {}).unwrap();

        assert_eq!(co.state(), CoordinatorState::Stopped);
        assert!(!co.has_active_command());
        assert_eq!(act.nutrients[1].off_calls, 1);
        assert_eq!(
            co.submit_command(Command::AerateForMs(1000)),
            Err(Error::Busy)
        );
        co.reset().unwrap();
        assert_eq!(co.state(), CoordinatorState::Idle);
    }

    #[test]
    fn single_slot_rule_rejects_while_executing() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 5_000_000);

        co.submit_command(Command::AerateForMs(10_000)).unwrap();
        co.process(0, &mut act, |_| {}).unwrap();
        assert_eq!(co.state(), CoordinatorState::Executing);

        assert_eq!(
            co.submit_command(Command::AerateForMs(10_000)),
            Err(Error::Busy)
        );
    }

    #[test]
    fn control_start_arms_and_stop_disarms_the_recipe_controller() {
        let mut co = new_coordinator(test_cfg());
        assert!(!co.recipe_active());

        co.submit_command(Command::ControlStart).unwrap();
        assert!(co.recipe_active());

        co.submit_command(Command::ControlStop).unwrap();
        assert!(!co.recipe_active());
        assert!(!co.has_active_command());
    }

    #[test]
    fn recipe_dispatches_nutrient_dose_when_tds_below_target() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 5_000_000);

        let mut targets = co.recipe_targets();
        targets.enable_tds = true;
        targets.target_tds_ppm = 800;
        targets.tds_tolerance_ppm = 50;
        co.set_recipe_targets(targets);
        co.update_tds_ppm(0, 600);

        co.submit_command(Command::ControlStart).unwrap();
        co.process(0, &mut act, |_| {}).unwrap();

        assert_eq!(co.state(), CoordinatorState::Executing);
        assert_eq!(act.nutrients[0].on_calls, 1);
    }

    #[test]
    fn recipe_dose_denied_by_tank_full_reports_failure_and_retries() {
        let mut co = new_coordinator(test_cfg());
        let mut act = FakeActuators::default();
        co.update_main_distance(0, 8_100_000); // above main_high, blocks additions

        let mut targets = co.recipe_targets();
        targets.enable_tds = true;
        co.set_recipe_targets(targets);
        co.update_tds_ppm(0, 600);

        co.submit_command(Command::ControlStart).unwrap();
        let mut events = Vec::new();
        co.process(0, &mut act, |e| events.push(e)).unwrap();

        assert_eq!(co.state(), CoordinatorState::Idle);
        assert_eq!(act.nutrients[0].on_calls, 0);
        assert!(events.iter().any(|e| matches!(
            e.kind,
            NutrientTankEventKind::OperationBlocked(BlockReason::TankFull)
        )));

        // Controller is still active and retries on the next tick rather
        // than latching an error (§4.4 closed-loop retry).
        assert!(co.recipe_active());
    }
}
