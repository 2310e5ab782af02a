//! Recipe Controller (§3, §4.4): a closed-loop planner that emits one dose
//! step at a time to correct pH and TDS in the main tank.

use crate::config::{RecipeConfig, RecipeTargets, MAX_NUTRIENTS};

/// What a dose step fills. `Drain`/`Return` are never emitted by the
/// Recipe Controller itself (they're coordinator-level direct commands)
/// but share the enum with it, matching the source firmware's single
/// `NutrientTank_DoseKind_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseKind {
    Water,
    Nutrient,
    PhUp,
    PhDown,
    Drain,
    Return,
}

/// Outcome of one `next_step` call (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeStep {
    Dose {
        kind: DoseKind,
        nutrient_index: Option<u8>,
        volume_ul: u32,
    },
    /// All enabled axes are within tolerance.
    Done,
    /// A safety gate was violated; the mix (if any) was cleared.
    Error,
    /// Sensors not fresh, controller not active, or a step is still
    /// in-flight awaiting `on_dose_result`.
    None,
}

#[derive(Debug, Clone, Copy)]
struct NutrientMix {
    remaining_ul: [u32; MAX_NUTRIENTS],
    cursor: u8,
}

impl NutrientMix {
    fn total_remaining(&self) -> u32 {
        self.remaining_ul.iter().sum()
    }

    /// Round-robin: find the next enabled nutrient (starting at `cursor`)
    /// with nonzero remainder.
    fn peek_next(&self) -> Option<u8> {
        for step in 0..MAX_NUTRIENTS as u8 {
            let idx = (self.cursor + step) % MAX_NUTRIENTS as u8;
            if self.remaining_ul[idx as usize] > 0 {
                return Some(idx);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlightStep {
    kind: DoseKind,
    nutrient_index: Option<u8>,
    volume_ul: u32,
}

/// Recipe Controller runtime state (§3).
#[derive(Debug, Clone, Copy)]
pub struct RecipeController {
    active: bool,
    total_dosed_ul: u32,
    mix: Option<NutrientMix>,
    in_flight: Option<InFlightStep>,
    last_error: bool,
}

impl RecipeController {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: false,
            total_dosed_ul: 0,
            mix: None,
            in_flight: None,
            last_error: false,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
        self.total_dosed_ul = 0;
        self.mix = None;
        self.in_flight = None;
        self.last_error = false;
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.mix = None;
        self.in_flight = None;
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn total_dosed_ul(&self) -> u32 {
        self.total_dosed_ul
    }

    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.last_error
    }

    /// Produce at most one step. `ph_x1000`/`tds_ppm` are `None` when the
    /// corresponding Tank Sensors reading is not fresh.
    pub fn next_step(
        &mut self,
        ph_x1000: Option<i32>,
        tds_ppm: Option<i32>,
        main_volume_ul: u32,
        cfg: &RecipeConfig,
        targets: &RecipeTargets,
    ) -> RecipeStep {
        if !self.active || self.in_flight.is_some() {
            return RecipeStep::None;
        }

        // 1. Cancel an active mix if TDS has risen above the upper bound.
        if self.mix.is_some() {
            if let (true, Some(tds)) = (targets.enable_tds, tds_ppm) {
                if tds > targets.target_tds_ppm + targets.tds_tolerance_ppm {
                    self.mix = None;
                }
            }
        }

        // 2. Continue an existing mix remainder.
        if let Some(mix) = self.mix {
            if let Some(idx) = mix.peek_next() {
                let raw = mix.remaining_ul[idx as usize];
                return self.emit_nutrient_chunk(idx, raw, cfg);
            }
            // Remainder exhausted: fall through to re-evaluate TDS.
            self.mix = None;
        }

        // 3. TDS below target: plan a new mix.
        if targets.enable_tds {
            if let Some(tds) = tds_ppm {
                let lower = targets.target_tds_ppm - targets.tds_tolerance_ppm;
                if tds < lower {
                    let err = (targets.target_tds_ppm - tds).max(0) as u32;
                    let portion = portion_scale(err, targets.tds_tolerance_ppm as u32, cfg);
                    let total = base_total_ul(main_volume_ul, cfg, portion);
                    let mix = plan_mix(total, cfg);
                    self.mix = Some(mix);
                    if let Some(idx) = mix.peek_next() {
                        let raw = mix.remaining_ul[idx as usize];
                        return self.emit_nutrient_chunk(idx, raw, cfg);
                    }
                    return RecipeStep::Error;
                }
            }
        }

        // 4. TDS above target: dilution water dose.
        if targets.enable_tds {
            if let Some(tds) = tds_ppm {
                let upper = targets.target_tds_ppm + targets.tds_tolerance_ppm;
                if tds > upper {
                    let err = (tds - targets.target_tds_ppm).max(0) as u32;
                    let portion = portion_scale(err, targets.tds_tolerance_ppm as u32, cfg);
                    let total = base_total_ul(main_volume_ul, cfg, portion);
                    return self.emit_step(DoseKind::Water, None, total, cfg);
                }
            }
        }

        // 5. pH outside tolerance: one step in the deficient direction.
        if targets.enable_ph {
            if let Some(ph) = ph_x1000 {
                let lower = targets.target_ph_x1000 - targets.ph_tolerance_x1000;
                let upper = targets.target_ph_x1000 + targets.ph_tolerance_x1000;
                if ph < lower {
                    return self.emit_step(DoseKind::PhUp, None, cfg.ph_step_ul, cfg);
                }
                if ph > upper {
                    return self.emit_step(DoseKind::PhDown, None, cfg.ph_step_ul, cfg);
                }
            }
        }

        // 6. Nothing left to correct.
        RecipeStep::Done
    }

    /// The Coordinator calls this once the dispatched pump guard has
    /// finished (or refused) the in-flight step. Only on success is the
    /// total-dose counter incremented and the mix remainder decremented.
    pub fn on_dose_result(&mut self, success: bool) {
        let Some(step) = self.in_flight.take() else {
            return;
        };

        if !success {
            self.mix = None;
            self.last_error = true;
            return;
        }

        self.total_dosed_ul = self.total_dosed_ul.saturating_add(step.volume_ul);

        if let (Some(idx), Some(mix)) = (step.nutrient_index, &mut self.mix) {
            let remaining = &mut mix.remaining_ul[idx as usize];
            *remaining = remaining.saturating_sub(step.volume_ul);
            mix.cursor = (idx + 1) % MAX_NUTRIENTS as u8;
            if mix.total_remaining() == 0 {
                self.mix = None;
            }
        }
    }

    fn emit_nutrient_chunk(&mut self, idx: u8, raw_ul: u32, cfg: &RecipeConfig) -> RecipeStep {
        self.emit_step(DoseKind::Nutrient, Some(idx), raw_ul, cfg)
    }

    fn emit_step(
        &mut self,
        kind: DoseKind,
        nutrient_index: Option<u8>,
        raw_volume_ul: u32,
        cfg: &RecipeConfig,
    ) -> RecipeStep {
        let volume_ul = raw_volume_ul.min(cfg.max_single_dose_ul);

        if volume_ul == 0 || self.total_dosed_ul.saturating_add(volume_ul) > cfg.max_total_dose_ul
        {
            self.mix = None;
            self.last_error = true;
            return RecipeStep::Error;
        }

        self.last_error = false;
        self.in_flight = Some(InFlightStep {
            kind,
            nutrient_index,
            volume_ul,
        });
        RecipeStep::Dose {
            kind,
            nutrient_index,
            volume_ul,
        }
    }
}

impl Default for RecipeController {
    fn default() -> Self {
        Self::new()
    }
}

/// Error-proportional portion between `portion_min` and `portion_max`;
/// full portion is reached at `err >= err_full_ppm` (§4.4).
fn portion_scale(err_ppm: u32, tolerance_ppm: u32, cfg: &RecipeConfig) -> u32 {
    let margin = err_ppm.saturating_sub(tolerance_ppm);
    if cfg.err_full_ppm == 0 {
        return cfg.portion_max;
    }
    let scaled = cfg.portion_min
        + u32::try_from(
            u64::from(margin) * u64::from(cfg.portion_max - cfg.portion_min)
                / u64::from(cfg.err_full_ppm),
        )
        .unwrap_or(cfg.portion_max);
    scaled.min(cfg.portion_max)
}

/// Base correction volume before portion scaling: per-liter step
/// (preferred) > parts-per-liter derived > absolute step (§4.4, §9).
fn base_total_ul(main_volume_ul: u32, cfg: &RecipeConfig, portion: u32) -> u32 {
    let per_liter_ul = if cfg.step_per_liter_ul > 0 {
        cfg.step_per_liter_ul
    } else if cfg.part_volume_ul > 0 {
        let enabled_parts: u32 = (0..cfg.nutrient_count as usize)
            .filter(|&i| cfg.nutrient_enable_mask & (1 << i) != 0)
            .map(|i| cfg.parts_per_l[i])
            .sum();
        cfg.part_volume_ul.saturating_mul(enabled_parts)
    } else {
        return cfg.absolute_step_ul.min(cfg.max_single_dose_ul.max(1));
    };

    let scaled = u128::from(per_liter_ul) * u128::from(main_volume_ul) * u128::from(portion);
    let total = scaled.div_ceil(u128::from(1_000_000u32) * 1000);
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Split `total` across enabled nutrients by weight (§4.4 "Weighting and
/// split algorithm"): `floor(T·w_i/S)` each, remainder distributed one
/// microliter at a time in index order. Weight source: explicit `weights`
/// > `parts_per_l` > equal, in that order of precedence.
fn plan_mix(total_ul: u32, cfg: &RecipeConfig) -> NutrientMix {
    let mut weights = [0u32; MAX_NUTRIENTS];
    let mut any_explicit = false;
    let mut any_parts = false;
    for i in 0..cfg.nutrient_count as usize {
        if cfg.nutrient_enable_mask & (1 << i) == 0 {
            continue;
        }
        if cfg.weights[i] > 0 {
            any_explicit = true;
        }
        if cfg.parts_per_l[i] > 0 {
            any_parts = true;
        }
    }

    for i in 0..cfg.nutrient_count as usize {
        if cfg.nutrient_enable_mask & (1 << i) == 0 {
            continue;
        }
        weights[i] = if any_explicit {
            cfg.weights[i]
        } else if any_parts {
            cfg.parts_per_l[i]
        } else {
            1
        };
    }

    let sum: u32 = weights.iter().sum();
    let mut remaining = [0u32; MAX_NUTRIENTS];

    if sum > 0 {
        let mut allocated = 0u32;
        for i in 0..MAX_NUTRIENTS {
            if weights[i] == 0 {
                continue;
            }
            let share = u32::try_from(u64::from(total_ul) * u64::from(weights[i]) / u64::from(sum))
                .unwrap_or(0);
            remaining[i] = share;
            allocated += share;
        }

        let mut leftover = total_ul.saturating_sub(allocated);
        let mut i = 0;
        while leftover > 0 && i < MAX_NUTRIENTS * 4 {
            let idx = i % MAX_NUTRIENTS;
            if weights[idx] > 0 {
                remaining[idx] += 1;
                leftover -= 1;
            }
            i += 1;
        }
    }

    NutrientMix {
        remaining_ul: remaining,
        cursor: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RecipeConfig {
        RecipeConfig {
            nutrient_count: 4,
            nutrient_enable_mask: 0b1111,
            weights: [0; MAX_NUTRIENTS],
            parts_per_l: [1, 1, 1, 1],
            step_per_liter_ul: 1000,
            part_volume_ul: 0,
            absolute_step_ul: 0,
            portion_min: 200,
            portion_max: 1000,
            err_full_ppm: 300,
            ph_step_ul: 500,
            max_total_dose_ul: 200_000,
            max_single_dose_ul: 1_000,
        }
    }

    fn targets() -> RecipeTargets {
        RecipeTargets {
            enable_ph: false,
            enable_tds: true,
            target_ph_x1000: 6_000,
            ph_tolerance_x1000: 200,
            target_tds_ppm: 800,
            tds_tolerance_ppm: 50,
        }
    }

    #[test]
    fn inactive_controller_returns_none() {
        let mut r = RecipeController::new();
        let step = r.next_step(None, Some(600), 10_000_000, &cfg(), &targets());
        assert_eq!(step, RecipeStep::None);
    }

    #[test]
    fn scenario_tds_below_target_emits_clamped_chunk() {
        let mut r = RecipeController::new();
        r.start();
        let step = r.next_step(None, Some(600), 10_000_000, &cfg(), &targets());
        match step {
            RecipeStep::Dose {
                kind: DoseKind::Nutrient,
                nutrient_index: Some(0),
                volume_ul,
            } => assert_eq!(volume_ul, 1_000), // clamped to max_single_dose_ul
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn mix_round_robins_across_nutrients() {
        let mut r = RecipeController::new();
        r.start();
        let c = cfg();
        let t = targets();
        let first = r.next_step(None, Some(600), 10_000_000, &c, &t);
        let RecipeStep::Dose { nutrient_index, .. } = first else {
            panic!("expected dose")
        };
        assert_eq!(nutrient_index, Some(0));
        r.on_dose_result(true);

        let second = r.next_step(None, Some(600), 10_000_000, &c, &t);
        let RecipeStep::Dose { nutrient_index, .. } = second else {
            panic!("expected dose")
        };
        assert_eq!(nutrient_index, Some(1));
    }

    #[test]
    fn failed_result_clears_mix_and_latches_error() {
        let mut r = RecipeController::new();
        r.start();
        r.next_step(None, Some(600), 10_000_000, &cfg(), &targets());
        r.on_dose_result(false);
        assert!(r.has_error());
        assert_eq!(
            r.next_step(None, Some(600), 10_000_000, &cfg(), &targets()),
            RecipeStep::None // no in_flight now, mix cleared... recomputed next call
        );
    }

    #[test]
    fn total_dosed_monotonic_and_never_increases_on_failure() {
        let mut r = RecipeController::new();
        r.start();
        r.next_step(None, Some(600), 10_000_000, &cfg(), &targets());
        r.on_dose_result(true);
        let after_success = r.total_dosed_ul();
        assert_eq!(after_success, 1_000);

        r.next_step(None, Some(600), 10_000_000, &cfg(), &targets());
        r.on_dose_result(false);
        assert_eq!(r.total_dosed_ul(), after_success);
    }

    #[test]
    fn done_when_within_tolerance() {
        let mut r = RecipeController::new();
        r.start();
        let step = r.next_step(None, Some(800), 10_000_000, &cfg(), &targets());
        assert_eq!(step, RecipeStep::Done);
    }

    #[test]
    fn ph_step_emitted_when_outside_tolerance() {
        let mut r = RecipeController::new();
        r.start();
        let mut t = targets();
        t.enable_tds = false;
        t.enable_ph = true;
        let step = r.next_step(Some(5_000), None, 10_000_000, &cfg(), &t);
        assert_eq!(
            step,
            RecipeStep::Dose {
                kind: DoseKind::PhUp,
                nutrient_index: None,
                volume_ul: 500,
            }
        );
    }

    #[test]
    fn split_is_deterministic_and_sums_to_total() {
        let c = cfg();
        let mix = plan_mix(103, &c);
        let sum: u32 = mix.remaining_ul.iter().sum();
        assert_eq!(sum, 103);
    }

    #[test]
    fn explicit_weights_take_precedence_over_parts_per_l() {
        let mut c = cfg();
        c.weights = [3, 1, 0, 0];
        c.nutrient_enable_mask = 0b0011;
        let mix = plan_mix(400, &c);
        assert_eq!(mix.remaining_ul[0], 300);
        assert_eq!(mix.remaining_ul[1], 100);
    }
}
