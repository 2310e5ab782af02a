//! Configuration parameters for both cores.
//!
//! Values are grouped by subsystem, each with a `Default` impl giving the
//! documented default constants, plus a `validate` pass that rejects
//! out-of-range values before a configuration is accepted or persisted.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Level-policy thresholds driving the coordinator's hysteresis and
/// permission predicates (§4.5). All values are microliters; `0` means
/// "unused" for the fields documented as optional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelPolicyConfig {
    pub main_low_ul: u32,
    pub main_resume_ul: u32,
    pub main_critical_ul: u32,
    pub main_high_ul: u32,
    pub main_block_return_ul: u32,
    pub return_request_ul: u32,
    pub return_resume_ul: u32,
}

impl Default for LevelPolicyConfig {
    fn default() -> Self {
        Self {
            main_low_ul: 2_000_000,
            main_resume_ul: 3_000_000,
            main_critical_ul: 500_000,
            main_high_ul: 8_000_000,
            main_block_return_ul: 8_000_000,
            return_request_ul: 5_000_000,
            return_resume_ul: 3_000_000,
        }
    }
}

/// Post-dose phase durations (§4.5). `0` skips the phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingConfig {
    pub after_dose_aerate_ms: u32,
    pub after_dose_settle_ms: u32,
    pub after_aerate_settle_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            after_dose_aerate_ms: 10_000,
            after_dose_settle_ms: 5_000,
            after_aerate_settle_ms: 5_000,
        }
    }
}

/// Maximum nutrient lines the Recipe Controller can drive.
pub const MAX_NUTRIENTS: usize = 4;

/// Persistent Recipe Controller configuration (§3, §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecipeConfig {
    pub nutrient_count: u8,
    pub nutrient_enable_mask: u8,
    /// Explicit per-nutrient weight; `0` falls back to `parts_per_l`.
    pub weights: [u32; MAX_NUTRIENTS],
    pub parts_per_l: [u32; MAX_NUTRIENTS],
    /// Per-liter correction step, microliters per liter. Preferred over
    /// `part_volume_ul`/`absolute_step_ul` whenever nonzero (§4.4, §9).
    pub step_per_liter_ul: u32,
    /// Volume per configured "part" (see `parts_per_l`) per liter. Used
    /// only when `step_per_liter_ul == 0`.
    pub part_volume_ul: u32,
    pub absolute_step_ul: u32,
    pub portion_min: u32,
    pub portion_max: u32,
    pub err_full_ppm: u32,
    pub ph_step_ul: u32,
    pub max_total_dose_ul: u32,
    pub max_single_dose_ul: u32,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
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
}

/// Dynamic Recipe Controller targets (§3, §4.4). Changed at runtime, not
/// persisted alongside `RecipeConfig`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecipeTargets {
    pub enable_ph: bool,
    pub enable_tds: bool,
    pub target_ph_x1000: i32,
    pub ph_tolerance_x1000: i32,
    pub target_tds_ppm: i32,
    pub tds_tolerance_ppm: i32,
}

impl Default for RecipeTargets {
    fn default() -> Self {
        Self {
            enable_ph: false,
            enable_tds: false,
            target_ph_x1000: 6_000,
            ph_tolerance_x1000: 200,
            target_tds_ppm: 800,
            tds_tolerance_ppm: 50,
        }
    }
}

/// Top-level Nutrient Tank Coordinator configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub level_policy: LevelPolicyConfig,
    pub timing: TimingConfig,
    pub recipe: RecipeConfig,
    /// Shared staleness bound for Tank Sensors readings, milliseconds.
    pub sensor_stale_timeout_ms: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            level_policy: LevelPolicyConfig::default(),
            timing: TimingConfig::default(),
            recipe: RecipeConfig::default(),
            sensor_stale_timeout_ms: 60_000,
        }
    }
}

/// Validate a coordinator configuration. Rejects nonsensical hysteresis
/// ordering and out-of-range recipe values before it is accepted or
/// persisted — the same validate-before-persist discipline the source
/// firmware's configuration port uses.
pub fn validate_coordinator_config(cfg: &CoordinatorConfig) -> Result<()> {
    let lp = &cfg.level_policy;
    if lp.main_critical_ul > lp.main_low_ul {
        return Err(ConfigError::ValidationFailed("main_critical_ul must be <= main_low_ul").into());
    }
    if lp.main_low_ul > lp.main_resume_ul {
        return Err(ConfigError::ValidationFailed("main_low_ul must be <= main_resume_ul").into());
    }
    if lp.main_resume_ul > lp.main_high_ul {
        return Err(ConfigError::ValidationFailed("main_resume_ul must be <= main_high_ul").into());
    }
    if lp.return_resume_ul > lp.return_request_ul {
        return Err(ConfigError::ValidationFailed(
            "return_resume_ul must be <= return_request_ul",
        )
        .into());
    }

    let r = &cfg.recipe;
    if r.nutrient_count as usize > MAX_NUTRIENTS {
        return Err(ConfigError::ValidationFailed("nutrient_count exceeds MAX_NUTRIENTS").into());
    }
    if r.max_single_dose_ul == 0 || r.max_total_dose_ul == 0 {
        return Err(ConfigError::ValidationFailed("dose caps must be nonzero").into());
    }
    if r.max_single_dose_ul > r.max_total_dose_ul {
        return Err(ConfigError::ValidationFailed(
            "max_single_dose_ul must be <= max_total_dose_ul",
        )
        .into());
    }
    if r.portion_min > r.portion_max {
        return Err(ConfigError::ValidationFailed("portion_min must be <= portion_max").into());
    }

    Ok(())
}

/// Hydroponic Scheduler configuration (§6 "Configuration options").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub light_on_hour: u8,
    pub light_off_hour: u8,
    pub heartbeat_period_min: u32,
    pub power_loss_detect_min: u32,
    pub max_deficit_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            light_on_hour: 7,
            light_off_hour: 23,
            heartbeat_period_min: 5,
            power_loss_detect_min: 5,
            max_deficit_minutes: 10_080, // 7 days
        }
    }
}

/// Validate a scheduler configuration.
pub fn validate_scheduler_config(cfg: &SchedulerConfig) -> Result<()> {
    if cfg.light_on_hour > 23 || cfg.light_off_hour > 23 {
        return Err(ConfigError::ValidationFailed("hour fields must be 0..=23").into());
    }
    if cfg.heartbeat_period_min == 0 {
        return Err(ConfigError::ValidationFailed("heartbeat_period_min must be nonzero").into());
    }
    Ok(())
}
