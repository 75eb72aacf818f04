//! # Plant Controller
//!
//! AUTO-mode decision logic. Once per tick the controller:
//!
//! 1. redraws the consumer demand factor when its period elapses
//! 2. runs the filter FILTER ⇄ BACKWASH state machine
//! 3. computes the IN pump target from tank level and slews `rpm_desired`
//! 4. updates the OUT-block latch, computes the OUT target and slews
//!
//! The controller only proposes setpoints; faults are the physics engine's
//! business. Pumps in FAULT are never touched. MANUAL pumps keep their
//! operator setpoints, except that the OUT-block latch and dry-run protection
//! still force the OUT pump to zero.
//!
//! Every timer and ramp is driven by `dt`, so behaviour does not depend on
//! the tick rate.

pub mod demand;
pub mod interlock;

pub use demand::{DemandConfig, DemandModel};
pub use interlock::{update_out_block, LatchEvent, OutBlockConfig};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::domain::{ControlMode, FilterMode, PlantState, PumpId, PumpState, RunState};

/// Controller thresholds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControllerConfig {
    // IN pump level bands
    /// At or below this level the IN pump runs at max rpm (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub in_max_rpm_at_or_below_pct: f64,
    /// Below this level the IN pump runs at nominal rpm (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub in_nominal_below_pct: f64,
    /// From this level the IN pump runs at min rpm (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub in_min_rpm_from_pct: f64,
    /// Width of each stepdown band between nominal and min (%)
    #[validate(range(exclusive_min = 0.0))]
    pub in_stepdown_band_pct: f64,

    // Ramps
    #[validate(range(min = 0.0))]
    pub in_slew_rpm_per_s: f64,
    #[validate(range(min = 0.0))]
    pub out_slew_rpm_per_s: f64,

    // Backwash FSM
    /// Wear below which no level-dependent start is allowed (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub backwash_min_start_wear_pct: f64,
    /// Start threshold: clamp(base + per_level · L, min_start, max)
    pub backwash_start_wear_base_pct: f64,
    pub backwash_start_wear_per_level: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub backwash_start_wear_max_pct: f64,
    /// Stop target: clamp(base - per_level · L, min, max)
    pub backwash_stop_wear_base_pct: f64,
    pub backwash_stop_wear_per_level: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub backwash_stop_wear_min_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub backwash_stop_wear_max_pct: f64,
    #[validate(range(min = 0.0))]
    pub backwash_min_duration_s: f64,
    /// IN pump rpm while backwashing (0 = stopped)
    #[validate(range(min = 0.0))]
    pub backwash_feed_rpm: f64,

    #[validate(nested)]
    pub out_block: OutBlockConfig,
    #[validate(nested)]
    pub demand: DemandConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            in_max_rpm_at_or_below_pct: 30.0,
            in_nominal_below_pct: 80.0,
            in_min_rpm_from_pct: 95.0,
            in_stepdown_band_pct: 5.0, // 80-85-90-95: 2500/1750/1000
            in_slew_rpm_per_s: 800.0,
            out_slew_rpm_per_s: 900.0,
            backwash_min_start_wear_pct: 20.0,
            backwash_start_wear_base_pct: 20.0,
            backwash_start_wear_per_level: 0.65,
            backwash_start_wear_max_pct: 85.0,
            backwash_stop_wear_base_pct: 35.0,
            backwash_stop_wear_per_level: 0.25,
            backwash_stop_wear_min_pct: 10.0,
            backwash_stop_wear_max_pct: 35.0,
            backwash_min_duration_s: 10.0,
            backwash_feed_rpm: 0.0,
            out_block: OutBlockConfig::default(),
            demand: DemandConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Wear at which a backwash starts for tank level `level_pct`; a fuller tank tolerates more wear
    pub fn start_threshold_wear(&self, level_pct: f64) -> f64 {
        let thr = self.backwash_start_wear_base_pct + self.backwash_start_wear_per_level * level_pct;
        clamp_ordered(
            thr,
            self.backwash_min_start_wear_pct,
            self.backwash_start_wear_max_pct,
        )
    }

    /// Wear a running backwash aims for at tank level `level_pct`
    pub fn stop_target_wear(&self, level_pct: f64) -> f64 {
        let target = self.backwash_stop_wear_base_pct - self.backwash_stop_wear_per_level * level_pct;
        clamp_ordered(
            target,
            self.backwash_stop_wear_min_pct,
            self.backwash_stop_wear_max_pct,
        )
    }

    /// IN pump target rpm as a monotone step function of tank level
    pub fn in_rpm_target_by_level(&self, level_pct: f64, pump: &PumpState, full_pct: f64) -> f64 {
        if level_pct >= full_pct {
            return 0.0;
        }
        if level_pct <= self.in_max_rpm_at_or_below_pct {
            return pump.rpm_max;
        }
        if level_pct < self.in_nominal_below_pct {
            return pump.rpm_nom;
        }
        if level_pct >= self.in_min_rpm_from_pct {
            return pump.rpm_min;
        }

        let span = self.in_min_rpm_from_pct - self.in_nominal_below_pct;
        let steps = (span / self.in_stepdown_band_pct).floor().max(1.0) as usize;
        let idx = ((level_pct - self.in_nominal_below_pct) / self.in_stepdown_band_pct).floor();
        let idx = (idx.max(0.0) as usize).min(steps - 1);
        let frac = if steps > 1 {
            idx as f64 / (steps - 1) as f64
        } else {
            1.0
        };
        (pump.rpm_nom - (pump.rpm_nom - pump.rpm_min) * frac).trunc()
    }
}

fn clamp_ordered(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi.max(lo))
}

/// Move `current` toward `target` by at most `slew_per_s · dt`
pub fn slew_to(current: f64, target: f64, slew_per_s: f64, dt: f64) -> f64 {
    let max_step = slew_per_s.abs() * dt.max(0.0);
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

/// Clamp a raw target into the pump's operating window; anything ≤ 0 means stop
fn normalize_target(target: f64, pump: &PumpState) -> f64 {
    let target = target.clamp(0.0, pump.rpm_max);
    if target <= 0.0 {
        0.0
    } else {
        target.clamp(pump.rpm_min.min(pump.rpm_max), pump.rpm_max)
    }
}

/// Target rpm chosen for each pump on the last tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpTargets {
    pub pump_in: Option<f64>,
    pub pump_out: Option<f64>,
}

/// AUTO controller; owns the demand model and its random source
pub struct PlantController {
    config: ControllerConfig,
    demand: DemandModel,
    last_targets: PumpTargets,
}

impl PlantController {
    pub fn new(config: ControllerConfig, seed: Option<u64>) -> Self {
        let demand = DemandModel::new(config.demand.clone(), seed);
        Self {
            config,
            demand,
            last_targets: PumpTargets::default(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn demand_factor(&self) -> f64 {
        self.demand.factor()
    }

    /// Targets computed on the last tick; `None` where the pump was not under AUTO control
    pub fn last_targets(&self) -> PumpTargets {
        self.last_targets
    }

    /// Update setpoints and modes for one tick. No-op for non-positive `dt`.
    pub fn compute(&mut self, state: &mut PlantState, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }

        let level = state.tank.level_pct;
        let wear = state.filter.wear_pct;

        self.demand.update(dt);
        self.control_filter_mode(state, level, wear, dt);
        self.last_targets.pump_in = self.control_in_pump(state, level, dt);
        self.last_targets.pump_out = self.control_out_pump(state, level, wear, dt);
    }

    fn control_filter_mode(&self, state: &mut PlantState, level: f64, wear: f64, dt: f64) {
        let cfg = &self.config;
        let filter = &mut state.filter;

        match filter.mode {
            FilterMode::Backwash => {
                filter.backwash_elapsed_s += dt;
                let target = cfg.stop_target_wear(level);
                let can_stop = filter.backwash_elapsed_s >= cfg.backwash_min_duration_s;
                let low_level = level <= state.tank.backwash_stop_level_pct;

                if can_stop && (wear <= target || low_level) {
                    info!(
                        wear_pct = wear,
                        level_pct = level,
                        elapsed_s = filter.backwash_elapsed_s,
                        "backwash finished"
                    );
                    filter.mode = FilterMode::Filter;
                    filter.backwash_elapsed_s = 0.0;
                }
            }
            FilterMode::Filter => {
                filter.backwash_elapsed_s = 0.0;
                let forced = level >= state.tank.max_level_pct;
                let worn = wear >= cfg.start_threshold_wear(level)
                    && level >= state.tank.backwash_start_level_pct;

                if forced || worn {
                    info!(wear_pct = wear, level_pct = level, forced, "backwash started");
                    filter.mode = FilterMode::Backwash;
                }
            }
            FilterMode::Idle => {
                filter.backwash_elapsed_s = 0.0;
            }
        }
    }

    fn control_in_pump(&self, state: &mut PlantState, level: f64, dt: f64) -> Option<f64> {
        let full_pct = state.tank.max_level_pct;
        let backwashing = state.filter.mode == FilterMode::Backwash;
        let pump = &mut state.pump_in;
        if pump.control_mode != ControlMode::Auto || pump.is_faulted() {
            return None;
        }

        let raw = if backwashing {
            self.config.backwash_feed_rpm
        } else {
            self.config.in_rpm_target_by_level(level, pump, full_pct)
        };
        let target = normalize_target(raw, pump);
        apply_auto_target(PumpId::In, pump, target, self.config.in_slew_rpm_per_s, dt);
        Some(target)
    }

    fn control_out_pump(
        &self,
        state: &mut PlantState,
        level: f64,
        wear: f64,
        dt: f64,
    ) -> Option<f64> {
        update_out_block(&mut state.interlocks, &self.config.out_block, level, wear, dt);

        let blocked = state.interlocks.out_blocked_by_filter;
        let dry = level <= state.tank.min_level_pct;
        let low = level <= state.tank.low_level_pct;
        let pump = &mut state.pump_out;

        if pump.is_faulted() {
            return None;
        }

        if pump.control_mode == ControlMode::Manual {
            if (blocked || dry) && pump.rpm_desired > 0.0 {
                warn!(
                    blocked_by_filter = blocked,
                    level_pct = level,
                    "manual OUT pump setpoint overridden by interlock"
                );
                pump.rpm_desired = 0.0;
            }
            return None;
        }

        let raw = if blocked || dry {
            0.0
        } else if low {
            pump.rpm_min
        } else {
            self.demand
                .out_rpm_target(pump.rpm_nom)
                .clamp(pump.rpm_min.min(pump.rpm_max), pump.rpm_max)
        };
        let target = normalize_target(raw, pump);
        apply_auto_target(PumpId::Out, pump, target, self.config.out_slew_rpm_per_s, dt);
        Some(target)
    }
}

fn apply_auto_target(id: PumpId, pump: &mut PumpState, target: f64, slew: f64, dt: f64) {
    pump.rpm_desired = slew_to(pump.rpm_desired, target, slew, dt);

    let next = if pump.rpm_desired >= pump.rpm_min && pump.rpm_desired > 0.0 {
        RunState::On
    } else {
        RunState::Off
    };
    if next != pump.run_state {
        info!(
            pump = %id,
            from = %pump.run_state,
            to = %next,
            rpm_desired = pump.rpm_desired,
            target,
            "pump run state change"
        );
        pump.run_state = next;
    }
}
