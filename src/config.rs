use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::attack::AttackConfig;
use crate::controller::ControllerConfig;
use crate::domain::{PlantConfig, PumpLimits};
use crate::error::{Result, SimError};
use crate::simulation::{GridVoltageConfig, ProcessConfig};

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "WATERPLANT__";
pub const DEFAULT_CONFIG_FILE: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub plant: PlantConfig,
    pub controller: ControllerConfig,
    pub process: ProcessConfig,
    pub grid: GridVoltageConfig,
    pub attack: AttackConfig,
}

/// How the tick loop derives `dt`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtMode {
    /// Every tick advances by `dt_s`
    #[default]
    Fixed,
    /// Every tick advances by the wall-clock time since the previous tick times `time_scale`
    WallClock,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    #[validate(range(min = 1))]
    pub tick_interval_ms: u64,
    #[validate(range(exclusive_min = 0.0))]
    pub dt_s: f64,
    pub dt_mode: DtMode,
    #[validate(range(exclusive_min = 0.0))]
    pub time_scale: f64,
    /// Seed for every random source (None = entropy)
    pub random_seed: Option<u64>,
    #[validate(range(min = 1))]
    pub command_queue_capacity: usize,
    #[validate(range(min = 1))]
    pub telemetry_channel_capacity: usize,
    #[validate(range(min = 1))]
    pub history_len: usize,
    /// Drop commands with `auth_ok = false` instead of applying them
    pub reject_unauthenticated: bool,
    /// Stop after this many ticks (None = run until cancelled)
    pub max_ticks: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            dt_s: 1.0,
            dt_mode: DtMode::Fixed,
            time_scale: 1.0,
            random_seed: None,
            command_queue_capacity: 64,
            telemetry_channel_capacity: 256,
            history_len: 2000,
            reject_unauthenticated: false,
            max_ticks: None,
        }
    }
}

impl Config {
    /// Layered sources: defaults, then `config/default.toml`, then `WATERPLANT__*` env vars
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self> {
        let cfg: Config = Self::figment().extract().map_err(SimError::from)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that cannot describe a physical plant
    pub fn validate(&self) -> Result<()> {
        Validate::validate(&self.simulation)?;
        Validate::validate(&self.plant)?;
        Validate::validate(&self.controller)?;

        for (name, limits) in [("pump_in", &self.plant.pump_in), ("pump_out", &self.plant.pump_out)] {
            check_pump_limits(name, limits)?;
        }

        let p = &self.plant;
        ensure_finite("plant.ambient_temp_c", p.ambient_temp_c)?;
        for (name, value) in [
            ("plant.potable_max_ntu", p.potable_max_ntu),
            ("plant.potable_ph_min", p.potable_ph_min),
            ("plant.potable_ph_max", p.potable_ph_max),
        ] {
            ensure_finite(name, value)?;
        }
        if p.potable_ph_min > p.potable_ph_max {
            return Err(invalid("plant.potable_ph_min must not exceed potable_ph_max"));
        }
        if p.tank_min_level_pct > p.tank_low_level_pct {
            return Err(invalid("plant.tank_min_level_pct must not exceed tank_low_level_pct"));
        }
        if p.tank_low_level_pct > p.tank_max_level_pct {
            return Err(invalid("plant.tank_low_level_pct must not exceed tank_max_level_pct"));
        }

        let c = &self.controller;
        if !(c.in_max_rpm_at_or_below_pct <= c.in_nominal_below_pct
            && c.in_nominal_below_pct <= c.in_min_rpm_from_pct)
        {
            return Err(invalid("controller IN level bands must be ascending"));
        }
        if c.out_block.unblock_wear_pct >= c.out_block.block_wear_pct {
            return Err(invalid(
                "controller.out_block.unblock_wear_pct must be below block_wear_pct",
            ));
        }
        let d = &c.demand;
        for (name, value) in [
            ("controller.demand.factor_min", d.factor_min),
            ("controller.demand.factor_max", d.factor_max),
            ("controller.demand.initial_factor", d.initial_factor),
            ("controller.demand.change_period_s", d.change_period_s),
            ("controller.demand.in_capacity_lpm_at_nom", d.in_capacity_lpm_at_nom),
            ("controller.demand.out_flow_lpm_at_nom", d.out_flow_lpm_at_nom),
        ] {
            ensure_finite(name, value)?;
        }
        if d.factor_min > d.factor_max {
            return Err(invalid("controller.demand factor range is empty"));
        }

        let t = &self.process.pump_thermal;
        for (name, tau) in [
            ("process.pump_thermal.rpm_tau_s", t.rpm_tau_s),
            ("process.pump_thermal.heat_tau_s", t.heat_tau_s),
            ("process.pump_thermal.cool_tau_s", t.cool_tau_s),
            ("process.pump_thermal.fault_cool_tau_s", t.fault_cool_tau_s),
            ("process.stabilizer.thermal_tau_s", self.process.stabilizer.thermal_tau_s),
            ("grid.tau_s", self.grid.tau_s),
        ] {
            ensure_finite(name, tau)?;
            if tau < 0.0 {
                return Err(invalid(&format!("{name} must not be negative")));
            }
        }
        if self.process.stabilizer.fault_below_v > self.process.stabilizer.bypass_above_v {
            return Err(invalid("process.stabilizer.fault_below_v exceeds bypass_above_v"));
        }
        Ok(())
    }
}

fn check_pump_limits(name: &str, l: &PumpLimits) -> Result<()> {
    if !(l.rpm_min <= l.rpm_nom && l.rpm_nom <= l.rpm_max) {
        return Err(invalid(&format!(
            "plant.{name}: rpm_min <= rpm_nom <= rpm_max violated"
        )));
    }
    if !(l.cooldown_temp_c < l.fault_temp_c) {
        return Err(invalid(&format!(
            "plant.{name}: cooldown_temp_c must be below fault_temp_c"
        )));
    }
    Ok(())
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(&format!("{name} must be finite")))
    }
}

fn invalid(msg: &str) -> SimError {
    SimError::InvalidConfig(msg.to_string())
}
