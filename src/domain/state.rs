//! # Plant State
//!
//! The authoritative snapshot of the simulated water-treatment plant: voltage
//! stabilizer, IN/OUT pumps, filter, storage tank, environment and interlock
//! latches. This module carries data and invariant checks only; all behaviour
//! lives in `controller` and `simulation`, sequenced by the `Simulator`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

use super::command::LastCommand;

/// Stabilizer operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum StabilizerMode {
    Normal,
    Bypass,
    Fault,
}

/// Which of the two structurally identical pumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum PumpId {
    #[serde(rename = "pump_in")]
    #[strum(serialize = "pump_in")]
    In,
    #[serde(rename = "pump_out")]
    #[strum(serialize = "pump_out")]
    Out,
}

/// Pump control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ControlMode {
    Auto,
    Manual,
}

/// Pump run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RunState {
    Off,
    On,
    Fault,
}

/// Filter operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum FilterMode {
    Filter,
    Backwash,
    Idle,
}

/// Valve position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ValveState {
    Open,
    Closed,
}

impl ValveState {
    pub fn is_open(self) -> bool {
        self == ValveState::Open
    }
}

/// Tank level sensor health marker (never affects the true level)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SensorState {
    Ok,
    Fault,
    Tamper,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub ambient_temp_c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizerState {
    pub input_voltage: f64,
    pub output_voltage: f64,
    pub mode: StabilizerMode,
    /// Total plant load: both pumps plus auxiliary loads (kW)
    pub active_power_kw: f64,
    pub nominal_voltage: f64,
    /// Transformer/electronics temperature (°C)
    pub internal_temp_c: f64,
    /// Over-temperature trip, held until the unit cools below its reset point
    pub overtemp_trip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpState {
    pub control_mode: ControlMode,
    pub run_state: RunState,
    pub rpm_desired: f64,
    pub rpm_actual: f64,
    pub rpm_min: f64,
    pub rpm_nom: f64,
    pub rpm_max: f64,

    // Electrical
    pub voltage: f64,
    pub power_kw: f64,

    // Hydraulics
    pub flow_lpm: f64,
    pub pressure_bar: f64,

    // Thermal
    pub motor_temp_c: f64,
    /// Seconds spent above `overheat_limit_c`, drained while below
    pub overheat_seconds: f64,
    pub overheat_limit_c: f64,
    pub fault_temp_c: f64,
    /// Below this temperature a faulted pump may be cleared
    pub cooldown_temp_c: f64,
}

impl PumpState {
    pub fn is_on(&self) -> bool {
        self.run_state == RunState::On
    }

    pub fn is_faulted(&self) -> bool {
        self.run_state == RunState::Fault
    }

    /// Zero every dynamic output (rpm, flow, pressure, power)
    pub fn zero_outputs(&mut self) {
        self.rpm_actual = 0.0;
        self.flow_lpm = 0.0;
        self.pressure_bar = 0.0;
        self.power_kw = 0.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub mode: FilterMode,
    pub valve: ValveState,

    pub wear_pct: f64,
    pub min_wear_after_backwash_pct: f64,

    pub in_pressure_bar: f64,
    pub out_pressure_bar: f64,
    pub delta_pressure_bar: f64,

    pub ntu: f64,
    pub ph: f64,
    pub quality_alarm: bool,

    /// Treated water counts as potable at or below this turbidity (NTU)
    pub potable_max_ntu: f64,
    pub potable_ph_min: f64,
    pub potable_ph_max: f64,

    /// Time spent in the current BACKWASH cycle
    pub backwash_elapsed_s: f64,
}

impl FilterState {
    /// Treated water is within the drinking-water turbidity and pH limits
    pub fn potable(&self) -> bool {
        self.ntu <= self.potable_max_ntu
            && self.ph >= self.potable_ph_min
            && self.ph <= self.potable_ph_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankState {
    pub capacity_liters: f64,
    pub level_liters: f64,
    pub level_pct: f64,

    pub in_flow_lpm: f64,
    pub out_flow_lpm: f64,
    pub level_rate_lps: f64,
    pub overflow: bool,

    /// OUT pump dry-run protection level
    pub min_level_pct: f64,
    /// OUT pump runs at minimum rpm at or below this level
    pub low_level_pct: f64,
    /// Wear alone cannot start a backwash below this level
    pub backwash_start_level_pct: f64,
    /// A running backwash may stop once the level falls to this
    pub backwash_stop_level_pct: f64,
    /// IN pump stops and a backwash is forced at this level
    pub max_level_pct: f64,

    pub outlet_valve: ValveState,
    pub level_sensor: SensorState,
}

impl TankState {
    /// Recompute `level_pct` from liters
    pub fn refresh_level_pct(&mut self) {
        self.level_pct = if self.capacity_liters > 0.0 {
            (100.0 * self.level_liters / self.capacity_liters).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
}

/// Latest intrusion indicators reported by the security monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIndicators {
    /// Failed authentication attempts seen during the last reported tick
    pub failed_auth: u32,
    /// Network telemetry burst flag (0 or 1)
    pub burst: u32,
}

/// OUT pump blocked-by-filter latch with its two confirmation timers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterlockState {
    pub out_blocked_by_filter: bool,
    pub block_timer_s: f64,
    pub unblock_timer_s: f64,
}

/// Initial plant parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PlantConfig {
    pub ambient_temp_c: f64,

    #[validate(range(min = 1.0))]
    pub nominal_voltage: f64,
    #[validate(range(min = 0.0))]
    pub input_voltage: f64,

    #[validate(range(exclusive_min = 0.0))]
    pub tank_capacity_liters: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_initial_level_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_min_level_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_low_level_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_backwash_start_level_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_backwash_stop_level_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub tank_max_level_pct: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub filter_initial_wear_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub filter_min_wear_after_backwash_pct: f64,

    #[validate(range(min = 0.0))]
    pub potable_max_ntu: f64,
    #[validate(range(min = 0.0, max = 14.0))]
    pub potable_ph_min: f64,
    #[validate(range(min = 0.0, max = 14.0))]
    pub potable_ph_max: f64,

    #[validate(nested)]
    pub pump_in: PumpLimits,
    #[validate(nested)]
    pub pump_out: PumpLimits,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            ambient_temp_c: 20.0,
            nominal_voltage: 220.0,
            input_voltage: 220.0,
            tank_capacity_liters: 1000.0,
            tank_initial_level_pct: 50.0,
            tank_min_level_pct: 5.0,
            tank_low_level_pct: 20.0,
            tank_backwash_start_level_pct: 0.0,
            tank_backwash_stop_level_pct: 30.0,
            tank_max_level_pct: 100.0,
            filter_initial_wear_pct: 0.0,
            filter_min_wear_after_backwash_pct: 10.0,
            potable_max_ntu: 1.5,
            potable_ph_min: 6.5,
            potable_ph_max: 8.5,
            pump_in: PumpLimits::default(),
            pump_out: PumpLimits {
                rpm_max: 4400.0, // OUT pump has 10% headroom over IN
                ..PumpLimits::default()
            },
        }
    }
}

/// Speed bounds and thermal thresholds of one pump
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PumpLimits {
    #[validate(range(min = 0.0))]
    pub rpm_min: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub rpm_nom: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub rpm_max: f64,
    pub overheat_limit_c: f64,
    pub fault_temp_c: f64,
    pub cooldown_temp_c: f64,
}

impl Default for PumpLimits {
    fn default() -> Self {
        Self {
            rpm_min: 1000.0,
            rpm_nom: 2500.0,
            rpm_max: 4000.0,
            overheat_limit_c: 95.0,
            fault_temp_c: 110.0,
            cooldown_temp_c: 60.0,
        }
    }
}

/// One observed invariant breach
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    LevelOutOfRange { level_pct: f64 },
    LevelPctStale { level_pct: f64, expected: f64 },
    WearOutOfRange { wear_pct: f64 },
    RpmOutOfRange { pump: PumpId, rpm_actual: f64 },
    MotorBelowAmbient { pump: PumpId, motor_temp_c: f64 },
    OffPumpHasOutput { pump: PumpId },
    NegativeFilterDelta { delta_pressure_bar: f64 },
    StabilizerOutputMismatch { mode: StabilizerMode, output_voltage: f64 },
    NonFinite { field: &'static str },
}

/// The complete plant aggregate; the `Simulator` is its only writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantState {
    /// Whole seconds of simulated time, for display and logging
    pub time_s: u64,
    pub env: EnvironmentState,
    pub stabilizer: StabilizerState,
    pub pump_in: PumpState,
    pub pump_out: PumpState,
    pub filter: FilterState,
    pub tank: TankState,
    pub interlocks: InterlockState,
    pub security: SecurityIndicators,
    pub last_command: Option<LastCommand>,
}

impl Default for PlantState {
    fn default() -> Self {
        Self::from_config(&PlantConfig::default())
    }
}

impl PlantState {
    /// Build the start-of-simulation state from configuration
    pub fn from_config(cfg: &PlantConfig) -> Self {
        let pump = |limits: &PumpLimits| PumpState {
            control_mode: ControlMode::Auto,
            run_state: RunState::Off,
            rpm_desired: 0.0,
            rpm_actual: 0.0,
            rpm_min: limits.rpm_min,
            rpm_nom: limits.rpm_nom,
            rpm_max: limits.rpm_max,
            voltage: cfg.nominal_voltage,
            power_kw: 0.0,
            flow_lpm: 0.0,
            pressure_bar: 0.0,
            motor_temp_c: cfg.ambient_temp_c,
            overheat_seconds: 0.0,
            overheat_limit_c: limits.overheat_limit_c,
            fault_temp_c: limits.fault_temp_c,
            cooldown_temp_c: limits.cooldown_temp_c,
        };

        let capacity = cfg.tank_capacity_liters.max(0.0);
        let mut tank = TankState {
            capacity_liters: capacity,
            level_liters: capacity * cfg.tank_initial_level_pct.clamp(0.0, 100.0) / 100.0,
            level_pct: 0.0,
            in_flow_lpm: 0.0,
            out_flow_lpm: 0.0,
            level_rate_lps: 0.0,
            overflow: false,
            min_level_pct: cfg.tank_min_level_pct,
            low_level_pct: cfg.tank_low_level_pct,
            backwash_start_level_pct: cfg.tank_backwash_start_level_pct,
            backwash_stop_level_pct: cfg.tank_backwash_stop_level_pct,
            max_level_pct: cfg.tank_max_level_pct,
            outlet_valve: ValveState::Open,
            level_sensor: SensorState::Ok,
        };
        tank.refresh_level_pct();

        Self {
            time_s: 0,
            env: EnvironmentState {
                ambient_temp_c: cfg.ambient_temp_c,
            },
            stabilizer: StabilizerState {
                input_voltage: cfg.input_voltage,
                output_voltage: cfg.nominal_voltage,
                mode: StabilizerMode::Normal,
                active_power_kw: 0.0,
                nominal_voltage: cfg.nominal_voltage,
                internal_temp_c: cfg.ambient_temp_c,
                overtemp_trip: false,
            },
            pump_in: pump(&cfg.pump_in),
            pump_out: pump(&cfg.pump_out),
            filter: FilterState {
                mode: FilterMode::Filter,
                valve: ValveState::Open,
                wear_pct: cfg.filter_initial_wear_pct.clamp(0.0, 100.0),
                min_wear_after_backwash_pct: cfg.filter_min_wear_after_backwash_pct,
                in_pressure_bar: 0.0,
                out_pressure_bar: 0.0,
                delta_pressure_bar: 0.0,
                ntu: 0.5,
                ph: 7.0,
                quality_alarm: false,
                potable_max_ntu: cfg.potable_max_ntu,
                potable_ph_min: cfg.potable_ph_min,
                potable_ph_max: cfg.potable_ph_max,
                backwash_elapsed_s: 0.0,
            },
            tank,
            interlocks: InterlockState::default(),
            security: SecurityIndicators::default(),
            last_command: None,
        }
    }

    pub fn pump(&self, id: PumpId) -> &PumpState {
        match id {
            PumpId::In => &self.pump_in,
            PumpId::Out => &self.pump_out,
        }
    }

    pub fn pump_mut(&mut self, id: PumpId) -> &mut PumpState {
        match id {
            PumpId::In => &mut self.pump_in,
            PumpId::Out => &mut self.pump_out,
        }
    }

    /// Check the physical invariants; an empty result means the state is consistent
    pub fn violations(&self) -> Vec<Violation> {
        let mut out = Vec::new();

        let tank = &self.tank;
        if !(0.0..=100.0).contains(&tank.level_pct) {
            out.push(Violation::LevelOutOfRange {
                level_pct: tank.level_pct,
            });
        }
        if tank.capacity_liters > 0.0 {
            let expected = 100.0 * tank.level_liters / tank.capacity_liters;
            if (expected - tank.level_pct).abs() > 1e-6 {
                out.push(Violation::LevelPctStale {
                    level_pct: tank.level_pct,
                    expected,
                });
            }
        }

        if !(0.0..=100.0).contains(&self.filter.wear_pct) {
            out.push(Violation::WearOutOfRange {
                wear_pct: self.filter.wear_pct,
            });
        }
        if self.filter.delta_pressure_bar < 0.0 {
            out.push(Violation::NegativeFilterDelta {
                delta_pressure_bar: self.filter.delta_pressure_bar,
            });
        }

        for id in [PumpId::In, PumpId::Out] {
            let p = self.pump(id);
            if p.rpm_actual < 0.0 || p.rpm_actual > p.rpm_max {
                out.push(Violation::RpmOutOfRange {
                    pump: id,
                    rpm_actual: p.rpm_actual,
                });
            }
            if p.motor_temp_c < self.env.ambient_temp_c - 1e-9 {
                out.push(Violation::MotorBelowAmbient {
                    pump: id,
                    motor_temp_c: p.motor_temp_c,
                });
            }
            if p.run_state == RunState::Off
                && (p.rpm_actual != 0.0
                    || p.flow_lpm != 0.0
                    || p.pressure_bar != 0.0
                    || p.power_kw != 0.0)
            {
                out.push(Violation::OffPumpHasOutput { pump: id });
            }
        }

        let stab = &self.stabilizer;
        let output_ok = match stab.mode {
            StabilizerMode::Fault => stab.output_voltage == 0.0,
            StabilizerMode::Bypass => stab.output_voltage == stab.input_voltage,
            StabilizerMode::Normal => true,
        };
        if !output_ok {
            out.push(Violation::StabilizerOutputMismatch {
                mode: stab.mode,
                output_voltage: stab.output_voltage,
            });
        }

        let finite = [
            ("tank.level_liters", tank.level_liters),
            ("filter.wear_pct", self.filter.wear_pct),
            ("filter.ntu", self.filter.ntu),
            ("stabilizer.output_voltage", stab.output_voltage),
            ("stabilizer.active_power_kw", stab.active_power_kw),
            ("pump_in.motor_temp_c", self.pump_in.motor_temp_c),
            ("pump_out.motor_temp_c", self.pump_out.motor_temp_c),
            ("pump_in.rpm_desired", self.pump_in.rpm_desired),
            ("pump_out.rpm_desired", self.pump_out.rpm_desired),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                out.push(Violation::NonFinite { field });
            }
        }

        out
    }
}
