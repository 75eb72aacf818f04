//! # Plant Process
//!
//! Advances the true (non-commanded) plant quantities for one tick. The
//! device models run in a fixed order so every consumer sees this tick's
//! producer values:
//!
//! grid → stabilizer band → IN pump → OUT pump → filter → tank → load/thermal

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::filter::{step_filter, FilterConfig};
use super::grid::{GridVoltageConfig, GridVoltageModel};
use super::pump::{
    step_pump, FaultResetPolicy, PumpEnvironment, PumpHydraulics, PumpThermalConfig,
};
use super::stabilizer::{account_load, regulate, StabilizerConfig};
use super::tank::{step_tank, TankConfig, TankFlows};
use crate::domain::{FilterMode, PlantState, PumpId, StabilizerMode};

/// Physics constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub stabilizer: StabilizerConfig,
    pub pump_in: PumpHydraulics,
    #[serde(default = "PumpHydraulics::outlet")]
    pub pump_out: PumpHydraulics,
    pub pump_thermal: PumpThermalConfig,
    pub fault_reset: FaultResetPolicy,
    pub filter: FilterConfig,
    pub tank: TankConfig,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            stabilizer: StabilizerConfig::default(),
            pump_in: PumpHydraulics::inlet(),
            pump_out: PumpHydraulics::outlet(),
            pump_thermal: PumpThermalConfig::default(),
            fault_reset: FaultResetPolicy::Latched,
            filter: FilterConfig::default(),
            tank: TankConfig::default(),
        }
    }
}

/// Physics engine; owns the only random source of the physical side
pub struct PlantProcess {
    config: ProcessConfig,
    grid: GridVoltageModel,
}

impl PlantProcess {
    pub fn new(config: ProcessConfig, grid: GridVoltageConfig) -> Self {
        Self {
            config,
            grid: GridVoltageModel::new(grid),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Advance `state` by `dt` seconds. Non-positive or non-finite `dt` is a no-op.
    pub fn step(&mut self, state: &mut PlantState, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }
        let cfg = &self.config;

        if self.grid.is_enabled() {
            state.stabilizer.input_voltage = self.grid.step(state.stabilizer.input_voltage, dt);
        }
        regulate(&mut state.stabilizer, &cfg.stabilizer);

        let supply_voltage = state.stabilizer.output_voltage;
        let supply_fault = state.stabilizer.mode == StabilizerMode::Fault;
        let ambient_c = state.env.ambient_temp_c;
        let nominal_voltage = state.stabilizer.nominal_voltage;

        let in_env = PumpEnvironment {
            supply_voltage,
            nominal_voltage,
            supply_fault,
            ambient_c,
            wear_pct: state.filter.wear_pct,
            path_open: state.filter.valve.is_open(),
        };
        step_pump(
            PumpId::In,
            &mut state.pump_in,
            &in_env,
            &cfg.pump_in,
            &cfg.pump_thermal,
            cfg.fault_reset,
            dt,
        );

        let out_env = PumpEnvironment {
            wear_pct: 0.0,
            path_open: state.tank.outlet_valve.is_open() && state.tank.level_liters > 0.0,
            ..in_env
        };
        step_pump(
            PumpId::Out,
            &mut state.pump_out,
            &out_env,
            &cfg.pump_out,
            &cfg.pump_thermal,
            cfg.fault_reset,
            dt,
        );

        let filter_inflow = if state.pump_in.is_on() {
            state.pump_in.flow_lpm
        } else {
            0.0
        };
        step_filter(
            &mut state.filter,
            filter_inflow,
            state.pump_in.pressure_bar,
            &cfg.filter,
            dt,
        );

        let inflow_lpm = if state.filter.mode == FilterMode::Filter {
            filter_inflow
        } else {
            0.0
        };
        let mut outflow_lpm = if state.pump_out.is_on() {
            state.pump_out.flow_lpm
        } else {
            0.0
        };
        if state.filter.mode == FilterMode::Backwash {
            outflow_lpm += cfg.tank.backwash_draw_lpm.max(0.0);
        }
        step_tank(
            &mut state.tank,
            TankFlows {
                inflow_lpm,
                outflow_lpm,
            },
            dt,
        );

        account_load(state, &cfg.stabilizer, dt);

        debug!(
            level_pct = state.tank.level_pct,
            wear_pct = state.filter.wear_pct,
            load_kw = state.stabilizer.active_power_kw,
            "process step"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunState, ValveState};

    fn process() -> PlantProcess {
        PlantProcess::new(ProcessConfig::default(), GridVoltageConfig::default())
    }

    fn run_in_pump(state: &mut PlantState) {
        state.pump_in.run_state = RunState::On;
        state.pump_in.rpm_desired = 2500.0;
    }

    #[test]
    fn test_pump_out_defaults_to_outlet_hydraulics() {
        let cfg = ProcessConfig::default();
        assert_eq!(cfg.pump_out.flow_nom_lpm, 110.0);
        assert_eq!(cfg.pump_out.wear_coefficient, 0.0);

        let parsed: ProcessConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.pump_out.flow_nom_lpm, 110.0);
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let mut p = process();
        let mut state = PlantState::default();
        run_in_pump(&mut state);
        let before = state.clone();
        p.step(&mut state, 0.0);
        p.step(&mut state, -3.0);
        p.step(&mut state, f64::NAN);
        assert_eq!(state, before);
    }

    #[test]
    fn test_filtering_fills_tank() {
        let mut p = process();
        let mut state = PlantState::default();
        run_in_pump(&mut state);
        for _ in 0..60 {
            p.step(&mut state, 1.0);
        }
        assert!(state.tank.level_pct > 50.0);
        assert!(state.filter.wear_pct > 0.0);
        assert!(state.stabilizer.active_power_kw > 1.0);
        assert!(state.violations().is_empty(), "{:?}", state.violations());
    }

    #[test]
    fn test_backwash_stops_inflow_and_draws_tank() {
        let mut p = process();
        let mut state = PlantState::default();
        run_in_pump(&mut state);
        state.filter.mode = FilterMode::Backwash;
        for _ in 0..60 {
            p.step(&mut state, 1.0);
        }
        assert_eq!(state.tank.in_flow_lpm, 0.0);
        assert!((state.tank.level_liters - 450.0).abs() < 1e-6);
    }

    #[test]
    fn test_closed_filter_valve_blocks_inflow() {
        let mut p = process();
        let mut state = PlantState::default();
        run_in_pump(&mut state);
        state.filter.valve = ValveState::Closed;
        for _ in 0..30 {
            p.step(&mut state, 1.0);
        }
        assert_eq!(state.tank.level_liters, 500.0);
        assert_eq!(state.filter.wear_pct, 0.0);
        assert!(state.pump_in.pressure_bar > 0.0);
    }

    #[test]
    fn test_closed_outlet_valve_blocks_outflow() {
        let mut p = process();
        let mut state = PlantState::default();
        state.pump_out.run_state = RunState::On;
        state.pump_out.rpm_desired = 2500.0;
        state.tank.outlet_valve = ValveState::Closed;
        for _ in 0..30 {
            p.step(&mut state, 1.0);
        }
        assert_eq!(state.tank.level_liters, 500.0);
    }

    #[test]
    fn test_undervoltage_stops_pumps_without_changing_run_state() {
        let mut p = process();
        let mut state = PlantState::default();
        run_in_pump(&mut state);
        for _ in 0..10 {
            p.step(&mut state, 1.0);
        }
        state.stabilizer.input_voltage = 150.0;
        p.step(&mut state, 1.0);

        assert_eq!(state.stabilizer.mode, StabilizerMode::Fault);
        assert_eq!(state.stabilizer.output_voltage, 0.0);
        assert_eq!(state.pump_in.flow_lpm, 0.0);
        assert_eq!(state.pump_in.power_kw, 0.0);
        assert_eq!(state.pump_in.run_state, RunState::On);
    }

    #[test]
    fn test_grid_model_drives_input_when_enabled() {
        let mut p = PlantProcess::new(
            ProcessConfig::default(),
            GridVoltageConfig {
                enabled: true,
                random_seed: Some(7),
                ..GridVoltageConfig::weak_grid()
            },
        );
        let mut state = PlantState::default();
        let mut changed = false;
        for _ in 0..20 {
            p.step(&mut state, 1.0);
            changed |= state.stabilizer.input_voltage != 220.0;
        }
        assert!(changed);
    }
}
