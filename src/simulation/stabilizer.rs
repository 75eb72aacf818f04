//! # Voltage Stabilizer
//!
//! Band regulation of the supply voltage and accounting of the plant load.
//!
//! - input below `fault_below_v` (or an over-temperature trip) → FAULT, output 0
//! - input above `bypass_above_v` → BYPASS, output follows input
//! - otherwise → NORMAL, output held at nominal (optionally drooped by load)
//!
//! The internal temperature follows a lumped first-order model:
//!
//! T_eq = T_ambient + k · P_load,  dT = (T_eq - T) · dt / τ

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{FilterMode, PlantState, StabilizerMode, StabilizerState};

/// Stabilizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Input voltage below which the stabilizer faults (V)
    pub fault_below_v: f64,
    /// Input voltage above which the stabilizer passes input through (V)
    pub bypass_above_v: f64,
    /// Output droop per kW of plant load in NORMAL mode (V/kW)
    pub droop_v_per_kw: f64,
    /// Filter system auxiliary load while filtering or backwashing (kW)
    pub aux_filter_kw: f64,
    /// Control electronics load, always on (kW)
    pub aux_control_kw: f64,
    /// Thermal time constant (s)
    pub thermal_tau_s: f64,
    /// Equilibrium temperature rise per kW of load (°C/kW)
    pub temp_rise_per_kw_c: f64,
    /// Over-temperature trip point (°C)
    pub trip_temp_c: f64,
    /// The trip resets once temperature is this far below the trip point (°C)
    pub trip_hysteresis_c: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            fault_below_v: 190.0,
            bypass_above_v: 240.0,
            droop_v_per_kw: 0.0,
            aux_filter_kw: 0.25,
            aux_control_kw: 0.08, // PLC, sensors, gateway
            thermal_tau_s: 240.0,
            temp_rise_per_kw_c: 12.0,
            trip_temp_c: 115.0,
            trip_hysteresis_c: 10.0,
        }
    }
}

/// Select the operating band and output voltage for this tick
pub fn regulate(stab: &mut StabilizerState, cfg: &StabilizerConfig) {
    let previous = stab.mode;
    let vin = stab.input_voltage;

    if stab.overtemp_trip || vin < cfg.fault_below_v {
        stab.mode = StabilizerMode::Fault;
        stab.output_voltage = 0.0;
    } else if vin > cfg.bypass_above_v {
        stab.mode = StabilizerMode::Bypass;
        stab.output_voltage = vin;
    } else {
        stab.mode = StabilizerMode::Normal;
        let droop = cfg.droop_v_per_kw.max(0.0) * stab.active_power_kw.max(0.0);
        stab.output_voltage = (stab.nominal_voltage - droop).max(0.0);
    }

    if stab.mode != previous {
        info!(
            from = %previous,
            to = %stab.mode,
            input_voltage = vin,
            output_voltage = stab.output_voltage,
            "stabilizer mode change"
        );
    }
}

/// Total electrical load of the plant (kW)
pub fn total_load_kw(state: &PlantState, cfg: &StabilizerConfig) -> f64 {
    let mut total = state.pump_in.power_kw.max(0.0) + state.pump_out.power_kw.max(0.0);
    if matches!(state.filter.mode, FilterMode::Filter | FilterMode::Backwash) {
        total += cfg.aux_filter_kw;
    }
    total + cfg.aux_control_kw
}

/// Book the tick's load and advance the stabilizer thermal model
pub fn account_load(state: &mut PlantState, cfg: &StabilizerConfig, dt: f64) {
    let load_kw = total_load_kw(state, cfg);
    let ambient = state.env.ambient_temp_c;
    let stab = &mut state.stabilizer;
    stab.active_power_kw = load_kw;

    let t_eq = ambient + cfg.temp_rise_per_kw_c * load_kw;
    let alpha = if cfg.thermal_tau_s > 0.0 {
        (dt / cfg.thermal_tau_s).clamp(0.0, 1.0)
    } else {
        1.0
    };
    stab.internal_temp_c += (t_eq - stab.internal_temp_c) * alpha;

    if !stab.overtemp_trip && stab.internal_temp_c >= cfg.trip_temp_c {
        stab.overtemp_trip = true;
        stab.mode = StabilizerMode::Fault;
        stab.output_voltage = 0.0;
        warn!(
            internal_temp_c = stab.internal_temp_c,
            trip_temp_c = cfg.trip_temp_c,
            "stabilizer over-temperature trip"
        );
    } else if stab.overtemp_trip
        && stab.internal_temp_c <= cfg.trip_temp_c - cfg.trip_hysteresis_c
    {
        stab.overtemp_trip = false;
        info!(
            internal_temp_c = stab.internal_temp_c,
            "stabilizer over-temperature trip reset"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(150.0, StabilizerMode::Fault, 0.0)]
    #[case(189.9, StabilizerMode::Fault, 0.0)]
    #[case(190.0, StabilizerMode::Normal, 220.0)]
    #[case(231.0, StabilizerMode::Normal, 220.0)]
    #[case(240.0, StabilizerMode::Normal, 220.0)]
    #[case(251.0, StabilizerMode::Bypass, 251.0)]
    fn test_voltage_bands(
        #[case] vin: f64,
        #[case] mode: StabilizerMode,
        #[case] vout: f64,
    ) {
        let mut state = PlantState::default();
        state.stabilizer.input_voltage = vin;
        regulate(&mut state.stabilizer, &StabilizerConfig::default());
        assert_eq!(state.stabilizer.mode, mode);
        assert_eq!(state.stabilizer.output_voltage, vout);
    }

    #[test]
    fn test_droop_lowers_output_under_load() {
        let cfg = StabilizerConfig {
            droop_v_per_kw: 2.0,
            ..Default::default()
        };
        let mut state = PlantState::default();
        state.stabilizer.active_power_kw = 3.0;
        regulate(&mut state.stabilizer, &cfg);
        assert_eq!(state.stabilizer.output_voltage, 214.0);
    }

    #[test]
    fn test_load_includes_auxiliaries() {
        let cfg = StabilizerConfig::default();
        let mut state = PlantState::default();
        state.pump_in.power_kw = 1.5;
        state.pump_out.power_kw = 1.0;
        assert!((total_load_kw(&state, &cfg) - (2.5 + 0.25 + 0.08)).abs() < 1e-9);

        state.filter.mode = FilterMode::Idle;
        assert!((total_load_kw(&state, &cfg) - (2.5 + 0.08)).abs() < 1e-9);
    }

    #[test]
    fn test_overtemp_trip_and_reset_with_hysteresis() {
        let cfg = StabilizerConfig {
            trip_temp_c: 40.0,
            trip_hysteresis_c: 5.0,
            ..Default::default()
        };
        let mut state = PlantState::default();
        state.pump_in.power_kw = 3.0;

        for _ in 0..2000 {
            account_load(&mut state, &cfg, 1.0);
            if state.stabilizer.overtemp_trip {
                break;
            }
        }
        assert!(state.stabilizer.overtemp_trip);
        assert_eq!(state.stabilizer.mode, StabilizerMode::Fault);
        assert_eq!(state.stabilizer.output_voltage, 0.0);

        // Still held while above the reset point
        state.pump_in.power_kw = 0.0;
        regulate(&mut state.stabilizer, &cfg);
        assert_eq!(state.stabilizer.mode, StabilizerMode::Fault);

        for _ in 0..5000 {
            account_load(&mut state, &cfg, 1.0);
        }
        assert!(!state.stabilizer.overtemp_trip);
        regulate(&mut state.stabilizer, &cfg);
        assert_eq!(state.stabilizer.mode, StabilizerMode::Normal);
    }
}
