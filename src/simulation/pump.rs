//! # Pump Model
//!
//! One update function serves both pumps; the per-pump hydraulic constants are
//! passed in explicitly.
//!
//! ## Physics Model
//!
//! Speed follows the command with first-order inertia:
//!
//! rpm_target = rpm_desired · clamp(V_out / V_nom, 0, 1.25)
//! rpm += (rpm_target - rpm) · min(dt / τ_rpm, 1)
//!
//! Affinity laws with a fouling resistance factor w_f = 1 + k·(wear/100)²:
//!
//! - pressure = p_nom · (rpm/rpm_nom)² · w_f
//! - flow     = q_nom · (rpm/rpm_nom) / √w_f
//! - power    = P_nom · (rpm/rpm_nom)³ · √w_f
//!
//! Motor temperature relaxes toward T_eq = T_amb + ΔT_nom · (rpm/rpm_nom)²;
//! reaching the fault threshold trips the pump to FAULT on the same tick.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{PumpId, PumpState, RunState};

/// Hydraulic and electrical constants of one pump
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpHydraulics {
    /// Flow at nominal rpm with a clean filter (L/min)
    pub flow_nom_lpm: f64,
    /// Discharge pressure at nominal rpm with a clean filter (bar)
    pub pressure_nom_bar: f64,
    /// Shaft power at nominal rpm (kW)
    pub power_nom_kw: f64,
    /// Fouling resistance coefficient k; 0 = insensitive to filter wear
    pub wear_coefficient: f64,
}

impl Default for PumpHydraulics {
    fn default() -> Self {
        Self::inlet()
    }
}

impl PumpHydraulics {
    /// IN pump: pushes raw water through the filter
    pub fn inlet() -> Self {
        Self {
            flow_nom_lpm: 120.0,
            pressure_nom_bar: 2.7,
            power_nom_kw: 1.5,
            wear_coefficient: 0.3333,
        }
    }

    /// OUT pump: draws treated water from the tank, no filter in its path
    pub fn outlet() -> Self {
        Self {
            flow_nom_lpm: 110.0,
            pressure_nom_bar: 3.0,
            power_nom_kw: 1.5,
            wear_coefficient: 0.0,
        }
    }

    /// Resistance factor for a given filter wear
    pub fn wear_factor(&self, wear_pct: f64) -> f64 {
        let w = (wear_pct / 100.0).clamp(0.0, 1.0);
        1.0 + self.wear_coefficient.max(0.0) * w * w
    }
}

/// Motor dynamics shared by both pumps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpThermalConfig {
    /// Rotor inertia time constant (s)
    pub rpm_tau_s: f64,
    /// Heating time constant while running (s)
    pub heat_tau_s: f64,
    /// Passive cooling time constant while stopped (s)
    pub cool_tau_s: f64,
    /// Cooling time constant while held in FAULT (fan/forced cooling) (s)
    pub fault_cool_tau_s: f64,
    /// Equilibrium rise above ambient at nominal rpm (°C)
    pub temp_rise_at_nom_c: f64,
    /// Upper bound of the supply voltage factor
    pub max_voltage_factor: f64,
}

impl Default for PumpThermalConfig {
    fn default() -> Self {
        Self {
            rpm_tau_s: 1.5,
            heat_tau_s: 120.0,
            cool_tau_s: 300.0,
            fault_cool_tau_s: 90.0,
            temp_rise_at_nom_c: 40.0, // 60°C at nominal, >110°C sustained at max
            max_voltage_factor: 1.25,
        }
    }
}

/// How a pump leaves FAULT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultResetPolicy {
    /// Stays in FAULT until a `RESET_FAULT` command
    #[default]
    Latched,
    /// Clears to OFF once the motor has cooled to `cooldown_temp_c`
    AutoOnCooldown,
}

/// Electrical supply and surroundings seen by a pump during one tick
#[derive(Debug, Clone, Copy)]
pub struct PumpEnvironment {
    pub supply_voltage: f64,
    pub nominal_voltage: f64,
    pub supply_fault: bool,
    pub ambient_c: f64,
    pub wear_pct: f64,
    /// Whether the discharge path is open (a closed valve deadheads the pump)
    pub path_open: bool,
}

fn lag_alpha(dt: f64, tau: f64) -> f64 {
    if tau > 0.0 {
        (dt / tau).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Advance one pump by `dt` seconds
pub fn step_pump(
    id: PumpId,
    pump: &mut PumpState,
    env: &PumpEnvironment,
    hydraulics: &PumpHydraulics,
    thermal: &PumpThermalConfig,
    policy: FaultResetPolicy,
    dt: f64,
) {
    if dt <= 0.0 || !dt.is_finite() {
        return;
    }

    pump.voltage = env.supply_voltage;

    if pump.is_faulted() {
        pump.zero_outputs();
        relax_temperature(pump, env.ambient_c, lag_alpha(dt, thermal.fault_cool_tau_s));
        account_overheat(pump, dt);
        if policy == FaultResetPolicy::AutoOnCooldown && pump.motor_temp_c <= pump.cooldown_temp_c {
            pump.run_state = RunState::Off;
            info!(pump = %id, motor_temp_c = pump.motor_temp_c, "pump fault cleared after cooldown");
        }
        return;
    }

    let hard_off = pump.run_state == RunState::Off
        || pump.rpm_desired <= 0.0
        || env.supply_fault
        || env.supply_voltage <= 0.0;

    if hard_off {
        pump.zero_outputs();
        relax_temperature(pump, env.ambient_c, lag_alpha(dt, thermal.cool_tau_s));
        account_overheat(pump, dt);
        return;
    }

    // Speed
    let voltage_factor = if env.nominal_voltage > 0.0 {
        (env.supply_voltage / env.nominal_voltage).clamp(0.0, thermal.max_voltage_factor.max(0.0))
    } else {
        0.0
    };
    let rpm_target = (pump.rpm_desired * voltage_factor).clamp(0.0, pump.rpm_max);
    pump.rpm_actual += (rpm_target - pump.rpm_actual) * lag_alpha(dt, thermal.rpm_tau_s);
    pump.rpm_actual = pump.rpm_actual.clamp(0.0, pump.rpm_max);

    // Hydraulics and power
    let ratio = pump.rpm_actual / pump.rpm_nom.max(1e-6);
    let wear_factor = hydraulics.wear_factor(env.wear_pct);
    pump.pressure_bar = hydraulics.pressure_nom_bar * ratio.powi(2) * wear_factor;
    pump.flow_lpm = if env.path_open {
        hydraulics.flow_nom_lpm * ratio / wear_factor.sqrt()
    } else {
        0.0
    };
    pump.power_kw = hydraulics.power_nom_kw * ratio.powi(3) * wear_factor.sqrt();

    // Thermal
    let t_eq = env.ambient_c + thermal.temp_rise_at_nom_c * ratio.powi(2);
    pump.motor_temp_c += (t_eq - pump.motor_temp_c) * lag_alpha(dt, thermal.heat_tau_s);
    pump.motor_temp_c = pump.motor_temp_c.max(env.ambient_c);
    account_overheat(pump, dt);

    if pump.motor_temp_c >= pump.fault_temp_c {
        pump.run_state = RunState::Fault;
        pump.zero_outputs();
        warn!(
            pump = %id,
            motor_temp_c = pump.motor_temp_c,
            fault_temp_c = pump.fault_temp_c,
            "pump overheat fault"
        );
    }
}

/// First-order relaxation toward ambient; the result never drops below ambient
fn relax_temperature(pump: &mut PumpState, ambient_c: f64, alpha: f64) {
    pump.motor_temp_c += (ambient_c - pump.motor_temp_c) * alpha;
    pump.motor_temp_c = pump.motor_temp_c.max(ambient_c);
}

fn account_overheat(pump: &mut PumpState, dt: f64) {
    if pump.motor_temp_c > pump.overheat_limit_c {
        pump.overheat_seconds += dt;
    } else {
        pump.overheat_seconds = (pump.overheat_seconds - dt).max(0.0);
    }
}
