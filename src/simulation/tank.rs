//! # Storage Tank
//!
//! Mass balance of the treated-water tank:
//!
//! level += (Q_in - Q_out) · dt / 60, clamped to [0, capacity]

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::TankState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    /// Water drawn from the tank to waste while the filter backwashes (L/min)
    pub backwash_draw_lpm: f64,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            backwash_draw_lpm: 50.0,
        }
    }
}

/// Flows reaching the tank during one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct TankFlows {
    /// Filtered water entering (L/min)
    pub inflow_lpm: f64,
    /// Water leaving through the OUT pump and backwash draw (L/min)
    pub outflow_lpm: f64,
}

/// Advance the tank level by `dt` seconds
pub fn step_tank(tank: &mut TankState, flows: TankFlows, dt: f64) {
    if dt <= 0.0 || !dt.is_finite() {
        return;
    }

    tank.in_flow_lpm = flows.inflow_lpm.max(0.0);
    tank.out_flow_lpm = flows.outflow_lpm.max(0.0);

    let before = tank.level_liters;
    let delta = (tank.in_flow_lpm - tank.out_flow_lpm) * dt / 60.0;
    tank.level_liters = (before + delta).clamp(0.0, tank.capacity_liters.max(0.0));
    tank.refresh_level_pct();
    tank.level_rate_lps = (tank.level_liters - before) / dt;

    let overflow = tank.level_liters >= tank.capacity_liters && tank.in_flow_lpm > 0.0;
    if overflow && !tank.overflow {
        info!(level_liters = tank.level_liters, in_flow_lpm = tank.in_flow_lpm, "tank overflow");
    }
    tank.overflow = overflow;
}
