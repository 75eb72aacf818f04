//! # Filter Model
//!
//! Pressure drop, fouling and output quality of the sand filter.
//!
//! - FILTER with flow: wear += (Q/60) · NTU_raw · k · dt
//! - BACKWASH: wear -= rate · dt, never below the post-backwash floor
//! - IDLE: wear frozen
//!
//! Output turbidity stays at the clean value up to `clean_wear_pct` and rises
//! linearly to `max_ntu` at 100 % wear.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FilterMode, FilterState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Raw water turbidity entering the filter (NTU)
    pub raw_ntu: f64,
    /// Fouling coefficient k
    pub wear_k: f64,
    /// Wear removed per second of backwash (%/s)
    pub backwash_clean_rate_pct_per_s: f64,
    /// Filter outlet pressure while water flows (bar)
    pub out_pressure_flowing_bar: f64,
    /// Treated-water turbidity with a clean filter (NTU)
    pub clean_ntu: f64,
    /// Turbidity at 100 % wear (NTU)
    pub max_ntu: f64,
    /// Wear up to which the output stays clean (%)
    pub clean_wear_pct: f64,
    /// Treated-water pH
    pub ph: f64,
    /// Quality alarm sets at or above this turbidity (NTU)
    pub alarm_ntu: f64,
    /// Alarm clears once turbidity is this far below `alarm_ntu` (NTU)
    pub alarm_hysteresis_ntu: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            raw_ntu: 2.0,
            wear_k: 0.00278, // ~2.5 h from clean to fully fouled at nominal flow
            backwash_clean_rate_pct_per_s: 1.0,
            out_pressure_flowing_bar: 0.2,
            clean_ntu: 0.5,
            max_ntu: 3.0,
            clean_wear_pct: 50.0,
            ph: 7.0,
            alarm_ntu: 1.0,
            alarm_hysteresis_ntu: 0.15,
        }
    }
}

impl FilterConfig {
    /// Output turbidity for a given wear
    pub fn ntu_for_wear(&self, wear_pct: f64) -> f64 {
        let span = (100.0 - self.clean_wear_pct).max(1e-6);
        let x = ((wear_pct - self.clean_wear_pct) / span).clamp(0.0, 1.0);
        self.clean_ntu + (self.max_ntu - self.clean_ntu).max(0.0) * x
    }
}

/// Advance the filter by `dt` seconds given the IN pump's delivered flow and pressure
pub fn step_filter(
    filter: &mut FilterState,
    inflow_lpm: f64,
    upstream_pressure_bar: f64,
    cfg: &FilterConfig,
    dt: f64,
) {
    if dt <= 0.0 || !dt.is_finite() {
        return;
    }

    let flowing = inflow_lpm > 0.0 && filter.mode != FilterMode::Idle;
    if flowing {
        filter.in_pressure_bar = upstream_pressure_bar.max(0.0);
        filter.out_pressure_bar = cfg.out_pressure_flowing_bar.min(filter.in_pressure_bar);
    } else {
        filter.in_pressure_bar = 0.0;
        filter.out_pressure_bar = 0.0;
    }
    filter.delta_pressure_bar = (filter.in_pressure_bar - filter.out_pressure_bar).max(0.0);

    match filter.mode {
        FilterMode::Filter if flowing => {
            let dw = (inflow_lpm / 60.0) * cfg.raw_ntu * cfg.wear_k * dt;
            filter.wear_pct = (filter.wear_pct + dw.max(0.0)).clamp(0.0, 100.0);
        }
        FilterMode::Backwash => {
            let floor = filter.min_wear_after_backwash_pct;
            if filter.wear_pct > floor {
                let cleaned = filter.wear_pct - cfg.backwash_clean_rate_pct_per_s.max(0.0) * dt;
                filter.wear_pct = cleaned.max(floor).clamp(0.0, 100.0);
            }
        }
        _ => {}
    }

    filter.ntu = cfg.ntu_for_wear(filter.wear_pct);
    filter.ph = cfg.ph;

    if !filter.quality_alarm && filter.ntu >= cfg.alarm_ntu {
        filter.quality_alarm = true;
        warn!(ntu = filter.ntu, wear_pct = filter.wear_pct, "filter quality alarm");
    } else if filter.quality_alarm && filter.ntu <= cfg.alarm_ntu - cfg.alarm_hysteresis_ntu {
        filter.quality_alarm = false;
        warn!(ntu = filter.ntu, wear_pct = filter.wear_pct, "filter quality alarm cleared");
    }
}
