//! Consumer demand factor for the OUT pump.
//!
//! A piecewise-constant multiplier of the IN pump's nominal capacity, redrawn
//! uniformly from `[factor_min, factor_max]` every `change_period_s` of
//! simulated time. The redraw timer carries its overshoot so a large `dt`
//! does not stretch the period.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DemandConfig {
    #[validate(range(min = 0.0))]
    pub factor_min: f64,
    #[validate(range(min = 0.0))]
    pub factor_max: f64,
    /// Factor before the first redraw
    #[validate(range(min = 0.0))]
    pub initial_factor: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub change_period_s: f64,
    /// IN pump capacity at nominal rpm with a clean filter (L/min)
    #[validate(range(exclusive_min = 0.0))]
    pub in_capacity_lpm_at_nom: f64,
    /// OUT pump flow at nominal rpm (L/min)
    #[validate(range(exclusive_min = 0.0))]
    pub out_flow_lpm_at_nom: f64,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            factor_min: 0.70,
            factor_max: 1.10,
            initial_factor: 0.90,
            change_period_s: 3600.0, // hourly
            in_capacity_lpm_at_nom: 120.0,
            out_flow_lpm_at_nom: 110.0,
        }
    }
}

pub struct DemandModel {
    config: DemandConfig,
    rng: StdRng,
    factor: f64,
    timer_s: f64,
}

impl DemandModel {
    pub fn new(config: DemandConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            factor: config.initial_factor,
            timer_s: config.change_period_s,
            config,
            rng,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn update(&mut self, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }
        self.timer_s -= dt;
        if self.timer_s > 0.0 {
            return;
        }

        let (lo, hi) = (self.config.factor_min, self.config.factor_max);
        self.factor = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
        let period = self.config.change_period_s.max(f64::EPSILON);
        self.timer_s += period;
        if self.timer_s <= 0.0 {
            // dt spanned several periods; only the last draw matters
            self.timer_s = period - (-self.timer_s % period);
        }
        debug!(factor = self.factor, "demand factor redrawn");
    }

    /// OUT pump rpm that would deliver the demanded flow
    pub fn out_rpm_target(&self, out_rpm_nom: f64) -> f64 {
        let desired_flow = self.config.in_capacity_lpm_at_nom * self.factor;
        out_rpm_nom * desired_flow / self.config.out_flow_lpm_at_nom.max(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_factor_until_period_elapses() {
        let mut demand = DemandModel::new(DemandConfig::default(), Some(1));
        demand.update(3599.0);
        assert_eq!(demand.factor(), 0.9);
        demand.update(1.0);
        assert!((0.7..=1.1).contains(&demand.factor()));
    }

    #[test]
    fn test_seeded_models_agree() {
        let mut a = DemandModel::new(DemandConfig::default(), Some(9));
        let mut b = DemandModel::new(DemandConfig::default(), Some(9));
        for _ in 0..10 {
            a.update(3600.0);
            b.update(3600.0);
            assert_eq!(a.factor(), b.factor());
        }
    }

    #[test]
    fn test_huge_dt_keeps_timer_positive() {
        let mut demand = DemandModel::new(DemandConfig::default(), Some(3));
        demand.update(10.5 * 3600.0);
        demand.update(1.0);
        let f = demand.factor();
        // next redraw is half a period away
        demand.update(1700.0);
        assert_eq!(demand.factor(), f);
    }

    #[test]
    fn test_out_rpm_target_at_initial_factor() {
        let demand = DemandModel::new(DemandConfig::default(), Some(1));
        // 120 * 0.9 / 110 * 2500
        assert!((demand.out_rpm_target(2500.0) - 2454.545_454_545).abs() < 1e-6);
    }
}
