//! # Grid Voltage Simulation
//!
//! Stochastic supply voltage seen at the stabilizer input: small Gaussian
//! fluctuation around nominal plus rare sag/swell events, filtered through a
//! first-order lag so the voltage drifts instead of jumping.
//!
//! Event probabilities are expressed per second and scaled by `dt`, so the
//! event rate does not depend on how often the model is stepped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Grid voltage model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridVoltageConfig {
    /// Drive the stabilizer input from this model (otherwise the input is set by commands only)
    pub enabled: bool,
    /// Nominal grid voltage in V
    pub nominal_voltage_v: f64,
    /// Standard deviation of the normal fluctuation in V
    pub noise_std_dev_v: f64,
    /// Probability per second of a large sag/swell (±20..30 V)
    pub major_event_per_s: f64,
    /// Probability per second of a minor sag/swell (±8..10 V)
    pub minor_event_per_s: f64,
    /// Time constant of the voltage lag in seconds
    pub tau_s: f64,
    /// Physical upper limit of the supply in V
    pub max_voltage_v: f64,
    /// Random seed for reproducibility (None = random)
    pub random_seed: Option<u64>,
}

impl Default for GridVoltageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nominal_voltage_v: 220.0,
            noise_std_dev_v: 0.75,
            major_event_per_s: 0.01,
            minor_event_per_s: 0.04,
            tau_s: 8.0,
            max_voltage_v: 260.0,
            random_seed: None,
        }
    }
}

impl GridVoltageConfig {
    /// Weak rural feeder with frequent disturbances
    pub fn weak_grid() -> Self {
        Self {
            enabled: true,
            noise_std_dev_v: 2.0,
            major_event_per_s: 0.03,
            minor_event_per_s: 0.1,
            ..Default::default()
        }
    }
}

/// Simulates the grid voltage feeding the stabilizer
pub struct GridVoltageModel {
    config: GridVoltageConfig,
    rng: StdRng,
    noise: Option<Normal<f64>>,
}

impl GridVoltageModel {
    pub fn new(config: GridVoltageConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_std_dev_v.max(0.0)).ok();

        Self { config, rng, noise }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &GridVoltageConfig {
        &self.config
    }

    /// Advance the voltage by `dt` seconds and return the new value
    pub fn step(&mut self, current_v: f64, dt: f64) -> f64 {
        if dt <= 0.0 || !dt.is_finite() {
            return current_v;
        }

        let mut target_v = self.config.nominal_voltage_v;
        if let Some(noise) = &self.noise {
            target_v += noise.sample(&mut self.rng);
        }
        target_v += self.event_offset(dt);

        let alpha = if self.config.tau_s > 0.0 {
            (dt / self.config.tau_s).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let next = current_v + (target_v - current_v) * alpha;
        next.clamp(0.0, self.config.max_voltage_v)
    }

    fn event_offset(&mut self, dt: f64) -> f64 {
        let major = (self.config.major_event_per_s * dt).clamp(0.0, 1.0);
        let minor = (self.config.minor_event_per_s * dt).clamp(0.0, 1.0);
        let p: f64 = self.rng.gen();

        let magnitudes: &[f64] = if p < major {
            &[20.0, 30.0]
        } else if p < (major + minor).min(1.0) {
            &[8.0, 10.0]
        } else {
            return 0.0;
        };

        let magnitude = magnitudes[self.rng.gen_range(0..magnitudes.len())];
        if self.rng.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        }
    }
}
