//! # Attack Generator
//!
//! An external actor for intrusion-detection experiments. It sees the plant
//! only through published snapshots and acts only through the command queue,
//! like any operator.
//!
//! Every observed tick it first reports security indicators: a failed-auth
//! count drawn from `1..=8` with `prob_failed_auth` (else 0) and a telemetry
//! burst flag with `prob_telemetry_burst`. Then each attack fires
//! independently with its configured probability:
//!
//! - `SET_RPM` on a random pump, ±`rpm_delta` around the observed rpm
//! - `SET_VALVE` on the filter line or tank outlet, random OPEN/CLOSED
//! - `SET_LEVEL_SENSOR_STATE TAMPER` on the tank

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Command, PlantState, PumpId, SecurityIndicators};
use crate::simulator::CommandSender;
use crate::sink::PlantSnapshot;

pub const ATTACK_SOURCE: &str = "attacker_remote";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    pub enabled: bool,
    pub prob_failed_auth: f64,
    pub prob_telemetry_burst: f64,
    pub failed_auth_max: u32,
    pub prob_set_rpm: f64,
    pub prob_toggle_valve: f64,
    pub prob_tamper_level_sensor: f64,
    pub rpm_delta_min: u32,
    pub rpm_delta_max: u32,
    pub random_seed: Option<u64>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prob_failed_auth: 0.010,
            prob_telemetry_burst: 0.010,
            failed_auth_max: 8,
            prob_set_rpm: 0.006,
            prob_toggle_valve: 0.004,
            prob_tamper_level_sensor: 0.003,
            rpm_delta_min: 300,
            rpm_delta_max: 1200,
            random_seed: None,
        }
    }
}

pub struct AttackGenerator {
    config: AttackConfig,
    rng: StdRng,
}

impl AttackGenerator {
    pub fn new(config: AttackConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Security indicators for one observed tick
    pub fn next_security(&mut self) -> SecurityIndicators {
        let failed_auth = if self.roll(self.config.prob_failed_auth) {
            self.rng.gen_range(1..=self.config.failed_auth_max.max(1))
        } else {
            0
        };
        let burst = u32::from(self.roll(self.config.prob_telemetry_burst));
        SecurityIndicators { failed_auth, burst }
    }

    /// Commands to inject after observing `state`
    pub fn next_commands(&mut self, state: &PlantState) -> Vec<Command> {
        let mut out = Vec::new();

        if self.roll(self.config.prob_set_rpm) {
            let pump = if self.rng.gen_bool(0.5) {
                PumpId::In
            } else {
                PumpId::Out
            };
            let p = state.pump(pump);
            let lo = self.config.rpm_delta_min.min(self.config.rpm_delta_max);
            let hi = self.config.rpm_delta_max.max(lo);
            let mut delta = self.rng.gen_range(lo..=hi) as f64;
            if self.rng.gen_bool(0.5) {
                delta = -delta;
            }
            let rpm = (p.rpm_actual + delta).clamp(0.0, p.rpm_max).round();
            out.push(attack(Command::new("SET_RPM", pump.to_string(), rpm)));
        }

        if self.roll(self.config.prob_toggle_valve) {
            let target = if self.rng.gen_bool(0.5) { "filters" } else { "tank" };
            let value = if self.rng.gen_bool(0.5) { "CLOSED" } else { "OPEN" };
            out.push(attack(Command::new("SET_VALVE", target, value)));
        }

        if self.roll(self.config.prob_tamper_level_sensor) {
            out.push(attack(Command::new("SET_LEVEL_SENSOR_STATE", "storage", "TAMPER")));
        }

        out
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen::<f64>() < p.min(1.0)
    }

    /// Observe every published snapshot until cancelled or the publisher goes away
    pub async fn run(
        mut self,
        mut snapshots: watch::Receiver<Option<Arc<PlantSnapshot>>>,
        commands: CommandSender,
        cancel: CancellationToken,
    ) {
        info!("attack generator started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let latest = snapshots.borrow_and_update().clone();
            let Some(snapshot) = latest else { continue };
            commands.report_security(self.next_security());
            for cmd in self.next_commands(&snapshot.state) {
                warn!(
                    tick = snapshot.tick,
                    command = %cmd.command,
                    target = %cmd.target,
                    value = %cmd.value,
                    "attack command injected"
                );
                commands.submit(cmd);
            }
        }
        info!("attack generator stopped");
    }
}

fn attack(cmd: Command) -> Command {
    cmd.with_source(ATTACK_SOURCE).unauthenticated()
}
