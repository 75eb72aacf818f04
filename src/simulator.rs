//! # Simulator
//!
//! Single writer of [`PlantState`]. External actors hold a cloneable
//! [`CommandSender`] and never touch the state directly; the simulator drains
//! the queue at the start of every tick, then runs the controller and the
//! physics engine, then advances the clock.
//!
//! The queue carries control commands and security-monitor reports. Reports
//! only replace [`PlantState::security`]; they are never audited as commands.
//!
//! ```text
//! Idle ──step(dt > 0)──▶ Running
//! ```
//!
//! `step(dt)` with `dt ≤ 0` (or non-finite) leaves everything untouched,
//! including the queue.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::controller::PlantController;
use crate::domain::{Command, CommandError, LastCommand, PlantState, SecurityIndicators};
use crate::error::Result;
use crate::simulation::{GridVoltageConfig, PlantProcess};
use crate::sink::PlantSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorPhase {
    /// Constructed, not yet stepped
    Idle,
    Running,
}

/// Message accepted by the simulator queue
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(Command),
    Security(SecurityIndicators),
}

/// Producer handle for the bounded command queue
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Inbound>,
    dropped: Arc<AtomicU64>,
}

impl CommandSender {
    /// Enqueue without waiting. Returns `false` if the command was dropped
    /// because the queue is full or the simulator is gone.
    pub fn submit(&self, cmd: Command) -> bool {
        self.send(Inbound::Command(cmd))
    }

    /// Publish the security monitor's indicators for the current tick
    pub fn report_security(&self, indicators: SecurityIndicators) -> bool {
        self.send(Inbound::Security(indicators))
    }

    fn send(&self, msg: Inbound) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                match msg {
                    Inbound::Command(cmd) => warn!(
                        command = %cmd.command,
                        target = %cmd.target,
                        source = %cmd.source,
                        total,
                        "command queue full, command dropped"
                    ),
                    Inbound::Security(_) => {
                        warn!(total, "command queue full, security report dropped")
                    }
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Command accounting since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub applied: u64,
    /// Malformed, unknown or inapplicable
    pub ignored: u64,
    pub unauthenticated_rejected: u64,
}

pub struct Simulator {
    state: PlantState,
    controller: PlantController,
    process: PlantProcess,
    commands: mpsc::Receiver<Inbound>,
    sender: CommandSender,
    phase: SimulatorPhase,
    tick: u64,
    sim_time_s: f64,
    reject_unauthenticated: bool,
    stats: CommandStats,
}

impl Simulator {
    /// Build from a configuration; invalid configuration is the only error
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let seed = config.simulation.random_seed;
        let grid = GridVoltageConfig {
            random_seed: config.grid.random_seed.or(seed.map(|s| s.wrapping_add(1))),
            ..config.grid.clone()
        };
        let (tx, rx) = mpsc::channel(config.simulation.command_queue_capacity.max(1));

        Ok(Self {
            state: PlantState::from_config(&config.plant),
            controller: PlantController::new(config.controller.clone(), seed),
            process: PlantProcess::new(config.process.clone(), grid),
            commands: rx,
            sender: CommandSender {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            phase: SimulatorPhase::Idle,
            tick: 0,
            sim_time_s: 0.0,
            reject_unauthenticated: config.simulation.reject_unauthenticated,
            stats: CommandStats::default(),
        })
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn state(&self) -> &PlantState {
        &self.state
    }

    pub fn phase(&self) -> SimulatorPhase {
        self.phase
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_time_s(&self) -> f64 {
        self.sim_time_s
    }

    pub fn controller(&self) -> &PlantController {
        &self.controller
    }

    pub fn command_stats(&self) -> CommandStats {
        self.stats
    }

    /// Commands lost to a full queue
    pub fn dropped_commands(&self) -> u64 {
        self.sender.dropped()
    }

    /// Advance one tick. Returns `false` (and changes nothing) for non-positive `dt`.
    pub fn step(&mut self, dt: f64) -> bool {
        if dt <= 0.0 || !dt.is_finite() {
            debug!(dt, "step ignored");
            return false;
        }
        if self.phase == SimulatorPhase::Idle {
            self.phase = SimulatorPhase::Running;
            info!(dt, "simulation running");
        }

        while let Ok(msg) = self.commands.try_recv() {
            match msg {
                Inbound::Command(cmd) => self.apply_external(cmd),
                Inbound::Security(indicators) => self.record_security(indicators),
            }
        }

        self.controller.compute(&mut self.state, dt);
        self.process.step(&mut self.state, dt);

        self.sim_time_s += dt;
        self.state.time_s = self.sim_time_s.floor() as u64;
        self.tick += 1;
        true
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            tick: self.tick,
            sim_time_s: self.sim_time_s,
            ts: Utc::now(),
            state: self.state.clone(),
        }
    }

    fn record_security(&mut self, indicators: SecurityIndicators) {
        if indicators.failed_auth > 0 || indicators.burst > 0 {
            warn!(
                failed_auth = indicators.failed_auth,
                burst = indicators.burst,
                "security indicators raised"
            );
        }
        self.state.security = indicators;
    }

    fn apply_external(&mut self, cmd: Command) {
        let result = cmd
            .authorize(self.reject_unauthenticated)
            .and_then(|()| cmd.parse())
            .and_then(|parsed| parsed.apply(&mut self.state));
        match result {
            Ok(()) => {
                self.stats.applied += 1;
                info!(
                    command = %cmd.command,
                    target = %cmd.target,
                    value = %cmd.value,
                    source = %cmd.source,
                    auth_ok = cmd.auth_ok,
                    "command applied"
                );
                self.state.last_command = Some(LastCommand::from_command(&cmd, Utc::now()));
            }
            Err(e @ CommandError::Unauthenticated) => {
                self.stats.unauthenticated_rejected += 1;
                warn!(
                    error = %e,
                    command = %cmd.command,
                    target = %cmd.target,
                    source = %cmd.source,
                    "command rejected"
                );
            }
            Err(e) => {
                self.stats.ignored += 1;
                debug!(
                    error = %e,
                    command = %cmd.command,
                    target = %cmd.target,
                    source = %cmd.source,
                    "command ignored"
                );
            }
        }
    }
}
