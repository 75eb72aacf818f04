//! External command envelope and its validation.
//!
//! Operators and the attack generator speak in loosely typed envelopes
//! (`{command, target, value, auth_ok, source}`). Before anything touches the
//! plant, an envelope is parsed into a [`PlantCommand`]; envelopes that fail
//! parsing are dropped by the simulator without any state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

use super::state::{
    ControlMode, FilterMode, PlantState, PumpId, RunState, SensorState, ValveState,
};

/// Accepted input-voltage range for `SET_VOLTAGE` (V)
pub const INPUT_VOLTAGE_RANGE: (f64, f64) = (0.0, 400.0);
/// Accepted ambient range for `SET_AMBIENT` (°C)
pub const AMBIENT_RANGE: (f64, f64) = (-40.0, 60.0);

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("command {command} does not apply to target {target}")]
    UnsupportedTarget { command: CommandKind, target: Target },
    #[error("invalid value for {command}: {value}")]
    InvalidValue { command: CommandKind, value: Value },
    #[error("command rejected: not authenticated")]
    Unauthenticated,
    #[error("command rejected: {0} is in FAULT")]
    PumpFaulted(PumpId),
}

/// Command word of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum CommandKind {
    SetRpm,
    SetPumpState,
    SetMode,
    ResetFault,
    SetFilterMode,
    SetValve,
    SetVoltage,
    SetAmbient,
    SetLevelSensorState,
}

/// Addressable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Target {
    PumpIn,
    PumpOut,
    #[strum(serialize = "filters", serialize = "filter")]
    Filters,
    #[strum(serialize = "tank", serialize = "storage")]
    Tank,
    #[strum(serialize = "stabilizer", serialize = "stabiliser")]
    Stabilizer,
    #[strum(serialize = "environment", serialize = "env")]
    Environment,
}

impl Target {
    fn pump(self) -> Option<PumpId> {
        match self {
            Target::PumpIn => Some(PumpId::In),
            Target::PumpOut => Some(PumpId::Out),
            _ => None,
        }
    }
}

fn default_auth_ok() -> bool {
    true
}

/// Raw command as produced by an external actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    pub target: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_auth_ok")]
    pub auth_ok: bool,
    #[serde(default)]
    pub source: String,
}

impl Command {
    pub fn new(
        command: impl Into<String>,
        target: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            command: command.into(),
            target: target.into(),
            value: value.into(),
            auth_ok: true,
            source: "operator".to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.auth_ok = false;
        self
    }

    /// Admission check run before parsing
    pub fn authorize(&self, require_auth: bool) -> Result<(), CommandError> {
        if require_auth && !self.auth_ok {
            return Err(CommandError::Unauthenticated);
        }
        Ok(())
    }

    /// Validate the envelope into a typed command
    pub fn parse(&self) -> Result<PlantCommand, CommandError> {
        let kind = CommandKind::from_str(self.command.trim())
            .map_err(|_| CommandError::UnknownCommand(self.command.clone()))?;
        let target = Target::from_str(self.target.trim())
            .map_err(|_| CommandError::UnknownTarget(self.target.clone()))?;

        let unsupported = || CommandError::UnsupportedTarget {
            command: kind,
            target,
        };
        let invalid = || CommandError::InvalidValue {
            command: kind,
            value: self.value.clone(),
        };

        let cmd = match kind {
            CommandKind::SetRpm => {
                let pump = target.pump().ok_or_else(unsupported)?;
                let rpm = number(&self.value).ok_or_else(invalid)?;
                PlantCommand::SetRpm { pump, rpm }
            }
            CommandKind::SetPumpState => {
                let pump = target.pump().ok_or_else(unsupported)?;
                let state: RunState = word(&self.value).ok_or_else(invalid)?;
                if state == RunState::Fault {
                    return Err(invalid());
                }
                PlantCommand::SetPumpState { pump, state }
            }
            CommandKind::SetMode => {
                let pump = target.pump().ok_or_else(unsupported)?;
                let mode = word(&self.value).ok_or_else(invalid)?;
                PlantCommand::SetMode { pump, mode }
            }
            CommandKind::ResetFault => {
                let pump = target.pump().ok_or_else(unsupported)?;
                PlantCommand::ResetFault { pump }
            }
            CommandKind::SetFilterMode => {
                if target != Target::Filters {
                    return Err(unsupported());
                }
                PlantCommand::SetFilterMode(word(&self.value).ok_or_else(invalid)?)
            }
            CommandKind::SetValve => {
                let valve = word(&self.value).ok_or_else(invalid)?;
                match target {
                    Target::Filters => PlantCommand::SetFilterValve(valve),
                    Target::Tank => PlantCommand::SetTankValve(valve),
                    _ => return Err(unsupported()),
                }
            }
            CommandKind::SetVoltage => {
                if target != Target::Stabilizer {
                    return Err(unsupported());
                }
                let v = number(&self.value)
                    .filter(|v| (INPUT_VOLTAGE_RANGE.0..=INPUT_VOLTAGE_RANGE.1).contains(v))
                    .ok_or_else(invalid)?;
                PlantCommand::SetInputVoltage(v)
            }
            CommandKind::SetAmbient => {
                if target != Target::Environment {
                    return Err(unsupported());
                }
                let t = number(&self.value)
                    .filter(|t| (AMBIENT_RANGE.0..=AMBIENT_RANGE.1).contains(t))
                    .ok_or_else(invalid)?;
                PlantCommand::SetAmbient(t)
            }
            CommandKind::SetLevelSensorState => {
                if target != Target::Tank {
                    return Err(unsupported());
                }
                PlantCommand::SetLevelSensor(word(&self.value).ok_or_else(invalid)?)
            }
        };
        Ok(cmd)
    }
}

/// Finite number from a JSON number or numeric string
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Enum word from a JSON string
fn word<T: FromStr>(value: &Value) -> Option<T> {
    value.as_str().and_then(|s| T::from_str(s.trim()).ok())
}

/// A validated command, ready to be applied at a tick boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlantCommand {
    SetRpm { pump: PumpId, rpm: f64 },
    SetPumpState { pump: PumpId, state: RunState },
    SetMode { pump: PumpId, mode: ControlMode },
    ResetFault { pump: PumpId },
    SetFilterMode(FilterMode),
    SetFilterValve(ValveState),
    SetTankValve(ValveState),
    SetInputVoltage(f64),
    SetAmbient(f64),
    SetLevelSensor(SensorState),
}

impl PlantCommand {
    /// Mutate the state; an `Err` means nothing was changed
    pub fn apply(&self, state: &mut PlantState) -> Result<(), CommandError> {
        match *self {
            PlantCommand::SetRpm { pump, rpm } => {
                let p = state.pump_mut(pump);
                p.rpm_desired = rpm.clamp(0.0, p.rpm_max);
            }
            PlantCommand::SetPumpState { pump, state: run } => {
                let p = state.pump_mut(pump);
                if p.is_faulted() {
                    return Err(CommandError::PumpFaulted(pump));
                }
                p.run_state = run;
                match run {
                    RunState::Off => p.rpm_desired = 0.0,
                    _ => p.rpm_desired = p.rpm_desired.max(p.rpm_min).min(p.rpm_max),
                }
            }
            PlantCommand::SetMode { pump, mode } => {
                state.pump_mut(pump).control_mode = mode;
            }
            PlantCommand::ResetFault { pump } => {
                let p = state.pump_mut(pump);
                if p.is_faulted() {
                    p.run_state = RunState::Off;
                    p.rpm_desired = 0.0;
                }
            }
            PlantCommand::SetFilterMode(mode) => {
                if state.filter.mode != mode {
                    state.filter.backwash_elapsed_s = 0.0;
                }
                state.filter.mode = mode;
            }
            PlantCommand::SetFilterValve(valve) => state.filter.valve = valve,
            PlantCommand::SetTankValve(valve) => state.tank.outlet_valve = valve,
            PlantCommand::SetInputVoltage(v) => state.stabilizer.input_voltage = v,
            PlantCommand::SetAmbient(t) => state.env.ambient_temp_c = t,
            PlantCommand::SetLevelSensor(sensor) => state.tank.level_sensor = sensor,
        }
        Ok(())
    }
}

/// Audit record of the most recent applied external command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastCommand {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub command: String,
    pub target: String,
    pub value: Value,
    pub auth_ok: bool,
}

impl LastCommand {
    pub fn from_command(cmd: &Command, ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            source: cmd.source.clone(),
            command: cmd.command.clone(),
            target: cmd.target.clone(),
            value: cmd.value.clone(),
            auth_ok: cmd.auth_ok,
        }
    }
}
