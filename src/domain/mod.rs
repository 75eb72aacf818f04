pub mod command;
pub mod state;

pub use command::{Command, CommandError, CommandKind, LastCommand, PlantCommand, Target};
pub use state::{
    ControlMode, EnvironmentState, FilterMode, FilterState, InterlockState, PlantConfig,
    PlantState, PumpId, PumpLimits, PumpState, RunState, SecurityIndicators, SensorState,
    StabilizerMode, StabilizerState, TankState, ValveState, Violation,
};
