//! # Physics Simulation Module
//!
//! Electrical, hydraulic, thermal and fouling models of the plant. Every model
//! is dt-aware: first-order lags use `alpha = clamp(dt / τ, 0, 1)` so a single
//! large step settles on the target instead of overshooting.
//!
//! ## Components
//!
//! - **Stabilizer**: voltage bands, load accounting, over-temperature trip
//! - **Pump**: inertia, affinity-law hydraulics, motor heating and overheat fault
//! - **Filter**: pressure drop, fouling, backwash cleaning, quality alarm
//! - **Tank**: mass balance and overflow
//! - **Grid**: optional stochastic supply voltage
//! - **Process**: runs all of the above in order for one tick
//!
//! ## Usage
//!
//! ```rust
//! use water_plant_sim::domain::PlantState;
//! use water_plant_sim::simulation::{GridVoltageConfig, PlantProcess, ProcessConfig};
//!
//! let mut process = PlantProcess::new(ProcessConfig::default(), GridVoltageConfig::default());
//! let mut state = PlantState::default();
//! process.step(&mut state, 1.0);
//! assert!(state.violations().is_empty());
//! ```

pub mod filter;
pub mod grid;
pub mod process;
pub mod pump;
pub mod stabilizer;
pub mod tank;

pub use filter::{step_filter, FilterConfig};
pub use grid::{GridVoltageConfig, GridVoltageModel};
pub use process::{PlantProcess, ProcessConfig};
pub use pump::{
    step_pump, FaultResetPolicy, PumpEnvironment, PumpHydraulics, PumpThermalConfig,
};
pub use stabilizer::StabilizerConfig;
pub use tank::{step_tank, TankConfig, TankFlows};
