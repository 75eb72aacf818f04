//! # Water Plant Simulator
//!
//! Closed-loop simulation of a small water-treatment plant: voltage
//! stabilizer, IN/OUT pumps, sand filter and storage tank. An automatic
//! controller proposes setpoints, a dt-aware physics engine advances the true
//! state, and external actors (operator, attack generator) inject commands
//! through a bounded queue that the single-writer [`Simulator`] drains at tick
//! boundaries.
//!
//! ```rust
//! use water_plant_sim::{Command, Config, Simulator};
//!
//! let mut sim = Simulator::new(&Config::default()).unwrap();
//! sim.sender().submit(Command::new("SET_RPM", "pump_in", 9999));
//! sim.step(1.0);
//! assert!(sim.state().pump_in.rpm_desired <= sim.state().pump_in.rpm_max);
//! ```

pub mod attack;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod runtime;
pub mod simulation;
pub mod simulator;
pub mod sink;
pub mod telemetry;

pub use config::Config;
pub use domain::{Command, PlantState};
pub use error::SimError;
pub use simulator::{CommandSender, Inbound, Simulator, SimulatorPhase};
pub use sink::{PlantSnapshot, TelemetrySink};
