//! Segbuf Simulation - Reproducible playback runs without a network or decoder.
//!
//! This crate wires a real playback session to simulated collaborators so the
//! buffering engine can be exercised end to end under controlled conditions.
//!
//! # Components
//!
//! - **Network**: Seeded latency, failure and bandwidth model
//! - **Media server**: Synthetic manifest and sized segment payloads
//! - **Headless stream**: Decode buffers that hold `updating` for a decode delay
//! - **Playback driver**: Advances a clock through buffered media and performs seeks
//! - **Scenarios**: Pre-built configurations for common conditions
//!
//! # Example
//!
//! ```rust,no_run
//! use segbuf_sim::{Scenario, run_simulation};
//!
//! # async fn example() -> Result<(), segbuf_sim::SimulationError> {
//! let scenario = Scenario::flaky_network(7);
//! let report = run_simulation(&scenario.simulation, scenario.segbuf).await?;
//! println!("stalled for {} ticks", report.playback.stalled_ticks);
//! # Ok(())
//! # }
//! ```

pub mod headless;
pub mod media_server;
pub mod network;
pub mod playback;
pub mod scenarios;
pub mod simulation;

pub use headless::{DecodeStats, HeadlessDecodeBuffer, HeadlessStream};
pub use media_server::{ServerStats, SyntheticMedia, SyntheticMediaServer};
pub use network::{NetworkConditions, NetworkSimulator};
pub use playback::{PlaybackPlan, PlaybackReport, ScheduledSeek, drive};
pub use scenarios::{SCENARIO_NAMES, Scenario};
pub use simulation::{SimulationConfig, SimulationError, SimulationReport, run_simulation};
