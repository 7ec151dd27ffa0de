//! Fermentation control
//!
//! The per-tick state machine, sensor liveness tracking, and the controller
//! that runs it on a background thread.

mod control_loop;
mod controller;
mod liveness;
mod status;

pub use control_loop::ControlLoop;
pub use controller::TemperatureController;
pub use liveness::SensorLiveness;
pub use status::{BatchControlStatus, ControllerStatus};
