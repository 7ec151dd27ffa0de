//! Data types and validation modules
//!
//! Contains the record projections the controller works with.

mod types;
mod validation;

pub use types::{
    ActuatorState, Batch, BatchStatus, ControlState, Phase, Relay, SensorReading,
    TemperatureRecord, Vessel,
};
pub use validation::{validate_phases, validate_sensor_id};
