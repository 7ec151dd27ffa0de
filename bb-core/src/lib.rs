//! BrewBuddy Core Library
//!
//! Temperature control for fermentation vessels on Linux single-board
//! computers.
//!
//! # Features
//!
//! - **Hardware Ports**: DS18B20 probes over 1-wire, relays over sysfs GPIO,
//!   or a simulated backend for machines without either
//! - **Phase Schedules**: multi-phase fermentation profiles evaluated against
//!   batch start time
//! - **Hysteresis Control**: heater/chiller deadband control per vessel
//! - **Safety**: relays forced off on sensor timeout and on shutdown
//!
//! # Module Structure
//!
//! - `hw/` - Hardware ports, backends and the hardware manager
//! - `data/` - Record projections and validation
//! - `engine/` - Schedule evaluator and hysteresis rule
//! - `control/` - Control loop and controller lifecycle
//! - `store/` - Record store port and implementations
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bb_core::{ControllerSettings, HardwareManager, JsonStore, TemperatureController};
//!
//! let settings = ControllerSettings::load(None).unwrap();
//! let hardware = Arc::new(HardwareManager::from_settings(&settings.hardware).unwrap());
//! let store = Arc::new(JsonStore::new(&settings.store.path, &settings.store.temperature_log));
//! let controller = TemperatureController::new(hardware, store, settings.control.clone());
//! controller.start().unwrap();
//! ```

// Grouped modules
pub mod control;
pub mod data;
pub mod engine;
pub mod hw;
pub mod store;

// Standalone modules
pub mod constants;
pub mod error;
pub mod settings;

// Re-export primary types from data/
pub use data::{
    ActuatorState, Batch, BatchStatus, ControlState, Phase, Relay, SensorReading,
    TemperatureRecord, Vessel,
};

// Re-export validation functions from data/
pub use data::{validate_phases, validate_sensor_id};

// Re-export error types
pub use error::{BrewError, Result};

// Re-export engine types
pub use engine::{current_phase, target_temperature, Hysteresis, PhaseProgress};

// Re-export hardware types from hw/
pub use hw::{
    ActuatorPort, HardwareManager, SensorPort, SimulatedRelays, SimulatedSensors,
    SysfsGpioRelays, ThermalFeedback, W1Sensors,
};

// Re-export control types
pub use control::{BatchControlStatus, ControlLoop, ControllerStatus, TemperatureController};

// Re-export record stores
pub use store::{JsonStore, MemoryStore, RecordStore};

// Re-export settings
pub use settings::{ControlSettings, ControllerSettings, HardwareMode, HardwareSettings};
