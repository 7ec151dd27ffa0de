//! Hardware interaction modules
//!
//! Port traits, the simulated and physical backends, and the manager that
//! hides the backend choice from the control loop.

mod gpio;
mod manager;
mod ports;
mod simulated;
mod w1;

pub use gpio::SysfsGpioRelays;
pub use manager::HardwareManager;
pub use ports::{ActuatorPort, SensorPort, ThermalFeedback};
pub use simulated::{SimulatedRelays, SimulatedSensors};
pub use w1::{parse_w1_slave, W1Sensors};
