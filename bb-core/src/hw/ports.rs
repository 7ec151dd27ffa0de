//! Hardware port traits
//!
//! Every backend implements the same two capability sets. Thermal feedback
//! is an optional secondary capability that only simulated backends offer;
//! callers probe for it through [`SensorPort::feedback`].

use bb_error::Result;

/// Temperature sensor capability
pub trait SensorPort: Send {
    /// Read one sensor in °C, rounded to two decimals
    ///
    /// Returns `SensorNotFound` for unknown ids and `SensorRead` when the
    /// device exists but produced no usable reading.
    fn read_temperature(&mut self, sensor_id: &str) -> Result<f64>;

    /// Identifiers of every sensor this backend can see
    fn list_sensors(&self) -> Result<Vec<String>>;

    /// Thermal feedback hook, if this backend models the vessel physically
    fn feedback(&mut self) -> Option<&mut dyn ThermalFeedback> {
        None
    }
}

/// Lets the controller tell a simulated vessel what its relays are doing
pub trait ThermalFeedback {
    fn apply(&mut self, sensor_id: &str, heating: bool, cooling: bool);
}

/// Relay output capability
///
/// `setup` is idempotent and drives a newly configured line low. Calling
/// `activate`, `deactivate` or `state` on an unconfigured line sets it up
/// first.
pub trait ActuatorPort: Send {
    fn setup(&mut self, pin: u32) -> Result<()>;
    fn activate(&mut self, pin: u32) -> Result<()>;
    fn deactivate(&mut self, pin: u32) -> Result<()>;
    fn state(&mut self, pin: u32) -> Result<bool>;

    /// Drive every configured line low and release it
    fn release_all(&mut self) -> Result<()>;
}
