//! Hardware manager
//!
//! Single point of hardware access for the controller. The backend pair is
//! chosen once at construction and never swapped. The manager remembers
//! every actuator line it has configured so setup runs once per line and
//! shutdown can drive all of them low.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use super::gpio::SysfsGpioRelays;
use super::ports::{ActuatorPort, SensorPort};
use super::simulated::{SimulatedRelays, SimulatedSensors};
use super::w1::W1Sensors;
use crate::data::{ActuatorState, SensorReading};
use crate::settings::{HardwareMode, HardwareSettings};
use bb_error::{BrewError, Result};

struct ActuatorBank {
    port: Box<dyn ActuatorPort>,
    /// Configured lines and the last level successfully commanded
    levels: BTreeMap<u32, bool>,
    /// Set by shutdown; checked under the bank lock so no line moves afterwards
    released: bool,
}

impl ActuatorBank {
    fn new(port: Box<dyn ActuatorPort>) -> Self {
        Self { port, levels: BTreeMap::new(), released: false }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(BrewError::ControllerStopped("hardware released".into()));
        }
        Ok(())
    }

    fn ensure_setup(&mut self, pin: u32) -> Result<()> {
        self.ensure_live()?;
        if !self.levels.contains_key(&pin) {
            self.port.setup(pin)?;
            self.levels.insert(pin, false);
        }
        Ok(())
    }

    fn drive(&mut self, pin: u32, on: bool) -> Result<()> {
        self.ensure_setup(pin)?;
        if on {
            self.port.activate(pin)?;
        } else {
            self.port.deactivate(pin)?;
        }
        self.levels.insert(pin, on);
        Ok(())
    }

    fn state(&mut self, pin: u32) -> Result<bool> {
        self.ensure_setup(pin)?;
        self.port.state(pin)
    }

    /// Drive every configured line low and release the backend
    fn release(&mut self) {
        self.released = true;
        let pins: Vec<u32> = self.levels.keys().copied().collect();
        info!(lines = pins.len(), "Shutting down hardware");

        for pin in pins {
            match self.port.deactivate(pin) {
                Ok(()) => {
                    self.levels.insert(pin, false);
                }
                Err(e) => error!(pin, error = %e, "Failed to deactivate relay during shutdown"),
            }
        }

        if let Err(e) = self.port.release_all() {
            warn!(error = %e, "Failed to release GPIO resources");
        }
    }
}

/// Owns the sensor and actuator backends for the process lifetime
pub struct HardwareManager {
    mode: HardwareMode,
    sensors: Mutex<Box<dyn SensorPort>>,
    actuators: Mutex<ActuatorBank>,
    supports_feedback: bool,
    shut_down: AtomicBool,
}

impl HardwareManager {
    /// Build the backends selected by the hardware settings
    ///
    /// Physical mode fails if the GPIO interface is missing; the caller must
    /// treat that as fatal.
    pub fn from_settings(settings: &HardwareSettings) -> Result<Self> {
        match settings.mode {
            HardwareMode::Simulated => Ok(Self::simulated()),
            HardwareMode::Physical => {
                let relays = SysfsGpioRelays::new(&settings.gpio_dir)?;
                let sensors = W1Sensors::new(&settings.w1_devices_dir);
                Ok(Self::with_backends(
                    HardwareMode::Physical,
                    Box::new(sensors),
                    Box::new(relays),
                ))
            }
        }
    }

    /// Simulated probes and relays
    pub fn simulated() -> Self {
        Self::with_backends(
            HardwareMode::Simulated,
            Box::new(SimulatedSensors::new()),
            Box::new(SimulatedRelays::new()),
        )
    }

    /// Wrap an explicit backend pair
    pub fn with_backends(
        mode: HardwareMode,
        mut sensors: Box<dyn SensorPort>,
        actuators: Box<dyn ActuatorPort>,
    ) -> Self {
        let supports_feedback = sensors.feedback().is_some();
        info!(mode = %mode, feedback = supports_feedback, "Hardware manager initialized");
        Self {
            mode,
            sensors: Mutex::new(sensors),
            actuators: Mutex::new(ActuatorBank::new(actuators)),
            supports_feedback,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    /// Whether the sensor backend accepts thermal feedback
    pub fn supports_feedback(&self) -> bool {
        self.supports_feedback
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(BrewError::ControllerStopped("hardware released".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Sensors
    // ========================================================================

    pub fn read_temperature(&self, sensor_id: &str) -> Result<f64> {
        self.ensure_live()?;
        self.sensors.lock().read_temperature(sensor_id)
    }

    pub fn get_all_sensors(&self) -> Result<Vec<String>> {
        self.sensors.lock().list_sensors()
    }

    /// Read every enumerated sensor for health reporting
    pub fn sensor_status(&self) -> Result<Vec<SensorReading>> {
        let mut sensors = self.sensors.lock();
        let ids = sensors.list_sensors()?;
        let live = !self.is_shut_down();

        Ok(ids
            .into_iter()
            .map(|sensor_id| {
                let temperature = if live {
                    match sensors.read_temperature(&sensor_id) {
                        Ok(t) => Some(t),
                        Err(e) => {
                            debug!(sensor = %sensor_id, error = %e, "Sensor unavailable");
                            None
                        }
                    }
                } else {
                    None
                };
                SensorReading { connected: temperature.is_some(), sensor_id, temperature }
            })
            .collect())
    }

    /// Forward relay levels to the simulation (no-op for physical backends)
    pub fn apply_feedback(&self, sensor_id: &str, heating: bool, cooling: bool) {
        if !self.supports_feedback {
            return;
        }
        let mut sensors = self.sensors.lock();
        if let Some(feedback) = sensors.feedback() {
            feedback.apply(sensor_id, heating, cooling);
        }
    }

    // ========================================================================
    // Actuators
    // ========================================================================

    pub fn activate(&self, pin: u32) -> Result<()> {
        self.actuators.lock().drive(pin, true)
    }

    pub fn deactivate(&self, pin: u32) -> Result<()> {
        self.actuators.lock().drive(pin, false)
    }

    /// Query a line's level from the backend (configures it if needed)
    pub fn actuator_state(&self, pin: u32) -> Result<bool> {
        self.actuators.lock().state(pin)
    }

    /// Last commanded level of every line the manager has configured
    ///
    /// Served from memory so health queries never touch the hardware.
    pub fn actuator_states(&self) -> Vec<ActuatorState> {
        self.actuators
            .lock()
            .levels
            .iter()
            .map(|(&pin, &on)| ActuatorState { pin, on })
            .collect()
    }

    /// Drive every configured line low, then release the backends
    ///
    /// Runs once; later calls return immediately. Failures are logged.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.actuators.lock().release();
    }
}

impl Drop for HardwareManager {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            warn!("Hardware manager dropped without shutdown; forcing relays off");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_setup_round_trip() {
        let hw = HardwareManager::simulated();
        hw.activate(17).unwrap();
        assert!(hw.actuator_state(17).unwrap());
        hw.deactivate(17).unwrap();
        assert!(!hw.actuator_state(17).unwrap());
        assert_eq!(hw.actuator_states(), vec![ActuatorState { pin: 17, on: false }]);
        hw.shutdown();
    }

    #[test]
    fn test_state_query_configures_line_off() {
        let hw = HardwareManager::simulated();
        assert!(!hw.actuator_state(4).unwrap());
        assert_eq!(hw.actuator_states(), vec![ActuatorState { pin: 4, on: false }]);
        hw.shutdown();
    }

    #[test]
    fn test_shutdown_turns_everything_off() {
        let hw = HardwareManager::simulated();
        hw.activate(17).unwrap();
        hw.activate(27).unwrap();
        hw.shutdown();
        assert!(hw.actuator_states().iter().all(|a| !a.on));
        assert!(hw.is_shut_down());
        assert!(matches!(hw.activate(17), Err(BrewError::ControllerStopped(_))));
        // Second call is a no-op
        hw.shutdown();
    }

    #[test]
    fn test_released_bank_refuses_commands() {
        // A caller that already holds a reference when shutdown runs still
        // finds the bank released once it gets the lock
        let mut bank = ActuatorBank::new(Box::new(SimulatedRelays::new()));
        bank.drive(17, true).unwrap();
        bank.release();

        assert!(matches!(bank.drive(17, true), Err(BrewError::ControllerStopped(_))));
        assert!(matches!(bank.drive(5, true), Err(BrewError::ControllerStopped(_))));
        assert!(matches!(bank.state(17), Err(BrewError::ControllerStopped(_))));
        assert_eq!(bank.levels, BTreeMap::from([(17, false)]));
    }

    #[test]
    fn test_simulated_backend_supports_feedback() {
        let hw = HardwareManager::simulated();
        assert!(hw.supports_feedback());
        assert_eq!(hw.mode(), HardwareMode::Simulated);
        hw.shutdown();
    }

    #[test]
    fn test_sensor_status_reports_every_probe() {
        let hw = HardwareManager::simulated();
        let status = hw.sensor_status().unwrap();
        assert_eq!(status.len(), 4);
        assert!(status.iter().all(|s| s.connected && s.temperature.is_some()));
        hw.shutdown();
    }

    #[test]
    fn test_physical_mode_without_gpio_fails() {
        let settings = HardwareSettings {
            mode: HardwareMode::Physical,
            w1_devices_dir: "/nonexistent/w1".into(),
            gpio_dir: "/nonexistent/gpio".into(),
        };
        assert!(matches!(
            HardwareManager::from_settings(&settings),
            Err(BrewError::GpioUnavailable(_))
        ));
    }
}
