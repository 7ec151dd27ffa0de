//! Simulated hardware
//!
//! Fake probes whose temperature wanders with wall-clock time and responds
//! to relay feedback, plus in-memory relays. Used when no 1-wire bus or GPIO
//! header is present.
//!
//! # Drift Model
//!
//! Each read adds a uniform random variation of up to
//! `NOISE_PER_SECOND * elapsed_seconds`, then clamps to the plausible range
//! and rounds to two decimals. Feedback nudges the stored value by a fixed
//! step per control tick: up while heating, down while cooling, and toward
//! ambient while idle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, trace};

use super::ports::{ActuatorPort, SensorPort, ThermalFeedback};
use crate::constants::{round_to_hundredths, simulation};
use bb_error::{BrewError, Result};

#[derive(Debug, Clone)]
struct SimProbe {
    celsius: f64,
    last_read: Instant,
}

/// Drift-based fake temperature probes
#[derive(Debug)]
pub struct SimulatedSensors {
    probes: BTreeMap<String, SimProbe>,
    rng: StdRng,
    noise_per_second: f64,
}

impl SimulatedSensors {
    /// The four built-in probes at their default starting temperatures
    pub fn new() -> Self {
        Self::with_sensors(simulation::DEFAULT_SENSORS.iter().copied())
    }

    /// Probes with explicit starting temperatures
    pub fn with_sensors<I, S>(sensors: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let now = Instant::now();
        let probes = sensors
            .into_iter()
            .map(|(id, celsius)| (id.into(), SimProbe { celsius, last_read: now }))
            .collect();
        Self {
            probes,
            rng: StdRng::from_entropy(),
            noise_per_second: simulation::NOISE_PER_SECOND,
        }
    }

    /// Use a fixed RNG seed for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Disable random variation; readings then only move through feedback
    pub fn without_noise(mut self) -> Self {
        self.noise_per_second = 0.0;
        self
    }

    /// Current internal temperature of a probe (unrounded)
    pub fn peek(&self, sensor_id: &str) -> Option<f64> {
        self.probes.get(sensor_id).map(|p| p.celsius)
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_plausible(celsius: f64) -> f64 {
    celsius.clamp(simulation::MIN_CELSIUS, simulation::MAX_CELSIUS)
}

impl SensorPort for SimulatedSensors {
    fn read_temperature(&mut self, sensor_id: &str) -> Result<f64> {
        let probe = self
            .probes
            .get_mut(sensor_id)
            .ok_or_else(|| BrewError::SensorNotFound(sensor_id.to_string()))?;

        let now = Instant::now();
        let elapsed = now.duration_since(probe.last_read).as_secs_f64();
        probe.last_read = now;

        if self.noise_per_second > 0.0 {
            let variation = self.rng.gen_range(-self.noise_per_second..=self.noise_per_second);
            probe.celsius += variation * elapsed;
        }
        probe.celsius = clamp_plausible(probe.celsius);

        let reading = round_to_hundredths(probe.celsius);
        trace!(sensor = %sensor_id, celsius = reading, "Simulated read");
        Ok(reading)
    }

    fn list_sensors(&self) -> Result<Vec<String>> {
        Ok(self.probes.keys().cloned().collect())
    }

    fn feedback(&mut self) -> Option<&mut dyn ThermalFeedback> {
        Some(self)
    }
}

impl ThermalFeedback for SimulatedSensors {
    fn apply(&mut self, sensor_id: &str, heating: bool, cooling: bool) {
        let Some(probe) = self.probes.get_mut(sensor_id) else {
            return;
        };

        let ambient = simulation::AMBIENT_CELSIUS;
        if heating {
            probe.celsius += simulation::HEATING_STEP;
        } else if cooling {
            probe.celsius -= simulation::COOLING_STEP;
        } else if probe.celsius > ambient {
            probe.celsius = (probe.celsius - simulation::AMBIENT_DRIFT_STEP).max(ambient);
        } else if probe.celsius < ambient {
            probe.celsius = (probe.celsius + simulation::AMBIENT_DRIFT_STEP).min(ambient);
        }
        probe.celsius = clamp_plausible(probe.celsius);
    }
}

/// In-memory relay lines
#[derive(Debug, Default)]
pub struct SimulatedRelays {
    lines: HashMap<u32, bool>,
}

impl SimulatedRelays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines currently configured
    pub fn configured(&self) -> usize {
        self.lines.len()
    }
}

impl ActuatorPort for SimulatedRelays {
    fn setup(&mut self, pin: u32) -> Result<()> {
        if !self.lines.contains_key(&pin) {
            debug!(pin, "Simulated GPIO line configured as output");
            self.lines.insert(pin, false);
        }
        Ok(())
    }

    fn activate(&mut self, pin: u32) -> Result<()> {
        self.setup(pin)?;
        self.lines.insert(pin, true);
        trace!(pin, "Simulated relay on");
        Ok(())
    }

    fn deactivate(&mut self, pin: u32) -> Result<()> {
        self.setup(pin)?;
        self.lines.insert(pin, false);
        trace!(pin, "Simulated relay off");
        Ok(())
    }

    fn state(&mut self, pin: u32) -> Result<bool> {
        self.setup(pin)?;
        Ok(self.lines.get(&pin).copied().unwrap_or(false))
    }

    fn release_all(&mut self) -> Result<()> {
        debug!(lines = self.lines.len(), "Releasing simulated GPIO lines");
        self.lines.clear();
        Ok(())
    }
}
