//! Hysteresis actuation rule
//!
//! Heat when strictly below `target - band`, cool when strictly above
//! `target + band`, otherwise idle. Both boundaries belong to the idle band.

use crate::data::ControlState;

/// Deadband controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    band: f64,
}

impl Hysteresis {
    /// Create a controller with the given half-width (negative values clamp to 0)
    pub fn new(band: f64) -> Self {
        Self { band: band.max(0.0) }
    }

    pub fn band(&self) -> f64 {
        self.band
    }

    /// Actuation decision for one observation
    pub fn decide(&self, actual: f64, target: f64) -> ControlState {
        if actual < target - self.band {
            ControlState::Heating
        } else if actual > target + self.band {
            ControlState::Cooling
        } else {
            ControlState::Idle
        }
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self::new(crate::constants::control::DEFAULT_HYSTERESIS_CELSIUS)
    }
}
