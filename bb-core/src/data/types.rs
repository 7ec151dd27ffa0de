//! Core data types for BrewBuddy
//!
//! Batches, vessels and phase schedules are owned by the external record
//! store; the controller only holds read-only projections of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a fermentation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Scheduled,
    Active,
    Complete,
    Cancelled,
}

/// One fermentation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Reference to the phase schedule (fermentation profile)
    pub profile_id: i64,
    pub vessel_id: i64,
    /// Absent until the batch is started
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub status: BatchStatus,
}

/// A temperature-controlled fermenter with one probe and two relays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub sensor_id: String,
    pub heater_pin: u32,
    pub chiller_pin: u32,
    /// Approximate cumulative relay activations (sampled)
    #[serde(default)]
    pub relay_cycle_count: u64,
}

/// One segment of a phase schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub sequence_order: u32,
    pub duration_hours: f64,
    pub target_celsius: f64,
}

/// Per-tick actuation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Heating,
    Cooling,
    Idle,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Heating => "heating",
            ControlState::Cooling => "cooling",
            ControlState::Idle => "idle",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of a vessel's two relays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relay {
    Heater,
    Chiller,
}

impl Relay {
    /// GPIO line of this relay on the given vessel
    pub fn pin_of(&self, vessel: &Vessel) -> u32 {
        match self {
            Relay::Heater => vessel.heater_pin,
            Relay::Chiller => vessel.chiller_pin,
        }
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relay::Heater => f.write_str("heater"),
            Relay::Chiller => f.write_str("chiller"),
        }
    }
}

/// One control-loop sample, appended to the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRecord {
    pub batch_id: i64,
    pub timestamp: DateTime<Utc>,
    pub actual_celsius: f64,
    pub target_celsius: f64,
    pub control_state: ControlState,
    /// Estimated energy drawn during this tick (Wh)
    #[serde(default)]
    pub energy_wh: f64,
}

/// Reading reported for one enumerated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub connected: bool,
    pub temperature: Option<f64>,
}

/// Last known level of a configured actuator line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub pin: u32,
    pub on: bool,
}
