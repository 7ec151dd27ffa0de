//! Controller status reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{ActuatorState, ControlState};
use crate::settings::HardwareMode;

/// Point-in-time view of the controller for health queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub hardware_mode: HardwareMode,
    pub tick_count: u64,
    pub last_tick: Option<DateTime<Utc>>,
    /// Error that aborted the most recent tick, if any
    pub last_error: Option<String>,
    pub batches: Vec<BatchControlStatus>,
    /// Every actuator line the hardware manager has configured
    pub actuators: Vec<ActuatorState>,
}

impl ControllerStatus {
    /// Number of actuator lines currently energized
    pub fn energized(&self) -> usize {
        self.actuators.iter().filter(|a| a.on).count()
    }
}

/// One tracked batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchControlStatus {
    pub batch_id: i64,
    pub batch_name: String,
    pub vessel_id: i64,
    pub vessel_name: String,
    pub sensor_id: String,
    pub heater_pin: u32,
    pub chiller_pin: u32,
    pub heater_on: bool,
    pub chiller_on: bool,
    pub actual_celsius: Option<f64>,
    pub target_celsius: Option<f64>,
    pub control_state: Option<ControlState>,
    pub last_sample: Option<DateTime<Utc>>,
    pub phase_index: Option<usize>,
    pub phase_progress: Option<f64>,
    pub sensor_timed_out: bool,
    pub last_error: Option<String>,
}
