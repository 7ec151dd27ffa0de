//! Sensor liveness tracking
//!
//! Remembers when each sensor last produced a good reading. A sensor whose
//! last good reading is older than the timeout window is considered dead.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SensorLiveness {
    timeout: ChronoDuration,
    last_ok: HashMap<String, DateTime<Utc>>,
}

impl SensorLiveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::max_value()),
            last_ok: HashMap::new(),
        }
    }

    /// Start the clock for a sensor that has never been read
    pub fn seed(&mut self, sensor_id: &str, now: DateTime<Utc>) {
        self.last_ok.entry(sensor_id.to_string()).or_insert(now);
    }

    pub fn record_success(&mut self, sensor_id: &str, now: DateTime<Utc>) {
        self.last_ok.insert(sensor_id.to_string(), now);
    }

    pub fn last_success(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        self.last_ok.get(sensor_id).copied()
    }

    /// True once the sensor has gone longer than the window without a good read
    pub fn is_timed_out(&self, sensor_id: &str, now: DateTime<Utc>) -> bool {
        match self.last_ok.get(sensor_id) {
            Some(&last) => now - last > self.timeout,
            None => false,
        }
    }

    pub fn forget(&mut self, sensor_id: &str) {
        self.last_ok.remove(sensor_id);
    }
}
