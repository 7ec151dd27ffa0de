//! 1-wire thermometer backend
//!
//! The kernel's w1-therm driver exposes each DS18B20 as a directory under
//! `/sys/bus/w1/devices` named `28-<serial>`. Its `w1_slave` file holds a
//! two-line status record:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` when the CRC matched. The second carries the
//! reading in millidegrees after `t=`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use super::ports::SensorPort;
use crate::constants::{paths, round_to_hundredths, w1};
use crate::data::validate_sensor_id;
use bb_error::{BrewError, Result};

/// Parse a `w1_slave` status record into °C
pub fn parse_w1_slave(sensor_id: &str, content: &str) -> Result<f64> {
    let mut lines = content.lines();
    let status = lines
        .next()
        .ok_or_else(|| BrewError::sensor_read(sensor_id, "empty status record"))?;

    if !status.trim_end().ends_with(w1::CRC_OK_MARKER) {
        return Err(BrewError::sensor_read(sensor_id, "CRC check failed"));
    }

    let data = lines
        .next()
        .ok_or_else(|| BrewError::sensor_read(sensor_id, "missing data line"))?;

    let marker = data
        .find(w1::TEMPERATURE_MARKER)
        .ok_or_else(|| BrewError::sensor_read(sensor_id, "no temperature marker"))?;

    let raw = data[marker + w1::TEMPERATURE_MARKER.len()..].trim();
    let millidegrees: i64 = raw.parse().map_err(|e| {
        BrewError::sensor_read(sensor_id, format!("Failed to parse '{}': {}", raw, e))
    })?;

    Ok(round_to_hundredths(millidegrees as f64 / w1::MILLIDEGREE_DIVISOR))
}

/// DS18B20 probes on the kernel 1-wire bus
#[derive(Debug, Clone)]
pub struct W1Sensors {
    devices_dir: PathBuf,
}

impl W1Sensors {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self { devices_dir: devices_dir.into() }
    }

    pub fn devices_dir(&self) -> &Path {
        &self.devices_dir
    }

    fn slave_path(&self, sensor_id: &str) -> PathBuf {
        self.devices_dir.join(sensor_id).join(paths::W1_SLAVE_FILE)
    }
}

impl Default for W1Sensors {
    fn default() -> Self {
        Self::new(paths::W1_DEVICES)
    }
}

impl SensorPort for W1Sensors {
    fn read_temperature(&mut self, sensor_id: &str) -> Result<f64> {
        validate_sensor_id(sensor_id)?;
        let path = self.slave_path(sensor_id);

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BrewError::SensorNotFound(sensor_id.to_string()),
            _ => BrewError::sensor_read(sensor_id, format!("Failed to read {:?}: {}", path, e)),
        })?;

        let celsius = parse_w1_slave(sensor_id, &content)?;
        trace!(sensor = %sensor_id, celsius, "1-wire read");
        Ok(celsius)
    }

    fn list_sensors(&self) -> Result<Vec<String>> {
        if !self.devices_dir.is_dir() {
            warn!(dir = ?self.devices_dir, "1-wire device directory not found");
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.devices_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(w1::THERMOMETER_PREFIX) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        debug!(count = ids.len(), "Enumerated 1-wire thermometers");
        Ok(ids)
    }
}
