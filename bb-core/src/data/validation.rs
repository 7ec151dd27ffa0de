//! Input validation for BrewBuddy
//!
//! Sensor identifiers end up in filesystem paths under the 1-wire device
//! directory, so they are restricted to a plain identifier alphabet. Phase
//! schedules come from an external store and are checked before use.

use std::collections::HashSet;

use crate::data::Phase;
use bb_error::{BrewError, Result};

/// Longest accepted sensor identifier
const MAX_SENSOR_ID_LEN: usize = 64;

/// Validate a sensor identifier (no separators, no traversal)
pub fn validate_sensor_id(sensor_id: &str) -> Result<()> {
    if sensor_id.is_empty() {
        return Err(BrewError::InvalidSensorId("empty identifier".into()));
    }
    if sensor_id.len() > MAX_SENSOR_ID_LEN {
        return Err(BrewError::InvalidSensorId(format!(
            "identifier longer than {} characters",
            MAX_SENSOR_ID_LEN
        )));
    }
    if sensor_id.starts_with('.') {
        return Err(BrewError::InvalidSensorId(sensor_id.to_string()));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !sensor_id.chars().all(allowed) {
        return Err(BrewError::InvalidSensorId(sensor_id.to_string()));
    }
    Ok(())
}

/// Validate a phase schedule
///
/// Durations must be finite and non-negative, targets finite, and the
/// sequence order strictly increasing with no duplicates.
pub fn validate_phases(phases: &[Phase]) -> Result<()> {
    let mut seen = HashSet::with_capacity(phases.len());
    let mut previous: Option<u32> = None;

    for phase in phases {
        if !phase.duration_hours.is_finite() || phase.duration_hours < 0.0 {
            return Err(BrewError::InvalidSchedule(format!(
                "phase {} has invalid duration {}",
                phase.sequence_order, phase.duration_hours
            )));
        }
        if !phase.target_celsius.is_finite() {
            return Err(BrewError::InvalidSchedule(format!(
                "phase {} has non-finite target",
                phase.sequence_order
            )));
        }
        if !seen.insert(phase.sequence_order) {
            return Err(BrewError::InvalidSchedule(format!(
                "duplicate sequence order {}",
                phase.sequence_order
            )));
        }
        if let Some(prev) = previous {
            if phase.sequence_order < prev {
                return Err(BrewError::InvalidSchedule(format!(
                    "phase {} listed after phase {}",
                    phase.sequence_order, prev
                )));
            }
        }
        previous = Some(phase.sequence_order);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(order: u32, hours: f64, target: f64) -> Phase {
        Phase { sequence_order: order, duration_hours: hours, target_celsius: target }
    }

    #[test]
    fn test_valid_sensor_ids() {
        assert!(validate_sensor_id("28-00000001").is_ok());
        assert!(validate_sensor_id("28-3c01d607d4aa").is_ok());
    }

    #[test]
    fn test_invalid_sensor_ids() {
        assert!(validate_sensor_id("").is_err());
        assert!(validate_sensor_id("../../etc/passwd").is_err());
        assert!(validate_sensor_id("28-0001/w1_slave").is_err());
        assert!(validate_sensor_id("..").is_err());
        assert!(validate_sensor_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_valid_schedule() {
        let phases = vec![phase(1, 24.0, 20.0), phase(2, 0.0, 18.0), phase(5, 72.0, 2.0)];
        assert!(validate_phases(&phases).is_ok());
        assert!(validate_phases(&[]).is_ok());
    }

    #[test]
    fn test_rejects_negative_duration() {
        let err = validate_phases(&[phase(1, -1.0, 20.0)]).unwrap_err();
        assert!(matches!(err, BrewError::InvalidSchedule(_)));
    }

    #[test]
    fn test_rejects_duplicate_and_unordered() {
        assert!(validate_phases(&[phase(1, 1.0, 20.0), phase(1, 1.0, 18.0)]).is_err());
        assert!(validate_phases(&[phase(2, 1.0, 20.0), phase(1, 1.0, 18.0)]).is_err());
    }

    #[test]
    fn test_rejects_non_finite_values() {
        assert!(validate_phases(&[phase(1, f64::NAN, 20.0)]).is_err());
        assert!(validate_phases(&[phase(1, 1.0, f64::INFINITY)]).is_err());
    }
}
