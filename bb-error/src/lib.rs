//! Unified error handling for BrewBuddy
//!
//! This crate provides a single error type used across all BrewBuddy components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using BrewError
pub type Result<T> = std::result::Result<T, BrewError>;

/// Unified error type for all BrewBuddy operations
#[derive(thiserror::Error, Debug)]
pub enum BrewError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sensor Errors
    // ============================================================================
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    #[error("Failed to read sensor {sensor_id}: {reason}")]
    SensorRead {
        sensor_id: String,
        reason: String,
    },

    #[error("Invalid sensor id: {0}")]
    InvalidSensorId(String),

    // ============================================================================
    // Actuator / GPIO Errors
    // ============================================================================
    #[error("Failed to drive actuator {pin}: {reason}")]
    ActuatorWrite {
        pin: u32,
        reason: String,
    },

    #[error("GPIO interface unavailable: {0}")]
    GpioUnavailable(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Record Store Errors
    // ============================================================================
    #[error("Record store error: {0}")]
    Store(String),

    #[error("{kind} {id} not found")]
    NotFound {
        kind: &'static str,
        id: i64,
    },

    #[error("Invalid phase schedule: {0}")]
    InvalidSchedule(String),

    // ============================================================================
    // Control Errors
    // ============================================================================
    #[error("Manual control rejected: vessel {vessel_id} is running batch {batch_id}")]
    ManualOverrideRejected {
        vessel_id: i64,
        batch_id: i64,
    },

    #[error("Controller stopped: {0}")]
    ControllerStopped(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl BrewError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a record store error from a string
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a sensor read error
    pub fn sensor_read(sensor_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            sensor_id: sensor_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an actuator write error
    pub fn actuator(pin: u32, reason: impl Into<String>) -> Self {
        Self::ActuatorWrite {
            pin,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = BrewError::ManualOverrideRejected { vessel_id: 3, batch_id: 17 };
        assert_eq!(
            err.to_string(),
            "Manual control rejected: vessel 3 is running batch 17"
        );

        let err = BrewError::actuator(22, "permission denied");
        assert_eq!(err.to_string(), "Failed to drive actuator 22: permission denied");
    }

    #[test]
    fn test_helpers_build_expected_variants() {
        assert!(matches!(
            BrewError::sensor_read("28-0001", "CRC"),
            BrewError::SensorRead { ref sensor_id, .. } if sensor_id == "28-0001"
        ));
        assert!(matches!(BrewError::generic("boom"), BrewError::Generic(ref m) if m == "boom"));
        assert_eq!(
            BrewError::invalid_config("hysteresis_celsius", "must be positive").to_string(),
            "Invalid configuration value for hysteresis_celsius: must be positive"
        );
    }
}
