//! Controller Settings
//!
//! JSON settings loaded once at startup. Resolution order:
//!
//! 1. Built-in defaults (every field has one, so partial files are fine)
//! 2. The settings file: explicit path, else `/etc/brewbuddy/config.json`,
//!    else `config.json` in the user config directory
//! 3. `BREWBUDDY_*` environment overrides
//!
//! The result is validated before use; validation failures are fatal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{control, paths};
use bb_error::{BrewError, Result};

// ============================================================================
// Environment overrides
// ============================================================================

pub const ENV_HARDWARE_MODE: &str = "BREWBUDDY_HARDWARE_MODE";
pub const ENV_CONTROL_INTERVAL: &str = "BREWBUDDY_CONTROL_INTERVAL";
pub const ENV_HYSTERESIS: &str = "BREWBUDDY_HYSTERESIS";
pub const ENV_SENSOR_TIMEOUT: &str = "BREWBUDDY_SENSOR_TIMEOUT";
pub const ENV_STORE_PATH: &str = "BREWBUDDY_STORE_PATH";
pub const ENV_SOCKET: &str = "BREWBUDDY_SOCKET";

/// Backend selection, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    #[default]
    Simulated,
    Physical,
}

impl fmt::Display for HardwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareMode::Simulated => f.write_str("simulated"),
            HardwareMode::Physical => f.write_str("physical"),
        }
    }
}

impl FromStr for HardwareMode {
    type Err = BrewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "mock" => Ok(HardwareMode::Simulated),
            "physical" | "real" => Ok(HardwareMode::Physical),
            other => Err(BrewError::invalid_config(
                "hardware.mode",
                format!("unknown mode '{}' (expected simulated or physical)", other),
            )),
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub hardware: HardwareSettings,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

/// Hardware backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSettings {
    #[serde(default)]
    pub mode: HardwareMode,

    /// 1-wire device directory (physical mode)
    #[serde(default = "default_w1_dir")]
    pub w1_devices_dir: PathBuf,

    /// sysfs GPIO directory (physical mode)
    #[serde(default = "default_gpio_dir")]
    pub gpio_dir: PathBuf,
}

/// Control loop tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Seconds between ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Deadband half-width in °C
    #[serde(default = "default_hysteresis")]
    pub hysteresis_celsius: f64,

    /// Seconds without a good reading before relays are forced off
    #[serde(default = "default_sensor_timeout")]
    pub sensor_timeout_secs: u64,

    /// Activations per stored relay-cycle increment
    #[serde(default = "default_cycle_sample")]
    pub relay_cycle_sample: u64,

    /// Bounded join when stopping the control thread
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Heater draw for the energy estimate (0 disables it)
    #[serde(default)]
    pub heater_power_watts: f64,

    /// Chiller draw for the energy estimate (0 disables it)
    #[serde(default)]
    pub chiller_power_watts: f64,
}

/// Record store locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON document with batches, vessels and profiles
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// JSON-lines temperature log
    #[serde(default = "default_temperature_log")]
    pub temperature_log: PathBuf,
}

/// Control socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

fn default_w1_dir() -> PathBuf { PathBuf::from(paths::W1_DEVICES) }
fn default_gpio_dir() -> PathBuf { PathBuf::from(paths::GPIO_BASE) }
fn default_interval() -> u64 { control::DEFAULT_INTERVAL_SECS }
fn default_hysteresis() -> f64 { control::DEFAULT_HYSTERESIS_CELSIUS }
fn default_sensor_timeout() -> u64 { control::DEFAULT_SENSOR_TIMEOUT_SECS }
fn default_cycle_sample() -> u64 { control::DEFAULT_RELAY_CYCLE_SAMPLE }
fn default_stop_timeout() -> u64 { control::DEFAULT_STOP_TIMEOUT_SECS }
fn default_store_path() -> PathBuf { Path::new(paths::STATE_DIR).join(paths::STORE_FILE) }
fn default_temperature_log() -> PathBuf { Path::new(paths::STATE_DIR).join(paths::TEMPERATURE_LOG_FILE) }
fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET_PATH) }

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            mode: HardwareMode::default(),
            w1_devices_dir: default_w1_dir(),
            gpio_dir: default_gpio_dir(),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            hysteresis_celsius: default_hysteresis(),
            sensor_timeout_secs: default_sensor_timeout(),
            relay_cycle_sample: default_cycle_sample(),
            stop_timeout_secs: default_stop_timeout(),
            heater_power_watts: 0.0,
            chiller_power_watts: 0.0,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            temperature_log: default_temperature_log(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { socket_path: default_socket_path() }
    }
}

impl ControlSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl ControllerSettings {
    /// Resolve, read, override and validate settings
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match settings_path(explicit)? {
            Some(path) => Self::load_from_file(&path)?,
            None => {
                info!("No settings file found, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a settings file (no overrides, no validation)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| BrewError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: Self = serde_json::from_str(&content).map_err(|e| {
            BrewError::config(format!("Failed to parse settings JSON {:?}: {}", path, e))
        })?;

        info!(path = ?path, "Loaded settings");
        Ok(settings)
    }

    /// Apply `BREWBUDDY_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_HARDWARE_MODE) {
            self.hardware.mode = mode.parse()?;
            debug!(mode = %self.hardware.mode, "Hardware mode overridden from environment");
        }
        if let Some(value) = lookup(ENV_CONTROL_INTERVAL) {
            self.control.interval_secs = parse_override(ENV_CONTROL_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_HYSTERESIS) {
            self.control.hysteresis_celsius = parse_override(ENV_HYSTERESIS, &value)?;
        }
        if let Some(value) = lookup(ENV_SENSOR_TIMEOUT) {
            self.control.sensor_timeout_secs = parse_override(ENV_SENSOR_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_STORE_PATH) {
            self.store.path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SOCKET) {
            self.server.socket_path = PathBuf::from(value);
        }
        Ok(())
    }

    /// Reject configurations the controller cannot run safely with
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;

        if c.interval_secs == 0 {
            return Err(BrewError::invalid_config("control.interval_secs", "must be at least 1"));
        }
        if !c.hysteresis_celsius.is_finite() || c.hysteresis_celsius < 0.0 {
            return Err(BrewError::invalid_config(
                "control.hysteresis_celsius",
                format!("must be a non-negative number, got {}", c.hysteresis_celsius),
            ));
        }
        if c.sensor_timeout_secs < c.interval_secs {
            return Err(BrewError::invalid_config(
                "control.sensor_timeout_secs",
                format!(
                    "{}s is shorter than one control interval ({}s)",
                    c.sensor_timeout_secs, c.interval_secs
                ),
            ));
        }
        if c.relay_cycle_sample == 0 {
            return Err(BrewError::invalid_config("control.relay_cycle_sample", "must be at least 1"));
        }
        for (field, watts) in [
            ("control.heater_power_watts", c.heater_power_watts),
            ("control.chiller_power_watts", c.chiller_power_watts),
        ] {
            if !watts.is_finite() || watts < 0.0 {
                return Err(BrewError::invalid_config(field, format!("invalid power {}", watts)));
            }
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| BrewError::invalid_config(key, format!("'{}': {}", value, e)))
}

/// Pick the settings file to read, if any
fn settings_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(BrewError::config(format!("Settings file {:?} does not exist", path)));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let system = Path::new(paths::CONFIG_DIR).join(paths::SETTINGS_FILE);
    if system.exists() {
        return Ok(Some(system));
    }

    Ok(paths::user_config_dir()
        .map(|dir| dir.join(paths::SETTINGS_FILE))
        .filter(|p| p.exists()))
}
