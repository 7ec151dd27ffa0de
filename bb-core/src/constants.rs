//! Constants and configuration values for BrewBuddy
//!
//! Centralizes magic numbers, paths, and configuration defaults.
//! Add new values here rather than scattering literals through the crate.

use std::time::Duration;

/// Filesystem locations used by the controller
pub mod paths {
    use std::path::PathBuf;

    /// Directory where the kernel exposes 1-wire slave devices
    pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

    /// Per-device status file inside a 1-wire slave directory
    pub const W1_SLAVE_FILE: &str = "w1_slave";

    /// sysfs GPIO class directory
    pub const GPIO_BASE: &str = "/sys/class/gpio";

    /// System-wide configuration directory
    pub const CONFIG_DIR: &str = "/etc/brewbuddy";

    /// Settings file name (inside CONFIG_DIR or the user config dir)
    pub const SETTINGS_FILE: &str = "config.json";

    /// State directory for the JSON record store and temperature log
    pub const STATE_DIR: &str = "/var/lib/brewbuddy";

    /// Record document written by the record-keeping service
    pub const STORE_FILE: &str = "records.json";

    /// Append-only temperature log (JSON lines)
    pub const TEMPERATURE_LOG_FILE: &str = "temperature-log.jsonl";

    /// Control socket path
    pub const SOCKET_PATH: &str = "/run/brewbuddy.sock";

    /// User configuration directory (`$XDG_CONFIG_HOME/brewbuddy` or platform equivalent)
    pub fn user_config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .map(|p| p.join("brewbuddy"))
    }
}

/// 1-wire thermometer protocol details
pub mod w1 {
    /// Family code prefix of DS18B20 thermometers
    pub const THERMOMETER_PREFIX: &str = "28-";

    /// Marker at the end of the first status line when the CRC matched
    pub const CRC_OK_MARKER: &str = "YES";

    /// Marker preceding the raw reading on the second status line
    pub const TEMPERATURE_MARKER: &str = "t=";

    /// Raw readings are reported in millidegrees
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;

    /// Kernel modules that provide the 1-wire bus and thermometer driver
    pub const KERNEL_MODULES: [&str; 2] = ["w1-gpio", "w1-therm"];
}

/// sysfs GPIO line values
pub mod gpio {
    pub const EXPORT_FILE: &str = "export";
    pub const UNEXPORT_FILE: &str = "unexport";
    pub const DIRECTION_OUT: &str = "out";
    pub const LEVEL_HIGH: &str = "1";
    pub const LEVEL_LOW: &str = "0";
}

/// Control loop defaults
pub mod control {
    use super::Duration;

    /// Seconds between control ticks
    pub const DEFAULT_INTERVAL_SECS: u64 = 10;

    /// Deadband half-width around the target (°C)
    pub const DEFAULT_HYSTERESIS_CELSIUS: f64 = 0.5;

    /// Seconds without a successful read before the safety cutoff
    pub const DEFAULT_SENSOR_TIMEOUT_SECS: u64 = 60;

    /// Relay activations per stored counter increment
    pub const DEFAULT_RELAY_CYCLE_SAMPLE: u64 = 100;

    /// Bounded wait for the control thread to exit on stop
    pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

    /// Log the first error and then every Nth consecutive one
    pub const ERROR_LOG_EVERY: u32 = 10;

    /// Thread name used for the background loop
    pub const THREAD_NAME: &str = "temperature-control";

    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(DEFAULT_INTERVAL_SECS);
}

/// Simulated hardware model
pub mod simulation {
    /// Initial temperatures of the built-in simulated probes
    pub const DEFAULT_SENSORS: [(&str, f64); 4] = [
        ("28-00000001", 18.0),
        ("28-00000002", 19.0),
        ("28-00000003", 20.0),
        ("28-00000004", 21.0),
    ];

    /// Temperature that idle vessels drift toward (°C)
    pub const AMBIENT_CELSIUS: f64 = 20.0;

    /// Per-tick change while a heater is energized
    pub const HEATING_STEP: f64 = 0.05;

    /// Per-tick change while a chiller is energized
    pub const COOLING_STEP: f64 = 0.05;

    /// Per-tick drift toward ambient while idle
    pub const AMBIENT_DRIFT_STEP: f64 = 0.01;

    /// Maximum random variation per elapsed second of wall time
    pub const NOISE_PER_SECOND: f64 = 0.1;

    /// Plausible temperature range for a simulated probe
    pub const MIN_CELSIUS: f64 = 0.0;
    pub const MAX_CELSIUS: f64 = 40.0;
}

/// IPC limits shared by the daemon and its clients
pub mod ipc {
    pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;
    pub const READ_TIMEOUT_SECS: u64 = 30;
    pub const WRITE_TIMEOUT_SECS: u64 = 10;
    pub const MAX_CONNECTIONS: usize = 32;
}

/// Round to two decimal places, the resolution every temperature is reported at
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
