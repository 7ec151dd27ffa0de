//! sysfs GPIO relay backend
//!
//! Relay boards are driven through the kernel's sysfs GPIO interface:
//! writing a line number to `export` creates `gpioN/`, whose `direction`
//! and `value` files configure and drive the line. Releasing a line drives
//! it low and writes the number to `unexport`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use super::ports::ActuatorPort;
use crate::constants::{gpio, paths};
use bb_error::{BrewError, Result};

/// Relay lines driven through `/sys/class/gpio`
#[derive(Debug)]
pub struct SysfsGpioRelays {
    base: PathBuf,
    /// Lines this process configured, with their last written level
    lines: BTreeMap<u32, bool>,
}

impl SysfsGpioRelays {
    /// Bind to a sysfs GPIO directory
    ///
    /// Fails with `GpioUnavailable` when the directory has no `export`
    /// interface (no GPIO controller or sysfs GPIO compiled out).
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        if !base.join(gpio::EXPORT_FILE).exists() {
            return Err(BrewError::GpioUnavailable(format!(
                "{:?} has no export interface",
                base
            )));
        }
        info!(base = ?base, "Using sysfs GPIO for relays");
        Ok(Self { base, lines: BTreeMap::new() })
    }

    /// Bind to the system GPIO directory
    pub fn system() -> Result<Self> {
        Self::new(paths::GPIO_BASE)
    }

    fn line_dir(&self, pin: u32) -> PathBuf {
        self.base.join(format!("gpio{}", pin))
    }

    fn write_attr(&self, pin: u32, path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| {
            BrewError::actuator(pin, format!("Failed to write '{}' to {:?}: {}", value, path, e))
        })
    }

    fn write_level(&mut self, pin: u32, on: bool) -> Result<()> {
        let level = if on { gpio::LEVEL_HIGH } else { gpio::LEVEL_LOW };
        let value_path = self.line_dir(pin).join("value");
        self.write_attr(pin, &value_path, level)?;
        self.lines.insert(pin, on);
        trace!(pin, on, "GPIO level written");
        Ok(())
    }
}

impl ActuatorPort for SysfsGpioRelays {
    fn setup(&mut self, pin: u32) -> Result<()> {
        if self.lines.contains_key(&pin) {
            return Ok(());
        }

        let line = self.line_dir(pin);
        if !line.exists() {
            let export = self.base.join(gpio::EXPORT_FILE);
            self.write_attr(pin, &export, &pin.to_string())?;
        }

        self.write_attr(pin, &line.join("direction"), gpio::DIRECTION_OUT)?;
        self.write_level(pin, false)?;
        debug!(pin, "GPIO line configured as output (low)");
        Ok(())
    }

    fn activate(&mut self, pin: u32) -> Result<()> {
        self.setup(pin)?;
        self.write_level(pin, true)
    }

    fn deactivate(&mut self, pin: u32) -> Result<()> {
        self.setup(pin)?;
        self.write_level(pin, false)
    }

    fn state(&mut self, pin: u32) -> Result<bool> {
        self.setup(pin)?;
        let value_path = self.line_dir(pin).join("value");
        let content = fs::read_to_string(&value_path).map_err(|e| {
            BrewError::actuator(pin, format!("Failed to read {:?}: {}", value_path, e))
        })?;
        Ok(content.trim() == gpio::LEVEL_HIGH)
    }

    fn release_all(&mut self) -> Result<()> {
        let pins: Vec<u32> = self.lines.keys().copied().collect();
        let mut first_error = None;

        for pin in pins {
            let released = self
                .write_level(pin, false)
                .and_then(|_| {
                    let unexport = self.base.join(gpio::UNEXPORT_FILE);
                    self.write_attr(pin, &unexport, &pin.to_string())
                });
            if let Err(e) = released {
                warn!(pin, error = %e, "Failed to release GPIO line");
                first_error.get_or_insert(e);
            }
        }

        self.lines.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
