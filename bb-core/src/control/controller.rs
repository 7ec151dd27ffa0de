//! Temperature controller lifecycle
//!
//! Owns the background thread that runs the [`ControlLoop`], and exposes
//! the operations the serving layer needs: start, stop, status and manual
//! relay override.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::control_loop::{ControlLoop, LoopState};
use super::status::ControllerStatus;
use crate::constants::control::THREAD_NAME;
use crate::data::{Relay, SensorReading};
use crate::hw::HardwareManager;
use crate::settings::ControlSettings;
use crate::store::RecordStore;
use bb_error::{BrewError, Result};

// ============================================================================
// Stop signal
// ============================================================================

#[derive(Debug, Default)]
struct Flags {
    stop_requested: bool,
    exited: bool,
}

/// Wakes the loop thread early on stop and reports when it has exited
#[derive(Debug, Default)]
struct StopSignal {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl StopSignal {
    fn request_stop(&self) {
        self.flags.lock().stop_requested = true;
        self.changed.notify_all();
    }

    fn is_stop_requested(&self) -> bool {
        self.flags.lock().stop_requested
    }

    /// Sleep for the interval; returns true if a stop was requested
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut flags = self.flags.lock();
        while !flags.stop_requested {
            if self.changed.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        flags.stop_requested
    }

    fn mark_exited(&self) {
        self.flags.lock().exited = true;
        self.changed.notify_all();
    }

    /// Wait for the thread to report exit; false on timeout
    fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !flags.exited {
            if self.changed.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        flags.exited
    }
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

// ============================================================================
// Controller
// ============================================================================

/// Runs fermentation control on a dedicated thread
pub struct TemperatureController {
    hardware: Arc<HardwareManager>,
    store: Arc<dyn RecordStore>,
    settings: ControlSettings,
    state: Arc<Mutex<LoopState>>,
    signal: Arc<StopSignal>,
    lifecycle: Mutex<Lifecycle>,
}

impl TemperatureController {
    pub fn new(
        hardware: Arc<HardwareManager>,
        store: Arc<dyn RecordStore>,
        settings: ControlSettings,
    ) -> Self {
        Self {
            hardware,
            store,
            settings,
            state: Arc::new(Mutex::new(LoopState::default())),
            signal: Arc::new(StopSignal::default()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn hardware(&self) -> &Arc<HardwareManager> {
        &self.hardware
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Spawn the control thread
    ///
    /// Starting a running controller is a no-op. A stopped controller has
    /// released its hardware and cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => {
                info!("Temperature controller already running");
                return Ok(());
            }
            Lifecycle::Stopped => {
                warn!("Temperature controller was stopped; refusing to restart");
                return Err(BrewError::ControllerStopped("hardware already released".into()));
            }
            Lifecycle::Idle => {}
        }

        let mut control = ControlLoop::with_state(
            Arc::clone(&self.hardware),
            Arc::clone(&self.store),
            &self.settings,
            Arc::clone(&self.state),
        );
        let signal = Arc::clone(&self.signal);
        let interval = self.settings.interval();

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                while !signal.is_stop_requested() {
                    if panic::catch_unwind(AssertUnwindSafe(|| control.tick())).is_err() {
                        error!("Control tick panicked; continuing on next tick");
                    }
                    if signal.wait(interval) {
                        break;
                    }
                }
                debug!("Control thread exiting");
                signal.mark_exited();
            })
            .map_err(|e| BrewError::generic(format!("Failed to spawn control thread: {}", e)))?;

        *lifecycle = Lifecycle::Running(handle);
        info!(
            interval_secs = self.settings.interval_secs,
            hysteresis = self.settings.hysteresis_celsius,
            sensor_timeout_secs = self.settings.sensor_timeout_secs,
            "Temperature controller started"
        );
        Ok(())
    }

    /// Stop the thread, turn every relay off and release the hardware
    ///
    /// Blocks until the thread exits or the stop timeout elapses. Calling
    /// stop again is a no-op.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);

        match previous {
            Lifecycle::Stopped => {
                debug!("Temperature controller already stopped");
                return;
            }
            Lifecycle::Idle => {}
            Lifecycle::Running(handle) => {
                self.signal.request_stop();
                let timeout = self.settings.stop_timeout();
                if self.signal.wait_exited(timeout) {
                    if handle.join().is_err() {
                        error!("Control thread panicked");
                    }
                } else {
                    warn!(timeout_secs = timeout.as_secs(), "Control thread did not exit in time; detaching");
                }
            }
        }

        match self.state.try_lock_for(self.settings.stop_timeout()) {
            Some(state) => {
                for snapshot in state.snapshots.values() {
                    for pin in [snapshot.vessel.heater_pin, snapshot.vessel.chiller_pin] {
                        if let Err(e) = self.hardware.deactivate(pin) {
                            error!(batch_id = snapshot.batch.id, pin, error = %e, "Failed to deactivate relay on stop");
                        }
                    }
                }
                self.hardware.shutdown();
            }
            None => {
                warn!("Control state still locked; releasing hardware directly");
                self.hardware.shutdown();
            }
        }

        info!("Temperature controller stopped");
    }

    /// Tracked batches, last samples and actuator levels
    pub fn status(&self) -> ControllerStatus {
        let running = self.is_running();
        self.state.lock().report(&self.hardware, running)
    }

    /// Read every sensor the backend can see
    pub fn sensor_status(&self) -> Result<Vec<SensorReading>> {
        self.hardware.sensor_status()
    }

    /// Drive one relay of an idle vessel by hand
    ///
    /// Rejected while the loop tracks a batch on the vessel or the store
    /// lists one as active. The snapshot lock is held for the whole command
    /// so the loop cannot adopt the vessel halfway through.
    pub fn manual_override(&self, vessel_id: i64, relay: Relay, on: bool) -> Result<()> {
        let state = self.state.lock();

        if self.hardware.is_shut_down() {
            return Err(BrewError::ControllerStopped("hardware released".into()));
        }

        if let Some(batch_id) = state.batch_on_vessel(vessel_id) {
            return Err(BrewError::ManualOverrideRejected { vessel_id, batch_id });
        }

        if let Some(batch) = self
            .store
            .active_batches()?
            .into_iter()
            .find(|b| b.vessel_id == vessel_id)
        {
            return Err(BrewError::ManualOverrideRejected { vessel_id, batch_id: batch.id });
        }

        let vessel = self
            .store
            .vessel(vessel_id)?
            .ok_or(BrewError::NotFound { kind: "vessel", id: vessel_id })?;

        let pin = relay.pin_of(&vessel);
        if on {
            self.hardware.activate(pin)?;
        } else {
            self.hardware.deactivate(pin)?;
        }
        info!(vessel_id, relay = %relay, pin, on, "Manual relay command");
        Ok(())
    }
}

impl Drop for TemperatureController {
    fn drop(&mut self) {
        if !matches!(*self.lifecycle.lock(), Lifecycle::Stopped) {
            self.stop();
        }
    }
}
