//! Control Loop (Hardened)
//!
//! One tick of fermentation temperature control. The loop is driven by
//! [`TemperatureController`](super::TemperatureController) on a background
//! thread, but a tick can also be run directly with [`ControlLoop::tick_at`].
//!
//! # Tick
//!
//! 1. **Reconcile**: fetch active batches from the record store, release the
//!    relays of batches that left the active set, adopt new ones
//! 2. **Process** every snapshot independently: read the probe, evaluate the
//!    schedule, apply hysteresis, append a temperature record
//! 3. **Feedback**: tell a simulated backend what the relays are doing
//!
//! # Safety Features
//! - **Sensor timeout**: relays forced off once per timeout episode
//! - **Failure isolation**: one batch failing never blocks the others
//! - **Store failures**: caught at the tick boundary, retried next tick
//! - **Error throttling**: first failure and every 10th consecutive one logged

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::liveness::SensorLiveness;
use super::status::{BatchControlStatus, ControllerStatus};
use crate::constants::control::ERROR_LOG_EVERY;
use crate::data::{validate_phases, Batch, ControlState, Phase, TemperatureRecord, Vessel};
use crate::engine::{current_phase, Hysteresis, PhaseProgress};
use crate::hw::HardwareManager;
use crate::settings::ControlSettings;
use crate::store::RecordStore;
use bb_error::{BrewError, Result};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy)]
struct LastSample {
    at: DateTime<Utc>,
    actual: f64,
    target: Option<f64>,
    state: ControlState,
}

/// Control-loop-owned view of one active batch
#[derive(Debug, Clone)]
pub(crate) struct ControlSnapshot {
    pub(crate) batch: Batch,
    pub(crate) vessel: Vessel,
    last_sample: Option<LastSample>,
    progress: Option<PhaseProgress>,
    timed_out: bool,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl ControlSnapshot {
    fn new(batch: Batch, vessel: Vessel) -> Self {
        Self {
            batch,
            vessel,
            last_sample: None,
            progress: None,
            timed_out: false,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// State shared between the loop and status/override callers
#[derive(Debug, Default)]
pub(crate) struct LoopState {
    pub(crate) snapshots: BTreeMap<i64, ControlSnapshot>,
    tick_count: u64,
    last_tick: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl LoopState {
    /// Snapshot currently controlling the given vessel
    pub(crate) fn batch_on_vessel(&self, vessel_id: i64) -> Option<i64> {
        self.snapshots
            .values()
            .find(|s| s.vessel.id == vessel_id)
            .map(|s| s.batch.id)
    }

    pub(crate) fn report(&self, hardware: &HardwareManager, running: bool) -> ControllerStatus {
        let actuators = hardware.actuator_states();
        let level = |pin: u32| actuators.iter().any(|a| a.pin == pin && a.on);

        let batches = self
            .snapshots
            .values()
            .map(|s| BatchControlStatus {
                batch_id: s.batch.id,
                batch_name: s.batch.name.clone(),
                vessel_id: s.vessel.id,
                vessel_name: s.vessel.name.clone(),
                sensor_id: s.vessel.sensor_id.clone(),
                heater_pin: s.vessel.heater_pin,
                chiller_pin: s.vessel.chiller_pin,
                heater_on: level(s.vessel.heater_pin),
                chiller_on: level(s.vessel.chiller_pin),
                actual_celsius: s.last_sample.map(|l| l.actual),
                target_celsius: s.last_sample.and_then(|l| l.target),
                control_state: s.last_sample.map(|l| l.state),
                last_sample: s.last_sample.map(|l| l.at),
                phase_index: s.progress.map(|p| p.index),
                phase_progress: s.progress.map(|p| p.percent),
                sensor_timed_out: s.timed_out,
                last_error: s.last_error.clone(),
            })
            .collect();

        ControllerStatus {
            running,
            hardware_mode: hardware.mode(),
            tick_count: self.tick_count,
            last_tick: self.last_tick,
            last_error: self.last_error.clone(),
            batches,
            actuators,
        }
    }
}

/// The fermentation control state machine
pub struct ControlLoop {
    hardware: Arc<HardwareManager>,
    store: Arc<dyn RecordStore>,
    state: Arc<Mutex<LoopState>>,
    hysteresis: Hysteresis,
    settings: ControlSettings,
    liveness: SensorLiveness,
    /// Relay activation commands per vessel since startup
    activations: HashMap<i64, u64>,
    consecutive_errors: u32,
}

impl ControlLoop {
    pub fn new(
        hardware: Arc<HardwareManager>,
        store: Arc<dyn RecordStore>,
        settings: &ControlSettings,
    ) -> Self {
        Self::with_state(hardware, store, settings, Arc::new(Mutex::new(LoopState::default())))
    }

    pub(crate) fn with_state(
        hardware: Arc<HardwareManager>,
        store: Arc<dyn RecordStore>,
        settings: &ControlSettings,
        state: Arc<Mutex<LoopState>>,
    ) -> Self {
        Self {
            hardware,
            store,
            state,
            hysteresis: Hysteresis::new(settings.hysteresis_celsius),
            settings: settings.clone(),
            liveness: SensorLiveness::new(settings.sensor_timeout()),
            activations: HashMap::new(),
            consecutive_errors: 0,
        }
    }

    /// Status of the batches this loop tracks
    pub fn status(&self) -> ControllerStatus {
        self.state.lock().report(&self.hardware, false)
    }

    /// Run one tick at the current time
    pub fn tick(&mut self) {
        self.tick_at(Utc::now());
    }

    /// Run one tick at an explicit time; never fails
    pub fn tick_at(&mut self, now: DateTime<Utc>) {
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        let result = self.run_tick(&mut state.snapshots, now);
        state.tick_count += 1;
        state.last_tick = Some(now);

        match result {
            Ok(()) => {
                if self.consecutive_errors > 0 {
                    info!(failures = self.consecutive_errors, "Control loop recovered");
                }
                self.consecutive_errors = 0;
                state.last_error = None;
            }
            Err(e) => {
                self.consecutive_errors += 1;
                let count = self.consecutive_errors;
                if count == 1 || count % ERROR_LOG_EVERY == 0 {
                    error!(count, error = %e, "Control tick failed");
                }
                state.last_error = Some(e.to_string());
            }
        }
    }

    fn run_tick(
        &mut self,
        snapshots: &mut BTreeMap<i64, ControlSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let active = self.store.active_batches()?;
        self.reconcile(snapshots, active, now);

        for snapshot in snapshots.values_mut() {
            match self.process_batch(snapshot, now) {
                Ok(()) => {
                    if snapshot.consecutive_failures > 0 {
                        info!(batch_id = snapshot.batch.id, "Batch processing recovered");
                    }
                    snapshot.consecutive_failures = 0;
                    snapshot.last_error = None;
                }
                Err(e) => {
                    snapshot.consecutive_failures += 1;
                    let failures = snapshot.consecutive_failures;
                    if failures == 1 || failures % ERROR_LOG_EVERY == 0 {
                        error!(
                            batch_id = snapshot.batch.id,
                            vessel_id = snapshot.vessel.id,
                            failures,
                            error = %e,
                            "Failed to process batch"
                        );
                    }
                    snapshot.last_error = Some(e.to_string());
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    fn reconcile(
        &mut self,
        snapshots: &mut BTreeMap<i64, ControlSnapshot>,
        active: Vec<Batch>,
        now: DateTime<Utc>,
    ) {
        let active_ids: HashSet<i64> = active.iter().map(|b| b.id).collect();
        let finished: Vec<i64> = snapshots
            .keys()
            .filter(|id| !active_ids.contains(id))
            .copied()
            .collect();

        for batch_id in finished {
            let Some(snapshot) = snapshots.remove(&batch_id) else { continue };
            info!(batch_id, vessel_id = snapshot.vessel.id, "Batch left active set, releasing relays");
            if let Err(e) = self.deactivate_both(&snapshot.vessel) {
                error!(batch_id, error = %e, "Failed to deactivate relays of finished batch");
            }
            let sensor = &snapshot.vessel.sensor_id;
            if !snapshots.values().any(|s| &s.vessel.sensor_id == sensor) {
                self.liveness.forget(sensor);
            }
        }

        for batch in active {
            if let Some(snapshot) = snapshots.get_mut(&batch.id) {
                snapshot.batch = batch;
                continue;
            }

            match self.store.vessel(batch.vessel_id) {
                Ok(Some(vessel)) => {
                    info!(
                        batch_id = batch.id,
                        vessel_id = vessel.id,
                        sensor = %vessel.sensor_id,
                        heater = vessel.heater_pin,
                        chiller = vessel.chiller_pin,
                        "Tracking active batch"
                    );
                    self.liveness.seed(&vessel.sensor_id, now);
                    snapshots.insert(batch.id, ControlSnapshot::new(batch, vessel));
                }
                Ok(None) => {
                    warn!(batch_id = batch.id, vessel_id = batch.vessel_id, "Active batch references unknown vessel");
                }
                Err(e) => {
                    error!(batch_id = batch.id, error = %e, "Failed to resolve vessel for batch");
                }
            }
        }
    }

    // ========================================================================
    // Per-batch processing
    // ========================================================================

    fn process_batch(&mut self, snapshot: &mut ControlSnapshot, now: DateTime<Utc>) -> Result<()> {
        let sensor_id = snapshot.vessel.sensor_id.clone();

        let actual = match self.hardware.read_temperature(&sensor_id) {
            Ok(celsius) => celsius,
            Err(e) => return self.handle_missed_read(snapshot, &e, now),
        };

        self.liveness.record_success(&sensor_id, now);
        if snapshot.timed_out {
            info!(batch_id = snapshot.batch.id, sensor = %sensor_id, "Sensor recovered");
            snapshot.timed_out = false;
        }

        // No usable schedule: release both relays before reporting the error
        let phases = match self.load_schedule(snapshot.batch.profile_id) {
            Ok(phases) => phases,
            Err(e) => {
                if let Err(release) = self.deactivate_both(&snapshot.vessel) {
                    error!(batch_id = snapshot.batch.id, error = %release, "Failed to release relays");
                }
                return Err(e);
            }
        };
        let progress = current_phase(snapshot.batch.start_time, &phases, now);

        let state = match progress {
            None => {
                self.deactivate_both(&snapshot.vessel)?;
                ControlState::Idle
            }
            Some(p) => {
                let decision = self.hysteresis.decide(actual, p.target_celsius);
                self.drive(decision, &snapshot.vessel)?;
                decision
            }
        };
        let target = progress.map(|p| p.target_celsius);

        snapshot.progress = progress;
        snapshot.last_sample = Some(LastSample { at: now, actual, target, state });

        let record = TemperatureRecord {
            batch_id: snapshot.batch.id,
            timestamp: now,
            actual_celsius: actual,
            target_celsius: target.unwrap_or(actual),
            control_state: state,
            energy_wh: self.energy_estimate(state),
        };
        self.store.append_temperature_record(&record)?;
        debug!(
            batch_id = record.batch_id,
            actual = record.actual_celsius,
            target = record.target_celsius,
            state = %state,
            "Control sample"
        );

        if state != ControlState::Idle {
            self.count_activation(snapshot.vessel.id)?;
        }

        if self.hardware.supports_feedback() {
            let heating = self.hardware.actuator_state(snapshot.vessel.heater_pin).unwrap_or(false);
            let cooling = self.hardware.actuator_state(snapshot.vessel.chiller_pin).unwrap_or(false);
            self.hardware.apply_feedback(&sensor_id, heating, cooling);
        }

        Ok(())
    }

    fn load_schedule(&self, profile_id: i64) -> Result<Vec<Phase>> {
        let phases = self.store.phases(profile_id)?;
        validate_phases(&phases)?;
        Ok(phases)
    }

    fn handle_missed_read(
        &mut self,
        snapshot: &mut ControlSnapshot,
        error: &BrewError,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sensor_id = &snapshot.vessel.sensor_id;

        if !self.liveness.is_timed_out(sensor_id, now) {
            debug!(batch_id = snapshot.batch.id, sensor = %sensor_id, error = %error, "Sensor reading unavailable");
            return Ok(());
        }

        if snapshot.timed_out {
            debug!(batch_id = snapshot.batch.id, sensor = %sensor_id, "Sensor still timed out");
            return Ok(());
        }

        warn!(
            batch_id = snapshot.batch.id,
            sensor = %sensor_id,
            last_ok = ?self.liveness.last_success(sensor_id),
            timeout_secs = self.settings.sensor_timeout_secs,
            "Sensor timeout, deactivating relays"
        );
        self.deactivate_both(&snapshot.vessel)?;
        snapshot.timed_out = true;
        Ok(())
    }

    /// Drive both relays for a decision; the opposing relay is released first
    fn drive(&self, state: ControlState, vessel: &Vessel) -> Result<()> {
        match state {
            ControlState::Heating => {
                self.hardware.deactivate(vessel.chiller_pin)?;
                self.hardware.activate(vessel.heater_pin)
            }
            ControlState::Cooling => {
                self.hardware.deactivate(vessel.heater_pin)?;
                self.hardware.activate(vessel.chiller_pin)
            }
            ControlState::Idle => self.deactivate_both(vessel),
        }
    }

    /// Attempt both relays even if the first fails
    fn deactivate_both(&self, vessel: &Vessel) -> Result<()> {
        let heater = self.hardware.deactivate(vessel.heater_pin);
        let chiller = self.hardware.deactivate(vessel.chiller_pin);
        heater.and(chiller)
    }

    fn energy_estimate(&self, state: ControlState) -> f64 {
        let watts = match state {
            ControlState::Heating => self.settings.heater_power_watts,
            ControlState::Cooling => self.settings.chiller_power_watts,
            ControlState::Idle => 0.0,
        };
        watts * self.settings.interval_secs as f64 / SECONDS_PER_HOUR
    }

    /// Sampled relay-cycle counter: one store write per `relay_cycle_sample` activations
    fn count_activation(&mut self, vessel_id: i64) -> Result<()> {
        let sample = self.settings.relay_cycle_sample.max(1);
        let count = self.activations.entry(vessel_id).or_insert(0);
        *count += 1;

        if *count % sample == 0 {
            let total = *count;
            self.store.add_relay_cycles(vessel_id, sample)?;
            debug!(vessel_id, activations = total, "Relay cycle counter updated");
        }
        Ok(())
    }
}
