//! Shared fixtures for the control integration tests

#![allow(dead_code)]

use bb_core::{
    ActuatorPort, Batch, BatchStatus, BrewError, HardwareManager, HardwareMode, MemoryStore,
    Phase, Result, SensorPort, SimulatedRelays, Vessel,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Probe readings the test can change between ticks (`None` = no response)
#[derive(Clone, Default)]
pub struct Probes(Arc<Mutex<BTreeMap<String, Option<f64>>>>);

impl Probes {
    pub fn set(&self, sensor_id: &str, reading: Option<f64>) {
        self.0.lock().insert(sensor_id.to_string(), reading);
    }
}

pub struct ScriptedSensors(Probes);

impl SensorPort for ScriptedSensors {
    fn read_temperature(&mut self, sensor_id: &str) -> Result<f64> {
        match (self.0).0.lock().get(sensor_id) {
            Some(Some(celsius)) => Ok(*celsius),
            Some(None) => Err(BrewError::sensor_read(sensor_id, "no response")),
            None => Err(BrewError::SensorNotFound(sensor_id.to_string())),
        }
    }

    fn list_sensors(&self) -> Result<Vec<String>> {
        Ok((self.0).0.lock().keys().cloned().collect())
    }
}

/// Every activate/deactivate command, in order
#[derive(Clone, Default)]
pub struct RelayLog(Arc<Mutex<Vec<(u32, bool)>>>);

impl RelayLog {
    pub fn take(&self) -> Vec<(u32, bool)> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn entries(&self) -> Vec<(u32, bool)> {
        self.0.lock().clone()
    }
}

pub struct RecordingRelays {
    inner: SimulatedRelays,
    log: RelayLog,
}

impl ActuatorPort for RecordingRelays {
    fn setup(&mut self, pin: u32) -> Result<()> {
        self.inner.setup(pin)
    }

    fn activate(&mut self, pin: u32) -> Result<()> {
        self.log.0.lock().push((pin, true));
        self.inner.activate(pin)
    }

    fn deactivate(&mut self, pin: u32) -> Result<()> {
        self.log.0.lock().push((pin, false));
        self.inner.deactivate(pin)
    }

    fn state(&mut self, pin: u32) -> Result<bool> {
        self.inner.state(pin)
    }

    fn release_all(&mut self) -> Result<()> {
        self.inner.release_all()
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub hardware: Arc<HardwareManager>,
    pub probes: Probes,
    pub relays: RelayLog,
}

pub fn fixture() -> Fixture {
    let probes = Probes::default();
    let relays = RelayLog::default();
    let hardware = Arc::new(HardwareManager::with_backends(
        HardwareMode::Physical,
        Box::new(ScriptedSensors(probes.clone())),
        Box::new(RecordingRelays { inner: SimulatedRelays::new(), log: relays.clone() }),
    ));
    Fixture {
        store: Arc::new(MemoryStore::new()),
        hardware,
        probes,
        relays,
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, 6, 0, 0).unwrap()
}

pub fn secs(n: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(n)
}

pub fn vessel(id: i64, sensor_id: &str, heater_pin: u32, chiller_pin: u32) -> Vessel {
    Vessel {
        id,
        name: format!("FV{}", id),
        sensor_id: sensor_id.to_string(),
        heater_pin,
        chiller_pin,
        relay_cycle_count: 0,
    }
}

pub fn active_batch(id: i64, vessel_id: i64, profile_id: i64, start: Option<DateTime<Utc>>) -> Batch {
    Batch {
        id,
        name: format!("Batch {}", id),
        profile_id,
        vessel_id,
        start_time: start,
        status: BatchStatus::Active,
    }
}

/// Two-phase ale profile: 24 h at 20 °C, then 24 h at 18 °C
pub fn ale_phases() -> Vec<Phase> {
    vec![
        Phase { sequence_order: 1, duration_hours: 24.0, target_celsius: 20.0 },
        Phase { sequence_order: 2, duration_hours: 24.0, target_celsius: 18.0 },
    ]
}

/// One vessel (sensor 28-a, heater 17, chiller 27) running batch 1 on the ale profile
pub fn single_vessel(reading: Option<f64>) -> Fixture {
    let fx = fixture();
    fx.store.insert_vessel(vessel(1, "28-a", 17, 27));
    fx.store.set_phases(1, ale_phases());
    fx.store.insert_batch(active_batch(1, 1, 1, Some(t0())));
    fx.probes.set("28-a", reading);
    fx
}
