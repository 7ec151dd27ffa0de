/*
 * Control loop integration tests
 *
 * Drive the control loop tick by tick against scripted probes, recording
 * relays and an in-memory record store.
 */

mod common;

use bb_core::settings::HardwareSettings;
use bb_core::{
    ActuatorState, BatchStatus, BrewError, ControlLoop, ControlSettings, ControlState,
    HardwareManager, HardwareMode, Phase, Result, TemperatureRecord,
};
use bb_core::{Batch, RecordStore, Vessel};
use common::*;
use mockall::mock;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn control_loop(fx: &Fixture) -> ControlLoop {
    ControlLoop::new(fx.hardware.clone(), fx.store.clone(), &ControlSettings::default())
}

fn is_on(fx: &Fixture, pin: u32) -> bool {
    fx.hardware.actuator_states().contains(&ActuatorState { pin, on: true })
}

#[test]
fn test_cold_vessel_heats_and_logs_every_tick() {
    let fx = single_vessel(Some(15.0));
    let mut control = control_loop(&fx);

    for tick in 0..3 {
        control.tick_at(secs(tick * 10));
        assert!(is_on(&fx, 17), "heater on after tick {}", tick);
        assert!(!is_on(&fx, 27), "chiller off after tick {}", tick);
        assert_eq!(fx.store.records_for(1).len(), tick as usize + 1);
    }

    for record in fx.store.records_for(1) {
        assert_eq!(record.actual_celsius, 15.0);
        assert_eq!(record.target_celsius, 20.0);
        assert_eq!(record.control_state, ControlState::Heating);
    }
    fx.hardware.shutdown();
}

#[test]
fn test_warm_vessel_cools() {
    let fx = single_vessel(Some(24.0));
    let mut control = control_loop(&fx);
    control.tick_at(t0());

    assert!(is_on(&fx, 27));
    assert!(!is_on(&fx, 17));
    assert_eq!(fx.store.records_for(1)[0].control_state, ControlState::Cooling);
    fx.hardware.shutdown();
}

#[test]
fn test_deadband_boundary_is_idle() {
    let fx = single_vessel(Some(19.0));
    let mut control = control_loop(&fx);

    control.tick_at(secs(0));
    assert!(is_on(&fx, 17));

    fx.probes.set("28-a", Some(19.5));
    control.tick_at(secs(10));
    assert!(!is_on(&fx, 17));
    assert!(!is_on(&fx, 27));

    fx.probes.set("28-a", Some(20.5));
    control.tick_at(secs(20));
    assert!(!is_on(&fx, 27));

    let states: Vec<_> = fx.store.records_for(1).iter().map(|r| r.control_state).collect();
    assert_eq!(states, vec![ControlState::Heating, ControlState::Idle, ControlState::Idle]);
    fx.hardware.shutdown();
}

#[test]
fn test_schedule_moves_to_second_phase() {
    let fx = single_vessel(Some(19.0));
    let mut control = control_loop(&fx);

    control.tick_at(t0() + chrono::Duration::hours(30));
    let record = &fx.store.records_for(1)[0];
    assert_eq!(record.target_celsius, 18.0);
    assert_eq!(record.control_state, ControlState::Cooling);

    let status = control.status();
    assert_eq!(status.batches[0].phase_index, Some(1));
    fx.hardware.shutdown();
}

#[test]
fn test_unstarted_batch_is_idle_with_observed_target() {
    let fx = fixture();
    fx.store.insert_vessel(vessel(1, "28-a", 17, 27));
    fx.store.set_phases(1, ale_phases());
    fx.store.insert_batch(active_batch(1, 1, 1, None));
    fx.probes.set("28-a", Some(12.0));

    let mut control = control_loop(&fx);
    control.tick_at(t0());

    let record = &fx.store.records_for(1)[0];
    assert_eq!(record.control_state, ControlState::Idle);
    assert_eq!(record.target_celsius, 12.0);
    assert!(!is_on(&fx, 17));
    assert!(!is_on(&fx, 27));
    fx.hardware.shutdown();
}

#[test]
fn test_sensor_timeout_cuts_relays_once_per_episode() {
    let fx = single_vessel(Some(18.0));
    let mut control = control_loop(&fx);

    control.tick_at(secs(0));
    assert!(is_on(&fx, 17));
    fx.relays.take();

    // Misses inside the 60 s window change nothing
    fx.probes.set("28-a", None);
    for n in 1..=6 {
        control.tick_at(secs(n * 10));
    }
    assert!(fx.relays.entries().is_empty());
    assert!(is_on(&fx, 17));
    assert_eq!(fx.store.records_for(1).len(), 1);

    // 70 s since the last good read: safety cutoff
    control.tick_at(secs(70));
    assert_eq!(fx.relays.take(), vec![(17, false), (27, false)]);
    assert!(control.status().batches[0].sensor_timed_out);

    // Further misses in the same episode do not repeat it
    control.tick_at(secs(80));
    control.tick_at(secs(90));
    assert!(fx.relays.entries().is_empty());
    assert_eq!(fx.store.records_for(1).len(), 1);

    // Recovery ends the episode and control resumes
    fx.probes.set("28-a", Some(18.0));
    control.tick_at(secs(100));
    assert!(is_on(&fx, 17));
    assert!(!control.status().batches[0].sensor_timed_out);
    fx.relays.take();

    // A second outage is a new episode
    fx.probes.set("28-a", None);
    for n in 11..=16 {
        control.tick_at(secs(n * 10));
    }
    assert!(fx.relays.entries().is_empty());
    control.tick_at(secs(170));
    assert_eq!(fx.relays.take(), vec![(17, false), (27, false)]);
    fx.hardware.shutdown();
}

#[test]
fn test_silent_sensor_times_out_after_adoption() {
    let fx = single_vessel(None);
    let mut control = control_loop(&fx);

    control.tick_at(secs(0));
    control.tick_at(secs(60));
    assert!(fx.relays.entries().is_empty());

    control.tick_at(secs(61));
    assert_eq!(fx.relays.take(), vec![(17, false), (27, false)]);
    assert!(fx.store.records().is_empty());
    fx.hardware.shutdown();
}

#[test]
fn test_finished_batch_releases_relays() {
    let fx = single_vessel(Some(15.0));
    let mut control = control_loop(&fx);

    control.tick_at(secs(0));
    assert!(is_on(&fx, 17));

    fx.store.set_batch_status(1, BatchStatus::Complete).unwrap();
    control.tick_at(secs(10));

    assert!(!is_on(&fx, 17));
    assert!(control.status().batches.is_empty());
    assert_eq!(fx.store.records_for(1).len(), 1);
    fx.hardware.shutdown();
}

#[test]
fn test_failing_batch_does_not_block_others() {
    let fx = fixture();
    fx.store.insert_vessel(vessel(1, "28-a", 17, 27));
    fx.store.insert_vessel(vessel(2, "28-b", 22, 23));
    fx.store.set_phases(
        1,
        vec![
            Phase { sequence_order: 1, duration_hours: 24.0, target_celsius: 20.0 },
            Phase { sequence_order: 1, duration_hours: 24.0, target_celsius: 18.0 },
        ],
    );
    fx.store.set_phases(2, ale_phases());
    fx.store.insert_batch(active_batch(1, 1, 1, Some(t0())));
    fx.store.insert_batch(active_batch(2, 2, 2, Some(t0())));
    fx.probes.set("28-a", Some(15.0));
    fx.probes.set("28-b", Some(15.0));

    let mut control = control_loop(&fx);
    control.tick_at(t0());

    assert!(fx.store.records_for(1).is_empty());
    assert_eq!(fx.store.records_for(2).len(), 1);
    assert!(is_on(&fx, 22));

    let status = control.status();
    assert!(status.last_error.is_none());
    let failed = status.batches.iter().find(|b| b.batch_id == 1).unwrap();
    assert!(failed.last_error.as_deref().unwrap().contains("duplicate"));
    fx.hardware.shutdown();
}

#[test]
fn test_invalid_schedule_releases_relays() {
    let fx = single_vessel(Some(15.0));
    let mut control = control_loop(&fx);

    control.tick_at(secs(0));
    assert!(is_on(&fx, 17));

    fx.store.set_phases(
        1,
        vec![
            Phase { sequence_order: 1, duration_hours: 24.0, target_celsius: 20.0 },
            Phase { sequence_order: 1, duration_hours: 24.0, target_celsius: 18.0 },
        ],
    );
    fx.probes.set("28-a", Some(35.0));
    for n in 1..=30 {
        control.tick_at(secs(n * 10));
        assert!(!is_on(&fx, 17), "heater off after tick {}", n);
        assert!(!is_on(&fx, 27), "chiller off after tick {}", n);
    }

    assert_eq!(fx.store.records_for(1).len(), 1);
    let status = control.status();
    assert!(status.batches[0].last_error.as_deref().unwrap().contains("duplicate"));
    fx.hardware.shutdown();
}

#[test]
fn test_unknown_vessel_is_skipped() {
    let fx = fixture();
    fx.store.set_phases(1, ale_phases());
    fx.store.insert_batch(active_batch(1, 42, 1, Some(t0())));

    let mut control = control_loop(&fx);
    control.tick_at(t0());
    assert!(control.status().batches.is_empty());
    fx.hardware.shutdown();
}

#[test]
fn test_physical_backends_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let w1 = dir.path().join("w1");
    let gpio = dir.path().join("gpio");
    fs::create_dir_all(w1.join("28-0000075a1b2c")).unwrap();
    fs::write(
        w1.join("28-0000075a1b2c/w1_slave"),
        "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n",
    )
    .unwrap();
    fs::create_dir_all(&gpio).unwrap();
    fs::write(gpio.join("export"), "").unwrap();
    for pin in [17, 27] {
        fs::create_dir_all(gpio.join(format!("gpio{}", pin))).unwrap();
    }

    let settings = HardwareSettings {
        mode: HardwareMode::Physical,
        w1_devices_dir: w1.clone(),
        gpio_dir: gpio.clone(),
    };
    let hardware = Arc::new(HardwareManager::from_settings(&settings).unwrap());
    assert!(!hardware.supports_feedback());

    let store = Arc::new(bb_core::MemoryStore::new());
    store.insert_vessel(vessel(1, "28-0000075a1b2c", 17, 27));
    store.set_phases(1, ale_phases());
    store.insert_batch(active_batch(1, 1, 1, Some(t0())));

    let mut control = ControlLoop::new(hardware.clone(), store.clone(), &ControlSettings::default());
    control.tick_at(t0());

    let record = &store.records_for(1)[0];
    assert_eq!(record.actual_celsius, 23.13);
    assert_eq!(record.control_state, ControlState::Cooling);
    assert_eq!(fs::read_to_string(gpio.join("gpio27/value")).unwrap(), "1");
    assert_eq!(fs::read_to_string(gpio.join("gpio17/value")).unwrap(), "0");

    hardware.shutdown();
    assert_eq!(fs::read_to_string(gpio.join("gpio27/value")).unwrap(), "0");
}

// ============================================================================
// Record store failures
// ============================================================================

mock! {
    pub Store {}

    impl RecordStore for Store {
        fn active_batches(&self) -> Result<Vec<Batch>>;
        fn vessel(&self, vessel_id: i64) -> Result<Option<Vessel>>;
        fn phases(&self, profile_id: i64) -> Result<Vec<Phase>>;
        fn append_temperature_record(&self, record: &TemperatureRecord) -> Result<()>;
        fn add_relay_cycles(&self, vessel_id: i64, cycles: u64) -> Result<()>;
    }
}

#[test]
fn test_store_outage_is_caught_at_tick_boundary() {
    let fx = fixture();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut store = MockStore::new();
    store.expect_active_batches().returning(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(BrewError::store("database is locked"))
        } else {
            Ok(Vec::new())
        }
    });

    let mut control = ControlLoop::new(fx.hardware.clone(), Arc::new(store), &ControlSettings::default());

    control.tick_at(secs(0));
    let status = control.status();
    assert_eq!(status.tick_count, 1);
    assert!(status.last_error.as_deref().unwrap().contains("database is locked"));

    control.tick_at(secs(10));
    let status = control.status();
    assert_eq!(status.tick_count, 2);
    assert!(status.last_error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    fx.hardware.shutdown();
}

#[test]
fn test_record_append_failure_is_per_batch() {
    let fx = fixture();
    fx.probes.set("28-a", Some(15.0));

    let mut store = MockStore::new();
    store
        .expect_active_batches()
        .returning(|| Ok(vec![active_batch(1, 1, 1, Some(t0()))]));
    store
        .expect_vessel()
        .withf(|id| *id == 1)
        .times(1)
        .returning(|_| Ok(Some(vessel(1, "28-a", 17, 27))));
    store.expect_phases().returning(|_| Ok(ale_phases()));
    store
        .expect_append_temperature_record()
        .returning(|_| Err(BrewError::store("disk full")));

    let mut control = ControlLoop::new(fx.hardware.clone(), Arc::new(store), &ControlSettings::default());
    control.tick_at(t0());

    // Actuation happened before the write failed
    assert!(is_on(&fx, 17));
    let status = control.status();
    assert!(status.last_error.is_none());
    assert!(status.batches[0].last_error.as_deref().unwrap().contains("disk full"));
    fx.hardware.shutdown();
}
