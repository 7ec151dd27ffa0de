//! In-process record store

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::RecordStore;
use crate::data::{Batch, BatchStatus, Phase, TemperatureRecord, Vessel};
use bb_error::{BrewError, Result};

#[derive(Debug, Default)]
struct MemoryData {
    batches: BTreeMap<i64, Batch>,
    vessels: BTreeMap<i64, Vessel>,
    profiles: BTreeMap<i64, Vec<Phase>>,
    records: Vec<TemperatureRecord>,
}

/// Record store held entirely in memory
///
/// Appended temperature records are kept for inspection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_vessel(&self, vessel: Vessel) {
        self.data.write().vessels.insert(vessel.id, vessel);
    }

    pub fn insert_batch(&self, batch: Batch) {
        self.data.write().batches.insert(batch.id, batch);
    }

    /// Replace a profile's phases (stored ordered by sequence order)
    pub fn set_phases(&self, profile_id: i64, mut phases: Vec<Phase>) {
        phases.sort_by_key(|p| p.sequence_order);
        self.data.write().profiles.insert(profile_id, phases);
    }

    pub fn set_batch_status(&self, batch_id: i64, status: BatchStatus) -> Result<()> {
        let mut data = self.data.write();
        let batch = data
            .batches
            .get_mut(&batch_id)
            .ok_or(BrewError::NotFound { kind: "batch", id: batch_id })?;
        batch.status = status;
        Ok(())
    }

    /// Mark a batch active with the given start time
    pub fn start_batch(&self, batch_id: i64, start: DateTime<Utc>) -> Result<()> {
        let mut data = self.data.write();
        let batch = data
            .batches
            .get_mut(&batch_id)
            .ok_or(BrewError::NotFound { kind: "batch", id: batch_id })?;
        batch.status = BatchStatus::Active;
        batch.start_time = Some(start);
        Ok(())
    }

    pub fn records(&self) -> Vec<TemperatureRecord> {
        self.data.read().records.clone()
    }

    pub fn records_for(&self, batch_id: i64) -> Vec<TemperatureRecord> {
        self.data
            .read()
            .records
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect()
    }
}

impl RecordStore for MemoryStore {
    fn active_batches(&self) -> Result<Vec<Batch>> {
        Ok(self
            .data
            .read()
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Active)
            .cloned()
            .collect())
    }

    fn vessel(&self, vessel_id: i64) -> Result<Option<Vessel>> {
        Ok(self.data.read().vessels.get(&vessel_id).cloned())
    }

    fn phases(&self, profile_id: i64) -> Result<Vec<Phase>> {
        Ok(self.data.read().profiles.get(&profile_id).cloned().unwrap_or_default())
    }

    fn append_temperature_record(&self, record: &TemperatureRecord) -> Result<()> {
        self.data.write().records.push(record.clone());
        Ok(())
    }

    fn add_relay_cycles(&self, vessel_id: i64, cycles: u64) -> Result<()> {
        let mut data = self.data.write();
        let vessel = data
            .vessels
            .get_mut(&vessel_id)
            .ok_or(BrewError::NotFound { kind: "vessel", id: vessel_id })?;
        vessel.relay_cycle_count += cycles;
        Ok(())
    }
}
