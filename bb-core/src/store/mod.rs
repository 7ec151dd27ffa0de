//! Record store port
//!
//! Batches, vessels and phase schedules belong to the record-keeping
//! service. The controller reads them through this trait and writes back
//! only two things: temperature records and relay-cycle counters.

mod json;
mod memory;

pub use json::{JsonStore, StoreDocument, StoredProfile};
pub use memory::MemoryStore;

use crate::data::{Batch, Phase, TemperatureRecord, Vessel};
use bb_error::Result;

/// Access to the external record store
pub trait RecordStore: Send + Sync {
    /// Batches whose status is `active`
    fn active_batches(&self) -> Result<Vec<Batch>>;

    /// Look up one vessel
    fn vessel(&self, vessel_id: i64) -> Result<Option<Vessel>>;

    /// Phases of a profile, ordered by sequence order
    fn phases(&self, profile_id: i64) -> Result<Vec<Phase>>;

    /// Append one control-loop sample
    fn append_temperature_record(&self, record: &TemperatureRecord) -> Result<()>;

    /// Add to a vessel's stored relay-cycle counter
    fn add_relay_cycles(&self, vessel_id: i64, cycles: u64) -> Result<()>;
}
