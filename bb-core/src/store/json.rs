//! File-backed record store
//!
//! The record-keeping service owns a JSON document describing batches,
//! vessels and profiles. It is re-read on every query so edits made by the
//! service are picked up on the next tick. Relay counters are written back
//! atomically; temperature records are appended to a JSON-lines log.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RecordStore;
use crate::data::{Batch, BatchStatus, Phase, TemperatureRecord, Vessel};
use bb_error::{BrewError, Result};

/// A fermentation profile and its phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

/// On-disk document layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub batches: Vec<Batch>,
    #[serde(default)]
    pub vessels: Vec<Vessel>,
    #[serde(default)]
    pub profiles: Vec<StoredProfile>,
}

/// Record store backed by a JSON document and a JSON-lines log
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    temperature_log: PathBuf,
    /// Serializes read-modify-write cycles and log appends
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>, temperature_log: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temperature_log: temperature_log.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; a missing file is an empty store
    pub fn load(&self) -> Result<StoreDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "Record document missing, treating as empty");
                return Ok(StoreDocument::default());
            }
            Err(e) => {
                return Err(BrewError::FileRead { path: self.path.clone(), source: e });
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            BrewError::store(format!("Failed to parse record document {:?}: {}", self.path, e))
        })
    }

    /// Replace the document (temp file + rename)
    pub fn save(&self, document: &StoreDocument) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_document(document)
    }

    fn write_document(&self, document: &StoreDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| BrewError::FileWrite {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        let write_err = |e| BrewError::FileWrite { path: temp_path.clone(), source: e };

        let mut file = fs::File::create(&temp_path).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| BrewError::FileWrite {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl RecordStore for JsonStore {
    fn active_batches(&self) -> Result<Vec<Batch>> {
        Ok(self
            .load()?
            .batches
            .into_iter()
            .filter(|b| b.status == BatchStatus::Active)
            .collect())
    }

    fn vessel(&self, vessel_id: i64) -> Result<Option<Vessel>> {
        Ok(self.load()?.vessels.into_iter().find(|v| v.id == vessel_id))
    }

    fn phases(&self, profile_id: i64) -> Result<Vec<Phase>> {
        let mut phases = self
            .load()?
            .profiles
            .into_iter()
            .find(|p| p.id == profile_id)
            .map(|p| p.phases)
            .unwrap_or_default();
        phases.sort_by_key(|p| p.sequence_order);
        Ok(phases)
    }

    fn append_temperature_record(&self, record: &TemperatureRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.temperature_log.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| BrewError::FileWrite {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.temperature_log)
            .map_err(|e| BrewError::FileWrite { path: self.temperature_log.clone(), source: e })?;
        file.write_all(line.as_bytes())
            .map_err(|e| BrewError::FileWrite { path: self.temperature_log.clone(), source: e })
    }

    fn add_relay_cycles(&self, vessel_id: i64, cycles: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut document = self.load()?;
        let vessel = document
            .vessels
            .iter_mut()
            .find(|v| v.id == vessel_id)
            .ok_or(BrewError::NotFound { kind: "vessel", id: vessel_id })?;
        vessel.relay_cycle_count += cycles;
        self.write_document(&document)
    }
}
