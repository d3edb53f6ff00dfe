//! Sink abstraction for merged line persistence.
//!
//! Implemented by the storage layer, allowing the merge engine to stay
//! decoupled from any particular store.

use crate::{LineRecord, WriteMode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Mutex;

/// Write-only store for progressive and final line records.
///
/// Writes are idempotent overwrites keyed by [`LineRecord::key`].
pub trait LineSink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn write(&self, record: &LineRecord, mode: WriteMode) -> Result<(), Self::Error>;
}

/// A captured write from [`InMemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkWrite {
    pub key: String,
    pub mode: WriteMode,
    pub record: LineRecord,
}

/// In-memory sink.
///
/// Keeps the current value per key, plus the full write log for inspection.
#[derive(Default)]
pub struct InMemorySink {
    entries: Mutex<HashMap<String, (WriteMode, LineRecord)>>,
    log: Mutex<Vec<SinkWrite>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record stored under `key`.
    pub fn get(&self, key: &str) -> Option<LineRecord> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, record)| record.clone())
    }

    /// Mode of the last write under `key`.
    pub fn mode_of(&self, key: &str) -> Option<WriteMode> {
        self.entries.lock().unwrap().get(key).map(|(mode, _)| *mode)
    }

    /// Every write in the order it happened.
    pub fn writes(&self) -> Vec<SinkWrite> {
        self.log.lock().unwrap().clone()
    }

    /// Writes made in a specific mode.
    pub fn writes_in(&self, mode: WriteMode) -> Vec<SinkWrite> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.mode == mode)
            .cloned()
            .collect()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.log.lock().unwrap().clear();
    }
}

impl LineSink for InMemorySink {
    type Error = Infallible;

    fn write(&self, record: &LineRecord, mode: WriteMode) -> Result<(), Self::Error> {
        let key = record.key();
        self.entries
            .lock()
            .unwrap()
            .insert(key.clone(), (mode, record.clone()));
        self.log.lock().unwrap().push(SinkWrite {
            key,
            mode,
            record: record.clone(),
        });
        Ok(())
    }
}
