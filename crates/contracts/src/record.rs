//! Record model - what the upstream engine hands to the output stage
//!
//! A `Batch` is the unit of delivery: it reaches every sink whole and is never
//! interleaved with another batch on the same sink.

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// Structured record payload, key order preserved
pub type RecordData = serde_json::Map<String, serde_json::Value>;

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Seconds since the Unix epoch
    pub timestamp: u64,

    /// Key/value payload
    #[serde(default)]
    pub data: RecordData,
}

impl Record {
    pub fn new(timestamp: u64, data: RecordData) -> Self {
        Self { timestamp, data }
    }
}

/// Records of one logical stream, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Stream tag (e.g. `app.log`)
    pub tag: String,

    /// Records in arrival order
    #[serde(default)]
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn new(tag: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            tag: tag.into(),
            records,
        }
    }
}

/// Immutable, cheaply clonable sequence of record sets
///
/// Cloning shares the underlying storage, so the dispatcher can hand the same
/// batch to every sink without copying records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    sets: Arc<[RecordSet]>,
}

impl Batch {
    pub fn new(sets: Vec<RecordSet>) -> Self {
        Self { sets: sets.into() }
    }

    /// Total number of records across all record sets
    pub fn record_count(&self) -> usize {
        self.sets.iter().map(|set| set.records.len()).sum()
    }

    /// True if this batch and `other` share the same storage
    pub fn ptr_eq(&self, other: &Batch) -> bool {
        Arc::ptr_eq(&self.sets, &other.sets)
    }
}

impl Deref for Batch {
    type Target = [RecordSet];

    fn deref(&self) -> &Self::Target {
        &self.sets
    }
}

impl From<Vec<RecordSet>> for Batch {
    fn from(sets: Vec<RecordSet>) -> Self {
        Self::new(sets)
    }
}

impl From<RecordSet> for Batch {
    fn from(set: RecordSet) -> Self {
        Self::new(vec![set])
    }
}
