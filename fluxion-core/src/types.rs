//! # Core Types
//!
//! Fundamental data structures shared between the collection engine and the
//! persistent store.

use serde::{Deserialize, Serialize};

/// Timestamps are signed 64-bit integers. Their interpretation (epoch units)
/// is opaque to the engine.
pub type Timestamp = i64;

/// A single versioned record inside a document.
///
/// Records are immutable after insertion; an insert with a matching timestamp
/// replaces the whole record. The `dirty` marker is transient: it means the
/// record exists in memory but has not yet been confirmed durable, and is
/// cleared by a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: Timestamp,
    pub payload: String,
    dirty: bool,
}

impl Record {
    pub fn new(timestamp: Timestamp, payload: impl Into<String>, dirty: bool) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
            dirty,
        }
    }

    /// True while the record awaits its first successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// A record row as fetched from the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub document: String,
    pub timestamp: Timestamp,
    pub payload: String,
}

/// A key/value row as fetched from the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyValue {
    pub key: String,
    pub value: String,
}

/// A row of the api_keys table.
///
/// The table is owned by an external collaborator; only its rows and CRUD
/// operations live at the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRow {
    pub key: String,
    pub scope: String,
    pub deletable: bool,
}
