//! # Collection
//!
//! In-memory time-indexed document store. Each collection maps document keys
//! to timestamp-sorted record sequences and carries a flat key/value
//! side-table. Mutations update memory first; inserts are flushed in batches,
//! deletions write through to the store synchronously.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ahash::RandomState;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use fluxion_core::{
    metrics::Metrics,
    traits::RecordStore,
    types::{Record, Timestamp},
};

type FastHashMap<K, V> = HashMap<K, V, RandomState>;

/// A named set of documents plus a key/value side-table.
///
/// Not internally thread-safe for read/write mixing; it assumes a single
/// logical owner for data-path operations. The one concurrency guarantee is
/// that at most one flush runs per collection at any moment, via the flush
/// lock. Dropping the collection flushes first.
pub struct Collection {
    name: String,
    documents: FastHashMap<String, Vec<Record>>,
    values: FastHashMap<String, String>,
    has_dirty: bool,
    store: Option<Arc<dyn RecordStore>>,
    flush_lock: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        store: Option<Arc<dyn RecordStore>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            name: name.into(),
            documents: FastHashMap::default(),
            values: FastHashMap::default(),
            has_dirty: false,
            store,
            flush_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while at least one record awaits flushing.
    pub fn has_dirty(&self) -> bool {
        self.has_dirty
    }

    /// Upsert a record into the document keyed by `key`.
    ///
    /// A record with the exact same timestamp is replaced; otherwise the new
    /// record lands at the unique position preserving ascending order. With a
    /// store attached the record is marked dirty and written out by the next
    /// flush; it is never written synchronously.
    pub fn insert(&mut self, timestamp: Timestamp, key: &str, payload: &str) {
        let persist = self.store.is_some();
        self.insert_internal(timestamp, key, payload, persist);
        self.metrics.record_insert();
        debug!(
            "Inserted record at {} into document {} of collection {}",
            timestamp, key, self.name
        );
    }

    fn insert_internal(&mut self, timestamp: Timestamp, key: &str, payload: &str, dirty: bool) {
        let record = Record::new(timestamp, payload, dirty);
        if let Some(records) = self.documents.get_mut(key) {
            let index = records.partition_point(|r| r.timestamp < timestamp);
            if index < records.len() && records[index].timestamp == timestamp {
                records[index] = record;
            } else {
                records.insert(index, record);
            }
        } else {
            self.documents.insert(key.to_string(), vec![record]);
        }
        if dirty {
            self.has_dirty = true;
        }
    }

    /// The record with the largest timestamp `<= timestamp`, if any.
    pub fn latest_record_for_document(&self, key: &str, timestamp: Timestamp) -> Option<Record> {
        let records = self.documents.get(key)?;
        latest_index(records, timestamp).map(|index| records[index].clone())
    }

    /// The record with the smallest timestamp `>= timestamp`, if any.
    pub fn earliest_record_for_document(&self, key: &str, timestamp: Timestamp) -> Option<Record> {
        let records = self.documents.get(key)?;
        earliest_index(records, timestamp).map(|index| records[index].clone())
    }

    /// Snapshot at `at`: for every document passing the filters, the latest
    /// record with timestamp `<= at`.
    ///
    /// With a valid `key_pattern`, only matching documents are considered and
    /// a non-empty `key` is a further equality constraint. Without a pattern,
    /// an empty `key` scans everything and a non-empty `key` selects that one
    /// document. The selected record is omitted when `from` is nonzero and
    /// its timestamp is below `from`. An invalid pattern is ignored.
    pub fn all_records(
        &self,
        at: Timestamp,
        key: &str,
        from: Timestamp,
        key_pattern: Option<&str>,
    ) -> HashMap<String, Record> {
        let mut result = HashMap::new();
        let regex = compile_pattern(key_pattern);
        if regex.is_some() || key.is_empty() {
            for (doc_key, records) in &self.documents {
                if let Some(regex) = &regex {
                    if !regex.is_match(doc_key) {
                        continue;
                    }
                }
                if !key.is_empty() && doc_key.as_str() != key {
                    continue;
                }
                if let Some(index) = latest_index(records, at) {
                    let record = &records[index];
                    if from == 0 || record.timestamp >= from {
                        result.insert(doc_key.clone(), record.clone());
                    }
                }
            }
        } else {
            let Some(records) = self.documents.get(key) else {
                return result;
            };
            if let Some(index) = latest_index(records, at) {
                let record = &records[index];
                if from == 0 || record.timestamp >= from {
                    result.insert(key.to_string(), record.clone());
                }
            }
        }
        result
    }

    /// All records per document with timestamps in the closed `[from, to]`.
    ///
    /// Documents without records in the interval are absent from the result;
    /// an inverted interval yields an empty map.
    pub fn session_data(&self, from: Timestamp, to: Timestamp) -> HashMap<String, Vec<Record>> {
        let mut result = HashMap::new();
        if from > to {
            return result;
        }
        for (key, records) in &self.documents {
            let Some(start) = earliest_index(records, from) else {
                continue;
            };
            let Some(end) = latest_index(records, to) else {
                continue;
            };
            if start > end {
                continue;
            }
            result.insert(key.clone(), records[start..=end].to_vec());
        }
        result
    }

    /// The records of one document with timestamps in `[from, to]`, ascending.
    ///
    /// When `reverse` is set the selection is reversed, and a nonzero `limit`
    /// truncates the result after reversal.
    pub fn all_records_for_document(
        &self,
        key: &str,
        from: Timestamp,
        to: Timestamp,
        reverse: bool,
        limit: usize,
    ) -> Vec<Record> {
        let mut result = Vec::new();
        let Some(records) = self.documents.get(key) else {
            return result;
        };
        if from > to {
            return result;
        }
        let Some(start) = earliest_index(records, from) else {
            return result;
        };
        let Some(end) = latest_index(records, to) else {
            return result;
        };
        if start > end {
            return result;
        }
        result.extend_from_slice(&records[start..=end]);
        if reverse {
            result.reverse();
        }
        if limit > 0 && result.len() > limit {
            result.truncate(limit);
        }
        result
    }

    /// Remove an entire document from memory and from the store. Idempotent.
    pub fn clear_document(&mut self, key: &str) {
        if let Some(records) = self.documents.remove(key) {
            self.metrics.record_deletes(records.len() as u64);
            self.metrics.record_document_dropped();
            drop(records);
            self.documents.shrink_to_fit();
            release_free_memory();
            info!(
                "Document {} deleted from memory in collection {}",
                key, self.name
            );
        }

        if let Some(store) = &self.store {
            store.delete_document(&self.name, key);
        }
    }

    /// Remove the record with that exact timestamp; no-op if absent.
    ///
    /// The store delete runs synchronously; an emptied document is dropped
    /// from the document map.
    pub fn delete_record(&mut self, key: &str, timestamp: Timestamp) {
        let Some(records) = self.documents.get_mut(key) else {
            return;
        };
        let index = records.partition_point(|r| r.timestamp < timestamp);
        if index >= records.len() || records[index].timestamp != timestamp {
            return;
        }
        records.remove(index);
        self.metrics.record_deletes(1);
        if records.is_empty() {
            self.documents.remove(key);
            self.documents.shrink_to_fit();
            release_free_memory();
            self.metrics.record_document_dropped();
        } else {
            compact_records(records);
        }
        if let Some(store) = &self.store {
            store.delete_record(&self.name, key, timestamp);
        }
    }

    /// Remove every record of the document with timestamp in `[from, to]`.
    /// No store call is made when nothing matched.
    pub fn delete_records_in_range(&mut self, key: &str, from: Timestamp, to: Timestamp) {
        let Some(records) = self.documents.get_mut(key) else {
            return;
        };
        let lower = records.partition_point(|r| r.timestamp < from);
        let upper = records.partition_point(|r| r.timestamp <= to);
        if lower >= upper {
            return;
        }
        records.drain(lower..upper);
        self.metrics.record_deletes((upper - lower) as u64);
        if records.is_empty() {
            self.documents.remove(key);
            self.documents.shrink_to_fit();
            release_free_memory();
            self.metrics.record_document_dropped();
        } else {
            compact_records(records);
        }
        if let Some(store) = &self.store {
            store.delete_records_in_range(&self.name, key, from, to);
        }
    }

    // key/value side-table

    pub fn set_value_for_key(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        if let Some(store) = &self.store {
            store.upsert_key_value(&self.name, key, value);
        }
    }

    /// The stored value, or the empty string when the key is missing.
    pub fn value_for_key(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    pub fn remove_value_for_key(&mut self, key: &str) {
        self.values.remove(key);
        self.values.shrink_to_fit();
        release_free_memory();
        if let Some(store) = &self.store {
            store.remove_key_value(&self.name, key);
        }
    }

    /// All key/value pairs, restricted to keys matching `key_pattern` when it
    /// is present and valid.
    pub fn all_values(&self, key_pattern: Option<&str>) -> HashMap<String, String> {
        let regex = compile_pattern(key_pattern);
        self.values
            .iter()
            .filter(|(key, _)| regex.as_ref().map_or(true, |re| re.is_match(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    /// Write every dirty record to the store in one transaction.
    ///
    /// Records whose upsert fails stay dirty and are retried by the next
    /// flush; `has_dirty` is recomputed exactly after a partial pass. At most
    /// one flush runs per collection at any moment.
    pub fn flush_to_disk(&mut self) {
        let started = Instant::now();
        let _guard = self.flush_lock.lock();

        let Some(store) = self.store.as_ref() else {
            return;
        };
        if !self.has_dirty {
            return;
        }

        if !store.begin_transaction() {
            warn!(
                "Failed to begin transaction for flushing collection {}",
                self.name
            );
            return;
        }

        let mut keep_flushing = false;
        let mut count: u64 = 0;
        for (document, records) in self.documents.iter_mut() {
            for record in records.iter_mut() {
                if !record.is_dirty() {
                    continue;
                }
                if store.upsert_record(&self.name, document, record.timestamp, &record.payload) {
                    record.mark_clean();
                    count += 1;
                } else {
                    warn!(
                        "Failed to upsert record for collection {} document {} timestamp {}",
                        self.name, document, record.timestamp
                    );
                    self.metrics.record_store_write_failure();
                    keep_flushing = true;
                }
            }
        }

        if !store.commit_transaction() {
            store.rollback_transaction();
        }

        if keep_flushing {
            self.has_dirty = self.documents.values().flatten().any(Record::is_dirty);
        } else {
            self.has_dirty = false;
        }

        self.metrics.record_flush(count);
        info!(
            "Flushed {} new records to store for collection {} in {:?}",
            count,
            self.name,
            started.elapsed()
        );
    }

    /// Replace all in-memory state with the rows stored for this collection.
    /// Every loaded record is clean; `has_dirty` is false afterwards.
    pub fn load_from_disk(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };

        debug!("Loading collection {} from store", self.name);
        self.documents = FastHashMap::default();
        self.values = FastHashMap::default();
        self.has_dirty = false;

        for row in store.fetch_records(&self.name) {
            self.insert_internal(row.timestamp, &row.document, &row.payload, false);
        }

        for kv in store.fetch_key_values(&self.name) {
            self.values.insert(kv.key, kv.value);
        }
        self.metrics.record_load();
        debug!("Done loading collection {} from store", self.name);
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            documents: self.documents.len(),
            records: self.documents.values().map(Vec::len).sum(),
            dirty_records: self
                .documents
                .values()
                .flatten()
                .filter(|record| record.is_dirty())
                .count(),
            values: self.values.len(),
        }
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        self.flush_to_disk();
        self.documents = FastHashMap::default();
        self.values = FastHashMap::default();
        release_free_memory();
        info!("Collection {} deleted from memory", self.name);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub documents: usize,
    pub records: usize,
    pub dirty_records: usize,
    pub values: usize,
}

/// Index of the record with the largest timestamp `<= timestamp`.
fn latest_index(records: &[Record], timestamp: Timestamp) -> Option<usize> {
    records
        .partition_point(|record| record.timestamp <= timestamp)
        .checked_sub(1)
}

/// Index of the record with the smallest timestamp `>= timestamp`.
fn earliest_index(records: &[Record], timestamp: Timestamp) -> Option<usize> {
    let index = records.partition_point(|record| record.timestamp < timestamp);
    (index < records.len()).then_some(index)
}

/// Shrink backing storage once more than half of it is unused.
fn compact_records(records: &mut Vec<Record>) {
    if records.capacity() > records.len() * 2 {
        records.shrink_to_fit();
        release_free_memory();
    }
}

fn compile_pattern(pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!("Ignoring invalid key pattern {:?}: {}", pattern, err);
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn release_free_memory() {
    // Ask glibc to hand freed pages back to the kernel.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(target_os = "linux"))]
fn release_free_memory() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(timestamps: &[Timestamp]) -> Vec<Record> {
        timestamps
            .iter()
            .map(|ts| Record::new(*ts, format!("p{ts}"), false))
            .collect()
    }

    #[test]
    fn test_latest_index() {
        let records = records(&[10, 20, 30]);
        assert_eq!(latest_index(&records, 9), None);
        assert_eq!(latest_index(&records, 10), Some(0));
        assert_eq!(latest_index(&records, 25), Some(1));
        assert_eq!(latest_index(&records, 30), Some(2));
        assert_eq!(latest_index(&records, 99), Some(2));
        assert_eq!(latest_index(&[], 10), None);
    }

    #[test]
    fn test_earliest_index() {
        let records = records(&[10, 20, 30]);
        assert_eq!(earliest_index(&records, 9), Some(0));
        assert_eq!(earliest_index(&records, 10), Some(0));
        assert_eq!(earliest_index(&records, 11), Some(1));
        assert_eq!(earliest_index(&records, 30), Some(2));
        assert_eq!(earliest_index(&records, 31), None);
        assert_eq!(earliest_index(&[], 10), None);
    }

    #[test]
    fn test_compact_keeps_contents() {
        let mut list = records(&[1, 2, 3, 4, 5, 6, 7, 8]);
        list.truncate(2);
        let before = list.clone();
        compact_records(&mut list);
        assert_eq!(list, before);
        assert!(list.capacity() <= 4);
    }
}
