//! # Persistence Tests
//!
//! End-to-end coverage of the collection/store lifecycle:
//! - Dirty tracking and flush batching
//! - Flush, drop, reload round trips on a real store
//! - Write-through deletions surviving a reload
//! - Partial flush failure and retry against a flaky store double

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use fluxion_core::config::StorageConfig;
use fluxion_core::metrics::Metrics;
use fluxion_core::traits::RecordStore;
use fluxion_core::types::{StoredKeyValue, StoredRecord, Timestamp};
use fluxion_storage::{Collection, PersistentStore};

fn open_store(dir: &TempDir) -> Arc<PersistentStore> {
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    Arc::new(PersistentStore::open(&config).unwrap())
}

fn collection(name: &str, store: Arc<dyn RecordStore>) -> Collection {
    Collection::new(name, Some(store), Arc::new(Metrics::new()))
}

fn timestamps(collection: &Collection, document: &str) -> Vec<Timestamp> {
    collection
        .all_records_for_document(document, i64::MIN, i64::MAX, false, 0)
        .iter()
        .map(|r| r.timestamp)
        .collect()
}

#[test]
fn test_insert_marks_dirty_until_flush() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut c = collection("flights", store);

    c.insert(10, "glider-1", "fix-1");
    assert!(c.has_dirty());
    let records = c.all_records_for_document("glider-1", 0, 100, false, 0);
    assert!(records[0].is_dirty());

    c.flush_to_disk();
    assert!(!c.has_dirty());
    let records = c.all_records_for_document("glider-1", 0, 100, false, 0);
    assert!(!records[0].is_dirty());
}

#[test]
fn test_flush_survives_restart() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut c = collection("flights", store.clone());
    c.insert(10, "glider-1", "fix-1");
    c.insert(20, "glider-1", "fix-2");
    c.insert(5, "glider-2", "fix-a");
    c.flush_to_disk();
    drop(c);

    let mut reloaded = collection("flights", store);
    reloaded.load_from_disk();

    assert!(!reloaded.has_dirty());
    assert_eq!(timestamps(&reloaded, "glider-1"), vec![10, 20]);
    assert_eq!(timestamps(&reloaded, "glider-2"), vec![5]);
    let records = reloaded.all_records_for_document("glider-1", 0, 100, false, 0);
    assert_eq!(records[0].payload, "fix-1");
    assert!(records.iter().all(|r| !r.is_dirty()));
}

#[test]
fn test_drop_flushes_pending_records() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    {
        let mut c = collection("flights", store.clone());
        c.insert(10, "glider-1", "fix-1");
        // No explicit flush; dropping the collection must persist the record.
    }

    let mut reloaded = collection("flights", store);
    reloaded.load_from_disk();
    assert_eq!(timestamps(&reloaded, "glider-1"), vec![10]);
}

#[test]
fn test_load_replaces_in_memory_state() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut seeded = collection("flights", store.clone());
    seeded.insert(1, "stored", "x");
    seeded.flush_to_disk();
    drop(seeded);

    let mut c = collection("flights", store);
    c.insert(99, "memory-only", "y");
    c.set_value_for_key("stale", "value");
    c.flush_to_disk();
    c.delete_record("memory-only", 99);

    c.insert(50, "unflushed", "z");
    c.load_from_disk();

    assert!(!c.has_dirty());
    assert!(timestamps(&c, "memory-only").is_empty());
    assert_eq!(timestamps(&c, "stored"), vec![1]);
    // The unflushed record was discarded by the reload.
    assert!(timestamps(&c, "unflushed").is_empty());
}

#[test]
fn test_load_without_store_is_a_noop() {
    let mut c = Collection::new("flights", None, Arc::new(Metrics::new()));
    c.insert(10, "glider-1", "fix-1");
    c.load_from_disk();
    assert_eq!(timestamps(&c, "glider-1"), vec![10]);
}

#[test]
fn test_deletions_write_through() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut c = collection("flights", store.clone());
    for ts in 1..=5 {
        c.insert(ts, "glider-1", "x");
    }
    c.insert(1, "glider-2", "y");
    c.insert(1, "glider-3", "z");
    c.flush_to_disk();

    c.delete_record("glider-1", 1);
    c.delete_records_in_range("glider-1", 3, 4);
    c.clear_document("glider-2");
    drop(c);

    let mut reloaded = collection("flights", store);
    reloaded.load_from_disk();
    assert_eq!(timestamps(&reloaded, "glider-1"), vec![2, 5]);
    assert!(timestamps(&reloaded, "glider-2").is_empty());
    assert_eq!(timestamps(&reloaded, "glider-3"), vec![1]);
}

#[test]
fn test_key_values_write_through() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut c = collection("flights", store.clone());
    c.set_value_for_key("owner", "pilot");
    c.set_value_for_key("doomed", "soon");
    c.remove_value_for_key("doomed");
    drop(c);

    let mut reloaded = collection("flights", store);
    reloaded.load_from_disk();
    assert_eq!(reloaded.value_for_key("owner"), "pilot");
    assert_eq!(reloaded.value_for_key("doomed"), "");
    assert_eq!(reloaded.all_keys(), vec!["owner"]);
}

#[test]
fn test_collections_share_one_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut flights = collection("flights", store.clone());
    let mut sessions = collection("sessions", store.clone());
    flights.insert(1, "a", "x");
    sessions.insert(2, "a", "y");
    flights.flush_to_disk();
    sessions.flush_to_disk();

    let mut reloaded = collection("flights", store.clone());
    reloaded.load_from_disk();
    assert_eq!(timestamps(&reloaded, "a"), vec![1]);
    assert_eq!(store.collections(), vec!["flights", "sessions"]);
}

/// Store double whose `upsert_record` fails every second call while in
/// degraded mode. Everything else always succeeds.
#[derive(Default)]
struct FlakyStore {
    degraded: AtomicBool,
    upsert_calls: AtomicU64,
    rows: Mutex<BTreeMap<(String, Timestamp), String>>,
}

impl FlakyStore {
    fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

impl RecordStore for FlakyStore {
    fn is_open(&self) -> bool {
        true
    }

    fn fetch_records(&self, _collection: &str) -> Vec<StoredRecord> {
        self.rows
            .lock()
            .iter()
            .map(|((document, timestamp), payload)| StoredRecord {
                document: document.clone(),
                timestamp: *timestamp,
                payload: payload.clone(),
            })
            .collect()
    }

    fn fetch_key_values(&self, _collection: &str) -> Vec<StoredKeyValue> {
        Vec::new()
    }

    fn upsert_record(
        &self,
        _collection: &str,
        document: &str,
        timestamp: Timestamp,
        payload: &str,
    ) -> bool {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.degraded.load(Ordering::SeqCst) && call % 2 == 0 {
            return false;
        }
        self.rows
            .lock()
            .insert((document.to_string(), timestamp), payload.to_string());
        true
    }

    fn delete_record(&self, _collection: &str, document: &str, timestamp: Timestamp) -> bool {
        self.rows.lock().remove(&(document.to_string(), timestamp));
        true
    }

    fn delete_records_in_range(
        &self,
        _collection: &str,
        document: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> bool {
        self.rows
            .lock()
            .retain(|(doc, ts), _| doc != document || *ts < from || *ts > to);
        true
    }

    fn delete_document(&self, _collection: &str, document: &str) -> bool {
        self.rows.lock().retain(|(doc, _), _| doc != document);
        true
    }

    fn upsert_key_value(&self, _collection: &str, _key: &str, _value: &str) -> bool {
        true
    }

    fn remove_key_value(&self, _collection: &str, _key: &str) -> bool {
        true
    }

    fn begin_transaction(&self) -> bool {
        true
    }

    fn commit_transaction(&self) -> bool {
        true
    }

    fn rollback_transaction(&self) {}
}

#[test]
fn test_partial_flush_failure_keeps_failed_records_dirty() {
    let store = Arc::new(FlakyStore::default());
    store.set_degraded(true);

    let metrics = Arc::new(Metrics::new());
    let mut c = Collection::new("flights", Some(store.clone()), metrics.clone());
    for ts in 1..=4 {
        c.insert(ts, "glider-1", "fix");
    }

    c.flush_to_disk();

    // Calls 2 and 4 failed, so records 2 and 4 stay dirty.
    let records = c.all_records_for_document("glider-1", 0, 10, false, 0);
    let dirty: Vec<Timestamp> = records
        .iter()
        .filter(|r| r.is_dirty())
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(dirty, vec![2, 4]);
    assert!(c.has_dirty());
    assert_eq!(store.row_count(), 2);
    assert_eq!(metrics.snapshot().records_flushed, 2);
    assert_eq!(metrics.snapshot().store_write_failures, 2);

    // A healthy retry clears the remainder.
    store.set_degraded(false);
    c.flush_to_disk();

    let records = c.all_records_for_document("glider-1", 0, 10, false, 0);
    assert!(records.iter().all(|r| !r.is_dirty()));
    assert!(!c.has_dirty());
    assert_eq!(store.row_count(), 4);
    assert_eq!(metrics.snapshot().flushes, 2);
    assert_eq!(metrics.snapshot().records_flushed, 4);
}

#[test]
fn test_flush_without_dirty_records_skips_the_store() {
    let store = Arc::new(FlakyStore::default());
    let mut c = Collection::new("flights", Some(store.clone()), Arc::new(Metrics::new()));

    c.insert(1, "glider-1", "fix");
    c.flush_to_disk();
    let calls = store.upsert_calls();

    c.flush_to_disk();
    assert_eq!(store.upsert_calls(), calls);
}

#[test]
fn test_flush_retries_only_dirty_records() {
    let store = Arc::new(FlakyStore::default());
    let mut c = Collection::new("flights", Some(store.clone()), Arc::new(Metrics::new()));

    c.insert(1, "glider-1", "fix-1");
    c.flush_to_disk();
    assert_eq!(store.upsert_calls(), 1);

    c.insert(2, "glider-1", "fix-2");
    c.flush_to_disk();
    // The already-clean record is not rewritten.
    assert_eq!(store.upsert_calls(), 2);
}
