//! # Core Traits
//!
//! The persistence interface the collection engine consumes.
//!
//! ## Design Philosophy
//!
//! 1. **Synchronous**: No operation suspends; callers bound flush time externally
//! 2. **Forgiving**: Mutations report success as a boolean and log their own failures
//! 3. **Testability**: The trait enables store doubles for failure-injection tests

use crate::types::{StoredKeyValue, StoredRecord, Timestamp};

/// Durable row store for records and key/values.
///
/// Mutations are idempotent: re-running `upsert_record` with identical
/// arguments yields the same durable state, and `delete_record` on a missing
/// row succeeds. `begin_transaction` / `commit_transaction` /
/// `rollback_transaction` form a nested-free transactional bracket; the
/// collection uses one transaction per flush. Mutations issued outside a
/// bracket commit individually.
pub trait RecordStore: Send + Sync {
    /// Whether the store is open and accepting operations.
    fn is_open(&self) -> bool;

    /// All record rows of a collection, ascending by timestamp within each
    /// document. Callers re-sort defensively.
    fn fetch_records(&self, collection: &str) -> Vec<StoredRecord>;

    /// All key/value rows of a collection.
    fn fetch_key_values(&self, collection: &str) -> Vec<StoredKeyValue>;

    fn upsert_record(
        &self,
        collection: &str,
        document: &str,
        timestamp: Timestamp,
        payload: &str,
    ) -> bool;

    fn delete_record(&self, collection: &str, document: &str, timestamp: Timestamp) -> bool;

    /// Delete every record of a document with timestamp in `[from, to]`.
    fn delete_records_in_range(
        &self,
        collection: &str,
        document: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> bool;

    /// Delete every record row of a document.
    fn delete_document(&self, collection: &str, document: &str) -> bool;

    fn upsert_key_value(&self, collection: &str, key: &str, value: &str) -> bool;

    fn remove_key_value(&self, collection: &str, key: &str) -> bool;

    fn begin_transaction(&self) -> bool;

    fn commit_transaction(&self) -> bool;

    fn rollback_transaction(&self);
}
