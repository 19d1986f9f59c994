//! # Persistent Store
//!
//! Durable row store backed by redb. One database file holds three tables:
//! records keyed by `(collection, doc, ts)`, key/values keyed by
//! `(collection, key)`, and api_keys keyed by the key itself. Schema creation
//! is idempotent and mutations are safe to re-run.
//!
//! Mutations report success as a boolean and log their own failures; the
//! collection engine never unwinds across this boundary. A flush brackets its
//! writes between `begin_transaction` and `commit_transaction`; everything
//! else commits individually.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use redb::{
    Database, Durability, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction,
};
use tracing::{info, warn};

use fluxion_core::{
    config::{DurabilityLevel, StorageConfig},
    error::{Error, Result},
    traits::RecordStore,
    types::{ApiKeyRow, StoredKeyValue, StoredRecord, Timestamp},
};

/// Database file name beneath the configured data folder.
pub const DB_FILE_NAME: &str = "fluxion.db";

const RECORDS: TableDefinition<(&str, &str, i64), &str> = TableDefinition::new("records");
const KEY_VALUES: TableDefinition<(&str, &str), &str> = TableDefinition::new("key_values");
const API_KEYS: TableDefinition<&str, (&str, bool)> = TableDefinition::new("api_keys");

/// redb-backed implementation of [`RecordStore`].
///
/// The store outlives every collection using it; collections hold it behind
/// an `Arc` and never own it exclusively.
pub struct PersistentStore {
    path: PathBuf,
    durability: Durability,
    db: Mutex<Option<Database>>,
    active_txn: Mutex<Option<WriteTransaction>>,
}

impl PersistentStore {
    /// Open (or create) the database file under `config.data_dir`, creating
    /// the folder if missing and ensuring the schema exists.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(Error::Configuration {
                message: "data folder is not set; persistent store disabled".to_string(),
            });
        }
        fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(DB_FILE_NAME);
        let db = Database::create(&path).map_err(|err| Error::Storage {
            message: format!("failed to open database at {}: {err}", path.display()),
        })?;
        ensure_schema(&db).map_err(|err| Error::Storage {
            message: format!("failed to create schema: {err}"),
        })?;

        info!("Persistent store initialized at {}", path.display());
        Ok(Self {
            path,
            durability: durability_for(config.durability),
            db: Mutex::new(Some(db)),
            active_txn: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the database. Any open transaction is aborted. All subsequent
    /// operations fail without raising.
    pub fn close(&self) {
        if let Some(txn) = self.active_txn.lock().take() {
            if let Err(err) = txn.abort() {
                warn!("Failed to abort transaction on close: {}", err);
            }
        }
        if self.db.lock().take().is_some() {
            info!("Persistent store at {} closed", self.path.display());
        }
    }

    /// Distinct collection names present in the records or key/value tables,
    /// sorted ascending.
    pub fn collections(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        self.with_read("Failed to list collections", |txn| {
            let records = txn.open_table(RECORDS)?;
            for entry in records.iter()? {
                let (key, _) = entry?;
                names.insert(key.value().0.to_string());
            }
            let key_values = txn.open_table(KEY_VALUES)?;
            for entry in key_values.iter()? {
                let (key, _) = entry?;
                names.insert(key.value().0.to_string());
            }
            Ok(())
        });
        names.into_iter().collect()
    }

    /// Remove every record row and key/value row of a collection.
    pub fn delete_collection(&self, collection: &str) -> bool {
        self.with_write("Failed to delete collection", |txn| {
            let mut records = txn.open_table(RECORDS)?;
            let mut doomed = Vec::new();
            for entry in records.range((collection, "", i64::MIN)..)? {
                let (key, _) = entry?;
                let (owner, document, timestamp) = key.value();
                if owner != collection {
                    break;
                }
                doomed.push((document.to_string(), timestamp));
            }
            for (document, timestamp) in doomed {
                records.remove((collection, document.as_str(), timestamp))?;
            }

            let mut key_values = txn.open_table(KEY_VALUES)?;
            let mut doomed = Vec::new();
            for entry in key_values.range((collection, "")..)? {
                let (key, _) = entry?;
                let (owner, name) = key.value();
                if owner != collection {
                    break;
                }
                doomed.push(name.to_string());
            }
            for name in doomed {
                key_values.remove((collection, name.as_str()))?;
            }
            Ok(())
        })
    }

    pub fn upsert_api_key(&self, key: &str, scope: &str, deletable: bool) -> bool {
        self.with_write("Failed to upsert API key", |txn| {
            let mut table = txn.open_table(API_KEYS)?;
            table.insert(key, (scope, deletable))?;
            Ok(())
        })
    }

    pub fn delete_api_key(&self, key: &str) -> bool {
        self.with_write("Failed to delete API key", |txn| {
            let mut table = txn.open_table(API_KEYS)?;
            table.remove(key)?;
            Ok(())
        })
    }

    pub fn fetch_api_keys(&self) -> Vec<ApiKeyRow> {
        let mut rows = Vec::new();
        self.with_read("Failed to fetch API keys", |txn| {
            let table = txn.open_table(API_KEYS)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                let (scope, deletable) = value.value();
                rows.push(ApiKeyRow {
                    key: key.value().to_string(),
                    scope: scope.to_string(),
                    deletable,
                });
            }
            Ok(())
        });
        rows
    }

    /// Run `apply` inside the open flush transaction when one exists,
    /// otherwise inside a fresh transaction committed on success. Returns
    /// whether the writes were applied, logging any failure under `context`.
    fn with_write<F>(&self, context: &str, apply: F) -> bool
    where
        F: FnOnce(&WriteTransaction) -> std::result::Result<(), redb::Error>,
    {
        {
            let active = self.active_txn.lock();
            if let Some(txn) = active.as_ref() {
                return match apply(txn) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("{}: {}", context, err);
                        false
                    }
                };
            }
        }

        let guard = self.db.lock();
        let Some(db) = guard.as_ref() else {
            return false;
        };
        let result = (|| {
            let mut txn = db.begin_write()?;
            txn.set_durability(self.durability);
            apply(&txn)?;
            txn.commit()?;
            Ok::<(), redb::Error>(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("{}: {}", context, err);
                false
            }
        }
    }

    /// Run `read` inside a read transaction, logging any failure under
    /// `context`. Reads against a closed store are silent no-ops.
    fn with_read<F>(&self, context: &str, read: F)
    where
        F: FnOnce(&ReadTransaction) -> std::result::Result<(), redb::Error>,
    {
        let guard = self.db.lock();
        let Some(db) = guard.as_ref() else {
            return;
        };
        let result = (|| {
            let txn = db.begin_read()?;
            read(&txn)
        })();
        if let Err(err) = result {
            warn!("{}: {}", context, err);
        }
    }
}

impl RecordStore for PersistentStore {
    fn is_open(&self) -> bool {
        self.db.lock().is_some()
    }

    fn fetch_records(&self, collection: &str) -> Vec<StoredRecord> {
        let mut rows = Vec::new();
        self.with_read("Failed to fetch records", |txn| {
            let table = txn.open_table(RECORDS)?;
            for entry in table.range((collection, "", i64::MIN)..)? {
                let (key, value) = entry?;
                let (owner, document, timestamp) = key.value();
                if owner != collection {
                    break;
                }
                rows.push(StoredRecord {
                    document: document.to_string(),
                    timestamp,
                    payload: value.value().to_string(),
                });
            }
            Ok(())
        });
        rows
    }

    fn fetch_key_values(&self, collection: &str) -> Vec<StoredKeyValue> {
        let mut rows = Vec::new();
        self.with_read("Failed to fetch key values", |txn| {
            let table = txn.open_table(KEY_VALUES)?;
            for entry in table.range((collection, "")..)? {
                let (key, value) = entry?;
                let (owner, name) = key.value();
                if owner != collection {
                    break;
                }
                rows.push(StoredKeyValue {
                    key: name.to_string(),
                    value: value.value().to_string(),
                });
            }
            Ok(())
        });
        rows
    }

    fn upsert_record(
        &self,
        collection: &str,
        document: &str,
        timestamp: Timestamp,
        payload: &str,
    ) -> bool {
        self.with_write("Failed to upsert record", |txn| {
            let mut table = txn.open_table(RECORDS)?;
            table.insert((collection, document, timestamp), payload)?;
            Ok(())
        })
    }

    fn delete_record(&self, collection: &str, document: &str, timestamp: Timestamp) -> bool {
        self.with_write("Failed to delete record", |txn| {
            let mut table = txn.open_table(RECORDS)?;
            table.remove((collection, document, timestamp))?;
            Ok(())
        })
    }

    fn delete_records_in_range(
        &self,
        collection: &str,
        document: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> bool {
        if from > to {
            return true;
        }
        self.with_write("Failed to delete records in range", |txn| {
            let mut table = txn.open_table(RECORDS)?;
            let mut doomed = Vec::new();
            for entry in table.range((collection, document, from)..=(collection, document, to))? {
                let (key, _) = entry?;
                doomed.push(key.value().2);
            }
            for timestamp in doomed {
                table.remove((collection, document, timestamp))?;
            }
            Ok(())
        })
    }

    fn delete_document(&self, collection: &str, document: &str) -> bool {
        self.delete_records_in_range(collection, document, i64::MIN, i64::MAX)
    }

    fn upsert_key_value(&self, collection: &str, key: &str, value: &str) -> bool {
        self.with_write("Failed to upsert key value", |txn| {
            let mut table = txn.open_table(KEY_VALUES)?;
            table.insert((collection, key), value)?;
            Ok(())
        })
    }

    fn remove_key_value(&self, collection: &str, key: &str) -> bool {
        self.with_write("Failed to remove key value", |txn| {
            let mut table = txn.open_table(KEY_VALUES)?;
            table.remove((collection, key))?;
            Ok(())
        })
    }

    fn begin_transaction(&self) -> bool {
        let mut active = self.active_txn.lock();
        if active.is_some() {
            warn!("Transaction already open; refusing to nest");
            return false;
        }
        let guard = self.db.lock();
        let Some(db) = guard.as_ref() else {
            return false;
        };
        match db.begin_write() {
            Ok(mut txn) => {
                txn.set_durability(self.durability);
                *active = Some(txn);
                true
            }
            Err(err) => {
                warn!("Failed to begin transaction: {}", err);
                false
            }
        }
    }

    fn commit_transaction(&self) -> bool {
        let Some(txn) = self.active_txn.lock().take() else {
            return false;
        };
        match txn.commit() {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to commit transaction: {}", err);
                false
            }
        }
    }

    fn rollback_transaction(&self) {
        let Some(txn) = self.active_txn.lock().take() else {
            return;
        };
        if let Err(err) = txn.abort() {
            warn!("Failed to rollback transaction: {}", err);
        }
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn durability_for(level: DurabilityLevel) -> Durability {
    match level {
        DurabilityLevel::Relaxed => Durability::None,
        DurabilityLevel::Balanced => Durability::Eventual,
        DurabilityLevel::Strict => Durability::Immediate,
    }
}

/// Open each table once inside a committed transaction so the schema exists
/// before the first read.
fn ensure_schema(db: &Database) -> std::result::Result<(), redb::Error> {
    let txn = db.begin_write()?;
    {
        txn.open_table(RECORDS)?;
        txn.open_table(KEY_VALUES)?;
        txn.open_table(API_KEYS)?;
    }
    txn.commit()?;
    Ok(())
}
