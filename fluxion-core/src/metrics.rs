//! # Metrics and Monitoring
//!
//! Counters for monitoring collection and store activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Collection metrics
    records_inserted: AtomicU64,
    records_deleted: AtomicU64,
    documents_dropped: AtomicU64,
    collections_loaded: AtomicU64,

    // Flush metrics
    flushes: AtomicU64,
    records_flushed: AtomicU64,
    store_write_failures: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                records_inserted: AtomicU64::new(0),
                records_deleted: AtomicU64::new(0),
                documents_dropped: AtomicU64::new(0),
                collections_loaded: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                records_flushed: AtomicU64::new(0),
                store_write_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Record an in-memory insert
    pub fn record_insert(&self) {
        self.inner.records_inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record in-memory record removals
    pub fn record_deletes(&self, count: u64) {
        self.inner.records_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a document dropped from memory
    pub fn record_document_dropped(&self) {
        self.inner.documents_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full collection load from the store
    pub fn record_load(&self) {
        self.inner.collections_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a flush pass and how many records it wrote
    pub fn record_flush(&self, records_written: u64) {
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        self.inner
            .records_flushed
            .fetch_add(records_written, Ordering::Relaxed);
    }

    /// Record a failed store write
    pub fn record_store_write_failure(&self) {
        self.inner
            .store_write_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metric values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_inserted: self.inner.records_inserted.load(Ordering::Relaxed),
            records_deleted: self.inner.records_deleted.load(Ordering::Relaxed),
            documents_dropped: self.inner.documents_dropped.load(Ordering::Relaxed),
            collections_loaded: self.inner.collections_loaded.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            records_flushed: self.inner.records_flushed.load(Ordering::Relaxed),
            store_write_failures: self.inner.store_write_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub records_inserted: u64,
    pub records_deleted: u64,
    pub documents_dropped: u64,
    pub collections_loaded: u64,
    pub flushes: u64,
    pub records_flushed: u64,
    pub store_write_failures: u64,
}
