//! # FluxionDB Storage Engine
//!
//! In-memory time-series collections backed by a durable row store.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  insert ──> Collection (sorted per-document, dirty)         │
//! │                  │                                          │
//! │                  ▼ flush (one transaction per pass)         │
//! │             PersistentStore (redb)                          │
//! │                                                             │
//! │  deletions write through to the store synchronously         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  query ──> Collection (binary search on timestamps)         │
//! │                                                             │
//! │  load_from_disk hydrates a collection from the store        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod collection;
pub mod store;

pub use collection::{Collection, CollectionStats};
pub use store::{PersistentStore, DB_FILE_NAME};
