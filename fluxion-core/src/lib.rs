//! # FluxionDB Core
//!
//! This crate provides the fundamental building blocks for FluxionDB:
//! - Core data structures
//! - Error types
//! - Configuration
//! - Metrics collection
//! - The persistence interface consumed by the collection engine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  fluxion-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • types      - Records and store row types     │
//! │  • traits     - Persistence interface           │
//! │  • error      - Error handling                  │
//! │  • config     - Storage configuration           │
//! │  • metrics    - Counters for monitoring         │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{DurabilityLevel, StorageConfig};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use traits::RecordStore;
pub use types::{ApiKeyRow, Record, StoredKeyValue, StoredRecord, Timestamp};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
