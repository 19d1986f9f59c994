//! # Configuration Management
//!
//! Configuration for the FluxionDB storage layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Folder holding the database file. Created if missing.
    pub data_dir: PathBuf,
    /// Commit durability for store writes.
    pub durability: DurabilityLevel,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            durability: DurabilityLevel::Balanced,
        }
    }
}

/// How eagerly commits reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// No syncing; data survives process crashes only.
    Relaxed,
    /// Commits are made durable lazily. The throughput/safety balance used
    /// by default.
    Balanced,
    /// Every commit is synced before returning.
    Strict,
}
