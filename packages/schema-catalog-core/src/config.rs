//! Catalog configuration.

use std::path::PathBuf;

/// Catalog configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Data directory for the persisted catalog
    pub data_dir: PathBuf,
    /// Default for `CommitOptions::auto_resolve`
    pub auto_resolve_conflicts: bool,
    /// Maximum length of class, attribute and constraint names
    pub max_identifier_length: usize,
    /// Maximum number of HASH partitions
    pub max_hash_partitions: u32,
    /// Maximum length of a partition name
    pub max_partition_name_length: usize,
    /// Widest integer range HASH pruning enumerates before giving up
    pub hash_range_enumeration_limit: u64,
    /// Request full scans when statistics are recomputed
    pub statistics_full_scan: bool,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
}

impl CatalogConfig {
    /// Path of the catalog snapshot inside `data_dir`.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            auto_resolve_conflicts: false,
            max_identifier_length: 254,
            max_hash_partitions: 1024,
            max_partition_name_length: 255,
            hash_range_enumeration_limit: 64,
            statistics_full_scan: true,
            persistence_max_retries: 3,      // Default retry attempts
            persistence_retry_delay_ms: 100, // 100ms delay between retries
        }
    }
}
