//! Catalog snapshots on disk.
//!
//! The snapshot holds the durable catalog state only. Heaps and B-trees
//! belong to the storage engine; a loaded catalog keeps the ids recorded
//! in the snapshot.

pub mod io_utils;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{CatalogState, SchemaCatalog};
use crate::config::CatalogConfig;
use crate::error::SchemaError;
use crate::partition::PartitionInfo;
use crate::storage::StorageEngine;
use crate::transaction::TransactionManager;

use io_utils::{classify_io_error, retry_io_operation};

/// Current catalog file format.
pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// On-disk catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub version: u32,
    /// CRC32 of the compact JSON encoding of `payload`
    pub checksum: u32,
    pub payload: serde_json::Value,
}

fn payload_checksum(payload: &serde_json::Value) -> Result<u32, SchemaError> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize())
}

impl CatalogFile {
    pub fn from_state(state: &CatalogState) -> Result<Self, SchemaError> {
        let payload = serde_json::to_value(state)?;
        Ok(Self {
            version: CATALOG_FORMAT_VERSION,
            checksum: payload_checksum(&payload)?,
            payload,
        })
    }

    /// Verifies version and checksum and decodes the state.
    pub fn into_state(self) -> Result<CatalogState, SchemaError> {
        if self.version != CATALOG_FORMAT_VERSION {
            return Err(SchemaError::SerializationError(format!(
                "Unsupported catalog version: {}",
                self.version
            )));
        }
        let actual = payload_checksum(&self.payload)?;
        if actual != self.checksum {
            return Err(SchemaError::DataCorruption(format!(
                "catalog checksum mismatch: expected {:08x}, got {actual:08x}",
                self.checksum
            )));
        }
        serde_json::from_value(self.payload)
            .map_err(|e| SchemaError::SerializationError(format!("Failed to parse catalog: {e}")))
    }
}

fn write_catalog_file(path: &Path, file: &CatalogFile) -> Result<(), SchemaError> {
    let json = serde_json::to_string_pretty(file)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| classify_io_error(e, "Failed to create catalog directory"))?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut out = File::create(&temp_path).map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
    out.write_all(json.as_bytes())
        .map_err(|e| classify_io_error(e, "Failed to write catalog"))?;
    out.sync_all().map_err(|e| classify_io_error(e, "Failed to sync catalog"))?;

    // Atomic rename
    fs::rename(&temp_path, path).map_err(|e| classify_io_error(e, "Failed to rename catalog file"))?;
    Ok(())
}

/// Reads and verifies a catalog file.
pub fn read_catalog_file(path: &Path) -> Result<CatalogState, SchemaError> {
    let mut file = File::open(path).map_err(|e| classify_io_error(e, "Failed to open catalog file"))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| classify_io_error(e, "Failed to read catalog file"))?;
    let file: CatalogFile = serde_json::from_str(&contents)
        .map_err(|e| SchemaError::SerializationError(format!("Failed to parse catalog file: {e}")))?;
    file.into_state()
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Writes the committed catalog state to `path`.
    ///
    /// # Arguments
    /// * `path` - Destination file; replaced atomically
    pub fn save_catalog(&self, path: &Path) -> Result<(), SchemaError> {
        let file = CatalogFile::from_state(&self.state)?;
        retry_io_operation(
            || write_catalog_file(path, &file),
            self.config.persistence_max_retries,
            self.config.persistence_retry_delay_ms,
            "save_catalog",
        )?;
        info!(path = %path.display(), classes = self.state.classes.len(), "catalog saved");
        Ok(())
    }

    /// Saves to the configured catalog file.
    pub fn save(&self) -> Result<(), SchemaError> {
        self.save_catalog(&self.config.catalog_path())
    }

    /// Opens a catalog saved by [`SchemaCatalog::save_catalog`].
    ///
    /// The name index is rebuilt from the class records.
    ///
    /// # Arguments
    /// * `path` - Catalog file
    /// * `config` - Catalog configuration
    /// * `storage` - Storage engine holding the recorded heaps and B-trees
    /// * `transactions` - Transaction manager
    pub fn load_catalog(path: &Path, config: CatalogConfig, storage: S, transactions: T) -> Result<Self, SchemaError> {
        let mut state = retry_io_operation(
            || read_catalog_file(path),
            config.persistence_max_retries,
            config.persistence_retry_delay_ms,
            "load_catalog",
        )?;

        state.names = state
            .classes
            .values()
            .map(|class| (class.name.clone(), class.id))
            .collect();
        if let Some(max) = state.classes.keys().map(|id| id.0).max() {
            state.next_class_id = state.next_class_id.max(max);
        }
        for class in state.classes.values() {
            class.constraints()?;
        }
        debug!(path = %path.display(), classes = state.classes.len(), "catalog loaded");
        Ok(Self::from_state(config, state, storage, transactions))
    }

    /// Cross-checks the catalog records against each other.
    ///
    /// # Returns
    /// One message per problem found; empty when the catalog is consistent.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, id) in &self.state.names {
            match self.state.classes.get(id) {
                Some(class) if &class.name == name => {}
                _ => problems.push(format!("name '{name}' points at {id}")),
            }
        }
        for class in self.state.classes.values() {
            if self.state.names.get(&class.name) != Some(&class.id) {
                problems.push(format!("class '{}' missing from the name index", class.name));
            }
            for sup in &class.inheritance {
                match self.state.classes.get(sup) {
                    Some(s) if s.users.contains(&class.id) => {}
                    Some(s) => problems.push(format!("'{}' does not list subclass '{}'", s.name, class.name)),
                    None => problems.push(format!("'{}' inherits from missing {sup}", class.name)),
                }
            }
            for sub in &class.users {
                if !self.state.classes.get(sub).is_some_and(|s| s.inheritance.contains(&class.id)) {
                    problems.push(format!("'{}' lists {sub} as a subclass", class.name));
                }
            }
            if class.attributes.iter().filter_map(|a| a.id).any(|id| id.0 >= class.att_ids) {
                problems.push(format!("'{}' has attribute ids past its counter", class.name));
            }
            match class.constraints() {
                Ok(constraints) => {
                    for c in constraints {
                        let missing = c
                            .foreign_key
                            .as_ref()
                            .and_then(|fk| fk.ref_class)
                            .is_some_and(|r| !self.state.classes.contains_key(&r));
                        if missing {
                            problems.push(format!("foreign key '{}' of '{}' references a missing class", c.name, class.name));
                        }
                    }
                }
                Err(e) => problems.push(format!("'{}' has unreadable constraints: {e}", class.name)),
            }
            match &class.partition {
                Some(PartitionInfo::Parent(info)) => {
                    let rows = self.state.partitions.get(&class.id);
                    for child in &info.partitions {
                        let listed = rows.is_some_and(|rows| rows.values().any(|r| r.child == *child));
                        let linked = self
                            .state
                            .classes
                            .get(child)
                            .and_then(|c| c.partition.as_ref())
                            .and_then(|p| p.child_info())
                            .is_some_and(|p| p.parent == class.id);
                        if !listed || !linked {
                            problems.push(format!("partition {child} of '{}' is not consistent", class.name));
                        }
                    }
                }
                Some(PartitionInfo::Child(info)) => {
                    let listed = self
                        .state
                        .partitions
                        .get(&info.parent)
                        .and_then(|rows| rows.get(&info.name))
                        .is_some_and(|row| row.child == class.id);
                    if !listed {
                        problems.push(format!("partition '{}' has no catalog row", class.name));
                    }
                }
                None => {}
            }
        }
        problems
    }
}
