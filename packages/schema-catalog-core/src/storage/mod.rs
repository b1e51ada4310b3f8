//! Storage engine contract consumed by the catalog.
//!
//! The catalog only sequences heap and B-tree operations; the engine owns
//! their physical representation and concurrency control.

mod memory;

pub use memory::{MemoryStorage, StorageFault};

use std::collections::BTreeMap;

use crate::class::ClassStatistics;
use crate::constraint::IndexStatus;
use crate::domain::Domain;
use crate::error::SchemaError;
use crate::ids::{AttrId, BTreeId, ClassId, HeapId};
use crate::value::Value;

/// A stored row keyed by attribute id.
pub type Row = BTreeMap<AttrId, Value>;

/// One class participating in an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTarget {
    pub class: ClassId,
    pub heap: HeapId,
    /// Key attribute ids in that class; `None` when the class has not
    /// stored the attribute yet
    pub attributes: Vec<Option<AttrId>>,
}

/// Parameters for creating or bulk-loading an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub name: String,
    pub key_domains: Vec<Domain>,
    pub targets: Vec<IndexTarget>,
    pub unique: bool,
    pub primary_key: bool,
    pub reverse: bool,
    pub filter_predicate: Option<String>,
    pub function_expression: Option<String>,
    /// Primary key index every non-null key must exist in
    pub references: Option<BTreeId>,
    pub status: IndexStatus,
}

impl IndexRequest {
    pub fn new(name: impl Into<String>, key_domains: Vec<Domain>) -> Self {
        Self {
            name: name.into(),
            key_domains,
            targets: Vec::new(),
            unique: false,
            primary_key: false,
            reverse: false,
            filter_predicate: None,
            function_expression: None,
            references: None,
            status: IndexStatus::Normal,
        }
    }
}

/// Heap, index and statistics operations the catalog depends on.
pub trait StorageEngine {
    /// Creates the heap file of a new class.
    fn create_heap(&mut self, class: ClassId) -> Result<HeapId, SchemaError>;

    /// Destroys a heap file and its rows.
    fn destroy_heap(&mut self, heap: HeapId) -> Result<(), SchemaError>;

    /// Returns `true` if the heap holds at least one row.
    fn has_instances(&self, heap: HeapId) -> Result<bool, SchemaError>;

    /// Number of rows in the heap.
    fn instance_count(&self, heap: HeapId) -> Result<u64, SchemaError>;

    /// Creates an empty index.
    fn create_index(&mut self, request: &IndexRequest) -> Result<BTreeId, SchemaError>;

    /// Creates an index and bulk-loads it from the target heaps, checking
    /// uniqueness and references.
    ///
    /// # Arguments
    /// * `request` - Index description and participating heaps
    /// * `existing` - Load into this already-created index instead of
    ///   allocating a new one (second phase of an online build)
    fn load_index(&mut self, request: &IndexRequest, existing: Option<BTreeId>) -> Result<BTreeId, SchemaError>;

    /// Physically deletes an index.
    fn delete_index(&mut self, btree: BTreeId) -> Result<(), SchemaError>;

    /// Removes one class's entries from a shared index.
    fn remove_class_from_index(&mut self, class: ClassId, btree: BTreeId, heap: HeapId) -> Result<(), SchemaError>;

    /// Writes dirty instances of the class, optionally dropping them from
    /// the workspace.
    fn flush_instances(&mut self, class: ClassId, heap: HeapId, decache: bool) -> Result<(), SchemaError>;

    /// Makes the class identity durable.
    fn assign_permanent_oid(&mut self, class: ClassId) -> Result<(), SchemaError>;

    /// Recomputes statistics for the class heap.
    fn recompute_statistics(&mut self, class: ClassId, heap: HeapId, full_scan: bool) -> Result<ClassStatistics, SchemaError>;

    /// Inserts a row into a heap.
    fn insert_row(&mut self, heap: HeapId, row: Row) -> Result<(), SchemaError>;

    /// Removes and returns all rows of a heap.
    fn take_rows(&mut self, heap: HeapId) -> Result<Vec<Row>, SchemaError>;

    /// Returns a copy of all rows of a heap.
    fn scan(&self, heap: HeapId) -> Result<Vec<Row>, SchemaError>;

    /// Sets a named storage savepoint.
    fn savepoint(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Undoes everything done since the named savepoint.
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Forgets the named savepoint and all later ones.
    fn release_savepoint(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Makes all changes durable and clears savepoints.
    fn commit_transaction(&mut self) -> Result<(), SchemaError>;

    /// Discards all uncommitted changes after the transaction was aborted.
    fn abort_transaction(&mut self) -> Result<(), SchemaError>;
}
