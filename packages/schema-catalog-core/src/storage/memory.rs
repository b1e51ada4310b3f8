//! In-memory storage engine.
//!
//! Heaps are row vectors and indexes are key lists rebuilt on load; every
//! savepoint snapshots the whole state, which is adequate for catalogs
//! with modest data volumes and for tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::class::ClassStatistics;
use crate::constraint::IndexStatus;
use crate::error::SchemaError;
use crate::ids::{BTreeId, ClassId, HeapId};
use crate::storage::{IndexRequest, IndexTarget, Row, StorageEngine};
use crate::value::Value;

/// One-shot failure injected into the next matching storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    CreateIndex,
    LoadIndex,
    Flush,
    Statistics,
}

#[derive(Debug, Clone)]
struct HeapFile {
    class: ClassId,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    class: ClassId,
    key: Vec<Value>,
}

#[derive(Debug, Clone)]
struct IndexFile {
    name: String,
    unique: bool,
    /// Heaps the index covers; rescanned for reference checks
    targets: Vec<IndexTarget>,
    status: IndexStatus,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Default)]
struct StorageState {
    heaps: BTreeMap<HeapId, HeapFile>,
    indexes: BTreeMap<BTreeId, IndexFile>,
    permanent: BTreeSet<ClassId>,
    flushes: Vec<ClassId>,
}

/// Storage engine keeping heaps and indexes in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: StorageState,
    committed: StorageState,
    savepoints: Vec<(String, StorageState)>,
    next_heap: u64,
    next_btree: u64,
    faults: Vec<StorageFault>,
}

/// Printable key used for uniqueness and reference checks. Numeric values
/// that compare equal print identically.
fn key_string(key: &[Value]) -> Option<String> {
    if key.iter().any(Value::is_null) {
        return None;
    }
    Some(
        key.iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\u{1f}"),
    )
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of the given kind fail.
    pub fn inject_fault(&mut self, fault: StorageFault) {
        self.faults.push(fault);
    }

    fn take_fault(&mut self, fault: StorageFault, operation: &'static str) -> Result<(), SchemaError> {
        if let Some(pos) = self.faults.iter().position(|f| *f == fault) {
            self.faults.remove(pos);
            warn!(operation, "injected storage fault");
            return Err(SchemaError::Storage {
                operation,
                message: "injected fault".to_string(),
            });
        }
        Ok(())
    }

    pub fn index_exists(&self, btree: BTreeId) -> bool {
        self.state.indexes.contains_key(&btree)
    }

    pub fn index_count(&self) -> usize {
        self.state.indexes.len()
    }

    pub fn index_entry_count(&self, btree: BTreeId) -> Option<usize> {
        self.state.indexes.get(&btree).map(|i| i.entries.len())
    }

    pub fn index_status(&self, btree: BTreeId) -> Option<IndexStatus> {
        self.state.indexes.get(&btree).map(|i| i.status)
    }

    pub fn index_is_unique(&self, btree: BTreeId) -> Option<bool> {
        self.state.indexes.get(&btree).map(|i| i.unique)
    }

    /// Class owning the heap.
    pub fn heap_class(&self, heap: HeapId) -> Option<ClassId> {
        self.state.heaps.get(&heap).map(|h| h.class)
    }

    pub fn index_name(&self, btree: BTreeId) -> Option<&str> {
        self.state.indexes.get(&btree).map(|i| i.name.as_str())
    }

    /// Classes with entries in the index.
    pub fn index_classes(&self, btree: BTreeId) -> BTreeSet<ClassId> {
        self.state
            .indexes
            .get(&btree)
            .map(|i| i.entries.iter().map(|e| e.class).collect())
            .unwrap_or_default()
    }

    pub fn heap_exists(&self, heap: HeapId) -> bool {
        self.state.heaps.contains_key(&heap)
    }

    /// Number of flushes requested for the class.
    pub fn flush_count(&self, class: ClassId) -> usize {
        self.state.flushes.iter().filter(|c| **c == class).count()
    }

    pub fn is_permanent(&self, class: ClassId) -> bool {
        self.state.permanent.contains(&class)
    }

    fn heap(&self, heap: HeapId) -> Result<&HeapFile, SchemaError> {
        self.state.heaps.get(&heap).ok_or_else(|| SchemaError::Storage {
            operation: "heap lookup",
            message: format!("{heap} does not exist"),
        })
    }

    fn heap_mut(&mut self, heap: HeapId) -> Result<&mut HeapFile, SchemaError> {
        self.state
            .heaps
            .get_mut(&heap)
            .ok_or_else(|| SchemaError::Storage {
                operation: "heap lookup",
                message: format!("{heap} does not exist"),
            })
    }

    fn collect_entries(&self, targets: &[IndexTarget]) -> Result<Vec<IndexEntry>, SchemaError> {
        let mut entries = Vec::new();
        for target in targets {
            // a destroyed heap contributes no keys
            let Some(heap) = self.state.heaps.get(&target.heap) else {
                continue;
            };
            for row in &heap.rows {
                let key = target
                    .attributes
                    .iter()
                    .map(|att| {
                        att.and_then(|id| row.get(&id).cloned())
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                entries.push(IndexEntry {
                    class: target.class,
                    key,
                });
            }
        }
        Ok(entries)
    }

    fn check_entries(&self, request: &IndexRequest, entries: &[IndexEntry]) -> Result<(), SchemaError> {
        if request.unique {
            let mut seen = HashSet::new();
            for entry in entries {
                if let Some(key) = key_string(&entry.key) {
                    if !seen.insert(key) {
                        return Err(SchemaError::UniqueViolation {
                            constraint: request.name.clone(),
                        });
                    }
                }
            }
        }
        if let Some(referenced) = request.references {
            let parent = self
                .state
                .indexes
                .get(&referenced)
                .ok_or_else(|| SchemaError::Storage {
                    operation: "load index",
                    message: format!("referenced {referenced} does not exist"),
                })?;
            let keys: HashSet<String> = self
                .collect_entries(&parent.targets)?
                .iter()
                .filter_map(|e| key_string(&e.key))
                .collect();
            for entry in entries {
                if let Some(key) = key_string(&entry.key) {
                    if !keys.contains(&key) {
                        return Err(SchemaError::ForeignKeyViolation {
                            constraint: request.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn allocate_btree(&mut self) -> BTreeId {
        self.next_btree += 1;
        BTreeId(self.next_btree)
    }
}

impl StorageEngine for MemoryStorage {
    fn create_heap(&mut self, class: ClassId) -> Result<HeapId, SchemaError> {
        self.next_heap += 1;
        let heap = HeapId(self.next_heap);
        self.state.heaps.insert(
            heap,
            HeapFile {
                class,
                rows: Vec::new(),
            },
        );
        debug!(%class, %heap, "created heap");
        Ok(heap)
    }

    fn destroy_heap(&mut self, heap: HeapId) -> Result<(), SchemaError> {
        self.state.heaps.remove(&heap);
        Ok(())
    }

    fn has_instances(&self, heap: HeapId) -> Result<bool, SchemaError> {
        Ok(!self.heap(heap)?.rows.is_empty())
    }

    fn instance_count(&self, heap: HeapId) -> Result<u64, SchemaError> {
        Ok(self.heap(heap)?.rows.len() as u64)
    }

    fn create_index(&mut self, request: &IndexRequest) -> Result<BTreeId, SchemaError> {
        self.take_fault(StorageFault::CreateIndex, "create index")?;
        let btree = self.allocate_btree();
        self.state.indexes.insert(
            btree,
            IndexFile {
                name: request.name.clone(),
                unique: request.unique,
                targets: request.targets.clone(),
                status: request.status,
                entries: Vec::new(),
            },
        );
        debug!(name = %request.name, %btree, "created empty index");
        Ok(btree)
    }

    fn load_index(&mut self, request: &IndexRequest, existing: Option<BTreeId>) -> Result<BTreeId, SchemaError> {
        self.take_fault(StorageFault::LoadIndex, "load index")?;
        let entries = self.collect_entries(&request.targets)?;
        self.check_entries(request, &entries)?;
        let btree = match existing {
            Some(btree) if self.state.indexes.contains_key(&btree) => btree,
            Some(btree) => {
                return Err(SchemaError::Storage {
                    operation: "load index",
                    message: format!("{btree} does not exist"),
                })
            }
            None => self.allocate_btree(),
        };
        debug!(name = %request.name, %btree, entries = entries.len(), "loaded index");
        self.state.indexes.insert(
            btree,
            IndexFile {
                name: request.name.clone(),
                unique: request.unique,
                targets: request.targets.clone(),
                status: IndexStatus::Normal,
                entries,
            },
        );
        Ok(btree)
    }

    fn delete_index(&mut self, btree: BTreeId) -> Result<(), SchemaError> {
        if self.state.indexes.remove(&btree).is_some() {
            debug!(%btree, "deleted index");
        }
        Ok(())
    }

    fn remove_class_from_index(&mut self, class: ClassId, btree: BTreeId, _heap: HeapId) -> Result<(), SchemaError> {
        if let Some(index) = self.state.indexes.get_mut(&btree) {
            index.entries.retain(|e| e.class != class);
            index.targets.retain(|t| t.class != class);
        }
        Ok(())
    }

    fn flush_instances(&mut self, class: ClassId, heap: HeapId, _decache: bool) -> Result<(), SchemaError> {
        self.take_fault(StorageFault::Flush, "flush instances")?;
        self.heap(heap)?;
        self.state.flushes.push(class);
        Ok(())
    }

    fn assign_permanent_oid(&mut self, class: ClassId) -> Result<(), SchemaError> {
        self.state.permanent.insert(class);
        Ok(())
    }

    fn recompute_statistics(&mut self, _class: ClassId, heap: HeapId, full_scan: bool) -> Result<ClassStatistics, SchemaError> {
        self.take_fault(StorageFault::Statistics, "update statistics")?;
        Ok(ClassStatistics {
            row_count: self.instance_count(heap)?,
            full_scan,
        })
    }

    fn insert_row(&mut self, heap: HeapId, row: Row) -> Result<(), SchemaError> {
        // indexes are not maintained incrementally; loads rescan heaps
        self.heap_mut(heap)?.rows.push(row);
        Ok(())
    }

    fn take_rows(&mut self, heap: HeapId) -> Result<Vec<Row>, SchemaError> {
        Ok(std::mem::take(&mut self.heap_mut(heap)?.rows))
    }

    fn scan(&self, heap: HeapId) -> Result<Vec<Row>, SchemaError> {
        Ok(self.heap(heap)?.rows.clone())
    }

    fn savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        self.savepoints.push((name.to_string(), self.state.clone()));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| SchemaError::SavepointNotFound(name.to_string()))?;
        self.state = self.savepoints[pos].1.clone();
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| SchemaError::SavepointNotFound(name.to_string()))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), SchemaError> {
        self.committed = self.state.clone();
        self.savepoints.clear();
        Ok(())
    }

    fn abort_transaction(&mut self) -> Result<(), SchemaError> {
        self.state = self.committed.clone();
        self.savepoints.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::ids::AttrId;
    use crate::storage::IndexTarget;

    fn row(id: u32, v: i64) -> Row {
        let mut row = Row::new();
        row.insert(AttrId(id), Value::Integer(v));
        row
    }

    fn request(heap: HeapId, unique: bool) -> IndexRequest {
        let mut req = IndexRequest::new("u_t_a", vec![Domain::Integer]);
        req.unique = unique;
        req.targets.push(IndexTarget {
            class: ClassId(1),
            heap,
            attributes: vec![Some(AttrId(0))],
        });
        req
    }

    #[test]
    fn test_unique_load_detects_duplicates() {
        let mut storage = MemoryStorage::new();
        let heap = storage.create_heap(ClassId(1)).unwrap();
        storage.insert_row(heap, row(0, 1)).unwrap();
        storage.insert_row(heap, row(0, 1)).unwrap();
        let err = storage.load_index(&request(heap, true), None).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(storage.index_count(), 0);

        let btree = storage.load_index(&request(heap, false), None).unwrap();
        assert_eq!(storage.index_entry_count(btree), Some(2));
    }

    #[test]
    fn test_nulls_do_not_violate_uniqueness() {
        let mut storage = MemoryStorage::new();
        let heap = storage.create_heap(ClassId(1)).unwrap();
        storage.insert_row(heap, Row::new()).unwrap();
        storage.insert_row(heap, Row::new()).unwrap();
        assert!(storage.load_index(&request(heap, true), None).is_ok());
    }

    #[test]
    fn test_savepoint_rollback_restores_indexes() {
        let mut storage = MemoryStorage::new();
        let heap = storage.create_heap(ClassId(1)).unwrap();
        storage.savepoint("sp").unwrap();
        let btree = storage.create_index(&request(heap, true)).unwrap();
        assert!(storage.index_exists(btree));
        storage.rollback_to_savepoint("sp").unwrap();
        assert!(!storage.index_exists(btree));
        storage.release_savepoint("sp").unwrap();
        assert!(storage.rollback_to_savepoint("sp").is_err());
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let mut storage = MemoryStorage::new();
        let heap = storage.create_heap(ClassId(1)).unwrap();
        storage.inject_fault(StorageFault::Flush);
        assert!(storage.flush_instances(ClassId(1), heap, true).is_err());
        assert!(storage.flush_instances(ClassId(1), heap, true).is_ok());
        assert_eq!(storage.flush_count(ClassId(1)), 1);
    }
}
