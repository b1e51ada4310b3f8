//! The schema catalog context object.
//!
//! All catalog state that DDL touches lives here: committed classes, the
//! name index, the partition catalog relation, pending edits, and the
//! storage and transaction collaborators. Every DDL entry point runs under
//! a named savepoint; on failure the catalog state, the storage engine and
//! the transaction manager are rolled back to it together.

mod descriptor;
mod pending;
mod rows;

pub use descriptor::AttributeDescriptor;
pub use pending::{CatalogView, PendingEdits};
pub(crate) use rows::heap_of;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::class::{normalize_name, validate_identifier, Class, ClassType, Resolution, ResolutionSpace};
use crate::config::CatalogConfig;
use crate::error::{ErrorKind, SchemaError};
use crate::ids::ClassId;
use crate::method::{MethodResolver, StaticMethodResolver};
use crate::partition::{PartitionCache, PartitionCatalog, PartitionRow};
use crate::storage::{MemoryStorage, StorageEngine};
use crate::template::{InheritedName, Template};
use crate::transaction::{MemoryTransactions, TransactionManager};

/// Durable catalog contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogState {
    pub classes: BTreeMap<ClassId, Class>,
    /// Normalized class name to id
    pub names: BTreeMap<String, ClassId>,
    /// Partition catalog relation keyed by (parent, partition name)
    pub partitions: PartitionCatalog,
    /// Last class id handed out
    pub next_class_id: u32,
}

/// Schema catalog and DDL engine for one session.
///
/// DDL methods take `&mut self`: one operation runs at a time, and only one
/// operation may have a class checked out for edit.
pub struct SchemaCatalog<S: StorageEngine = MemoryStorage, T: TransactionManager = MemoryTransactions> {
    pub(crate) config: CatalogConfig,
    pub(crate) state: CatalogState,
    /// State at the start of the current transaction
    tx_base: CatalogState,
    /// Catalog snapshots of the open DDL savepoints, innermost last
    savepoints: Vec<(String, CatalogState)>,
    savepoint_seq: u64,
    pub(crate) pending: PendingEdits,
    pub(crate) storage: S,
    pub(crate) transactions: T,
    pub(crate) methods: Arc<dyn MethodResolver>,
    pub(crate) partition_cache: PartitionCache,
    pub(crate) descriptor_epochs: HashMap<ClassId, u64>,
}

impl SchemaCatalog {
    /// Creates an empty catalog over the in-memory storage engine and
    /// transaction manager.
    pub fn in_memory(config: CatalogConfig) -> Self {
        Self::new(config, MemoryStorage::new(), MemoryTransactions::default())
    }
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Creates an empty catalog.
    ///
    /// # Arguments
    /// * `config` - Catalog configuration
    /// * `storage` - Heap and index engine
    /// * `transactions` - Lock, authorization and savepoint manager
    pub fn new(config: CatalogConfig, storage: S, transactions: T) -> Self {
        Self::from_state(config, CatalogState::default(), storage, transactions)
    }

    pub(crate) fn from_state(config: CatalogConfig, state: CatalogState, storage: S, transactions: T) -> Self {
        let descriptor_epochs = state.classes.keys().map(|id| (*id, 0)).collect();
        Self {
            config,
            tx_base: state.clone(),
            state,
            savepoints: Vec::new(),
            savepoint_seq: 0,
            pending: PendingEdits::new(),
            storage,
            transactions,
            methods: Arc::new(StaticMethodResolver::new()),
            partition_cache: PartitionCache::new(),
            descriptor_epochs,
        }
    }

    /// Replaces the resolver used to link methods.
    pub fn with_method_resolver(mut self, resolver: Arc<dyn MethodResolver>) -> Self {
        self.methods = resolver;
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn transactions(&self) -> &T {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut T {
        &mut self.transactions
    }

    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    /// Pruning contexts shared with query planners.
    pub fn partition_cache(&self) -> &PartitionCache {
        &self.partition_cache
    }

    /// Committed class by id.
    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.state.classes.get(&id)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.state.names.get(&normalize_name(name)).copied()
    }

    /// Committed class by name.
    pub fn find_class(&self, name: &str) -> Result<&Class, SchemaError> {
        self.class_id(name)
            .and_then(|id| self.state.classes.get(&id))
            .ok_or_else(|| SchemaError::ClassNotFound {
                class: normalize_name(name),
            })
    }

    pub(crate) fn class_by_id(&self, id: ClassId) -> Result<&Class, SchemaError> {
        self.state
            .classes
            .get(&id)
            .ok_or_else(|| SchemaError::ClassNotFound {
                class: id.to_string(),
            })
    }

    pub(crate) fn class_by_id_mut(&mut self, id: ClassId) -> Result<&mut Class, SchemaError> {
        self.state
            .classes
            .get_mut(&id)
            .ok_or_else(|| SchemaError::ClassNotFound {
                class: id.to_string(),
            })
    }

    /// Name of a class, or its id when unknown.
    pub fn class_name(&self, id: ClassId) -> String {
        self.state
            .classes
            .get(&id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// All committed classes in id order.
    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.state.classes.values()
    }

    /// Partition catalog rows of a partitioned parent, by partition name.
    pub fn partition_rows(&self, parent: ClassId) -> Vec<&PartitionRow> {
        self.state
            .partitions
            .get(&parent)
            .map(|rows| rows.values().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if the class is checked out by a running DDL
    /// operation.
    pub fn is_being_edited(&self, id: ClassId) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_edit_count(&self) -> usize {
        self.pending.len()
    }

    /// Committed classes combined with pending edits.
    pub fn view(&self) -> CatalogView<'_> {
        CatalogView {
            classes: &self.state.classes,
            pending: &self.pending,
        }
    }

    /// Direct and indirect subclasses of `class`, found through
    /// inheritance lists.
    pub(crate) fn subclass_closure(&self, class: ClassId) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            for candidate in self.state.classes.values() {
                if candidate.inheritance.contains(&current) && !out.contains(&candidate.id) {
                    out.push(candidate.id);
                    stack.push(candidate.id);
                }
            }
        }
        out
    }

    /// Returns `true` if `ancestor` is reachable from `class` through
    /// committed inheritance.
    pub(crate) fn is_ancestor(&self, ancestor: ClassId, class: ClassId) -> bool {
        let mut stack = vec![class];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(c) = self.state.classes.get(&current) {
                for sup in &c.inheritance {
                    if *sup == ancestor {
                        return true;
                    }
                    stack.push(*sup);
                }
            }
        }
        false
    }

    // ---- templates ----

    /// Opens a template for a class that does not exist yet.
    pub fn new_template(&self, name: &str, class_type: ClassType) -> Result<Template, SchemaError> {
        let template = Template::new(name, class_type);
        validate_identifier(&template.name, self.config.max_identifier_length)?;
        if self.state.names.contains_key(&template.name) {
            return Err(SchemaError::ClassAlreadyExists(template.name));
        }
        Ok(template)
    }

    /// Opens a template on an existing class.
    pub fn edit_template(&self, name: &str) -> Result<Template, SchemaError> {
        let class = self.find_class(name)?;
        Template::from_class(class, |id| self.class_name(id))
    }

    /// Opens a template on `existing`, or on a new class named `name`.
    pub fn begin_template(
        &self,
        existing: Option<&str>,
        name: &str,
        class_type: ClassType,
    ) -> Result<Template, SchemaError> {
        match existing {
            Some(existing) => self.edit_template(existing),
            None => self.new_template(name, class_type),
        }
    }

    /// Appends a superclass to a template.
    ///
    /// Rejects duplicates, the class itself, superclasses that would close
    /// a cycle, and mixing classes with views.
    pub fn add_superclass(&self, template: &mut Template, superclass: &str) -> Result<(), SchemaError> {
        let sup = self.find_class(superclass)?;
        let cycle = || SchemaError::SuperCausesCycle {
            class: template.name.clone(),
            superclass: sup.name.clone(),
        };
        if sup.name == template.name || Some(sup.id) == template.current {
            return Err(cycle());
        }
        if let Some(current) = template.current {
            if self.is_ancestor(current, sup.id) {
                return Err(cycle());
            }
        }
        if template.inheritance.contains(&sup.id) {
            return Err(SchemaError::SuperClassExists {
                class: template.name.clone(),
                superclass: sup.name.clone(),
            });
        }
        if sup.class_type != template.class_type || sup.partition.is_some() {
            return Err(SchemaError::IncompatibleSuperClass {
                class: template.name.clone(),
                superclass: sup.name.clone(),
            });
        }
        let id = sup.id;
        template.push_superclass(id);
        self.refresh_inherited(template)?;
        debug!(class = %template.name, superclass = %superclass, "template add superclass");
        Ok(())
    }

    /// Removes a superclass from a template together with its resolutions.
    pub fn drop_superclass(&self, template: &mut Template, superclass: &str) -> Result<(), SchemaError> {
        let sup = self.find_class(superclass)?;
        if !template.remove_superclass(sup.id) {
            return Err(SchemaError::SuperNotFound {
                class: template.name.clone(),
                superclass: sup.name.clone(),
            });
        }
        self.refresh_inherited(template)
    }

    /// Records a resolution selecting `name` from `superclass`, optionally
    /// under an alias.
    pub fn add_resolution(
        &self,
        template: &mut Template,
        superclass: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), SchemaError> {
        let sup = self.find_class(superclass)?;
        let name = normalize_name(name);
        if !template.inheritance.contains(&sup.id) {
            return Err(SchemaError::SuperNotFound {
                class: template.name.clone(),
                superclass: sup.name.clone(),
            });
        }
        let space = if sup.has_component(&name, ResolutionSpace::Instance) {
            ResolutionSpace::Instance
        } else if sup.has_component(&name, ResolutionSpace::Class) {
            ResolutionSpace::Class
        } else {
            return Err(SchemaError::InvalidResolution {
                class: template.name.clone(),
                name,
                superclass: sup.name.clone(),
            });
        };
        template.add_resolution(Resolution {
            class: sup.id,
            name,
            alias: alias.map(normalize_name),
            space,
        })
    }

    /// Deletes the resolution of `name` from `superclass`.
    pub fn delete_resolution(&self, template: &mut Template, superclass: &str, name: &str) -> Result<(), SchemaError> {
        let sup = self.find_class(superclass)?;
        let name = normalize_name(name);
        let removed = template.delete_resolution(sup.id, &name, ResolutionSpace::Instance)
            || template.delete_resolution(sup.id, &name, ResolutionSpace::Class);
        if !removed {
            return Err(SchemaError::ResolutionNotFound {
                class: template.name.clone(),
                name,
                superclass: sup.name.clone(),
            });
        }
        Ok(())
    }

    /// Rebuilds the inherited-name snapshot of a template from its current
    /// superclasses.
    pub(crate) fn refresh_inherited(&self, template: &mut Template) -> Result<(), SchemaError> {
        let mut names = Vec::new();
        let mut constraints = Vec::new();
        for &sup in &template.inheritance {
            let class = self.class_by_id(sup)?;
            for att in class.ordered_attributes().into_iter().chain(class.class_attributes.iter()) {
                names.push(InheritedName {
                    name: att.name.clone(),
                    origin: self.class_name(att.origin.unwrap_or(sup)),
                    space: att.namespace.resolution_space(),
                });
            }
            for method in class.methods.iter().chain(class.class_methods.iter()) {
                names.push(InheritedName {
                    name: method.name.clone(),
                    origin: self.class_name(method.origin.unwrap_or(sup)),
                    space: method.namespace.resolution_space(),
                });
            }
            for mut constraint in class.constraints()? {
                if constraint.kind.is_inheritable() {
                    constraint.origin = constraint.origin.or(Some(sup));
                    constraints.push(constraint);
                }
            }
        }
        template.inherited = names;
        template.inherited_constraints = constraints;
        Ok(())
    }

    // ---- savepoints and transactions ----

    /// Runs `op` under a fresh savepoint.
    ///
    /// On error every pending edit is released and catalog, storage and
    /// transaction state return to the savepoint. When the transaction
    /// manager already aborted the transaction, the catalog returns to the
    /// start of the transaction instead and no savepoint rollback is
    /// attempted.
    pub(crate) fn atomically<R>(
        &mut self,
        prefix: &str,
        op: impl FnOnce(&mut Self) -> Result<R, SchemaError>,
    ) -> Result<R, SchemaError> {
        self.savepoint_seq += 1;
        let name = format!("{prefix}_{}", self.savepoint_seq);
        self.transactions.savepoint(&name)?;
        self.storage.savepoint(&name)?;
        self.savepoints.push((name.clone(), self.state.clone()));

        match op(self) {
            Ok(value) => {
                self.release_savepoint(&name)?;
                Ok(value)
            }
            Err(err) => {
                self.unwind(&name, &err);
                Err(err)
            }
        }
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        if let Some(pos) = self.savepoints.iter().rposition(|(n, _)| n == name) {
            self.savepoints.truncate(pos);
        }
        self.storage.release_savepoint(name)
    }

    fn unwind(&mut self, name: &str, err: &SchemaError) {
        self.pending.clear();
        self.partition_cache.clear();

        if err.is_unilateral_abort() {
            warn!(savepoint = name, error = %err, "transaction aborted by the lock manager");
            self.state = self.tx_base.clone();
            self.savepoints.clear();
            self.bump_all_epochs();
            if let Err(e) = self.storage.abort_transaction() {
                error!(error = %e, "storage abort failed");
            }
            return;
        }

        if err.kind() == ErrorKind::Validation {
            debug!(savepoint = name, error = %err, "DDL rejected");
        } else {
            error!(savepoint = name, error = %err, "rolling back DDL");
        }
        if let Some(pos) = self.savepoints.iter().rposition(|(n, _)| n == name) {
            self.state = self.savepoints[pos].1.clone();
            self.savepoints.truncate(pos);
        }
        if let Err(e) = self.storage.rollback_to_savepoint(name) {
            error!(savepoint = name, error = %e, "storage rollback failed");
        } else if let Err(e) = self.storage.release_savepoint(name) {
            warn!(savepoint = name, error = %e, "storage savepoint release failed");
        }
        if let Err(e) = self.transactions.abort_to_savepoint(name) {
            error!(savepoint = name, error = %e, "transaction rollback failed");
        }
    }

    /// Commits the transaction, making catalog changes the new rollback
    /// base and releasing locks.
    pub fn commit_transaction(&mut self) -> Result<(), SchemaError> {
        self.storage.commit_transaction()?;
        self.transactions.commit()?;
        self.tx_base = self.state.clone();
        self.savepoints.clear();
        info!(classes = self.state.classes.len(), "transaction committed");
        Ok(())
    }

    /// Aborts the transaction, restoring the catalog as of its start.
    pub fn abort_transaction(&mut self) -> Result<(), SchemaError> {
        self.storage.abort_transaction()?;
        self.transactions.abort()?;
        self.state = self.tx_base.clone();
        self.savepoints.clear();
        self.pending.clear();
        self.partition_cache.clear();
        self.bump_all_epochs();
        warn!("transaction aborted");
        Ok(())
    }

    fn bump_all_epochs(&mut self) {
        for epoch in self.descriptor_epochs.values_mut() {
            *epoch += 1;
        }
    }
}
