//! DDL entry points: committing templates, dropping and renaming classes,
//! and constraint shortcuts.

use tracing::{debug, info};

use crate::catalog::SchemaCatalog;
use crate::class::{normalize_name, validate_identifier, Class, ClassType};
use crate::config::CatalogConfig;
use crate::constraint::{Constraint, ConstraintKind, IndexStatus};
use crate::error::SchemaError;
use crate::flatten::flatten;
use crate::hierarchy::{EditCoordinator, EditPhase};
use crate::ids::ClassId;
use crate::partition::{partition_class_name, PartitionInfo};
use crate::storage::StorageEngine;
use crate::template::{FlatTemplate, Template};
use crate::transaction::{Authorization, LockMode, TransactionManager};

/// Options of a template commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOptions {
    /// Record resolutions for equal-domain conflicts instead of failing
    pub auto_resolve: bool,
    /// Authorization required on the edited class
    pub auth: Authorization,
    /// Lock superclasses whose subclass lists change
    pub lock_hierarchy: bool,
    /// Lock taken on the edited class and its subclasses
    pub(crate) edit_lock: LockMode,
}

impl CommitOptions {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            auto_resolve: config.auto_resolve_conflicts,
            ..Self::default()
        }
    }

    pub fn with_auto_resolve(mut self, auto_resolve: bool) -> Self {
        self.auto_resolve = auto_resolve;
        self
    }

    pub fn with_auth(mut self, auth: Authorization) -> Self {
        self.auth = auth;
        self
    }
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            auto_resolve: false,
            auth: Authorization::Alter,
            lock_hierarchy: true,
            edit_lock: LockMode::Update,
        }
    }
}

/// Options of [`SchemaCatalog::add_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Build in two phases while DML continues
    pub online: bool,
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Commits a template, creating or updating its class.
    ///
    /// Either the class and every affected subclass end up installed, or
    /// nothing changes.
    ///
    /// # Arguments
    /// * `template` - Edited definition
    /// * `options` - Conflict resolution, authorization and locking
    ///
    /// # Returns
    /// Id of the committed class.
    pub fn commit(&mut self, template: Template, options: CommitOptions) -> Result<ClassId, SchemaError> {
        self.atomically("update_class", |catalog| catalog.update_class(template, &options))
    }

    /// Commits a template without automatic conflict resolution.
    pub fn finish_class(&mut self, template: Template) -> Result<ClassId, SchemaError> {
        self.commit(template, CommitOptions::default())
    }

    /// Commits a template, resolving equal-domain conflicts automatically.
    pub fn update_class_auto(&mut self, template: Template) -> Result<ClassId, SchemaError> {
        self.commit(template, CommitOptions::default().with_auto_resolve(true))
    }

    /// Runs one class edit through all phases. Callers provide the
    /// savepoint.
    pub(crate) fn update_class(&mut self, template: Template, options: &CommitOptions) -> Result<ClassId, SchemaError> {
        let mut coordinator = EditCoordinator::new(&template.name);
        match self.run_edit(&mut coordinator, template, options) {
            Ok(id) => {
                coordinator.advance(EditPhase::Commit);
                Ok(id)
            }
            Err(err) => {
                coordinator.abort(&err);
                self.pending.clear();
                Err(err)
            }
        }
    }

    fn run_edit(
        &mut self,
        coordinator: &mut EditCoordinator,
        template: Template,
        options: &CommitOptions,
    ) -> Result<ClassId, SchemaError> {
        validate_identifier(&template.name, self.config.max_identifier_length)?;
        match template.current {
            Some(id) => {
                let class = self.class_by_id(id)?;
                let name = class.name.clone();
                if name != template.name && self.state.names.contains_key(&template.name) {
                    return Err(SchemaError::ClassAlreadyExists(template.name));
                }
                self.transactions
                    .fetch_class_for_edit(id, &name, options.edit_lock, options.auth)?;
            }
            None => {
                if self.state.names.contains_key(&template.name) {
                    return Err(SchemaError::ClassAlreadyExists(template.name));
                }
            }
        }

        coordinator.advance(EditPhase::LockSupers);
        let ancestors = self.lock_superclasses(&template, options)?;

        coordinator.advance(EditPhase::FlattenSelf);
        let flat = flatten(&template, &self.view(), options.auto_resolve)?;
        if let Some(id) = template.current {
            self.pending.insert(id, flat.clone());
        }

        coordinator.advance(EditPhase::LockSubs);
        let subs = match template.current {
            Some(id) => self.lock_subclasses(id, &ancestors, options)?,
            None => Vec::new(),
        };

        coordinator.advance(EditPhase::FlattenSubs);
        self.flatten_subclasses(&subs, options.auto_resolve)?;

        coordinator.advance(EditPhase::InstallAll);
        let id = match template.current {
            Some(id) => id,
            None => self.create_class_object(&flat)?,
        };
        self.install_pending(id, &flat)?;
        if self.class_by_id(id)?.name != flat.name {
            self.set_class_name(id, &flat.name)?;
        }
        for sub in &subs {
            let sub_flat = self.pending.get(*sub).cloned().ok_or_else(|| SchemaError::ClassNotFound {
                class: sub.to_string(),
            })?;
            self.install_pending(*sub, &sub_flat)?;
        }

        for class in std::iter::once(id).chain(subs.iter().copied()) {
            self.refresh_statistics(class)?;
        }
        self.pending.clear();
        self.invalidate_partition_context(id)?;
        info!(class = %flat.name, id = %id, subclasses = subs.len(), "class committed");
        Ok(id)
    }

    /// Installs one pending definition and its disk structures, then drops
    /// the pending edit.
    fn install_pending(&mut self, id: ClassId, flat: &FlatTemplate) -> Result<(), SchemaError> {
        let old_supers = self.class_by_id(id)?.inheritance.clone();
        let outcome = self.install(id, flat)?;
        self.allocate_disk_structures(id, &outcome.prior_btrees)?;
        self.update_back_references(id, &old_supers, &flat.inheritance)?;
        self.pending.remove(id);
        Ok(())
    }

    /// Allocates the object of a new class.
    fn create_class_object(&mut self, flat: &FlatTemplate) -> Result<ClassId, SchemaError> {
        let owner = match &flat.partition {
            Some(PartitionInfo::Child(child)) => self.class_by_id(child.parent)?.owner.clone(),
            _ => self.transactions.current_user().to_string(),
        };
        self.state.next_class_id += 1;
        let id = ClassId(self.state.next_class_id);
        let mut class = Class::new(id, flat.name.clone(), flat.class_type, owner);
        if flat.class_type == ClassType::Class {
            class.heap = Some(self.storage.create_heap(id)?);
        }
        self.storage.assign_permanent_oid(id)?;
        self.state.classes.insert(id, class);
        self.state.names.insert(flat.name.clone(), id);
        self.descriptor_epochs.insert(id, 0);
        debug!(class = %flat.name, id = %id, "created class object");
        Ok(id)
    }

    pub(crate) fn refresh_statistics(&mut self, id: ClassId) -> Result<(), SchemaError> {
        let Some(heap) = self.class_by_id(id)?.heap else {
            return Ok(());
        };
        let statistics = self
            .storage
            .recompute_statistics(id, heap, self.config.statistics_full_scan)?;
        self.class_by_id_mut(id)?.statistics = Some(statistics);
        Ok(())
    }

    /// Drops the cached pruning context of a partitioned class, or of the
    /// parent of a partition.
    pub(crate) fn invalidate_partition_context(&self, id: ClassId) -> Result<(), SchemaError> {
        self.partition_cache.invalidate(id);
        if let Some(PartitionInfo::Child(child)) = &self.class_by_id(id)?.partition {
            self.partition_cache.invalidate(child.parent);
        }
        Ok(())
    }

    fn set_class_name(&mut self, id: ClassId, name: &str) -> Result<(), SchemaError> {
        let class = self.class_by_id_mut(id)?;
        let old = std::mem::replace(&mut class.name, name.to_string());
        self.state.names.remove(&old);
        self.state.names.insert(name.to_string(), id);

        // foreign keys name their referenced class
        let mut referring: Vec<(ClassId, Constraint)> = Vec::new();
        for class in self.state.classes.values() {
            for constraint in class.constraints()? {
                if constraint
                    .foreign_key
                    .as_ref()
                    .is_some_and(|info| info.ref_class == Some(id))
                {
                    referring.push((class.id, constraint));
                }
            }
        }
        for (owner, mut constraint) in referring {
            if let Some(info) = constraint.foreign_key.as_mut() {
                info.ref_class_name = name.to_string();
            }
            self.class_by_id_mut(owner)?.properties.put(&constraint)?;
        }
        self.invalidate_descriptors(id);
        debug!(from = %old, to = %name, "renamed class");
        Ok(())
    }

    /// Renames a class and, for a partitioned class, its partitions.
    pub fn rename_class(&mut self, name: &str, new_name: &str) -> Result<(), SchemaError> {
        let id = self.find_class(name)?.id;
        let new_name = normalize_name(new_name);
        self.atomically("rename_class", |catalog| {
            validate_identifier(&new_name, catalog.config.max_identifier_length)?;
            if catalog.state.names.contains_key(&new_name) {
                return Err(SchemaError::ClassAlreadyExists(new_name.clone()));
            }
            let class = catalog.class_by_id(id)?;
            let old_name = class.name.clone();
            let partitions = class
                .partition
                .as_ref()
                .and_then(|p| p.parent_info())
                .map(|p| p.partitions.clone())
                .unwrap_or_default();
            catalog
                .transactions
                .fetch_class_for_edit(id, &old_name, LockMode::Exclusive, Authorization::Alter)?;
            catalog.set_class_name(id, &new_name)?;

            for child in partitions {
                let child_class = catalog.class_by_id(child)?;
                let Some(PartitionInfo::Child(info)) = &child_class.partition else {
                    return Err(SchemaError::PartitionWorkFailed {
                        class: new_name.clone(),
                        reason: format!("'{}' is not a partition", child_class.name),
                    });
                };
                let child_name = partition_class_name(&new_name, &info.name);
                catalog.set_class_name(child, &child_name)?;
            }
            catalog.partition_cache.invalidate(id);
            info!(from = %old_name, to = %new_name, "class renamed");
            Ok(())
        })
    }

    /// Drops a class.
    ///
    /// Partitions go first. Subclasses are re-flattened with the class
    /// replaced by its own superclasses.
    ///
    /// # Arguments
    /// * `name` - Class to drop
    /// * `cascade_fk` - Drop foreign keys of other classes referencing the
    ///   class's primary key instead of failing
    pub fn drop_class(&mut self, name: &str, cascade_fk: bool) -> Result<(), SchemaError> {
        let id = self.find_class(name)?.id;
        self.atomically("drop_class", |catalog| catalog.drop_class_inner(id, cascade_fk))
    }

    fn drop_class_inner(&mut self, id: ClassId, cascade_fk: bool) -> Result<(), SchemaError> {
        let class = self.class_by_id(id)?.clone();
        self.transactions
            .fetch_class_for_edit(id, &class.name, LockMode::Exclusive, Authorization::Alter)?;

        if let Some(PartitionInfo::Parent(info)) = &class.partition {
            for child in &info.partitions {
                self.remove_class_object(*child)?;
            }
            self.state.partitions.remove(&id);
        }

        if let Some(pk) = class.primary_key()? {
            let referrers: Vec<_> = pk.referrers.iter().filter(|r| r.class != id).cloned().collect();
            if let Some(first) = referrers.first() {
                if !cascade_fk {
                    return Err(SchemaError::PrimaryKeyReferenced {
                        class: class.name.clone(),
                        constraint: pk.name.clone(),
                        referrer: first.name.clone(),
                    });
                }
                for referrer in referrers {
                    let mut template = Template::from_class(self.class_by_id(referrer.class)?, |c| self.class_name(c))?;
                    template.drop_constraint(&referrer.name)?;
                    self.update_class(template, &CommitOptions::default())?;
                }
            }
        }

        let users = self.class_by_id(id)?.users.clone();
        for sub in users {
            if !self.state.classes.contains_key(&sub) {
                continue;
            }
            let mut template = Template::from_class(self.class_by_id(sub)?, |c| self.class_name(c))?;
            let position = template.inheritance.iter().position(|c| *c == id);
            template.remove_superclass(id);
            let mut at = position.unwrap_or(template.inheritance.len());
            for sup in &class.inheritance {
                if !template.inheritance.contains(sup) {
                    template.inheritance.insert(at, *sup);
                    at += 1;
                }
            }
            self.refresh_inherited(&mut template)?;
            self.update_class(template, &CommitOptions::default())?;
        }

        self.remove_class_object(id)?;
        info!(class = %class.name, "class dropped");
        Ok(())
    }

    /// Releases the disk structures of a class and removes it from the
    /// catalog.
    pub(crate) fn remove_class_object(&mut self, id: ClassId) -> Result<(), SchemaError> {
        let class = self.class_by_id(id)?.clone();
        for constraint in class.constraints()? {
            if constraint.kind == ConstraintKind::ForeignKey {
                self.unregister_referrer(id, &constraint)?;
            }
            if constraint.btree.is_some() && constraint.shared_with.is_none() {
                self.release_btree(id, &constraint, &[])?;
            }
        }
        if let Some(heap) = class.heap {
            self.storage.destroy_heap(heap)?;
        }
        for sup in &class.inheritance {
            if let Some(sup) = self.state.classes.get_mut(sup) {
                sup.users.retain(|u| *u != id);
            }
        }
        if let Some(PartitionInfo::Child(child)) = &class.partition {
            if let Some(rows) = self.state.partitions.get_mut(&child.parent) {
                rows.remove(&child.name);
            }
            self.partition_cache.invalidate(child.parent);
        }
        self.state.classes.remove(&id);
        self.state.names.remove(&class.name);
        self.invalidate_descriptors(id);
        self.partition_cache.invalidate(id);
        debug!(class = %class.name, "removed class object");
        Ok(())
    }

    /// Adds an index-backed constraint directly on a class.
    ///
    /// Local index kinds are added to each partition as well.
    ///
    /// # Returns
    /// The constraint name.
    pub fn add_index(&mut self, class: &str, constraint: Constraint, options: IndexOptions) -> Result<String, SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("add_index", |catalog| {
            let mut constraint = constraint;
            if options.online {
                constraint.status = IndexStatus::OnlineBuilding;
            }
            let commit = CommitOptions {
                auth: Authorization::Index,
                edit_lock: if options.online {
                    LockMode::IntentExclusive
                } else {
                    LockMode::Update
                },
                ..CommitOptions::default()
            };
            let mut template = catalog.edit_template_by_id(id)?;
            let name = template.add_constraint(constraint.clone())?;
            catalog.update_class(template, &commit)?;

            if !constraint.kind.is_inheritable() {
                for child in catalog.partitions_of(id)? {
                    let mut template = catalog.edit_template_by_id(child)?;
                    template.add_constraint(constraint.clone().named(name.clone()))?;
                    catalog.update_class(template, &commit)?;
                }
            }
            Ok(name)
        })
    }

    /// Drops an index-backed constraint, from the partitions too.
    pub fn drop_index(&mut self, class: &str, name: &str) -> Result<(), SchemaError> {
        let id = self.find_class(class)?.id;
        let name = normalize_name(name);
        self.atomically("drop_index", |catalog| {
            let commit = CommitOptions::default().with_auth(Authorization::Index);
            let mut template = catalog.edit_template_by_id(id)?;
            let dropped = template.drop_constraint(&name)?;
            catalog.update_class(template, &commit)?;
            if !dropped.kind.is_inheritable() {
                for child in catalog.partitions_of(id)? {
                    let mut template = catalog.edit_template_by_id(child)?;
                    if template.properties.find_by_name(&name)?.is_some() {
                        template.drop_constraint(&name)?;
                        catalog.update_class(template, &commit)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Adds a constraint through the template path.
    ///
    /// Existing rows that violate the constraint undo only this change.
    pub fn add_constraint(&mut self, class: &str, constraint: Constraint) -> Result<String, SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("add_constraint", |catalog| {
            let mut template = catalog.edit_template_by_id(id)?;
            let name = template.add_constraint(constraint)?;
            catalog.update_class(template, &CommitOptions::default())?;
            Ok(name)
        })
    }

    /// Drops a constraint through the template path.
    pub fn drop_constraint(&mut self, class: &str, name: &str) -> Result<(), SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("drop_constraint", |catalog| {
            let mut template = catalog.edit_template_by_id(id)?;
            template.drop_constraint(name)?;
            catalog.update_class(template, &CommitOptions::default())?;
            Ok(())
        })
    }

    fn edit_template_by_id(&self, id: ClassId) -> Result<Template, SchemaError> {
        Template::from_class(self.class_by_id(id)?, |c| self.class_name(c))
    }

    pub(crate) fn partitions_of(&self, id: ClassId) -> Result<Vec<ClassId>, SchemaError> {
        Ok(self
            .class_by_id(id)?
            .partition
            .as_ref()
            .and_then(|p| p.parent_info())
            .map(|p| p.partitions.clone())
            .unwrap_or_default())
    }
}
