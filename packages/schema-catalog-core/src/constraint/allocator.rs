//! Disk structure allocation for constraints.
//!
//! Global constraints (UNIQUE family outside partitions) are served by one
//! B-tree owned by the defining class and covering every non-partition
//! subclass heap; every other constraint gets a B-tree of its own class.
//! The property list of each class records which B-tree each constraint
//! uses, and B-trees are deleted when the last constraint referencing
//! them goes away.

use tracing::{debug, info};

use crate::catalog::SchemaCatalog;
use crate::class::Class;
use crate::constraint::{
    Constraint, ConstraintKind, ConstraintScope, ForeignKeyRef, IndexStatus, PropertyList,
};
use crate::error::SchemaError;
use crate::ids::{BTreeId, ClassId};
use crate::storage::{IndexRequest, IndexTarget, StorageEngine};
use crate::transaction::{LockMode, TransactionManager};

/// Strongest lock the initiating transaction may hold on a class for an
/// online index build to be allowed.
pub const ONLINE_BUILD_MAX_LOCK: LockMode = LockMode::IntentExclusive;

/// Phase of a two-phase online index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineIndexPhase {
    /// Index exists but is empty; DML keeps running
    Building,
    /// Bulk load from the heap finished
    Loaded,
}

impl OnlineIndexPhase {
    /// Status recorded on the index during the phase.
    pub fn status(self) -> IndexStatus {
        match self {
            OnlineIndexPhase::Building => IndexStatus::OnlineBuilding,
            OnlineIndexPhase::Loaded => IndexStatus::Normal,
        }
    }
}

fn invalid_property(class: &str, constraint: &str) -> SchemaError {
    SchemaError::InvalidProperty {
        class: class.to_string(),
        constraint: constraint.to_string(),
    }
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Allocates or transfers the B-trees of every constraint of an
    /// installed class and writes the ids back into its property list.
    ///
    /// Constraints are processed in kind order so that a primary key
    /// exists before a foreign key of the same class references it.
    /// `prior` lists the B-trees the class used before its latest install.
    pub(crate) fn allocate_disk_structures(&mut self, id: ClassId, prior: &[BTreeId]) -> Result<(), SchemaError> {
        let class = self.class_by_id(id)?;
        if class.is_view() {
            return Ok(());
        }
        let is_partition = class.is_partition();
        let mut constraints = class.constraints()?;
        let mut changed = false;

        for i in 0..constraints.len() {
            let mut constraint = constraints[i].clone();
            if !constraint.kind.has_index() {
                continue;
            }
            let inherited_global =
                constraint.origin != Some(id) && constraint.scope(is_partition) == ConstraintScope::Global;
            if inherited_global {
                let btree = self.inherit_btree(id, &constraint, prior)?;
                if constraint.btree == Some(btree) && constraint.status == IndexStatus::Normal {
                    continue;
                }
                constraint.btree = Some(btree);
            } else if constraint.btree.is_some() && constraint.status == IndexStatus::Normal {
                continue;
            } else if let Some(shared) = &constraint.shared_with {
                let class_name = self.class_name(id);
                let btree = constraints
                    .iter()
                    .find(|c| &c.name == shared)
                    .and_then(|c| c.btree)
                    .ok_or_else(|| invalid_property(&class_name, &constraint.name))?;
                constraint.btree = Some(btree);
            } else {
                let btree = self.allocate_index(id, &constraints, &mut constraint)?;
                constraint.btree = Some(btree);
                if constraint.kind == ConstraintKind::ForeignKey {
                    self.register_referrer(id, &mut constraints, &constraint)?;
                }
            }
            constraint.status = IndexStatus::Normal;
            constraints[i] = constraint;
            changed = true;
        }

        if changed {
            self.class_by_id_mut(id)?.properties = PropertyList::from_constraints(&constraints)?;
        }
        Ok(())
    }

    /// B-tree of an inherited global constraint, taken from the defining
    /// class.
    ///
    /// A class joining the index with rows of its own reloads the owner's
    /// index so that those rows are covered and checked.
    fn inherit_btree(
        &mut self,
        id: ClassId,
        constraint: &Constraint,
        prior: &[BTreeId],
    ) -> Result<BTreeId, SchemaError> {
        let class_name = self.class_name(id);
        let origin = constraint
            .origin
            .ok_or_else(|| invalid_property(&class_name, &constraint.name))?;
        let owned = self
            .class_by_id(origin)?
            .properties
            .find(constraint.kind, &constraint.name)?
            .ok_or_else(|| invalid_property(&class_name, &constraint.name))?;
        let btree = owned
            .btree
            .ok_or_else(|| invalid_property(&class_name, &constraint.name))?;

        if !prior.contains(&btree) {
            if let Some(heap) = self.class_by_id(id)?.heap {
                if self.storage.has_instances(heap)? {
                    let request = self.index_request(origin, &owned)?;
                    self.storage.load_index(&request, Some(btree))?;
                    debug!(class = %class_name, constraint = %constraint.name, btree = ?btree, "reloaded shared index");
                }
            }
        }
        Ok(btree)
    }

    /// Describes the index of a constraint owned by `owner`.
    ///
    /// A global constraint covers the owner and all its non-partition
    /// subclasses; anything else covers the owner only.
    pub(crate) fn index_request(&self, owner: ClassId, constraint: &Constraint) -> Result<IndexRequest, SchemaError> {
        let class = self.class_by_id(owner)?;
        let mut key_domains = Vec::with_capacity(constraint.columns.len());
        for column in &constraint.columns {
            let att = class
                .find_attribute(&column.name)
                .ok_or_else(|| SchemaError::AttributeNotFound {
                    class: class.name.clone(),
                    attribute: column.name.clone(),
                })?;
            key_domains.push(att.domain.clone());
        }

        let mut participants = vec![owner];
        if constraint.scope(class.is_partition()) == ConstraintScope::Global {
            participants.extend(
                self.subclass_closure(owner)
                    .into_iter()
                    .filter(|sub| self.class(*sub).is_some_and(|c| !c.is_partition())),
            );
        }

        let mut request = IndexRequest::new(constraint.name.clone(), key_domains);
        for participant in participants {
            let cls = self.class_by_id(participant)?;
            let Some(heap) = cls.heap else {
                continue;
            };
            request.targets.push(IndexTarget {
                class: participant,
                heap,
                attributes: constraint
                    .columns
                    .iter()
                    .map(|col| cls.find_attribute(&col.name).and_then(|a| a.id))
                    .collect(),
            });
        }
        request.unique = constraint.kind.is_unique_family();
        request.primary_key = constraint.kind == ConstraintKind::PrimaryKey;
        request.reverse = constraint.kind.is_reverse();
        request.filter_predicate = constraint.filter_predicate.clone();
        request.function_expression = constraint.function_expression.clone();
        Ok(request)
    }

    /// Creates a fresh B-tree for a constraint owned by `id`, bulk-loading
    /// it when any participating heap has rows.
    fn allocate_index(
        &mut self,
        id: ClassId,
        siblings: &[Constraint],
        constraint: &mut Constraint,
    ) -> Result<BTreeId, SchemaError> {
        let mut request = self.index_request(id, constraint)?;
        if constraint.kind == ConstraintKind::ForeignKey {
            request.references = Some(self.resolve_foreign_key(id, siblings, constraint)?);
        }

        let btree = if constraint.status == IndexStatus::OnlineBuilding {
            self.build_online(id, constraint, &mut request)?
        } else {
            let mut has_rows = false;
            for target in &request.targets {
                if self.storage.has_instances(target.heap)? {
                    has_rows = true;
                    break;
                }
            }
            if has_rows {
                self.storage.load_index(&request, None)?
            } else {
                self.storage.create_index(&request)?
            }
        };
        info!(
            class = %self.class_name(id),
            constraint = %constraint.name,
            kind = ?constraint.kind,
            btree = ?btree,
            targets = request.targets.len(),
            "allocated index"
        );
        Ok(btree)
    }

    /// Two-phase build: create the index empty, then load it from the heap.
    fn build_online(
        &mut self,
        id: ClassId,
        constraint: &Constraint,
        request: &mut IndexRequest,
    ) -> Result<BTreeId, SchemaError> {
        let class = self.class_by_id(id)?;
        let not_allowed = |reason: &'static str| SchemaError::OnlineIndexNotAllowed {
            class: class.name.clone(),
            constraint: constraint.name.clone(),
            reason,
        };
        if !class.is_partition() && self.in_hierarchy(class) {
            return Err(not_allowed("class belongs to a hierarchy"));
        }
        if self
            .transactions
            .held_lock(id)
            .is_some_and(|held| held > ONLINE_BUILD_MAX_LOCK)
        {
            return Err(not_allowed("transaction already holds a stronger lock"));
        }

        request.status = OnlineIndexPhase::Building.status();
        let btree = self.storage.create_index(request)?;
        debug!(constraint = %constraint.name, btree = ?btree, phase = ?OnlineIndexPhase::Building, "online index build");
        request.status = OnlineIndexPhase::Loaded.status();
        let btree = self.storage.load_index(request, Some(btree))?;
        debug!(constraint = %constraint.name, btree = ?btree, phase = ?OnlineIndexPhase::Loaded, "online index build");
        Ok(btree)
    }

    /// Returns `true` if the class has a superclass or a subclass that is
    /// not one of its partitions.
    fn in_hierarchy(&self, class: &Class) -> bool {
        !class.inheritance.is_empty()
            || self
                .subclass_closure(class.id)
                .into_iter()
                .any(|sub| self.class(sub).is_some_and(|c| !c.is_partition()))
    }

    /// Validates a foreign key against the referenced primary key and
    /// returns the primary key's B-tree.
    fn resolve_foreign_key(
        &self,
        id: ClassId,
        siblings: &[Constraint],
        constraint: &mut Constraint,
    ) -> Result<BTreeId, SchemaError> {
        let class = self.class_by_id(id)?;
        let info = constraint
            .foreign_key
            .as_ref()
            .ok_or_else(|| invalid_property(&class.name, &constraint.name))?;
        let ref_id = if info.ref_class_name == class.name {
            id
        } else {
            self.class_id(&info.ref_class_name)
                .ok_or_else(|| SchemaError::ForeignKeyUnknownClass {
                    constraint: constraint.name.clone(),
                    referenced: info.ref_class_name.clone(),
                })?
        };
        let referenced = self.class_by_id(ref_id)?;
        let pk = if ref_id == id {
            siblings
                .iter()
                .find(|c| c.kind == ConstraintKind::PrimaryKey)
                .cloned()
        } else {
            referenced.primary_key()?
        }
        .ok_or_else(|| SchemaError::ForeignKeyNoPrimaryKey {
            referenced: referenced.name.clone(),
        })?;

        if pk.columns.len() != constraint.columns.len() {
            return Err(SchemaError::ForeignKeyColumnCount {
                constraint: constraint.name.clone(),
                expected: pk.columns.len(),
                got: constraint.columns.len(),
            });
        }
        for (ours, theirs) in constraint.columns.iter().zip(&pk.columns) {
            let matches = match (class.find_attribute(&ours.name), referenced.find_attribute(&theirs.name)) {
                (Some(a), Some(b)) => a.domain.same_type(&b.domain),
                _ => false,
            };
            if !matches {
                return Err(SchemaError::ForeignKeyTypeMismatch {
                    constraint: constraint.name.clone(),
                    column: ours.name.clone(),
                });
            }
        }
        let pk_btree = pk
            .btree
            .ok_or_else(|| invalid_property(&referenced.name, &pk.name))?;

        let info = constraint
            .foreign_key
            .as_mut()
            .ok_or_else(|| invalid_property(&class.name, &constraint.name))?;
        info.ref_class = Some(ref_id);
        info.ref_pk_btree = Some(pk_btree);
        Ok(pk_btree)
    }

    /// Records the foreign key on the referenced primary key.
    fn register_referrer(
        &mut self,
        id: ClassId,
        siblings: &mut [Constraint],
        fk: &Constraint,
    ) -> Result<(), SchemaError> {
        let Some(ref_id) = fk.foreign_key.as_ref().and_then(|info| info.ref_class) else {
            return Ok(());
        };
        let reference = ForeignKeyRef {
            class: id,
            name: fk.name.clone(),
            btree: fk.btree,
        };
        if ref_id == id {
            if let Some(pk) = siblings.iter_mut().find(|c| c.kind == ConstraintKind::PrimaryKey) {
                pk.referrers
                    .retain(|r| !(r.class == reference.class && r.name == reference.name));
                pk.referrers.push(reference);
            }
            return Ok(());
        }
        let referenced = self.class_by_id_mut(ref_id)?;
        let Some(pk) = referenced.properties.primary_key()? else {
            return Ok(());
        };
        referenced.properties.put_foreign_key_ref(&pk.name, reference)
    }

    /// Number of constraints outside `except` that use `btree`.
    ///
    /// A class being edited is counted through its pending definition.
    pub(crate) fn btree_references(&self, btree: BTreeId, except: ClassId) -> Result<usize, SchemaError> {
        let mut count = 0;
        for class in self.state.classes.values() {
            if class.id == except {
                continue;
            }
            count += match self.pending.get(class.id) {
                Some(flat) => flat
                    .constraints
                    .iter()
                    .filter(|c| c.btree == Some(btree))
                    .count(),
                None => class
                    .constraints()?
                    .iter()
                    .filter(|c| c.btree == Some(btree))
                    .count(),
            };
        }
        Ok(count)
    }

    /// Releases a constraint's B-tree for `class`.
    ///
    /// The B-tree is deleted when nothing else references it; otherwise
    /// only the class's entries are removed from it.
    ///
    /// # Arguments
    /// * `class` - Class giving up the constraint
    /// * `constraint` - The constraint being removed
    /// * `kept` - Constraints the class keeps
    pub(crate) fn release_btree(
        &mut self,
        class: ClassId,
        constraint: &Constraint,
        kept: &[Constraint],
    ) -> Result<(), SchemaError> {
        let Some(btree) = constraint.btree else {
            return Ok(());
        };
        let references = self.btree_references(btree, class)?
            + kept.iter().filter(|c| c.btree == Some(btree)).count();
        if references == 0 {
            self.storage.delete_index(btree)?;
            info!(class = %self.class_name(class), constraint = %constraint.name, btree = ?btree, "deleted index");
        } else if let Some(heap) = self.class_by_id(class)?.heap {
            self.storage.remove_class_from_index(class, btree, heap)?;
            debug!(
                class = %self.class_name(class),
                constraint = %constraint.name,
                btree = ?btree,
                references,
                "removed class from shared index"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_phases_map_to_status() {
        assert_eq!(OnlineIndexPhase::Building.status(), IndexStatus::OnlineBuilding);
        assert_eq!(OnlineIndexPhase::Loaded.status(), IndexStatus::Normal);
        assert!(LockMode::Update > ONLINE_BUILD_MAX_LOCK);
        assert!(LockMode::IntentShared < ONLINE_BUILD_MAX_LOCK);
    }
}
