//! Installing a flattened definition on a class.
//!
//! Installation decides whether the class needs a new on-disk
//! representation, assigns attribute and method ids, computes storage
//! order, and releases disk structures the new definition no longer uses.
//! Everything that can fail for validation reasons is checked before the
//! instance flush; after the flush the operation can only be undone by
//! rolling back to the DDL savepoint.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::catalog::SchemaCatalog;
use crate::class::{Attribute, Class, Method, NameSpace};
use crate::constraint::{Constraint, ConstraintKind, PropertyList};
use crate::error::SchemaError;
use crate::ids::{AttrId, BTreeId, ClassId, MethodId};
use crate::partition::PartitionInfo;
use crate::storage::StorageEngine;
use crate::template::FlatTemplate;
use crate::transaction::TransactionManager;

/// Result of installing one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstallOutcome {
    /// A new representation generation was started
    pub new_representation: bool,
    /// B-trees the class's constraints referenced before the install
    pub prior_btrees: Vec<BTreeId>,
}

fn all_attributes(class: &Class) -> impl Iterator<Item = &Attribute> {
    class
        .attributes
        .iter()
        .chain(class.shared_attributes.iter())
        .chain(class.class_attributes.iter())
}

/// Assigns ids to the new attribute list.
///
/// An attribute keeps its id when the old representation has it; otherwise
/// it matches an old attribute by name, origin and type, or gets a fresh
/// id. Instance attributes of a partition take the ids of the partitioned
/// class so both share one storage layout.
fn assign_attribute_ids(
    class_name: &str,
    old: &Class,
    attributes: &mut [Attribute],
    parent_layout: Option<&[Attribute]>,
    next_id: &mut u32,
) -> Result<(), SchemaError> {
    let mut used: HashSet<AttrId> = HashSet::new();
    let mut fresh = |used: &mut HashSet<AttrId>| {
        let id = AttrId(*next_id);
        *next_id += 1;
        used.insert(id);
        id
    };

    if let Some(layout) = parent_layout {
        for att in attributes.iter_mut().filter(|a| a.is_instance()) {
            let parent_att = layout.iter().find(|p| p.name == att.name).ok_or_else(|| {
                SchemaError::PartitionWorkFailed {
                    class: class_name.to_string(),
                    reason: format!("attribute '{}' missing from the partitioned class", att.name),
                }
            })?;
            att.id = parent_att.id;
            if let Some(id) = att.id {
                used.insert(id);
            }
        }
    }

    for att in attributes.iter_mut() {
        if parent_layout.is_some() && att.is_instance() {
            continue;
        }
        let by_id = att
            .id
            .filter(|id| !used.contains(id) && all_attributes(old).any(|o| o.id == Some(*id)));
        let matched = by_id.or_else(|| {
            all_attributes(old)
                .find(|o| {
                    o.id.is_some_and(|id| !used.contains(&id))
                        && o.namespace == att.namespace
                        && o.name == att.name
                        && o.origin == att.origin
                        && o.domain.same_type(&att.domain)
                })
                .and_then(|o| o.id)
        });
        att.id = Some(match matched {
            Some(id) => {
                used.insert(id);
                id
            }
            None => fresh(&mut used),
        });
    }
    Ok(())
}

fn assign_method_ids(old: &Class, methods: &mut [Method], next_id: &mut u32) {
    let old_methods: Vec<&Method> = old.methods.iter().chain(old.class_methods.iter()).collect();
    let mut used: HashSet<MethodId> = HashSet::new();
    for method in methods.iter_mut() {
        let by_id = method
            .id
            .filter(|id| !used.contains(id) && old_methods.iter().any(|o| o.id == Some(*id)));
        let matched = by_id.or_else(|| {
            old_methods
                .iter()
                .find(|o| {
                    o.id.is_some_and(|id| !used.contains(&id))
                        && o.namespace == method.namespace
                        && o.name == method.name
                        && o.origin == method.origin
                })
                .and_then(|o| o.id)
        });
        let id = matched.unwrap_or_else(|| {
            let id = MethodId(*next_id);
            *next_id += 1;
            id
        });
        used.insert(id);
        method.id = Some(id);
    }
}

/// Storage order: surviving attributes keep their old relative order,
/// new ones follow, and fixed-width attributes precede variable-width ones.
fn storage_order(old: &[Attribute], new: &[Attribute]) -> Vec<Attribute> {
    let mut ordered: Vec<Attribute> = old
        .iter()
        .filter_map(|o| new.iter().find(|n| n.id == o.id).cloned())
        .collect();
    ordered.extend(
        new.iter()
            .filter(|n| !old.iter().any(|o| o.id == n.id))
            .cloned(),
    );
    ordered.sort_by_key(|a| a.domain.is_variable());
    ordered
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Installs a flattened definition on an existing class object.
    ///
    /// # Arguments
    /// * `id` - Class receiving the definition; a new class has a shell
    ///   with representation 0
    /// * `flat` - Flattened template
    ///
    /// # Returns
    /// Whether a new representation was started, and the B-trees the class
    /// used before.
    pub(crate) fn install(&mut self, id: ClassId, flat: &FlatTemplate) -> Result<InstallOutcome, SchemaError> {
        let old = self.class_by_id(id)?.clone();
        let is_new = old.repr_id == 0;
        let mut next_att = old.att_ids;
        let mut next_method = old.method_ids;

        let parent_layout = match &flat.partition {
            Some(PartitionInfo::Child(child)) => {
                let parent = self.class_by_id(child.parent)?;
                next_att = next_att.max(parent.att_ids);
                Some(parent.attributes.clone())
            }
            _ => None,
        };

        let mut attributes: Vec<Attribute> = flat
            .attributes
            .iter()
            .chain(flat.class_attributes.iter())
            .cloned()
            .collect();
        for att in attributes.iter_mut() {
            if att.origin.is_none() {
                att.origin = Some(id);
            }
            att.domain.resolve_self(id);
        }
        assign_attribute_ids(&flat.name, &old, &mut attributes, parent_layout.as_deref(), &mut next_att)?;

        // shared and class attribute values belong to each class
        for att in attributes.iter_mut().filter(|a| !a.is_instance() && a.origin != Some(id)) {
            att.value = all_attributes(&old)
                .find(|o| o.id == att.id)
                .map(|o| o.value.clone())
                .unwrap_or_else(|| att.default_value.clone());
        }

        let mut methods: Vec<Method> = flat
            .methods
            .iter()
            .chain(flat.class_methods.iter())
            .cloned()
            .collect();
        for method in methods.iter_mut() {
            if method.origin.is_none() {
                method.origin = Some(id);
            }
            if let Some(signature) = method.signature.as_mut() {
                if let Some(domain) = signature.return_domain.as_mut() {
                    domain.resolve_self(id);
                }
                for domain in signature.arguments.iter_mut().flatten() {
                    domain.resolve_self(id);
                }
            }
        }
        assign_method_ids(&old, &mut methods, &mut next_method);

        let instance: Vec<Attribute> = attributes.iter().filter(|a| a.is_instance()).cloned().collect();
        let stored: Vec<Attribute> = match &parent_layout {
            Some(layout) => {
                if layout.len() != instance.len() {
                    return Err(SchemaError::PartitionWorkFailed {
                        class: flat.name.clone(),
                        reason: "attribute count differs from the partitioned class".to_string(),
                    });
                }
                layout
                    .iter()
                    .filter_map(|p| instance.iter().find(|a| a.id == p.id).cloned())
                    .collect()
            }
            None => storage_order(&old.attributes, &instance),
        };

        let added = stored.iter().any(|n| !old.attributes.iter().any(|o| o.id == n.id));
        let deleted = old.attributes.iter().any(|o| !stored.iter().any(|n| n.id == o.id));
        let storage_differs = stored.iter().any(|n| {
            old.attributes
                .iter()
                .find(|o| o.id == n.id)
                .is_some_and(|o| o.domain.storage_differs(&n.domain))
        });
        let new_representation = is_new || added || deleted || storage_differs;

        let constraints = self.resolve_constraints(id, flat, &stored)?;
        let old_constraints = old.constraints()?;
        self.check_referenced_primary_key(&old, &old_constraints, &constraints)?;
        let properties = PropertyList::from_constraints(&constraints)?;

        let mut triggers = flat.triggers.clone();
        for trigger in triggers.iter_mut() {
            let Some(attribute) = &trigger.attribute else {
                continue;
            };
            if trigger.valid && !attributes.iter().any(|a| &a.name == attribute) {
                warn!(class = %flat.name, trigger = %trigger.name, attribute = %attribute, "invalidating trigger bound to removed attribute");
                trigger.valid = false;
            }
        }

        // point of no return
        if new_representation && !is_new {
            if let Some(heap) = old.heap {
                if self.storage.has_instances(heap)? {
                    self.storage.flush_instances(id, heap, true)?;
                    debug!(class = %flat.name, repr = old.repr_id, "flushed instances under old representation");
                }
            }
        }

        let prior_btrees: Vec<BTreeId> = old_constraints.iter().filter_map(|c| c.btree).collect();
        for dropped in old_constraints
            .iter()
            .filter(|o| o.btree.is_some() && !constraints.iter().any(|n| n.btree == o.btree))
        {
            self.release_btree(id, dropped, &constraints)?;
        }
        for dropped in old_constraints.iter().filter(|o| {
            o.kind == ConstraintKind::ForeignKey
                && !constraints
                    .iter()
                    .any(|n| n.kind == ConstraintKind::ForeignKey && n.name == o.name)
        }) {
            self.unregister_referrer(id, dropped)?;
        }

        let method_files = flat
            .method_files
            .iter()
            .cloned()
            .map(|mut f| {
                f.origin = f.origin.or(Some(id));
                f
            })
            .collect();

        let class = self.class_by_id_mut(id)?;
        class.attributes = stored;
        class.shared_attributes = attributes
            .iter()
            .filter(|a| a.namespace == NameSpace::SharedAttribute)
            .cloned()
            .collect();
        class.class_attributes = attributes
            .iter()
            .filter(|a| a.namespace == NameSpace::ClassAttribute)
            .cloned()
            .collect();
        class.methods = methods
            .iter()
            .filter(|m| m.namespace == NameSpace::Method)
            .cloned()
            .collect();
        class.class_methods = methods
            .into_iter()
            .filter(|m| m.namespace == NameSpace::ClassMethod)
            .collect();
        class.method_files = method_files;
        class.query_specs = flat.query_specs.clone();
        class.resolutions = flat.resolutions.clone();
        class.inheritance = flat.inheritance.clone();
        class.partition = flat.partition.clone();
        class.triggers = triggers;
        class.comment = flat.comment.clone();
        class.reuse_oid = flat.reuse_oid;
        class.properties = properties;
        class.att_ids = next_att;
        class.method_ids = next_method;
        if new_representation {
            class.repr_id += 1;
        }
        class.statistics = None;
        class.dirty = true;
        class.methods_loaded = false;
        let repr_id = class.repr_id;
        self.invalidate_descriptors(id);

        info!(class = %flat.name, repr = repr_id, new_representation, "installed class definition");
        Ok(InstallOutcome {
            new_representation,
            prior_btrees,
        })
    }

    /// Stamps constraints with the class and resolves column ids against
    /// the stored attributes.
    fn resolve_constraints(
        &self,
        id: ClassId,
        flat: &FlatTemplate,
        stored: &[Attribute],
    ) -> Result<Vec<Constraint>, SchemaError> {
        let mut constraints = flat.constraints.clone();
        for constraint in constraints.iter_mut() {
            if constraint.origin.is_none() {
                constraint.origin = Some(id);
            }
            for column in constraint.columns.iter_mut() {
                let att = stored
                    .iter()
                    .chain(flat.shared_attributes())
                    .find(|a| a.name == column.name)
                    .ok_or_else(|| SchemaError::AttributeNotFound {
                        class: flat.name.clone(),
                        attribute: column.name.clone(),
                    })?;
                column.id = att.id;
            }
            if let Some(info) = constraint.foreign_key.as_mut() {
                if info.ref_class_name == flat.name {
                    info.ref_class = Some(id);
                }
            }
        }
        Ok(constraints)
    }

    /// Refuses to drop a primary key that another class's foreign key
    /// still references.
    fn check_referenced_primary_key(
        &self,
        old: &Class,
        old_constraints: &[Constraint],
        constraints: &[Constraint],
    ) -> Result<(), SchemaError> {
        let Some(pk) = old_constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey && c.origin == Some(old.id))
        else {
            return Ok(());
        };
        if constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey && c.name == pk.name)
        {
            return Ok(());
        }
        match pk.referrers.iter().find(|r| r.class != old.id) {
            Some(referrer) => Err(SchemaError::PrimaryKeyReferenced {
                class: old.name.clone(),
                constraint: pk.name.clone(),
                referrer: referrer.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Removes a dropped foreign key from the referenced primary key.
    pub(crate) fn unregister_referrer(&mut self, id: ClassId, fk: &Constraint) -> Result<(), SchemaError> {
        let Some(ref_id) = fk.foreign_key.as_ref().and_then(|info| info.ref_class) else {
            return Ok(());
        };
        if ref_id == id {
            return Ok(());
        }
        if let Some(referenced) = self.state.classes.get_mut(&ref_id) {
            referenced.properties.drop_foreign_key_ref(id, &fk.name)?;
            debug!(class = %id, referenced = %ref_id, constraint = %fk.name, "removed foreign key reference");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn att(id: u32, name: &str, domain: Domain) -> Attribute {
        let mut a = Attribute::new(name, domain);
        a.id = Some(AttrId(id));
        a
    }

    #[test]
    fn test_storage_order_keeps_survivors_and_puts_fixed_first() {
        let old = vec![att(0, "a", Domain::Integer), att(1, "s", Domain::Varchar(10))];
        let new = vec![
            att(1, "s", Domain::Varchar(10)),
            att(0, "a", Domain::Integer),
            att(2, "b", Domain::BigInt),
        ];
        let names: Vec<_> = storage_order(&old, &new).into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a", "b", "s"]);
    }

    #[test]
    fn test_ids_match_by_name_origin_and_type() {
        let mut old = Class::new(ClassId(1), "t", crate::class::ClassType::Class, "dba");
        let mut a = att(4, "a", Domain::Integer);
        a.origin = Some(ClassId(1));
        old.attributes.push(a);
        old.att_ids = 5;

        let mut same = Attribute::new("a", Domain::Integer);
        same.origin = Some(ClassId(1));
        let mut retyped = Attribute::new("b", Domain::Varchar(3));
        retyped.origin = Some(ClassId(1));
        let mut attributes = vec![same, retyped];
        let mut next = old.att_ids;
        assign_attribute_ids("t", &old, &mut attributes, None, &mut next).unwrap();
        assert_eq!(attributes[0].id, Some(AttrId(4)));
        assert_eq!(attributes[1].id, Some(AttrId(5)));
        assert_eq!(next, 6);
    }
}
