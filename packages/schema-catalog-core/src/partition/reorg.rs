//! Creating, reshaping and removing partitions, and routing rows to them.
//!
//! Partitions are subclasses of the partitioned class that share its
//! attribute ids. Every operation that changes which partition a key maps
//! to takes the affected rows out of their heaps, changes the metadata,
//! routes the rows again and reloads the indexes of every touched class.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::SchemaCatalog;
use crate::class::{normalize_name, validate_identifier, ClassType};
use crate::constraint::ConstraintScope;
use crate::ddl::CommitOptions;
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::partition::{
    below_max, route_value, validate_partition_name, PartitionBound, PartitionChild, PartitionClause,
    PartitionInfo, PartitionKind, PartitionParent, PartitionRow, PartitionSpec, PartitionValues, Predicate,
    PruningContext,
};
use crate::storage::{Row, StorageEngine};
use crate::template::Template;
use crate::transaction::TransactionManager;
use crate::value::Value;

/// Class name of partition `name` of class `parent`.
pub fn partition_class_name(parent: &str, name: &str) -> String {
    format!("{parent}__p__{name}")
}

fn invalid_request(class: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidPartitionRequest {
        class: class.to_string(),
        reason: reason.into(),
    }
}

fn work_failed(class: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::PartitionWorkFailed {
        class: class.to_string(),
        reason: reason.into(),
    }
}

fn catalog_values(bound: &PartitionBound) -> Vec<Value> {
    match bound {
        PartitionBound::Hash { slot } => vec![Value::Integer(i64::from(*slot))],
        PartitionBound::Range { min, max } => vec![min.clone(), max.clone()],
        PartitionBound::List { values } => values.clone(),
    }
}

/// Turns RANGE or LIST clauses into bounds.
///
/// RANGE clauses must be strictly increasing, starting above `lower`;
/// `MAXVALUE` may only close the list. LIST values must not repeat and
/// must not appear in `taken`.
fn bounds_from_clauses(
    class: &str,
    parent: &PartitionParent,
    clauses: &[PartitionClause],
    lower: Value,
    taken: &[Value],
) -> Result<Vec<(String, PartitionBound)>, SchemaError> {
    if clauses.is_empty() {
        return Err(invalid_request(class, "no partitions given"));
    }
    let mut out = Vec::with_capacity(clauses.len());
    let mut min = lower;
    let mut seen: Vec<Value> = taken.to_vec();
    for (i, clause) in clauses.iter().enumerate() {
        let name = normalize_name(&clause.name);
        let bound = match (parent.kind, &clause.values) {
            (PartitionKind::Range, PartitionValues::LessThan(max)) => {
                let max = max.coerce_to(&parent.key_domain)?;
                if !max.is_null() && !min.is_null() && !below_max(&min, &max) {
                    return Err(invalid_request(
                        class,
                        format!("partition '{name}' bound is not above the previous one"),
                    ));
                }
                let bound = PartitionBound::Range {
                    min: min.clone(),
                    max: max.clone(),
                };
                min = max;
                if min.is_null() && i + 1 < clauses.len() {
                    return Err(invalid_request(class, "MAXVALUE must be the last partition"));
                }
                bound
            }
            (PartitionKind::List, PartitionValues::In(values)) => {
                if values.is_empty() {
                    return Err(invalid_request(class, format!("partition '{name}' has no values")));
                }
                let mut coerced = Vec::with_capacity(values.len());
                for value in values {
                    let value = value.coerce_to(&parent.key_domain)?;
                    if seen.contains(&value) {
                        return Err(invalid_request(class, format!("value {value} used by more than one partition")));
                    }
                    seen.push(value.clone());
                    coerced.push(value);
                }
                PartitionBound::List { values: coerced }
            }
            _ => {
                return Err(invalid_request(
                    class,
                    format!("partition '{name}' does not match {} partitioning", parent.kind),
                ))
            }
        };
        out.push((name, bound));
    }
    Ok(out)
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Partitions an existing class.
    ///
    /// Rows already stored in the class move to their partitions.
    ///
    /// # Arguments
    /// * `class` - Class to partition
    /// * `spec` - Method, key and partitions
    ///
    /// # Returns
    /// The partition classes in partition order.
    pub fn create_partitions(&mut self, class: &str, spec: PartitionSpec) -> Result<Vec<ClassId>, SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("create_partitions", |catalog| catalog.create_partitions_inner(id, spec))
    }

    fn create_partitions_inner(&mut self, id: ClassId, spec: PartitionSpec) -> Result<Vec<ClassId>, SchemaError> {
        let class = self.class_by_id(id)?;
        let name = class.name.clone();
        if class.class_type != ClassType::Class {
            return Err(invalid_request(&name, "only tables can be partitioned"));
        }
        if class.partition.is_some() {
            return Err(invalid_request(&name, "class is already partitioned or is a partition"));
        }
        if !class.inheritance.is_empty() || !class.users.is_empty() {
            return Err(invalid_request(&name, "class belongs to a hierarchy"));
        }
        let key_attribute = normalize_name(&spec.key.attribute);
        let key_domain = class
            .attributes
            .iter()
            .find(|a| a.name == key_attribute)
            .map(|a| a.domain.clone())
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: name.clone(),
                attribute: key_attribute.clone(),
            })?;

        let mut key = spec.key.clone();
        key.attribute = key_attribute;
        let mut parent = PartitionParent {
            kind: spec.kind,
            key,
            key_domain,
            hash_size: 0,
            partitions: Vec::new(),
        };
        let bounds = match spec.kind {
            PartitionKind::Hash => {
                if !spec.clauses.is_empty() {
                    return Err(invalid_request(&name, "HASH partitions take no value clauses"));
                }
                if spec.hash_size == 0 || spec.hash_size > self.config.max_hash_partitions {
                    return Err(invalid_request(
                        &name,
                        format!("HASH partition count must be 1..={}", self.config.max_hash_partitions),
                    ));
                }
                parent.hash_size = spec.hash_size;
                (0..spec.hash_size)
                    .map(|slot| (format!("p{slot}"), PartitionBound::Hash { slot }))
                    .collect()
            }
            PartitionKind::Range | PartitionKind::List => {
                bounds_from_clauses(&name, &parent, &spec.clauses, Value::Null, &[])?
            }
        };
        self.check_partition_names(id, &name, &bounds, &[])?;

        let mut template = Template::from_class(self.class_by_id(id)?, |c| self.class_name(c))?;
        template.set_partition(Some(PartitionInfo::Parent(parent.clone())));
        self.update_class(template, &CommitOptions::default())?;

        let rows = self.take_class_rows(id)?;
        for (partition, bound) in bounds {
            let child = self.create_partition_child(id, &partition, bound)?;
            parent.partitions.push(child);
        }
        self.set_parent_info(id, parent.clone())?;
        let touched = self.route_rows(id, rows)?;
        self.finish_reorganization(id, &touched)?;

        info!(class = %name, kind = %parent.kind, partitions = parent.partitions.len(), "class partitioned");
        Ok(parent.partitions)
    }

    /// Adds RANGE or LIST partitions after the existing ones.
    pub fn add_partitions(&mut self, class: &str, clauses: Vec<PartitionClause>) -> Result<Vec<ClassId>, SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("add_partitions", |catalog| {
            let (mut parent, children) = catalog.partition_children(id)?;
            let name = catalog.class_name(id);
            let lower = match parent.kind {
                PartitionKind::Hash => {
                    return Err(invalid_request(&name, "use add_hash_partitions for HASH partitioning"))
                }
                PartitionKind::Range => match children.last() {
                    Some((_, PartitionBound::Range { max, .. })) if max.is_null() => {
                        return Err(invalid_request(&name, "last partition already ends at MAXVALUE"))
                    }
                    Some((_, PartitionBound::Range { max, .. })) => max.clone(),
                    _ => Value::Null,
                },
                PartitionKind::List => Value::Null,
            };
            let taken: Vec<Value> = children
                .iter()
                .flat_map(|(_, bound)| match bound {
                    PartitionBound::List { values } => values.clone(),
                    _ => Vec::new(),
                })
                .collect();
            let bounds = bounds_from_clauses(&name, &parent, &clauses, lower, &taken)?;
            catalog.check_partition_names(id, &name, &bounds, &[])?;

            let mut added = Vec::with_capacity(bounds.len());
            for (partition, bound) in bounds {
                let child = catalog.create_partition_child(id, &partition, bound)?;
                parent.partitions.push(child);
                added.push(child);
            }
            catalog.set_parent_info(id, parent)?;
            catalog.partition_cache.invalidate(id);
            info!(class = %name, added = added.len(), "partitions added");
            Ok(added)
        })
    }

    /// Grows a HASH partitioned class by `count` partitions and rehashes
    /// its rows.
    pub fn add_hash_partitions(&mut self, class: &str, count: u32) -> Result<Vec<ClassId>, SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("add_hash_partitions", |catalog| {
            let (mut parent, children) = catalog.partition_children(id)?;
            let name = catalog.class_name(id);
            if parent.kind != PartitionKind::Hash {
                return Err(invalid_request(&name, "class is not HASH partitioned"));
            }
            let size = parent.hash_size.saturating_add(count);
            if count == 0 || size > catalog.config.max_hash_partitions {
                return Err(invalid_request(
                    &name,
                    format!("HASH partition count must stay within 1..={}", catalog.config.max_hash_partitions),
                ));
            }
            let mut rows = Vec::new();
            for (child, _) in &children {
                rows.extend(catalog.take_class_rows(*child)?);
            }
            let bounds: Vec<(String, PartitionBound)> = (parent.hash_size..size)
                .map(|slot| (format!("p{slot}"), PartitionBound::Hash { slot }))
                .collect();
            catalog.check_partition_names(id, &name, &bounds, &[])?;

            let mut added = Vec::new();
            for (partition, bound) in bounds {
                let child = catalog.create_partition_child(id, &partition, bound)?;
                parent.partitions.push(child);
                added.push(child);
            }
            parent.hash_size = size;
            catalog.set_parent_info(id, parent.clone())?;
            let mut touched = catalog.route_rows(id, rows)?;
            touched.extend(parent.partitions.iter().copied());
            catalog.finish_reorganization(id, &touched)?;
            info!(class = %name, hash_size = size, "hash partitions added");
            Ok(added)
        })
    }

    /// Shrinks a HASH partitioned class by `count` partitions and rehashes
    /// its rows.
    pub fn coalesce_partitions(&mut self, class: &str, count: u32) -> Result<(), SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("coalesce_partitions", |catalog| {
            let (mut parent, children) = catalog.partition_children(id)?;
            let name = catalog.class_name(id);
            if parent.kind != PartitionKind::Hash {
                return Err(invalid_request(&name, "class is not HASH partitioned"));
            }
            if count == 0 || count >= parent.hash_size {
                return Err(invalid_request(&name, "cannot remove all HASH partitions"));
            }
            let mut rows = Vec::new();
            for (child, _) in &children {
                rows.extend(catalog.take_class_rows(*child)?);
            }
            let size = parent.hash_size - count;
            let removed: Vec<ClassId> = parent.partitions.split_off(size as usize);
            for child in &removed {
                catalog.drop_partition_class(*child)?;
            }
            parent.hash_size = size;
            catalog.set_parent_info(id, parent.clone())?;
            let mut touched = catalog.route_rows(id, rows)?;
            touched.extend(parent.partitions.iter().copied());
            catalog.finish_reorganization(id, &touched)?;
            info!(class = %name, hash_size = size, "hash partitions coalesced");
            Ok(())
        })
    }

    /// Drops RANGE or LIST partitions together with their rows.
    ///
    /// The RANGE partition following a dropped one takes over its lower
    /// bound.
    pub fn drop_partitions(&mut self, class: &str, names: &[&str]) -> Result<(), SchemaError> {
        let id = self.find_class(class)?.id;
        let names: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        self.atomically("drop_partitions", |catalog| {
            let (mut parent, _) = catalog.partition_children(id)?;
            let name = catalog.class_name(id);
            if parent.kind == PartitionKind::Hash {
                return Err(invalid_request(&name, "use coalesce_partitions for HASH partitioning"));
            }
            let victims = catalog.partitions_named(id, &names)?;
            if victims.len() >= parent.partitions.len() {
                return Err(invalid_request(&name, "cannot drop every partition"));
            }

            for victim in victims {
                let (_, children) = catalog.partition_children(id)?;
                let pos = children
                    .iter()
                    .position(|(c, _)| *c == victim)
                    .ok_or_else(|| work_failed(&name, format!("{victim} is not a partition")))?;
                if let PartitionBound::Range { min, .. } = &children[pos].1 {
                    if let Some((next, PartitionBound::Range { max, .. })) = children.get(pos + 1) {
                        let widened = PartitionBound::Range {
                            min: min.clone(),
                            max: max.clone(),
                        };
                        catalog.set_child_bound(*next, widened)?;
                    }
                }
                catalog.drop_partition_class(victim)?;
                parent.partitions.retain(|c| *c != victim);
                catalog.set_parent_info(id, parent.clone())?;
            }
            catalog.partition_cache.invalidate(id);
            catalog.refresh_statistics(id)?;
            info!(class = %name, dropped = names.len(), "partitions dropped");
            Ok(())
        })
    }

    /// Replaces RANGE or LIST partitions with new ones, moving their rows.
    ///
    /// Replaced RANGE partitions must be adjacent and the new ones must
    /// cover exactly their range; new LIST partitions must cover at least
    /// the replaced values.
    pub fn reorganize_partitions(
        &mut self,
        class: &str,
        names: &[&str],
        clauses: Vec<PartitionClause>,
    ) -> Result<Vec<ClassId>, SchemaError> {
        let id = self.find_class(class)?.id;
        let names: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        self.atomically("reorganize_partitions", |catalog| {
            let (mut parent, children) = catalog.partition_children(id)?;
            let name = catalog.class_name(id);
            if parent.kind == PartitionKind::Hash {
                return Err(invalid_request(&name, "HASH partitions cannot be reorganized"));
            }
            let victims = catalog.partitions_named(id, &names)?;
            let mut positions: Vec<usize> = victims
                .iter()
                .filter_map(|v| children.iter().position(|(c, _)| c == v))
                .collect();
            positions.sort_unstable();
            let first = *positions
                .first()
                .ok_or_else(|| invalid_request(&name, "no partitions to reorganize"))?;

            let bounds = match parent.kind {
                PartitionKind::Range => {
                    if positions.windows(2).any(|w| w[1] != w[0] + 1) {
                        return Err(invalid_request(&name, "reorganized RANGE partitions must be adjacent"));
                    }
                    let (lower, upper) = match (&children[first].1, &children[first + positions.len() - 1].1) {
                        (PartitionBound::Range { min, .. }, PartitionBound::Range { max, .. }) => (min.clone(), max.clone()),
                        _ => return Err(work_failed(&name, "partition bound does not match RANGE")),
                    };
                    let bounds = bounds_from_clauses(&name, &parent, &clauses, lower, &[])?;
                    let covered = match bounds.last() {
                        Some((_, PartitionBound::Range { max, .. })) => max == &upper,
                        _ => false,
                    };
                    if !covered {
                        return Err(invalid_request(&name, "new partitions must end where the old ones ended"));
                    }
                    bounds
                }
                _ => {
                    let taken: Vec<Value> = children
                        .iter()
                        .filter(|(c, _)| !victims.contains(c))
                        .flat_map(|(_, b)| match b {
                            PartitionBound::List { values } => values.clone(),
                            _ => Vec::new(),
                        })
                        .collect();
                    let bounds = bounds_from_clauses(&name, &parent, &clauses, Value::Null, &taken)?;
                    let new_values: Vec<&Value> = bounds
                        .iter()
                        .flat_map(|(_, b)| match b {
                            PartitionBound::List { values } => values.iter().collect::<Vec<_>>(),
                            _ => Vec::new(),
                        })
                        .collect();
                    let lost = children
                        .iter()
                        .filter(|(c, _)| victims.contains(c))
                        .flat_map(|(_, b)| match b {
                            PartitionBound::List { values } => values.clone(),
                            _ => Vec::new(),
                        })
                        .any(|v| !new_values.contains(&&v));
                    if lost {
                        return Err(invalid_request(&name, "new partitions must keep every reorganized value"));
                    }
                    bounds
                }
            };
            catalog.check_partition_names(id, &name, &bounds, &names)?;

            let mut rows = Vec::new();
            for victim in &victims {
                rows.extend(catalog.take_class_rows(*victim)?);
                catalog.drop_partition_class(*victim)?;
            }
            parent.partitions.retain(|c| !victims.contains(c));
            let mut created = Vec::with_capacity(bounds.len());
            for (partition, bound) in bounds {
                created.push(catalog.create_partition_child(id, &partition, bound)?);
            }
            let insert_at = first.min(parent.partitions.len());
            for (offset, child) in created.iter().enumerate() {
                parent.partitions.insert(insert_at + offset, *child);
            }
            catalog.set_parent_info(id, parent)?;
            let mut touched = catalog.route_rows(id, rows)?;
            touched.extend(created.iter().copied());
            catalog.finish_reorganization(id, &touched)?;
            info!(class = %name, replaced = victims.len(), created = created.len(), "partitions reorganized");
            Ok(created)
        })
    }

    /// Turns a partitioned class back into a plain class, moving every row
    /// into its own heap.
    pub fn remove_partitioning(&mut self, class: &str) -> Result<(), SchemaError> {
        let id = self.find_class(class)?.id;
        self.atomically("remove_partitioning", |catalog| {
            let (parent, _) = catalog.partition_children(id)?;
            let mut rows = Vec::new();
            for child in &parent.partitions {
                rows.extend(catalog.take_class_rows(*child)?);
                catalog.drop_partition_class(*child)?;
            }
            catalog.state.partitions.remove(&id);

            let mut template = Template::from_class(catalog.class_by_id(id)?, |c| catalog.class_name(c))?;
            template.set_partition(None);
            catalog.update_class(template, &CommitOptions::default())?;

            let heap = crate::catalog::heap_of(catalog.class_by_id(id)?)?;
            for row in rows {
                catalog.storage.insert_row(heap, row)?;
            }
            catalog.finish_reorganization(id, &[])?;
            info!(class = %catalog.class_name(id), "partitioning removed");
            Ok(())
        })
    }

    /// Partition an INSERT of `value` into class `parent` lands in.
    pub fn partition_for_value(&self, parent: &str, value: &Value) -> Result<ClassId, SchemaError> {
        let id = self.find_class(parent)?.id;
        let (info, children) = self.partition_children(id)?;
        let value = value.coerce_to(&info.key_domain)?;
        self.route_key(id, &info, &children, &value)
    }

    /// Partition a stored row of class `parent` belongs to.
    pub(crate) fn route_row(&self, parent: ClassId, row: &Row) -> Result<ClassId, SchemaError> {
        let (info, children) = self.partition_children(parent)?;
        let class = self.class_by_id(parent)?;
        let key = class
            .attributes
            .iter()
            .find(|a| a.name == info.key.attribute)
            .and_then(|a| a.id)
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: class.name.clone(),
                attribute: info.key.attribute.clone(),
            })?;
        let value = row.get(&key).cloned().unwrap_or(Value::Null);
        self.route_key(parent, &info, &children, &value)
    }

    fn route_key(
        &self,
        parent: ClassId,
        info: &PartitionParent,
        children: &[(ClassId, PartitionBound)],
        value: &Value,
    ) -> Result<ClassId, SchemaError> {
        let bounds: Vec<(ClassId, &PartitionBound)> = children.iter().map(|(c, b)| (*c, b)).collect();
        route_value(info, &bounds, value).ok_or_else(|| SchemaError::PartitionNotExist {
            class: self.class_name(parent),
            value: value.to_string(),
        })
    }

    /// Partitions of `parent` that may hold rows satisfying `predicate`.
    pub fn prune(&self, parent: &str, predicate: &Predicate) -> Result<Vec<ClassId>, SchemaError> {
        let id = self.find_class(parent)?.id;
        Ok(self.pruning_context(id)?.prune(predicate))
    }

    /// Cached pruning context of a partitioned class.
    pub fn pruning_context(&self, parent: ClassId) -> Result<Arc<PruningContext>, SchemaError> {
        if let Some(context) = self.partition_cache.get(parent) {
            return Ok(context);
        }
        let (info, partitions) = self.partition_children(parent)?;
        debug!(parent = %parent, partitions = partitions.len(), "building pruning context");
        Ok(self.partition_cache.insert(PruningContext {
            parent,
            kind: info.kind,
            key: info.key,
            key_domain: info.key_domain,
            hash_size: info.hash_size,
            partitions,
            enumeration_limit: self.config.hash_range_enumeration_limit,
        }))
    }

    /// Parent metadata and each partition's bound, checked against each
    /// other.
    fn partition_children(&self, parent: ClassId) -> Result<(PartitionParent, Vec<(ClassId, PartitionBound)>), SchemaError> {
        let class = self.class_by_id(parent)?;
        let Some(PartitionInfo::Parent(info)) = &class.partition else {
            return Err(invalid_request(&class.name, "class is not partitioned"));
        };
        let mut children = Vec::with_capacity(info.partitions.len());
        for child in &info.partitions {
            let bound = match self.class(*child).and_then(|c| c.partition.as_ref()) {
                Some(PartitionInfo::Child(PartitionChild { parent: p, bound, .. })) if *p == parent => bound.clone(),
                _ => return Err(work_failed(&class.name, format!("{child} is not a partition of this class"))),
            };
            children.push((*child, bound));
        }
        if info.kind == PartitionKind::Hash && children.len() != info.hash_size as usize {
            return Err(work_failed(&class.name, "HASH partition count disagrees with the catalog"));
        }
        Ok((info.clone(), children))
    }

    fn partitions_named(&self, parent: ClassId, names: &[String]) -> Result<Vec<ClassId>, SchemaError> {
        let class_name = self.class_name(parent);
        let rows = self.state.partitions.get(&parent);
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let child = rows
                .and_then(|rows| rows.get(name))
                .map(|row| row.child)
                .ok_or_else(|| invalid_request(&class_name, format!("partition '{name}' does not exist")))?;
            if !out.contains(&child) {
                out.push(child);
            }
        }
        Ok(out)
    }

    /// Rejects bad, duplicate and already used partition names. Names in
    /// `replaced` are about to be freed.
    fn check_partition_names(
        &self,
        parent: ClassId,
        class: &str,
        bounds: &[(String, PartitionBound)],
        replaced: &[String],
    ) -> Result<(), SchemaError> {
        let existing = self.state.partitions.get(&parent);
        let mut seen = HashSet::new();
        for (name, _) in bounds {
            validate_partition_name(class, name, self.config.max_partition_name_length)?;
            validate_identifier(&partition_class_name(class, name), self.config.max_identifier_length)?;
            let in_use = existing.is_some_and(|rows| rows.contains_key(name)) && !replaced.contains(name);
            if in_use || !seen.insert(name.as_str()) {
                return Err(invalid_request(class, format!("duplicate partition name '{name}'")));
            }
        }
        Ok(())
    }

    fn create_partition_child(&mut self, parent: ClassId, name: &str, bound: PartitionBound) -> Result<ClassId, SchemaError> {
        let parent_class = self.class_by_id(parent)?;
        let (kind, expression) = match &parent_class.partition {
            Some(PartitionInfo::Parent(info)) => (info.kind, info.key.text().to_string()),
            _ => return Err(work_failed(&parent_class.name, "class is not partitioned")),
        };
        let mut template = Template::new(&partition_class_name(&parent_class.name, name), ClassType::Class);
        template.push_superclass(parent);
        self.refresh_inherited(&mut template)?;
        template.set_partition(Some(PartitionInfo::Child(PartitionChild {
            parent,
            name: name.to_string(),
            bound: bound.clone(),
        })));
        let child = self.update_class(template, &CommitOptions::default())?;

        self.state.partitions.entry(parent).or_default().insert(
            name.to_string(),
            PartitionRow {
                parent,
                name: name.to_string(),
                child,
                kind,
                expression,
                values: catalog_values(&bound),
            },
        );
        debug!(parent = %parent, partition = %name, class = %child, "created partition");
        Ok(child)
    }

    /// Removes a partition class and its catalog row; its rows are lost.
    fn drop_partition_class(&mut self, child: ClassId) -> Result<(), SchemaError> {
        let name = self.class_name(child);
        self.transactions.fetch_class_for_edit(
            child,
            &name,
            crate::transaction::LockMode::Exclusive,
            crate::transaction::Authorization::Alter,
        )?;
        self.remove_class_object(child)
    }

    fn set_parent_info(&mut self, parent: ClassId, info: PartitionParent) -> Result<(), SchemaError> {
        let class = self.class_by_id_mut(parent)?;
        class.partition = Some(PartitionInfo::Parent(info));
        class.dirty = true;
        self.partition_cache.invalidate(parent);
        Ok(())
    }

    fn set_child_bound(&mut self, child: ClassId, bound: PartitionBound) -> Result<(), SchemaError> {
        let class = self.class_by_id_mut(child)?;
        let Some(PartitionInfo::Child(info)) = class.partition.as_mut() else {
            return Err(work_failed(&class.name, "class is not a partition"));
        };
        info.bound = bound.clone();
        let (parent, name) = (info.parent, info.name.clone());
        class.dirty = true;
        if let Some(row) = self.state.partitions.get_mut(&parent).and_then(|rows| rows.get_mut(&name)) {
            row.values = catalog_values(&bound);
        }
        Ok(())
    }

    fn take_class_rows(&mut self, id: ClassId) -> Result<Vec<Row>, SchemaError> {
        match self.class_by_id(id)?.heap {
            Some(heap) => self.storage.take_rows(heap),
            None => Ok(Vec::new()),
        }
    }

    /// Inserts rows into the partitions they route to.
    ///
    /// # Returns
    /// The partitions that received rows.
    fn route_rows(&mut self, parent: ClassId, rows: Vec<Row>) -> Result<Vec<ClassId>, SchemaError> {
        let mut touched = Vec::new();
        let moved = rows.len();
        for row in rows {
            let child = self.route_row(parent, &row)?;
            let heap = crate::catalog::heap_of(self.class_by_id(child)?)?;
            self.storage.insert_row(heap, row)?;
            if !touched.contains(&child) {
                touched.push(child);
            }
        }
        debug!(parent = %parent, rows = moved, partitions = touched.len(), "routed rows");
        Ok(touched)
    }

    /// Reloads indexes and statistics of the parent and the touched
    /// partitions after rows moved.
    fn finish_reorganization(&mut self, parent: ClassId, touched: &[ClassId]) -> Result<(), SchemaError> {
        let mut classes = vec![parent];
        classes.extend(touched.iter().copied().filter(|c| *c != parent));
        for class in classes {
            if self.state.classes.contains_key(&class) {
                self.reload_indexes(class)?;
                self.refresh_statistics(class)?;
            }
        }
        self.partition_cache.invalidate(parent);
        Ok(())
    }

    /// Rebuilds every index the class owns from the current heap contents.
    pub(crate) fn reload_indexes(&mut self, id: ClassId) -> Result<(), SchemaError> {
        let class = self.class_by_id(id)?;
        let is_partition = class.is_partition();
        let constraints = class.constraints()?;
        for constraint in constraints {
            let Some(btree) = constraint.btree else {
                continue;
            };
            if !constraint.kind.has_index() || constraint.shared_with.is_some() {
                continue;
            }
            let owner = match constraint.scope(is_partition) {
                ConstraintScope::Global => constraint.origin.unwrap_or(id),
                ConstraintScope::Local => id,
            };
            let mut request = self.index_request(owner, &constraint)?;
            request.references = constraint.foreign_key.as_ref().and_then(|fk| fk.ref_pk_btree);
            self.storage.load_index(&request, Some(btree))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn list_parent() -> PartitionParent {
        PartitionParent {
            kind: PartitionKind::List,
            key: crate::partition::PartitionKey::attribute("k"),
            key_domain: Domain::Integer,
            hash_size: 0,
            partitions: Vec::new(),
        }
    }

    #[test]
    fn test_partition_class_name() {
        assert_eq!(partition_class_name("sales", "p0"), "sales__p__p0");
    }

    #[test]
    fn test_range_clauses_must_increase() {
        let parent = PartitionParent {
            kind: PartitionKind::Range,
            ..list_parent()
        };
        let ok = bounds_from_clauses(
            "t",
            &parent,
            &[PartitionClause::less_than("a", 10), PartitionClause::max_value("b")],
            Value::Null,
            &[],
        )
        .unwrap();
        assert_eq!(
            ok[1].1,
            PartitionBound::Range {
                min: Value::Integer(10),
                max: Value::Null
            }
        );
        let err = bounds_from_clauses(
            "t",
            &parent,
            &[PartitionClause::less_than("a", 10), PartitionClause::less_than("b", 10)],
            Value::Null,
            &[],
        );
        assert!(matches!(err, Err(SchemaError::InvalidPartitionRequest { .. })));
        let err = bounds_from_clauses(
            "t",
            &parent,
            &[PartitionClause::max_value("a"), PartitionClause::less_than("b", 10)],
            Value::Null,
            &[],
        );
        assert!(matches!(err, Err(SchemaError::InvalidPartitionRequest { .. })));
    }

    #[test]
    fn test_list_values_must_be_disjoint() {
        let err = bounds_from_clauses(
            "t",
            &list_parent(),
            &[
                PartitionClause::values_in("a", vec![Value::Integer(1), Value::Integer(2)]),
                PartitionClause::values_in("b", vec![Value::Integer(2)]),
            ],
            Value::Null,
            &[],
        );
        assert!(matches!(err, Err(SchemaError::InvalidPartitionRequest { .. })));
        let err = bounds_from_clauses(
            "t",
            &list_parent(),
            &[PartitionClause::values_in("a", vec![Value::Integer(7)])],
            Value::Null,
            &[Value::Integer(7)],
        );
        assert!(err.is_err());
    }
}
