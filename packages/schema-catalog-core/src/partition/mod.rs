//! Partitioned classes: metadata, routing and pruning.

mod cache;
mod prune;
mod reorg;

pub use cache::PartitionCache;
pub use prune::{CompareOp, Predicate, PruningContext};
pub use reorg::partition_class_name;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::value::Value;

/// Partitioning method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKind {
    Hash,
    Range,
    List,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionKind::Hash => "HASH",
            PartitionKind::Range => "RANGE",
            PartitionKind::List => "LIST",
        };
        write!(f, "{name}")
    }
}

/// Partitioning key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Attribute the key is computed from
    pub attribute: String,
    /// Expression text when the key is not the bare attribute
    pub expression: Option<String>,
}

impl PartitionKey {
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            attribute: name.into(),
            expression: None,
        }
    }

    /// Text stored in the partition catalog.
    pub fn text(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.attribute)
    }
}

/// Values a single partition accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionBound {
    Hash { slot: u32 },
    /// `[min, max)`; `Null` stands for minus or plus infinity
    Range { min: Value, max: Value },
    List { values: Vec<Value> },
}

impl PartitionBound {
    /// Returns `true` if a row whose key is `value` belongs here.
    pub fn accepts(&self, value: &Value, hash_size: u32) -> bool {
        match self {
            PartitionBound::Hash { slot } => value.hash_bucket(hash_size) == *slot,
            PartitionBound::Range { min, max } => {
                if value.is_null() {
                    return min.is_null();
                }
                above_min(value, min) && below_max(value, max)
            }
            PartitionBound::List { values } => values.iter().any(|v| v == value),
        }
    }
}

/// `value >= min`, with a NULL min meaning minus infinity.
pub(crate) fn above_min(value: &Value, min: &Value) -> bool {
    min.is_null() || matches!(value.compare(min), Some(Ordering::Greater | Ordering::Equal))
}

/// `value < max`, with a NULL max meaning plus infinity.
pub(crate) fn below_max(value: &Value, max: &Value) -> bool {
    max.is_null() || matches!(value.compare(max), Some(Ordering::Less))
}

/// Partition metadata of a partitioned parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionParent {
    pub kind: PartitionKind,
    pub key: PartitionKey,
    pub key_domain: Domain,
    /// Number of HASH partitions; 0 for RANGE and LIST
    pub hash_size: u32,
    /// Children in partition order
    pub partitions: Vec<ClassId>,
}

/// Partition metadata of one partition class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionChild {
    pub parent: ClassId,
    pub name: String,
    pub bound: PartitionBound,
}

/// Partition descriptor attached to a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionInfo {
    Parent(PartitionParent),
    Child(PartitionChild),
}

impl PartitionInfo {
    pub fn parent_info(&self) -> Option<&PartitionParent> {
        match self {
            PartitionInfo::Parent(info) => Some(info),
            PartitionInfo::Child(_) => None,
        }
    }

    pub fn child_info(&self) -> Option<&PartitionChild> {
        match self {
            PartitionInfo::Child(info) => Some(info),
            PartitionInfo::Parent(_) => None,
        }
    }
}

/// Values of one user-declared partition clause.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionValues {
    /// `VALUES LESS THAN (v)`; `Null` is `MAXVALUE`
    LessThan(Value),
    /// `VALUES IN (...)`
    In(Vec<Value>),
}

/// One `PARTITION name VALUES ...` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionClause {
    pub name: String,
    pub values: PartitionValues,
}

impl PartitionClause {
    pub fn less_than(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            values: PartitionValues::LessThan(value.into()),
        }
    }

    pub fn max_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: PartitionValues::LessThan(Value::Null),
        }
    }

    pub fn values_in(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values: PartitionValues::In(values),
        }
    }
}

/// A `PARTITION BY` request.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSpec {
    pub kind: PartitionKind,
    pub key: PartitionKey,
    /// Partition count for HASH
    pub hash_size: u32,
    /// Partition clauses for RANGE and LIST
    pub clauses: Vec<PartitionClause>,
}

impl PartitionSpec {
    pub fn hash(key: &str, size: u32) -> Self {
        Self {
            kind: PartitionKind::Hash,
            key: PartitionKey::attribute(key),
            hash_size: size,
            clauses: Vec::new(),
        }
    }

    pub fn range(key: &str, clauses: Vec<PartitionClause>) -> Self {
        Self {
            kind: PartitionKind::Range,
            key: PartitionKey::attribute(key),
            hash_size: 0,
            clauses,
        }
    }

    pub fn list(key: &str, clauses: Vec<PartitionClause>) -> Self {
        Self {
            kind: PartitionKind::List,
            key: PartitionKey::attribute(key),
            hash_size: 0,
            clauses,
        }
    }
}

/// Row of the partition catalog, keyed by parent and partition name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRow {
    pub parent: ClassId,
    pub name: String,
    pub child: ClassId,
    pub kind: PartitionKind,
    pub expression: String,
    /// RANGE: `[min, max]`; LIST: the value set; HASH: the slot
    pub values: Vec<Value>,
}

/// Partition catalog relation.
pub type PartitionCatalog = BTreeMap<ClassId, BTreeMap<String, PartitionRow>>;

/// Finds the partition a key value is stored in.
///
/// NULL keys go to the first RANGE partition, HASH bucket 0 and the LIST
/// partition enumerating NULL.
///
/// # Arguments
/// * `parent` - Parent metadata
/// * `children` - `(class, bound)` for each partition, in partition order
/// * `value` - Key value, already coerced to the key domain
pub fn route_value(
    parent: &PartitionParent,
    children: &[(ClassId, &PartitionBound)],
    value: &Value,
) -> Option<ClassId> {
    children
        .iter()
        .find(|(_, bound)| bound.accepts(value, parent.hash_size))
        .map(|(class, _)| *class)
}

/// Checks a partition name.
pub(crate) fn validate_partition_name(class: &str, name: &str, max_len: usize) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > max_len {
        return Err(SchemaError::InvalidPartitionRequest {
            class: class.to_string(),
            reason: format!("invalid partition name '{name}'"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: Value, max: Value) -> PartitionBound {
        PartitionBound::Range { min, max }
    }

    #[test]
    fn test_range_bounds_are_half_open() {
        let b = range(Value::Integer(10), Value::Integer(20));
        assert!(b.accepts(&Value::Integer(10), 0));
        assert!(b.accepts(&Value::Integer(19), 0));
        assert!(!b.accepts(&Value::Integer(20), 0));
        assert!(!b.accepts(&Value::Null, 0));

        let first = range(Value::Null, Value::Integer(10));
        assert!(first.accepts(&Value::Null, 0));
        assert!(first.accepts(&Value::Integer(i64::MIN), 0));
        let last = range(Value::Integer(20), Value::Null);
        assert!(last.accepts(&Value::Integer(i64::MAX), 0));
    }

    #[test]
    fn test_route_value_by_kind() {
        let parent = PartitionParent {
            kind: PartitionKind::List,
            key: PartitionKey::attribute("k"),
            key_domain: Domain::Varchar(10),
            hash_size: 0,
            partitions: vec![ClassId(2), ClassId(3)],
        };
        let east = PartitionBound::List {
            values: vec![Value::from("ny"), Value::from("bos")],
        };
        let other = PartitionBound::List {
            values: vec![Value::Null],
        };
        let children = [(ClassId(2), &east), (ClassId(3), &other)];
        assert_eq!(route_value(&parent, &children, &Value::from("bos")), Some(ClassId(2)));
        assert_eq!(route_value(&parent, &children, &Value::Null), Some(ClassId(3)));
        assert_eq!(route_value(&parent, &children, &Value::from("sf")), None);
    }

    #[test]
    fn test_hash_routing_is_stable() {
        let parent = PartitionParent {
            kind: PartitionKind::Hash,
            key: PartitionKey::attribute("k"),
            key_domain: Domain::Integer,
            hash_size: 4,
            partitions: Vec::new(),
        };
        let bounds: Vec<PartitionBound> = (0..4).map(|slot| PartitionBound::Hash { slot }).collect();
        let children: Vec<_> = bounds
            .iter()
            .enumerate()
            .map(|(i, b)| (ClassId(10 + i as u32), b))
            .collect();
        for v in [-5i64, 0, 1, 99, 12345] {
            let value = Value::Integer(v);
            let expected = ClassId(10 + value.hash_bucket(4));
            assert_eq!(route_value(&parent, &children, &value), Some(expected));
        }
        assert_eq!(route_value(&parent, &children, &Value::Null), Some(ClassId(10)));
    }
}
