//! Query-time partition pruning.
//!
//! Pruning is conservative: a partition is dropped only when no row stored
//! in it can satisfy the predicate. Anything the pruner does not understand
//! keeps every remaining candidate.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::Domain;
use crate::ids::ClassId;
use crate::partition::{above_min, below_max, PartitionBound, PartitionKey, PartitionKind};
use crate::value::Value;

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn negate(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }

    /// Evaluates `left <op> right` for an ordering of left against right.
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// WHERE-clause tree handed over by the planner.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        attribute: String,
        op: CompareOp,
        value: Value,
    },
    /// `attribute BETWEEN low AND high`, both ends inclusive
    Between {
        attribute: String,
        low: Value,
        high: Value,
    },
    In {
        attribute: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        attribute: String,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Anything the pruner cannot reason about
    Opaque,
}

impl Predicate {
    pub fn compare(attribute: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            attribute: attribute.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: &str, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Eq, value)
    }

    pub fn between(attribute: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Predicate::Between {
            attribute: attribute.to_string(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn in_list(attribute: &str, values: Vec<Value>) -> Self {
        Predicate::In {
            attribute: attribute.to_string(),
            values,
            negated: false,
        }
    }

    pub fn is_null(attribute: &str) -> Self {
        Predicate::IsNull {
            attribute: attribute.to_string(),
            negated: false,
        }
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    /// Pushes a negation down to the leaves.
    fn negated(&self) -> Predicate {
        match self {
            Predicate::Compare { attribute, op, value } => Predicate::Compare {
                attribute: attribute.clone(),
                op: op.negate(),
                value: value.clone(),
            },
            Predicate::Between { attribute, low, high } => Predicate::Or(vec![
                Predicate::compare(attribute, CompareOp::Lt, low.clone()),
                Predicate::compare(attribute, CompareOp::Gt, high.clone()),
            ]),
            Predicate::In {
                attribute,
                values,
                negated,
            } => Predicate::In {
                attribute: attribute.clone(),
                values: values.clone(),
                negated: !negated,
            },
            Predicate::IsNull { attribute, negated } => Predicate::IsNull {
                attribute: attribute.clone(),
                negated: !negated,
            },
            Predicate::And(terms) => Predicate::Or(terms.iter().map(Predicate::negated).collect()),
            Predicate::Or(terms) => Predicate::And(terms.iter().map(Predicate::negated).collect()),
            Predicate::Not(inner) => (**inner).clone(),
            Predicate::Opaque => Predicate::Opaque,
        }
    }

    fn attribute(&self) -> Option<&str> {
        match self {
            Predicate::Compare { attribute, .. }
            | Predicate::Between { attribute, .. }
            | Predicate::In { attribute, .. }
            | Predicate::IsNull { attribute, .. } => Some(attribute),
            _ => None,
        }
    }
}

/// Everything needed to prune one partitioned class.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningContext {
    pub parent: ClassId,
    pub kind: PartitionKind,
    pub key: PartitionKey,
    pub key_domain: Domain,
    pub hash_size: u32,
    /// Partitions in partition order
    pub partitions: Vec<(ClassId, PartitionBound)>,
    /// Widest integer range enumerated for HASH
    pub enumeration_limit: u64,
}

type Candidates = BTreeSet<usize>;

impl PruningContext {
    /// Returns the partitions that may hold rows satisfying `predicate`.
    pub fn prune(&self, predicate: &Predicate) -> Vec<ClassId> {
        let all: Candidates = (0..self.partitions.len()).collect();
        let selected = if self.key.expression.is_some() {
            all
        } else {
            self.visit(predicate, &all)
        };
        debug!(
            parent = %self.parent,
            selected = selected.len(),
            total = self.partitions.len(),
            "pruned partitions"
        );
        selected.into_iter().map(|i| self.partitions[i].0).collect()
    }

    fn visit(&self, predicate: &Predicate, candidates: &Candidates) -> Candidates {
        match predicate {
            Predicate::And(terms) => {
                let mut current = candidates.clone();
                for term in terms {
                    if current.is_empty() {
                        break;
                    }
                    current = self.visit(term, &current);
                }
                current
            }
            Predicate::Or(terms) => {
                let mut union = Candidates::new();
                for term in terms {
                    union.extend(self.visit(term, candidates));
                }
                union
            }
            Predicate::Not(inner) => self.visit(&inner.negated(), candidates),
            Predicate::Opaque => candidates.clone(),
            leaf => {
                if leaf.attribute() != Some(self.key.attribute.as_str()) {
                    return candidates.clone();
                }
                let Some(leaf) = self.coerce_leaf(leaf) else {
                    return candidates.clone();
                };
                match self.kind {
                    PartitionKind::Hash => self.prune_hash(&leaf, candidates),
                    PartitionKind::Range | PartitionKind::List => candidates
                        .iter()
                        .copied()
                        .filter(|&i| self.may_match(&self.partitions[i].1, &leaf))
                        .collect(),
                }
            }
        }
    }

    /// Converts leaf literals to the key domain; `None` if any literal does
    /// not convert.
    fn coerce_leaf(&self, leaf: &Predicate) -> Option<Predicate> {
        let coerce = |v: &Value| v.coerce_to(&self.key_domain).ok();
        Some(match leaf {
            Predicate::Compare { attribute, op, value } => Predicate::Compare {
                attribute: attribute.clone(),
                op: *op,
                value: coerce(value)?,
            },
            Predicate::Between { attribute, low, high } => Predicate::Between {
                attribute: attribute.clone(),
                low: coerce(low)?,
                high: coerce(high)?,
            },
            Predicate::In {
                attribute,
                values,
                negated,
            } => Predicate::In {
                attribute: attribute.clone(),
                values: values.iter().map(coerce).collect::<Option<Vec<_>>>()?,
                negated: *negated,
            },
            other => other.clone(),
        })
    }

    fn prune_hash(&self, leaf: &Predicate, candidates: &Candidates) -> Candidates {
        let Some(buckets) = self.hash_buckets(leaf) else {
            return candidates.clone();
        };
        candidates
            .iter()
            .copied()
            .filter(|&i| match &self.partitions[i].1 {
                PartitionBound::Hash { slot } => buckets.contains(slot),
                _ => true,
            })
            .collect()
    }

    /// Buckets a HASH leaf can reach; `None` when it can reach any bucket.
    fn hash_buckets(&self, leaf: &Predicate) -> Option<BTreeSet<u32>> {
        let size = self.hash_size;
        match leaf {
            Predicate::Compare {
                op: CompareOp::Eq,
                value,
                ..
            } => Some(
                // `= NULL` is never true
                (!value.is_null())
                    .then(|| value.hash_bucket(size))
                    .into_iter()
                    .collect(),
            ),
            Predicate::In {
                values,
                negated: false,
                ..
            } => Some(
                values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| v.hash_bucket(size))
                    .collect(),
            ),
            Predicate::IsNull { negated: false, .. } => Some([0].into_iter().collect()),
            Predicate::Between { low, high, .. } if self.key_domain.is_integral() => {
                let (Some(low), Some(high)) = (low.as_integer(), high.as_integer()) else {
                    return None;
                };
                if high < low {
                    return Some(BTreeSet::new());
                }
                let width = (high as i128 - low as i128 + 1) as u128;
                if width > self.enumeration_limit as u128 {
                    return None;
                }
                Some((low..=high).map(|v| Value::Integer(v).hash_bucket(size)).collect())
            }
            _ => None,
        }
    }

    /// Returns `true` unless the partition provably holds no matching row.
    fn may_match(&self, bound: &PartitionBound, leaf: &Predicate) -> bool {
        match bound {
            PartitionBound::Range { min, max } => range_may_match(min, max, leaf),
            PartitionBound::List { values } => values.iter().any(|v| value_may_match(v, leaf)),
            PartitionBound::Hash { .. } => true,
        }
    }
}

fn range_may_match(min: &Value, max: &Value, leaf: &Predicate) -> bool {
    // partition holds keys in [min, max); an incomparable literal keeps it
    let reaches_below = |v: &Value, inclusive: bool| match min.compare(v) {
        _ if min.is_null() => true,
        Some(Ordering::Less) => true,
        Some(Ordering::Equal) => inclusive,
        Some(Ordering::Greater) => false,
        None => true,
    };
    let reaches_above = |v: &Value| below_max(v, max) || max.compare(v).is_none();
    match leaf {
        Predicate::Compare { op, value, .. } => {
            if value.is_null() {
                return false;
            }
            match op {
                CompareOp::Eq => {
                    (above_min(value, min) || min.compare(value).is_none()) && reaches_above(value)
                }
                CompareOp::Ne => true,
                CompareOp::Lt => reaches_below(value, false),
                CompareOp::Le => reaches_below(value, true),
                CompareOp::Gt | CompareOp::Ge => reaches_above(value),
            }
        }
        Predicate::Between { low, high, .. } => {
            if low.is_null() || high.is_null() {
                return false;
            }
            if matches!(low.compare(high), Some(Ordering::Greater)) {
                return false;
            }
            reaches_below(high, true) && reaches_above(low)
        }
        Predicate::In {
            values,
            negated: false,
            ..
        } => values.iter().any(|v| {
            !v.is_null() && (above_min(v, min) || min.compare(v).is_none()) && reaches_above(v)
        }),
        Predicate::IsNull { negated: false, .. } => min.is_null(),
        _ => true,
    }
}

/// Re-evaluates a leaf with the key replaced by `key`.
fn value_may_match(key: &Value, leaf: &Predicate) -> bool {
    match leaf {
        Predicate::IsNull { negated, .. } => key.is_null() != *negated,
        _ if key.is_null() => false,
        Predicate::Compare { op, value, .. } => {
            if value.is_null() {
                return false;
            }
            match key.compare(value) {
                Some(ordering) => op.holds(ordering),
                None => true,
            }
        }
        Predicate::Between { low, high, .. } => {
            let ge_low = key.compare(low).map_or(true, |o| o != Ordering::Less);
            let le_high = key.compare(high).map_or(true, |o| o != Ordering::Greater);
            !low.is_null() && !high.is_null() && ge_low && le_high
        }
        Predicate::In { values, negated, .. } => {
            let found = values.iter().any(|v| v == key);
            if *negated {
                // NOT IN over a list holding NULL is never true
                !found && !values.iter().any(Value::is_null)
            } else {
                found
            }
        }
        _ => true,
    }
}
