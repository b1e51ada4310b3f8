//! Literal values used for defaults, shared attributes, rows and
//! partition bounds.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::SchemaError;

/// A literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Compares two non-null values of compatible kinds. Integers and floats
    /// compare numerically; anything involving NULL or mixed text/number
    /// kinds is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Converts the value into the representation stored for `domain`.
    pub fn coerce_to(&self, domain: &Domain) -> Result<Value, SchemaError> {
        let invalid = || SchemaError::InvalidValue {
            value: self.to_string(),
            domain: domain.to_string(),
        };
        match (self, domain) {
            (Value::Null, _) => Ok(Value::Null),
            (_, Domain::Short | Domain::Integer | Domain::BigInt) => {
                let v = self.as_integer().ok_or_else(invalid)?;
                let (min, max) = match domain {
                    Domain::Short => (i16::MIN as i64, i16::MAX as i64),
                    Domain::Integer => (i32::MIN as i64, i32::MAX as i64),
                    _ => (i64::MIN, i64::MAX),
                };
                if v < min || v > max {
                    return Err(invalid());
                }
                Ok(Value::Integer(v))
            }
            (
                Value::Integer(_) | Value::Float(_),
                Domain::Float | Domain::Double | Domain::Monetary | Domain::Numeric { .. },
            ) => match self {
                Value::Integer(v) => Ok(Value::Float(*v as f64)),
                _ => Ok(self.clone()),
            },
            (Value::Integer(_) | Value::Float(_), Domain::Char(_) | Domain::Varchar(_)) => {
                Ok(Value::Text(self.to_string()))
            }
            (Value::Text(text), Domain::Char(len) | Domain::Varchar(len)) => {
                if text.chars().count() > *len as usize {
                    return Err(invalid());
                }
                Ok(self.clone())
            }
            (Value::Integer(_), Domain::Date | Domain::Time | Domain::Timestamp) => Ok(self.clone()),
            _ => Err(invalid()),
        }
    }

    /// Stable hash bucket in `0..buckets`; NULL always maps to bucket 0.
    pub fn hash_bucket(&self, buckets: u32) -> u32 {
        if buckets == 0 {
            return 0;
        }
        let hash = match self {
            Value::Null => return 0,
            Value::Integer(v) => crc32fast::hash(&v.to_le_bytes()),
            Value::Float(v) => match self.as_integer() {
                Some(i) => crc32fast::hash(&i.to_le_bytes()),
                None => crc32fast::hash(&v.to_bits().to_le_bytes()),
            },
            Value::Text(s) => crc32fast::hash(s.as_bytes()),
        };
        hash % buckets
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_compare() {
        assert_eq!(Value::Integer(3).compare(&Value::Float(3.5)), Some(Ordering::Less));
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_eq!(Value::Text("a".into()).compare(&Value::Integer(1)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            Value::Float(4.0).coerce_to(&Domain::Integer).unwrap(),
            Value::Integer(4)
        );
        assert!(Value::Float(4.5).coerce_to(&Domain::Integer).is_err());
        assert!(Value::Integer(70_000).coerce_to(&Domain::Short).is_err());
        assert!(Value::Text("abcdef".into()).coerce_to(&Domain::Varchar(3)).is_err());
    }

    #[test]
    fn test_hash_bucket_is_stable() {
        let v = Value::Integer(42);
        assert_eq!(v.hash_bucket(8), v.hash_bucket(8));
        assert_eq!(Value::Float(42.0).hash_bucket(8), v.hash_bucket(8));
        assert_eq!(Value::Null.hash_bucket(8), 0);
        assert!(Value::Text("x".into()).hash_bucket(5) < 5);
    }
}
