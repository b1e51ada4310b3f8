//! Attribute domains and their physical layout.

mod compare;

pub use compare::{DomainComparator, DomainComparison, HierarchyView};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ClassId;

/// Target of an object domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    /// Any class ("OBJECT")
    Any,
    /// A specific class
    Class(ClassId),
    /// The class being defined; fixed up once the class object exists
    SelfRef,
}

/// Attribute and method argument domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Short,
    Integer,
    BigInt,
    Float,
    Double,
    Monetary,
    Numeric { precision: u8, scale: u8 },
    Char(u32),
    Varchar(u32),
    Bit(u32),
    VarBit(u32),
    Date,
    Time,
    Timestamp,
    Set(Vec<Domain>),
    Multiset(Vec<Domain>),
    Sequence(Vec<Domain>),
    Object(ObjectClass),
}

/// Size of an object reference on disk.
const OID_SIZE: usize = 8;

impl Domain {
    /// Returns the SQL type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Domain::Short => "SHORT",
            Domain::Integer => "INTEGER",
            Domain::BigInt => "BIGINT",
            Domain::Float => "FLOAT",
            Domain::Double => "DOUBLE",
            Domain::Monetary => "MONETARY",
            Domain::Numeric { .. } => "NUMERIC",
            Domain::Char(_) => "CHAR",
            Domain::Varchar(_) => "VARCHAR",
            Domain::Bit(_) => "BIT",
            Domain::VarBit(_) => "BIT VARYING",
            Domain::Date => "DATE",
            Domain::Time => "TIME",
            Domain::Timestamp => "TIMESTAMP",
            Domain::Set(_) => "SET",
            Domain::Multiset(_) => "MULTISET",
            Domain::Sequence(_) => "SEQUENCE",
            Domain::Object(_) => "OBJECT",
        }
    }

    /// Returns `true` if both domains have the same base type, ignoring
    /// precision, length, element domains and object class.
    pub fn same_type(&self, other: &Domain) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Returns `true` for object domains.
    pub fn is_object(&self) -> bool {
        matches!(self, Domain::Object(_))
    }

    /// Returns `true` for collection domains.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Domain::Set(_) | Domain::Multiset(_) | Domain::Sequence(_)
        )
    }

    /// Returns `true` for numeric domains.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Domain::Short
                | Domain::Integer
                | Domain::BigInt
                | Domain::Float
                | Domain::Double
                | Domain::Monetary
                | Domain::Numeric { .. }
        )
    }

    /// Returns `true` for integral domains (usable for HASH range enumeration).
    pub fn is_integral(&self) -> bool {
        matches!(self, Domain::Short | Domain::Integer | Domain::BigInt)
    }

    /// Returns `true` if values are stored in the variable-length area.
    pub fn is_variable(&self) -> bool {
        matches!(self, Domain::Varchar(_) | Domain::VarBit(_)) || self.is_collection()
    }

    /// Fixed on-disk size in bytes; zero for variable-length domains.
    pub fn disk_size(&self) -> usize {
        match self {
            Domain::Short => 2,
            Domain::Integer | Domain::Float | Domain::Date | Domain::Time | Domain::Timestamp => 4,
            Domain::BigInt | Domain::Double => 8,
            Domain::Monetary => 12,
            Domain::Numeric { precision, .. } => (*precision as usize / 2) + 1,
            Domain::Char(len) => *len as usize,
            Domain::Bit(bits) => (*bits as usize).div_ceil(8),
            Domain::Object(_) => OID_SIZE,
            Domain::Varchar(_)
            | Domain::VarBit(_)
            | Domain::Set(_)
            | Domain::Multiset(_)
            | Domain::Sequence(_) => 0,
        }
    }

    /// Alignment requirement in bytes.
    pub fn alignment(&self) -> usize {
        match self {
            Domain::Short => 2,
            Domain::Integer | Domain::Float | Domain::Date | Domain::Time | Domain::Timestamp => 4,
            Domain::Object(_) => 4,
            Domain::BigInt | Domain::Double | Domain::Monetary => 8,
            _ => 1,
        }
    }

    /// Returns `true` if switching between the domains changes the stored
    /// layout of the attribute.
    pub fn storage_differs(&self, other: &Domain) -> bool {
        !self.same_type(other)
            || self.is_variable() != other.is_variable()
            || self.disk_size() != other.disk_size()
    }

    /// Returns `true` if the domain (or any element domain) refers to the
    /// class being defined.
    pub fn references_self(&self) -> bool {
        match self {
            Domain::Object(ObjectClass::SelfRef) => true,
            Domain::Set(elems) | Domain::Multiset(elems) | Domain::Sequence(elems) => {
                elems.iter().any(Domain::references_self)
            }
            _ => false,
        }
    }

    /// Replaces self references with `class`.
    pub fn resolve_self(&mut self, class: ClassId) {
        match self {
            Domain::Object(target @ ObjectClass::SelfRef) => *target = ObjectClass::Class(class),
            Domain::Set(elems) | Domain::Multiset(elems) | Domain::Sequence(elems) => {
                for elem in elems {
                    elem.resolve_self(class);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Numeric { precision, scale } => write!(f, "NUMERIC({precision},{scale})"),
            Domain::Char(n) | Domain::Varchar(n) | Domain::Bit(n) | Domain::VarBit(n) => {
                write!(f, "{}({n})", self.type_name())
            }
            Domain::Set(elems) | Domain::Multiset(elems) | Domain::Sequence(elems) => {
                write!(f, "{} OF (", self.type_name())?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Domain::Object(ObjectClass::Any) => write!(f, "OBJECT"),
            Domain::Object(ObjectClass::Class(id)) => write!(f, "OBJECT({id})"),
            Domain::Object(ObjectClass::SelfRef) => write!(f, "OBJECT(self)"),
            _ => write!(f, "{}", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(Domain::BigInt.alignment(), 8);
        assert_eq!(Domain::Short.disk_size(), 2);
        assert_eq!(Domain::Bit(9).disk_size(), 2);
        assert!(Domain::Varchar(10).is_variable());
        assert!(Domain::Set(vec![Domain::Integer]).is_variable());
        assert!(!Domain::Char(10).is_variable());
    }

    #[test]
    fn test_storage_differs() {
        assert!(!Domain::Varchar(10).storage_differs(&Domain::Varchar(200)));
        assert!(Domain::Char(10).storage_differs(&Domain::Char(20)));
        assert!(Domain::Integer.storage_differs(&Domain::BigInt));
    }

    #[test]
    fn test_resolve_self_in_collection() {
        let mut domain = Domain::Set(vec![Domain::Object(ObjectClass::SelfRef)]);
        assert!(domain.references_self());
        domain.resolve_self(ClassId(7));
        assert_eq!(
            domain,
            Domain::Set(vec![Domain::Object(ObjectClass::Class(ClassId(7)))])
        );
        assert!(!domain.references_self());
    }
}
