//! Schema catalog and online DDL engine for class hierarchies.
//!
//! Classes with multiple inheritance are edited through templates that are
//! flattened against their superclasses, installed together with every
//! affected subclass, and backed by heaps and B-trees owned by a storage
//! engine. Partitioned classes route rows to partition subclasses and
//! prune them for predicates.

pub mod catalog;
pub mod class;
pub mod config;
pub mod constraint;
pub mod ddl;
pub mod domain;
pub mod error;
pub mod flatten;
pub mod hierarchy;
pub mod ids;
mod install;
pub mod method;
pub mod partition;
pub mod persistence;
pub mod storage;
pub mod template;
pub mod transaction;
pub mod value;

pub use catalog::{CatalogState, SchemaCatalog};
pub use config::CatalogConfig;
pub use ddl::{CommitOptions, IndexOptions};
pub use error::{ErrorKind, SchemaError};
pub use hierarchy::EditPhase;
pub use ids::{AttrId, BTreeId, ClassId, HeapId, MethodId};
pub use template::{FlatTemplate, Template};
pub use value::Value;
