//! Row access used by DDL tests and partition maintenance.
//!
//! Rows are stored keyed by attribute id, so they survive renames and
//! reordering of the class definition.

use tracing::debug;

use crate::catalog::SchemaCatalog;
use crate::class::{normalize_name, Class};
use crate::error::SchemaError;
use crate::ids::{ClassId, HeapId};
use crate::storage::{Row, StorageEngine};
use crate::transaction::TransactionManager;
use crate::value::Value;

pub(crate) fn heap_of(class: &Class) -> Result<HeapId, SchemaError> {
    class.heap.ok_or_else(|| SchemaError::InvalidClassType {
        class: class.name.clone(),
        operation: "access rows",
    })
}

/// Builds a stored row from named values, filling defaults.
fn build_row(class: &Class, values: &[(&str, Value)]) -> Result<Row, SchemaError> {
    let mut row = Row::new();
    for (name, value) in values {
        let name = normalize_name(name);
        let att = class
            .attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: class.name.clone(),
                attribute: name.clone(),
            })?;
        if let Some(id) = att.id {
            row.insert(id, value.coerce_to(&att.domain)?);
        }
    }
    for att in &class.attributes {
        let Some(id) = att.id else {
            continue;
        };
        let value = row.entry(id).or_insert_with(|| att.default_value.clone());
        if att.not_null && value.is_null() {
            return Err(SchemaError::InvalidValue {
                value: Value::Null.to_string(),
                domain: format!("{} NOT NULL", att.domain),
            });
        }
    }
    Ok(row)
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Inserts a row, routing it to its partition when the class is
    /// partitioned.
    ///
    /// # Arguments
    /// * `class` - Class name
    /// * `values` - `(attribute, value)` pairs; missing attributes take
    ///   their default
    ///
    /// # Returns
    /// The class whose heap received the row.
    pub fn insert_row(&mut self, class: &str, values: &[(&str, Value)]) -> Result<ClassId, SchemaError> {
        let class = self.find_class(class)?;
        let row = build_row(class, values)?;
        let target = if class.is_partitioned() {
            self.route_row(class.id, &row)?
        } else {
            class.id
        };
        let heap = heap_of(self.class_by_id(target)?)?;
        self.storage.insert_row(heap, row)?;
        debug!(class = %target, "inserted row");
        Ok(target)
    }

    /// All rows stored in the class's own heap.
    pub fn rows(&self, class: &str) -> Result<Vec<Row>, SchemaError> {
        let class = self.find_class(class)?;
        self.storage.scan(heap_of(class)?)
    }

    /// Number of rows stored in the class's own heap.
    pub fn row_count(&self, class: &str) -> Result<u64, SchemaError> {
        let class = self.find_class(class)?;
        self.storage.instance_count(heap_of(class)?)
    }

    /// Value of a named attribute in a stored row.
    pub fn row_value(&self, class: &str, row: &Row, attribute: &str) -> Result<Value, SchemaError> {
        let class = self.find_class(class)?;
        let name = normalize_name(attribute);
        let att = class
            .attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: class.name.clone(),
                attribute: name.clone(),
            })?;
        Ok(att
            .id
            .and_then(|id| row.get(&id).cloned())
            .unwrap_or(Value::Null))
    }
}
