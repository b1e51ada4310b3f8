//! Shared fixtures.

use schema_catalog_core::class::{Attribute, ClassType};
use schema_catalog_core::domain::Domain;
use schema_catalog_core::{CatalogConfig, ClassId, SchemaCatalog, SchemaError};

pub fn new_catalog() -> SchemaCatalog {
    SchemaCatalog::in_memory(CatalogConfig::default())
}

/// Creates a class with INTEGER attributes under the given superclasses.
pub fn create_class(
    catalog: &mut SchemaCatalog,
    name: &str,
    attributes: &[&str],
    supers: &[&str],
) -> Result<ClassId, SchemaError> {
    let mut template = catalog.new_template(name, ClassType::Class)?;
    for sup in supers {
        catalog.add_superclass(&mut template, sup)?;
    }
    for attribute in attributes {
        template.add_attribute(Attribute::new(*attribute, Domain::Integer))?;
    }
    catalog.finish_class(template)
}

/// Attribute names of a class in storage order.
pub fn attribute_names(catalog: &SchemaCatalog, class: &str) -> Vec<String> {
    catalog
        .find_class(class)
        .map(|c| c.attributes.iter().map(|a| a.name.clone()).collect())
        .unwrap_or_default()
}
