//! Committed class definitions.

mod component;

pub use component::{
    Attribute, Component, Method, MethodFile, MethodSignature, NameSpace, Resolution,
    ResolutionSpace, TriggerBinding,
};

use serde::{Deserialize, Serialize};

use crate::constraint::{Constraint, PropertyList};
use crate::error::SchemaError;
use crate::ids::{ClassId, HeapId};
use crate::partition::PartitionInfo;

/// Case-normalizes a class or component name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Checks that `name` is a usable identifier.
///
/// # Arguments
/// * `name` - Normalized name
/// * `max_len` - Maximum length in bytes
pub fn validate_identifier(name: &str, max_len: usize) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty identifier"));
    }
    if name.len() > max_len {
        return Err(invalid("identifier too long"));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("identifier starts with a digit"));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '#' || c == '$') {
        return Err(invalid("illegal character"));
    }
    Ok(())
}

/// Read access shared by committed classes and flattened templates.
///
/// Flattening a subclass reads its superclasses through this trait so that
/// a superclass being edited contributes its pending definition.
pub trait ClassDefinition {
    fn class_name(&self) -> &str;
    fn inheritance(&self) -> &[ClassId];
    /// Instance and shared attributes in definition order
    fn ordered_attributes(&self) -> Vec<&Attribute>;
    fn class_attributes(&self) -> &[Attribute];
    fn methods(&self) -> &[Method];
    fn class_methods(&self) -> &[Method];
    fn method_files(&self) -> &[MethodFile];
    fn constraints(&self) -> Result<Vec<Constraint>, SchemaError>;

    /// Attribute of any namespace by name.
    fn find_any_attribute(&self, name: &str) -> Option<&Attribute> {
        self.ordered_attributes()
            .into_iter()
            .chain(self.class_attributes().iter())
            .find(|a| a.name == name)
    }
}

/// Kind of class object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassType {
    /// Ordinary table with a heap
    #[default]
    Class,
    /// Virtual class defined by query specs
    View,
}

/// Statistics last computed for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub row_count: u64,
    pub full_scan: bool,
}

/// A committed class (table) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    /// Case-normalized name
    pub name: String,
    pub class_type: ClassType,
    pub owner: String,
    /// Representation generation; bumped only on layout changes
    pub repr_id: u32,
    pub is_system: bool,
    pub reuse_oid: bool,
    pub heap: Option<HeapId>,
    /// Instance attributes in storage order
    pub attributes: Vec<Attribute>,
    pub shared_attributes: Vec<Attribute>,
    pub class_attributes: Vec<Attribute>,
    pub methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub method_files: Vec<MethodFile>,
    pub query_specs: Vec<String>,
    pub resolutions: Vec<Resolution>,
    /// Serialized constraints, local and inherited
    pub properties: PropertyList,
    /// Direct superclasses, in resolution order
    pub inheritance: Vec<ClassId>,
    /// Direct subclasses
    pub users: Vec<ClassId>,
    pub partition: Option<PartitionInfo>,
    pub triggers: Vec<TriggerBinding>,
    /// Next attribute id
    pub att_ids: u32,
    /// Next method id
    pub method_ids: u32,
    #[serde(skip)]
    pub methods_loaded: bool,
    #[serde(skip)]
    pub dirty: bool,
    pub statistics: Option<ClassStatistics>,
    pub comment: Option<String>,
}

impl Class {
    /// Creates an empty class shell; its definition is installed afterwards.
    pub fn new(id: ClassId, name: impl Into<String>, class_type: ClassType, owner: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            class_type,
            owner: owner.into(),
            repr_id: 0,
            is_system: false,
            reuse_oid: false,
            heap: None,
            attributes: Vec::new(),
            shared_attributes: Vec::new(),
            class_attributes: Vec::new(),
            methods: Vec::new(),
            class_methods: Vec::new(),
            method_files: Vec::new(),
            query_specs: Vec::new(),
            resolutions: Vec::new(),
            properties: PropertyList::new(),
            inheritance: Vec::new(),
            users: Vec::new(),
            partition: None,
            triggers: Vec::new(),
            att_ids: 0,
            method_ids: 0,
            methods_loaded: false,
            dirty: false,
            statistics: None,
            comment: None,
        }
    }

    pub fn is_view(&self) -> bool {
        self.class_type == ClassType::View
    }

    /// Returns `true` if this class is a partition of another class.
    pub fn is_partition(&self) -> bool {
        matches!(self.partition, Some(PartitionInfo::Child(_)))
    }

    /// Returns `true` if this class is a partitioned parent.
    pub fn is_partitioned(&self) -> bool {
        matches!(self.partition, Some(PartitionInfo::Parent(_)))
    }

    /// Instance and shared attributes in definition order.
    pub fn ordered_attributes(&self) -> Vec<&Attribute> {
        let mut all: Vec<&Attribute> = self
            .attributes
            .iter()
            .chain(self.shared_attributes.iter())
            .collect();
        all.sort_by_key(|a| a.order);
        all
    }

    /// Finds an instance or shared attribute.
    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .chain(self.shared_attributes.iter())
            .find(|a| a.name == name)
    }

    pub fn find_class_attribute(&self, name: &str) -> Option<&Attribute> {
        self.class_attributes.iter().find(|a| a.name == name)
    }

    /// Finds an instance or class method.
    pub fn find_method(&self, name: &str) -> Option<&Method> {
        self.methods
            .iter()
            .chain(self.class_methods.iter())
            .find(|m| m.name == name)
    }

    /// Returns `true` if a component named `name` exists in the namespace
    /// group of `space`.
    pub fn has_component(&self, name: &str, space: ResolutionSpace) -> bool {
        match space {
            ResolutionSpace::Instance => {
                self.find_attribute(name).is_some() || self.methods.iter().any(|m| m.name == name)
            }
            ResolutionSpace::Class => {
                self.find_class_attribute(name).is_some()
                    || self.class_methods.iter().any(|m| m.name == name)
            }
        }
    }

    /// Decodes the constraint cache from the property list.
    pub fn constraints(&self) -> Result<Vec<Constraint>, SchemaError> {
        self.properties.constraints()
    }

    pub fn primary_key(&self) -> Result<Option<Constraint>, SchemaError> {
        self.properties.primary_key()
    }
}

impl ClassDefinition for Class {
    fn class_name(&self) -> &str {
        &self.name
    }

    fn inheritance(&self) -> &[ClassId] {
        &self.inheritance
    }

    fn ordered_attributes(&self) -> Vec<&Attribute> {
        Class::ordered_attributes(self)
    }

    fn class_attributes(&self) -> &[Attribute] {
        &self.class_attributes
    }

    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn class_methods(&self) -> &[Method] {
        &self.class_methods
    }

    fn method_files(&self) -> &[MethodFile] {
        &self.method_files
    }

    fn constraints(&self) -> Result<Vec<Constraint>, SchemaError> {
        self.properties.constraints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn test_ordered_attributes_follow_definition_order() {
        let mut class = Class::new(ClassId(1), "t", ClassType::Class, "dba");
        let mut a = Attribute::new("a", Domain::Varchar(10));
        a.order = 0;
        let mut b = Attribute::new("b", Domain::BigInt);
        b.order = 1;
        let mut s = Attribute::with_namespace("s", Domain::Integer, NameSpace::SharedAttribute);
        s.order = 2;
        // storage order puts the fixed-width attribute first
        class.attributes = vec![b, a];
        class.shared_attributes = vec![s];

        let names: Vec<_> = class.ordered_attributes().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "s"]);
        assert!(class.has_component("s", ResolutionSpace::Instance));
        assert!(!class.has_component("s", ResolutionSpace::Class));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("order_lines", 254).is_ok());
        assert!(validate_identifier("", 254).is_err());
        assert!(validate_identifier("1abc", 254).is_err());
        assert!(validate_identifier("a b", 254).is_err());
        assert!(validate_identifier("abcdef", 5).is_err());
        assert_eq!(normalize_name(" Orders "), "orders");
    }
}
