//! Fully resolved class definition produced by flattening.

use crate::class::{
    Attribute, ClassDefinition, ClassType, Method, MethodFile, NameSpace, Resolution,
    TriggerBinding,
};
use crate::constraint::Constraint;
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::partition::PartitionInfo;

/// A template with every inherited component merged in.
///
/// Attributes keep their definition order; storage order is decided when
/// the flat template is installed.
#[derive(Debug, Clone)]
pub struct FlatTemplate {
    pub name: String,
    pub class_type: ClassType,
    pub current: Option<ClassId>,
    pub inheritance: Vec<ClassId>,
    /// Instance and shared attributes
    pub attributes: Vec<Attribute>,
    pub class_attributes: Vec<Attribute>,
    pub methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub method_files: Vec<MethodFile>,
    pub query_specs: Vec<String>,
    /// Resolutions still needed after pruning
    pub resolutions: Vec<Resolution>,
    /// Local and inherited constraints
    pub constraints: Vec<Constraint>,
    pub partition: Option<PartitionInfo>,
    pub triggers: Vec<TriggerBinding>,
    pub comment: Option<String>,
    pub reuse_oid: bool,
}

impl FlatTemplate {
    pub fn is_partition(&self) -> bool {
        matches!(self.partition, Some(PartitionInfo::Child(_)))
    }

    pub fn instance_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.namespace == NameSpace::Attribute)
    }

    pub fn shared_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.namespace == NameSpace::SharedAttribute)
    }

    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn find_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }
}

impl ClassDefinition for FlatTemplate {
    fn class_name(&self) -> &str {
        &self.name
    }

    fn inheritance(&self) -> &[ClassId] {
        &self.inheritance
    }

    fn ordered_attributes(&self) -> Vec<&Attribute> {
        self.attributes.iter().collect()
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
        Ok(self.constraints.clone())
    }
}
