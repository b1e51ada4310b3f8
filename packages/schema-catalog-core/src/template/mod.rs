//! Schema templates.
//!
//! A template is the uncommitted definition of one class. Every schema
//! edit mutates a template, which is then flattened against the class
//! lattice and installed. A template opened on an existing class holds
//! only the components that class defines locally.

mod flat;

pub use flat::FlatTemplate;

use tracing::debug;

use crate::class::{
    normalize_name, Attribute, Class, ClassType, Method, MethodFile, NameSpace, Resolution,
    ResolutionSpace, TriggerBinding,
};
use crate::constraint::{Constraint, ConstraintKind, PropertyList};
use crate::domain::Domain;
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::partition::PartitionInfo;
use crate::value::Value;

/// A component the class inherits, recorded when the template is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedName {
    pub name: String,
    /// Name of the defining class
    pub origin: String,
    pub space: ResolutionSpace,
}

/// Uncommitted class definition.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub class_type: ClassType,
    /// Class being edited; `None` for a class that does not exist yet
    pub current: Option<ClassId>,
    /// Direct superclasses, in resolution order
    pub inheritance: Vec<ClassId>,
    /// Local instance and shared attributes in definition order
    pub attributes: Vec<Attribute>,
    pub class_attributes: Vec<Attribute>,
    pub methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub method_files: Vec<MethodFile>,
    pub query_specs: Vec<String>,
    pub resolutions: Vec<Resolution>,
    /// Local constraints
    pub properties: PropertyList,
    pub partition: Option<PartitionInfo>,
    pub triggers: Vec<TriggerBinding>,
    pub comment: Option<String>,
    pub reuse_oid: bool,
    pub(crate) inherited: Vec<InheritedName>,
    pub(crate) inherited_constraints: Vec<Constraint>,
    next_order: u32,
}

impl Template {
    /// Creates a template for a new class.
    pub fn new(name: &str, class_type: ClassType) -> Self {
        Self {
            name: normalize_name(name),
            class_type,
            current: None,
            inheritance: Vec::new(),
            attributes: Vec::new(),
            class_attributes: Vec::new(),
            methods: Vec::new(),
            class_methods: Vec::new(),
            method_files: Vec::new(),
            query_specs: Vec::new(),
            resolutions: Vec::new(),
            properties: PropertyList::new(),
            partition: None,
            triggers: Vec::new(),
            comment: None,
            reuse_oid: false,
            inherited: Vec::new(),
            inherited_constraints: Vec::new(),
            next_order: 0,
        }
    }

    /// Opens a template on an existing class, keeping its local definitions.
    ///
    /// # Arguments
    /// * `class` - Committed class
    /// * `class_name` - Resolves the name of a class id, for inherited origins
    pub fn from_class(class: &Class, class_name: impl Fn(ClassId) -> String) -> Result<Self, SchemaError> {
        let local = |origin: Option<ClassId>| origin.is_none() || origin == Some(class.id);
        let mut template = Self::new(&class.name, class.class_type);
        template.current = Some(class.id);
        template.inheritance = class.inheritance.clone();
        template.reuse_oid = class.reuse_oid;
        template.comment = class.comment.clone();
        template.query_specs = class.query_specs.clone();
        template.resolutions = class.resolutions.clone();
        template.partition = class.partition.clone();
        template.triggers = class.triggers.clone();

        for att in class.ordered_attributes().into_iter().chain(class.class_attributes.iter()) {
            if local(att.origin) {
                if att.namespace == NameSpace::ClassAttribute {
                    template.class_attributes.push(att.clone());
                } else {
                    template.attributes.push(att.clone());
                }
            } else {
                template.inherited.push(InheritedName {
                    name: att.name.clone(),
                    origin: class_name(att.origin.unwrap_or(class.id)),
                    space: att.namespace.resolution_space(),
                });
            }
        }
        for method in class.methods.iter().chain(class.class_methods.iter()) {
            if local(method.origin) {
                if method.namespace == NameSpace::ClassMethod {
                    template.class_methods.push(method.clone());
                } else {
                    template.methods.push(method.clone());
                }
            } else {
                template.inherited.push(InheritedName {
                    name: method.name.clone(),
                    origin: class_name(method.origin.unwrap_or(class.id)),
                    space: method.namespace.resolution_space(),
                });
            }
        }
        template.method_files = class
            .method_files
            .iter()
            .filter(|f| local(f.origin))
            .cloned()
            .collect();
        for constraint in class.constraints()? {
            if local(constraint.origin) {
                template.properties.put(&constraint)?;
            } else {
                template.inherited_constraints.push(constraint);
            }
        }
        template.next_order = template
            .attributes
            .iter()
            .chain(template.class_attributes.iter())
            .map(|a| a.order + 1)
            .chain(
                template
                    .methods
                    .iter()
                    .chain(template.class_methods.iter())
                    .map(|m| m.order + 1),
            )
            .max()
            .unwrap_or(0);
        Ok(template)
    }

    pub fn is_new(&self) -> bool {
        self.current.is_none()
    }

    pub fn is_view(&self) -> bool {
        self.class_type == ClassType::View
    }

    fn take_order(&mut self) -> u32 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Returns `true` if a local component named `name` exists in `space`.
    pub fn has_local(&self, name: &str, space: ResolutionSpace) -> bool {
        match space {
            ResolutionSpace::Instance => {
                self.attributes.iter().any(|a| a.name == name)
                    || self.methods.iter().any(|m| m.name == name)
            }
            ResolutionSpace::Class => {
                self.class_attributes.iter().any(|a| a.name == name)
                    || self.class_methods.iter().any(|m| m.name == name)
            }
        }
    }

    fn inherited_name(&self, name: &str, space: ResolutionSpace) -> Option<&InheritedName> {
        self.inherited.iter().find(|i| i.name == name && i.space == space)
    }

    fn attribute_list(&mut self, space: ResolutionSpace) -> &mut Vec<Attribute> {
        match space {
            ResolutionSpace::Instance => &mut self.attributes,
            ResolutionSpace::Class => &mut self.class_attributes,
        }
    }

    fn find_local_attribute(&self, name: &str) -> Option<(ResolutionSpace, usize)> {
        if let Some(pos) = self.attributes.iter().position(|a| a.name == name) {
            return Some((ResolutionSpace::Instance, pos));
        }
        self.class_attributes
            .iter()
            .position(|a| a.name == name)
            .map(|pos| (ResolutionSpace::Class, pos))
    }

    fn local_attribute_mut(&mut self, name: &str) -> Result<&mut Attribute, SchemaError> {
        let name = normalize_name(name);
        match self.find_local_attribute(&name) {
            Some((space, pos)) => Ok(&mut self.attribute_list(space)[pos]),
            None => Err(self.missing_attribute(&name, ResolutionSpace::Instance)),
        }
    }

    /// Error for a component that is not defined locally.
    fn missing_attribute(&self, name: &str, space: ResolutionSpace) -> SchemaError {
        let inherited = self
            .inherited_name(name, space)
            .or_else(|| self.inherited.iter().find(|i| i.name == name));
        match inherited {
            Some(found) => SchemaError::InheritedAttribute {
                class: self.name.clone(),
                attribute: name.to_string(),
                origin: found.origin.clone(),
            },
            None => SchemaError::AttributeNotFound {
                class: self.name.clone(),
                attribute: name.to_string(),
            },
        }
    }

    fn check_new_name(&self, name: &str, space: ResolutionSpace) -> Result<(), SchemaError> {
        if self.has_local(name, space) {
            return Err(SchemaError::ComponentExists {
                class: self.name.clone(),
                name: name.to_string(),
            });
        }
        if self
            .resolutions
            .iter()
            .any(|r| r.space == space && r.alias.as_deref() == Some(name))
        {
            return Err(SchemaError::ResolutionComponentExists {
                class: self.name.clone(),
                alias: name.to_string(),
            });
        }
        Ok(())
    }

    /// Adds a local attribute in the attribute's namespace.
    pub fn add_attribute(&mut self, mut attribute: Attribute) -> Result<(), SchemaError> {
        if attribute.namespace.is_method() {
            return Err(SchemaError::InvalidClassType {
                class: self.name.clone(),
                operation: "add method as attribute",
            });
        }
        attribute.name = normalize_name(&attribute.name);
        let space = attribute.namespace.resolution_space();
        self.check_new_name(&attribute.name, space)?;
        attribute.default_value = attribute.default_value.coerce_to(&attribute.domain)?;
        attribute.value = attribute.value.coerce_to(&attribute.domain)?;
        if attribute.value.is_null() && attribute.namespace != NameSpace::Attribute {
            attribute.value = attribute.default_value.clone();
        }
        attribute.id = None;
        attribute.origin = self.current;
        attribute.order = self.take_order();
        debug!(class = %self.name, attribute = %attribute.name, domain = %attribute.domain, "template add attribute");
        if attribute.not_null {
            let constraint = Constraint::not_null(&attribute.name);
            self.attribute_list(space).push(attribute);
            self.add_constraint(constraint)?;
        } else {
            self.attribute_list(space).push(attribute);
        }
        Ok(())
    }

    /// Drops a local attribute of any namespace.
    ///
    /// Fails for inherited attributes and for attributes any constraint
    /// still depends on.
    pub fn drop_attribute(&mut self, name: &str) -> Result<Attribute, SchemaError> {
        let name = normalize_name(name);
        let Some((space, pos)) = self.find_local_attribute(&name) else {
            return Err(self.missing_attribute(&name, ResolutionSpace::Instance));
        };
        for constraint in self.properties.constraints()?.iter().chain(self.inherited_constraints.iter()) {
            if !constraint.covers(&name) || constraint.kind == ConstraintKind::NotNull {
                continue;
            }
            if constraint.kind == ConstraintKind::PrimaryKey {
                return Err(SchemaError::AttributePrimaryKeyMember {
                    class: self.name.clone(),
                    attribute: name,
                });
            }
            return Err(SchemaError::AttributeInConstraint {
                class: self.name.clone(),
                attribute: name,
                constraint: constraint.name.clone(),
            });
        }
        if let Some(PartitionInfo::Parent(info)) = &self.partition {
            if info.key.attribute == name {
                return Err(SchemaError::InvalidPartitionRequest {
                    class: self.name.clone(),
                    reason: format!("'{name}' is the partitioning key"),
                });
            }
        }
        for not_null in self
            .properties
            .constraints()?
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::NotNull && c.covers(&name))
        {
            self.properties.remove(ConstraintKind::NotNull, &not_null.name);
        }
        let removed = self.attribute_list(space).remove(pos);
        debug!(class = %self.name, attribute = %name, "template drop attribute");
        Ok(removed)
    }

    /// Renames a local attribute, keeping its id so stored values survive.
    pub fn rename_attribute(&mut self, old: &str, new: &str) -> Result<(), SchemaError> {
        let old = normalize_name(old);
        let new = normalize_name(new);
        let Some((space, pos)) = self.find_local_attribute(&old) else {
            return Err(self.missing_attribute(&old, ResolutionSpace::Instance));
        };
        self.check_new_name(&new, space)?;
        self.attribute_list(space)[pos].name = new.clone();

        for mut constraint in self.properties.constraints()? {
            if constraint.covers(&old) {
                for column in constraint.columns.iter_mut().filter(|c| c.name == old) {
                    column.name = new.clone();
                }
                self.properties.put(&constraint)?;
            }
        }
        for trigger in self.triggers.iter_mut() {
            if trigger.attribute.as_deref() == Some(old.as_str()) {
                trigger.attribute = Some(new.clone());
            }
        }
        if let Some(PartitionInfo::Parent(info)) = &mut self.partition {
            if info.key.attribute == old {
                info.key.attribute = new.clone();
            }
        }
        debug!(class = %self.name, %old, %new, "template rename attribute");
        Ok(())
    }

    /// Changes the domain of a local attribute.
    pub fn change_domain(&mut self, name: &str, domain: Domain) -> Result<(), SchemaError> {
        let att = self.local_attribute_mut(name)?;
        att.default_value = att.default_value.coerce_to(&domain)?;
        att.value = att.value.coerce_to(&domain)?;
        att.domain = domain;
        Ok(())
    }

    pub fn set_default(&mut self, name: &str, value: Value) -> Result<(), SchemaError> {
        let att = self.local_attribute_mut(name)?;
        att.default_value = value.coerce_to(&att.domain)?;
        Ok(())
    }

    pub fn set_attribute_comment(&mut self, name: &str, comment: Option<String>) -> Result<(), SchemaError> {
        self.local_attribute_mut(name)?.comment = comment;
        Ok(())
    }

    /// Sets or clears NOT NULL on a local instance attribute.
    pub fn set_not_null(&mut self, name: &str, not_null: bool) -> Result<(), SchemaError> {
        let name = normalize_name(name);
        let att = self.local_attribute_mut(&name)?;
        let (namespace, current) = (att.namespace, att.not_null);
        if namespace == NameSpace::ClassAttribute {
            return Err(SchemaError::InvalidClassType {
                class: self.name.clone(),
                operation: "NOT NULL on class attribute",
            });
        }
        if current == not_null {
            return Ok(());
        }
        self.local_attribute_mut(&name)?.not_null = not_null;
        if not_null {
            self.add_constraint(Constraint::not_null(&name))?;
        } else {
            let existing: Vec<_> = self
                .properties
                .constraints()?
                .into_iter()
                .filter(|c| c.kind == ConstraintKind::NotNull && c.covers(&name))
                .collect();
            for c in existing {
                self.properties.remove(ConstraintKind::NotNull, &c.name);
            }
        }
        Ok(())
    }

    fn method_list(&mut self, space: ResolutionSpace) -> &mut Vec<Method> {
        match space {
            ResolutionSpace::Instance => &mut self.methods,
            ResolutionSpace::Class => &mut self.class_methods,
        }
    }

    fn find_local_method(&self, name: &str) -> Option<(ResolutionSpace, usize)> {
        if let Some(pos) = self.methods.iter().position(|m| m.name == name) {
            return Some((ResolutionSpace::Instance, pos));
        }
        self.class_methods
            .iter()
            .position(|m| m.name == name)
            .map(|pos| (ResolutionSpace::Class, pos))
    }

    fn missing_method(&self, name: &str) -> SchemaError {
        match self.inherited.iter().find(|i| i.name == name) {
            Some(found) => SchemaError::InheritedAttribute {
                class: self.name.clone(),
                attribute: name.to_string(),
                origin: found.origin.clone(),
            },
            None => SchemaError::MethodNotFound {
                class: self.name.clone(),
                method: name.to_string(),
            },
        }
    }

    /// Adds a local instance or class method.
    pub fn add_method(&mut self, mut method: Method) -> Result<(), SchemaError> {
        method.name = normalize_name(&method.name);
        let space = method.namespace.resolution_space();
        self.check_new_name(&method.name, space)?;
        method.id = None;
        method.origin = self.current;
        method.order = self.take_order();
        self.method_list(space).push(method);
        Ok(())
    }

    pub fn drop_method(&mut self, name: &str) -> Result<Method, SchemaError> {
        let name = normalize_name(name);
        match self.find_local_method(&name) {
            Some((space, pos)) => Ok(self.method_list(space).remove(pos)),
            None => Err(self.missing_method(&name)),
        }
    }

    pub fn rename_method(&mut self, old: &str, new: &str) -> Result<(), SchemaError> {
        let old = normalize_name(old);
        let new = normalize_name(new);
        let Some((space, pos)) = self.find_local_method(&old) else {
            return Err(self.missing_method(&old));
        };
        self.check_new_name(&new, space)?;
        self.method_list(space)[pos].name = new;
        Ok(())
    }

    pub fn add_method_file(&mut self, name: &str) -> Result<(), SchemaError> {
        if self.method_files.iter().any(|f| f.name == name) {
            return Err(SchemaError::ComponentExists {
                class: self.name.clone(),
                name: name.to_string(),
            });
        }
        self.method_files.push(MethodFile {
            name: name.to_string(),
            origin: self.current,
        });
        Ok(())
    }

    pub fn drop_method_file(&mut self, name: &str) -> Result<(), SchemaError> {
        let before = self.method_files.len();
        self.method_files.retain(|f| f.name != name);
        if self.method_files.len() == before {
            return Err(SchemaError::MethodNotFound {
                class: self.name.clone(),
                method: name.to_string(),
            });
        }
        Ok(())
    }

    fn require_view(&self, operation: &'static str) -> Result<(), SchemaError> {
        if self.is_view() {
            Ok(())
        } else {
            Err(SchemaError::InvalidClassType {
                class: self.name.clone(),
                operation,
            })
        }
    }

    fn query_spec_index(&self, index: usize) -> Result<usize, SchemaError> {
        if index < self.query_specs.len() {
            Ok(index)
        } else {
            Err(SchemaError::InvalidValue {
                value: index.to_string(),
                domain: format!("query spec index of '{}'", self.name),
            })
        }
    }

    pub fn add_query_spec(&mut self, query: &str) -> Result<(), SchemaError> {
        self.require_view("add query spec")?;
        self.query_specs.push(query.to_string());
        Ok(())
    }

    pub fn drop_query_spec(&mut self, index: usize) -> Result<String, SchemaError> {
        self.require_view("drop query spec")?;
        let index = self.query_spec_index(index)?;
        Ok(self.query_specs.remove(index))
    }

    pub fn replace_query_spec(&mut self, index: usize, query: &str) -> Result<(), SchemaError> {
        self.require_view("change query spec")?;
        let index = self.query_spec_index(index)?;
        self.query_specs[index] = query.to_string();
        Ok(())
    }

    /// Records a resolution, replacing any earlier one for the same
    /// name and superclass.
    pub fn add_resolution(&mut self, resolution: Resolution) -> Result<(), SchemaError> {
        if let Some(alias) = &resolution.alias {
            if self.has_local(alias, resolution.space) {
                return Err(SchemaError::ResolutionComponentExists {
                    class: self.name.clone(),
                    alias: alias.clone(),
                });
            }
        }
        self.resolutions.retain(|r| {
            !(r.space == resolution.space
                && r.name == resolution.name
                && (r.class == resolution.class || r.alias.is_none() && resolution.alias.is_none()))
        });
        self.resolutions.push(resolution);
        Ok(())
    }

    /// Removes a resolution; returns `false` if none matched.
    pub fn delete_resolution(&mut self, class: ClassId, name: &str, space: ResolutionSpace) -> bool {
        let before = self.resolutions.len();
        self.resolutions
            .retain(|r| !(r.class == class && r.name == name && r.space == space));
        self.resolutions.len() != before
    }

    /// Names of local and inherited instance attributes.
    fn known_instance_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
            || self
                .inherited
                .iter()
                .any(|i| i.name == name && i.space == ResolutionSpace::Instance)
    }

    fn constraint_name_taken(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.properties.find_by_name(name)?.is_some()
            || self.inherited_constraints.iter().any(|c| c.name == name))
    }

    /// Adds a local constraint and returns its name.
    ///
    /// An empty name is replaced by the generated default name.
    pub fn add_constraint(&mut self, mut constraint: Constraint) -> Result<String, SchemaError> {
        if constraint.columns.is_empty() {
            return Err(SchemaError::InvalidProperty {
                class: self.name.clone(),
                constraint: constraint.name,
            });
        }
        for column in constraint.columns.iter_mut() {
            column.name = normalize_name(&column.name);
            column.id = None;
            if !self.known_instance_attribute(&column.name) {
                return Err(SchemaError::AttributeNotFound {
                    class: self.name.clone(),
                    attribute: column.name.clone(),
                });
            }
        }
        constraint.name = if constraint.name.is_empty() {
            Constraint::default_name(constraint.kind, &self.name, &constraint.columns)
        } else {
            normalize_name(&constraint.name)
        };
        if self.constraint_name_taken(&constraint.name)? {
            return Err(SchemaError::ConstraintExists {
                class: self.name.clone(),
                constraint: constraint.name,
            });
        }
        let existing: Vec<Constraint> = self
            .properties
            .constraints()?
            .into_iter()
            .chain(self.inherited_constraints.iter().cloned())
            .collect();
        if constraint.kind == ConstraintKind::PrimaryKey
            && existing.iter().any(|c| c.kind == ConstraintKind::PrimaryKey)
        {
            return Err(SchemaError::PrimaryKeyExists {
                class: self.name.clone(),
            });
        }
        if constraint.kind.has_index()
            && constraint.kind != ConstraintKind::ForeignKey
            && existing
                .iter()
                .any(|c| c.kind == constraint.kind && c.same_key(&constraint))
        {
            return Err(SchemaError::IndexExists {
                class: self.name.clone(),
                constraint: constraint.name,
            });
        }
        if constraint.kind == ConstraintKind::ForeignKey && constraint.foreign_key.is_none() {
            return Err(SchemaError::InvalidProperty {
                class: self.name.clone(),
                constraint: constraint.name,
            });
        }
        if let Some(fk) = constraint.foreign_key.as_mut() {
            fk.ref_class_name = normalize_name(&fk.ref_class_name);
        }
        if constraint.kind == ConstraintKind::NotNull {
            for column in &constraint.columns {
                if let Some(att) = self.attributes.iter_mut().find(|a| a.name == column.name) {
                    att.not_null = true;
                }
            }
        }
        constraint.origin = self.current;
        constraint.btree = None;
        constraint.referrers.clear();
        debug!(class = %self.name, constraint = %constraint.name, kind = ?constraint.kind, "template add constraint");
        self.properties.put(&constraint)?;
        Ok(constraint.name)
    }

    /// Drops a local constraint.
    pub fn drop_constraint(&mut self, name: &str) -> Result<Constraint, SchemaError> {
        let name = normalize_name(name);
        let Some(constraint) = self.properties.find_by_name(&name)? else {
            if self.inherited_constraints.iter().any(|c| c.name == name) {
                return Err(SchemaError::InvalidProperty {
                    class: self.name.clone(),
                    constraint: name,
                });
            }
            return Err(SchemaError::ConstraintNotFound {
                class: self.name.clone(),
                constraint: name,
            });
        };
        self.properties.remove(constraint.kind, &constraint.name);
        if constraint.kind == ConstraintKind::NotNull {
            for column in &constraint.columns {
                if let Some(att) = self.attributes.iter_mut().find(|a| a.name == column.name) {
                    att.not_null = false;
                }
            }
        }
        debug!(class = %self.name, constraint = %name, "template drop constraint");
        Ok(constraint)
    }

    pub fn add_trigger(&mut self, trigger: TriggerBinding) -> Result<(), SchemaError> {
        if self.triggers.iter().any(|t| t.name == trigger.name) {
            return Err(SchemaError::ComponentExists {
                class: self.name.clone(),
                name: trigger.name,
            });
        }
        self.triggers.push(trigger);
        Ok(())
    }

    pub fn drop_trigger(&mut self, name: &str) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.name != name);
        self.triggers.len() != before
    }

    pub fn set_partition(&mut self, partition: Option<PartitionInfo>) {
        self.partition = partition;
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    pub(crate) fn push_superclass(&mut self, class: ClassId) {
        if !self.inheritance.contains(&class) {
            self.inheritance.push(class);
        }
    }

    pub(crate) fn remove_superclass(&mut self, class: ClassId) -> bool {
        let before = self.inheritance.len();
        self.inheritance.retain(|c| *c != class);
        self.resolutions.retain(|r| r.class != class);
        self.inheritance.len() != before
    }
}
