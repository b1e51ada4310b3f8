//! Attributes, methods and the other named pieces of a class definition.

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::ids::{AttrId, ClassId, MethodId};
use crate::value::Value;

/// Namespace a component is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameSpace {
    /// Per-instance attribute
    Attribute,
    /// Attribute whose value is shared by all instances
    SharedAttribute,
    /// Attribute of the class object itself
    ClassAttribute,
    /// Instance method
    Method,
    /// Class method
    ClassMethod,
}

impl NameSpace {
    /// Returns `true` for method namespaces.
    pub fn is_method(self) -> bool {
        matches!(self, NameSpace::Method | NameSpace::ClassMethod)
    }

    /// Resolution space the namespace belongs to.
    pub fn resolution_space(self) -> ResolutionSpace {
        match self {
            NameSpace::ClassAttribute | NameSpace::ClassMethod => ResolutionSpace::Class,
            _ => ResolutionSpace::Instance,
        }
    }
}

/// Scope of a resolution: instance-level or class-level components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionSpace {
    Instance,
    Class,
}

/// Attribute definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Stable id; `None` until assigned at install time
    pub id: Option<AttrId>,
    pub name: String,
    pub domain: Domain,
    pub namespace: NameSpace,
    /// Defining class; `None` while the class is still being created
    pub origin: Option<ClassId>,
    /// Definition order used by flattening
    pub order: u32,
    pub default_value: Value,
    /// Current value of a shared or class attribute
    pub value: Value,
    pub not_null: bool,
    pub comment: Option<String>,
}

impl Attribute {
    /// Creates a new instance attribute.
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self::with_namespace(name, domain, NameSpace::Attribute)
    }

    /// Creates a new attribute in the given namespace.
    pub fn with_namespace(name: impl Into<String>, domain: Domain, namespace: NameSpace) -> Self {
        Self {
            id: None,
            name: name.into(),
            domain,
            namespace,
            origin: None,
            order: 0,
            default_value: Value::Null,
            value: Value::Null,
            not_null: false,
            comment: None,
        }
    }

    /// Returns `true` for instance (not shared, not class) attributes.
    pub fn is_instance(&self) -> bool {
        self.namespace == NameSpace::Attribute
    }

    /// Returns `true` if the attribute is defined by `class`.
    pub fn is_local_to(&self, class: Option<ClassId>) -> bool {
        self.origin.is_none() || self.origin == class
    }
}

/// Method signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSignature {
    /// Name of the implementing function, resolved by a `MethodResolver`
    pub function_name: String,
    pub return_domain: Option<Domain>,
    /// Argument domains; `None` for an unspecified argument
    pub arguments: Vec<Option<Domain>>,
}

/// Method definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: Option<MethodId>,
    pub name: String,
    pub namespace: NameSpace,
    pub origin: Option<ClassId>,
    pub order: u32,
    pub signature: Option<MethodSignature>,
}

impl Method {
    /// Creates an instance method implemented by `function_name`.
    pub fn new(name: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            namespace: NameSpace::Method,
            origin: None,
            order: 0,
            signature: Some(MethodSignature {
                function_name: function_name.into(),
                return_domain: None,
                arguments: Vec::new(),
            }),
        }
    }

    /// Sets the return domain.
    pub fn returning(mut self, domain: Domain) -> Self {
        if let Some(sig) = self.signature.as_mut() {
            sig.return_domain = Some(domain);
        }
        self
    }

    /// Appends an argument domain.
    pub fn argument(mut self, domain: Domain) -> Self {
        if let Some(sig) = self.signature.as_mut() {
            sig.arguments.push(Some(domain));
        }
        self
    }

    /// Moves the method to the class namespace.
    pub fn class_level(mut self) -> Self {
        self.namespace = NameSpace::ClassMethod;
        self
    }
}

/// Either kind of named component.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Attribute(Attribute),
    Method(Method),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Attribute(att) => &att.name,
            Component::Method(method) => &method.name,
        }
    }

    pub fn namespace(&self) -> NameSpace {
        match self {
            Component::Attribute(att) => att.namespace,
            Component::Method(method) => method.namespace,
        }
    }

    pub fn origin(&self) -> Option<ClassId> {
        match self {
            Component::Attribute(att) => att.origin,
            Component::Method(method) => method.origin,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        match self {
            Component::Attribute(att) => att.name = name.to_string(),
            Component::Method(method) => method.name = name.to_string(),
        }
    }

    pub fn set_order(&mut self, order: u32) {
        match self {
            Component::Attribute(att) => att.order = order,
            Component::Method(method) => method.order = order,
        }
    }
}

/// Explicit directive selecting which superclass provides `name`,
/// optionally renaming it to `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub class: ClassId,
    pub name: String,
    pub alias: Option<String>,
    pub space: ResolutionSpace,
}

impl Resolution {
    /// Name the resolution introduces into the class.
    pub fn visible_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Method file providing method implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFile {
    pub name: String,
    pub origin: Option<ClassId>,
}

/// Trigger bound to a class, optionally to one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub name: String,
    pub attribute: Option<String>,
    /// Fires on class attribute updates rather than instance events
    pub class_level: bool,
    /// Cleared when the bound attribute disappears
    pub valid: bool,
}
