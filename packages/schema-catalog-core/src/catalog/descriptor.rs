//! Attribute descriptors and method linking.

use tracing::debug;

use crate::catalog::SchemaCatalog;
use crate::class::{normalize_name, NameSpace};
use crate::domain::Domain;
use crate::error::SchemaError;
use crate::ids::{AttrId, ClassId};
use crate::storage::StorageEngine;
use crate::transaction::TransactionManager;
use crate::value::Value;

/// Cached handle on one attribute of one class.
///
/// A descriptor stays usable until the next representation install of its
/// class; check it with [`SchemaCatalog::descriptor_is_valid`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub class: ClassId,
    pub attribute: AttrId,
    pub name: String,
    pub domain: Domain,
    pub namespace: NameSpace,
    epoch: u64,
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Returns a descriptor for an attribute of any namespace.
    pub fn attribute_descriptor(&self, class: &str, attribute: &str) -> Result<AttributeDescriptor, SchemaError> {
        let class = self.find_class(class)?;
        let name = normalize_name(attribute);
        let att = class
            .find_attribute(&name)
            .or_else(|| class.find_class_attribute(&name))
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: class.name.clone(),
                attribute: name.clone(),
            })?;
        let id = att.id.ok_or_else(|| SchemaError::AttributeNotFound {
            class: class.name.clone(),
            attribute: name.clone(),
        })?;
        Ok(AttributeDescriptor {
            class: class.id,
            attribute: id,
            name,
            domain: att.domain.clone(),
            namespace: att.namespace,
            epoch: self.descriptor_epoch(class.id),
        })
    }

    /// Returns `false` once the descriptor's class has been reinstalled.
    pub fn descriptor_is_valid(&self, descriptor: &AttributeDescriptor) -> bool {
        self.state.classes.contains_key(&descriptor.class)
            && self.descriptor_epoch(descriptor.class) == descriptor.epoch
    }

    fn descriptor_epoch(&self, class: ClassId) -> u64 {
        self.descriptor_epochs.get(&class).copied().unwrap_or(0)
    }

    pub(crate) fn invalidate_descriptors(&mut self, class: ClassId) {
        *self.descriptor_epochs.entry(class).or_insert(0) += 1;
    }

    /// Resolves the implementing function of every method of the class.
    ///
    /// # Returns
    /// Number of methods linked.
    pub fn link_methods(&mut self, class: &str) -> Result<usize, SchemaError> {
        let class = self.find_class(class)?;
        let id = class.id;
        let mut linked = 0;
        for method in class.methods.iter().chain(class.class_methods.iter()) {
            let function = method
                .signature
                .as_ref()
                .map(|s| s.function_name.as_str())
                .unwrap_or(method.name.as_str());
            if self.methods.resolve(function)?.is_none() {
                return Err(SchemaError::MethodNotLinked {
                    function: function.to_string(),
                });
            }
            linked += 1;
        }
        self.class_by_id_mut(id)?.methods_loaded = true;
        debug!(class = %id, linked, "linked methods");
        Ok(linked)
    }

    /// Invokes a method, linking the class's methods first if needed.
    ///
    /// Arguments with a declared domain are coerced to it.
    pub fn invoke_method(&mut self, class: &str, method: &str, args: &[Value]) -> Result<Value, SchemaError> {
        if !self.find_class(class)?.methods_loaded {
            self.link_methods(class)?;
        }
        let class = self.find_class(class)?;
        let name = normalize_name(method);
        let method = class
            .find_method(&name)
            .ok_or_else(|| SchemaError::MethodNotFound {
                class: class.name.clone(),
                method: name.clone(),
            })?;
        let function_name = method
            .signature
            .as_ref()
            .map(|s| s.function_name.as_str())
            .unwrap_or(method.name.as_str());
        let function = self
            .methods
            .resolve(function_name)?
            .ok_or_else(|| SchemaError::MethodNotLinked {
                function: function_name.to_string(),
            })?;

        let mut coerced = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let domain = method
                .signature
                .as_ref()
                .and_then(|s| s.arguments.get(i))
                .and_then(|d| d.as_ref());
            coerced.push(match domain {
                Some(domain) => arg.coerce_to(domain)?,
                None => arg.clone(),
            });
        }
        function(class.id, &coerced)
    }
}
