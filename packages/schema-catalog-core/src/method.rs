//! Dynamic method linking.
//!
//! Method signatures name an implementing function; a [`MethodResolver`]
//! maps that name to a callable supplied by the host.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::value::Value;

/// Method implementation signature.
///
/// Receives the class the method is invoked on and the argument values.
pub type MethodFn = fn(class: ClassId, args: &[Value]) -> Result<Value, SchemaError>;

/// Resolves implementing functions by name.
pub trait MethodResolver: Send + Sync {
    /// Returns the function registered under `name`.
    fn resolve(&self, name: &str) -> Result<Option<MethodFn>, SchemaError>;
}

/// Resolver backed by an in-process registry.
#[derive(Debug, Default)]
pub struct StaticMethodResolver {
    functions: RwLock<HashMap<String, MethodFn>>,
}

impl StaticMethodResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a function.
    pub fn register(&self, name: impl Into<String>, function: MethodFn) -> Result<(), SchemaError> {
        let mut functions = self
            .functions
            .write()
            .map_err(|_| SchemaError::LockPoisoned)?;
        functions.insert(name.into(), function);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<bool, SchemaError> {
        let mut functions = self
            .functions
            .write()
            .map_err(|_| SchemaError::LockPoisoned)?;
        Ok(functions.remove(name).is_some())
    }
}

impl MethodResolver for StaticMethodResolver {
    fn resolve(&self, name: &str) -> Result<Option<MethodFn>, SchemaError> {
        let functions = self
            .functions
            .read()
            .map_err(|_| SchemaError::LockPoisoned)?;
        Ok(functions.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_class: ClassId, args: &[Value]) -> Result<Value, SchemaError> {
        Ok(Value::Integer(args.len() as i64 + 41))
    }

    #[test]
    fn test_register_resolve_unregister() {
        let resolver = StaticMethodResolver::new();
        resolver.register("answer", answer).unwrap();
        let f = resolver.resolve("answer").unwrap().unwrap();
        assert_eq!(f(ClassId(1), &[Value::Null]).unwrap(), Value::Integer(42));
        assert!(resolver.unregister("answer").unwrap());
        assert!(resolver.resolve("answer").unwrap().is_none());
    }
}
