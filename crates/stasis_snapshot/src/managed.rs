//! Managed values: values whose state is packed and rebuilt by a factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::{TypeRef, Value};

/// A value whose state is produced and reconstructed by an external factory.
///
/// Mutable managed values are captured by recursing into their unpacked
/// state. Immutable ones pack their state into a string and are captured as
/// an opaque leaf.
pub trait Managed: fmt::Debug + Send + Sync + 'static {
    /// The public type the value presents to users.
    fn public_type(&self) -> &TypeRef;

    /// Id of the factory that can rebuild this value from its state.
    fn factory_id(&self) -> u32;

    /// Returns `true` if the value is never mutated after creation.
    fn is_immutable(&self) -> bool;

    /// Unpacks the value's current state.
    ///
    /// Immutable values must return a [`Value::String`].
    fn unpack_state(&self) -> Value;
}

/// Rebuilds managed values from unpacked state.
pub trait ManagedFactory: Send + Sync {
    /// The id this factory is registered under.
    fn id(&self) -> u32;

    /// Creates a value of `target` from `state`, or `None` if this factory
    /// cannot produce that type.
    fn from_state(&self, target: &TypeRef, state: Value) -> Option<Value>;
}

/// Looks up managed factories by id.
#[derive(Clone, Default)]
pub struct ManagedFactoryRegistry {
    factories: HashMap<u32, Arc<dyn ManagedFactory>>,
}

impl ManagedFactoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its own id, replacing any previous one.
    pub fn register(&mut self, factory: Arc<dyn ManagedFactory>) {
        self.factories.insert(factory.id(), factory);
    }

    /// Builder-style [`ManagedFactoryRegistry::register`].
    pub fn with_factory(mut self, factory: Arc<dyn ManagedFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Returns the factory registered under `id`.
    pub fn lookup(&self, id: u32) -> Option<Arc<dyn ManagedFactory>> {
        self.factories.get(&id).cloned()
    }
}

impl fmt::Debug for ManagedFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u32> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("ManagedFactoryRegistry")
            .field("factories", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ManagedFactory for Echo {
        fn id(&self) -> u32 {
            3
        }

        fn from_state(&self, _target: &TypeRef, state: Value) -> Option<Value> {
            Some(state)
        }
    }

    #[test]
    fn lookup_registered_factory() {
        let registry = ManagedFactoryRegistry::new().with_factory(Arc::new(Echo));
        let factory = registry.lookup(3).unwrap();
        let out = factory.from_state(&TypeRef::builtin("X"), Value::from(1));
        assert_eq!(out, Some(Value::Integer(1)));
    }

    #[test]
    fn lookup_missing_factory() {
        let registry = ManagedFactoryRegistry::new();
        assert!(registry.lookup(3).is_none());
    }

    #[test]
    fn debug_lists_ids() {
        let registry = ManagedFactoryRegistry::new().with_factory(Arc::new(Echo));
        assert!(format!("{registry:?}").contains('3'));
    }
}
