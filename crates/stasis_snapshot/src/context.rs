//! Loading contexts: the "which code" half of a value's identity.
//!
//! A [`LoadingContext`] is a named type loader. It knows how to rebuild
//! objects of its registered types from serialized bytes, which is what the
//! serialized-fallback kind relies on to isolate and coerce values. Its hash
//! is supplied by a [`LoadingContextHasher`] collaborator.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use stasis_common::ContentHash;

use crate::error::BoxError;
use crate::value::{ObjectValue, SerdeObject, TypeRef, Value};

type Loader =
    Box<dyn Fn(&Arc<LoadingContext>, &str, &[u8]) -> Result<Arc<dyn ObjectValue>, BoxError> + Send + Sync>;

/// A named code-loading context that can reconstruct its registered types.
///
/// Contexts are compared by id. Two contexts with the same id are assumed to
/// load the same code.
pub struct LoadingContext {
    id: String,
    loaders: HashMap<String, Loader>,
}

impl LoadingContext {
    /// Creates an empty context with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            loaders: HashMap::new(),
        }
    }

    /// Registers a `serde` type under `type_name`.
    ///
    /// Objects of that type are serialized with `bincode` and can be rebuilt
    /// by [`LoadingContext::load`].
    pub fn register<T>(&mut self, type_name: impl Into<String>)
    where
        T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        let loader: Loader = Box::new(
            |context: &Arc<LoadingContext>,
             type_name: &str,
             bytes: &[u8]|
             -> Result<Arc<dyn ObjectValue>, BoxError> {
                let (value, _): (T, usize) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
                Ok(Arc::new(SerdeObject::new(
                    type_name,
                    Some(Arc::clone(context)),
                    value,
                )))
            },
        );
        self.loaders.insert(type_name.into(), loader);
    }

    /// Builder-style [`LoadingContext::register`].
    pub fn with_type<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.register::<T>(type_name);
        self
    }

    /// Returns the context id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` if this context can load `type_name`.
    pub fn defines(&self, type_name: &str) -> bool {
        self.loaders.contains_key(type_name)
    }

    /// Rebuilds an object of `type_name` from its serialized bytes.
    pub fn load(
        self: &Arc<Self>,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<Arc<dyn ObjectValue>, BoxError> {
        let loader = self.loaders.get(type_name).ok_or_else(|| {
            format!("type '{type_name}' is not defined in context '{}'", self.id)
        })?;
        loader(self, type_name, bytes)
    }

    /// Wraps `value` as an object of `type_name` loaded by this context.
    pub fn object<T>(self: &Arc<Self>, type_name: impl Into<String>, value: T) -> Value
    where
        T: Serialize + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Value::Object(Arc::new(SerdeObject::new(
            type_name,
            Some(Arc::clone(self)),
            value,
        )))
    }

    /// A reference to the type `name` as loaded by this context.
    pub fn type_ref(self: &Arc<Self>, name: impl Into<String>) -> TypeRef {
        TypeRef::in_context(name, Arc::clone(self))
    }

    /// Returns `true` when both sides are the same context, or both absent.
    pub fn same(a: Option<&Arc<LoadingContext>>, b: Option<&Arc<LoadingContext>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl fmt::Debug for LoadingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("LoadingContext")
            .field("id", &self.id)
            .field("types", &types)
            .finish()
    }
}

impl PartialEq for LoadingContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LoadingContext {}

/// Computes a stable hash for a loading context.
///
/// `None` as the argument stands for the builtin context (types that are not
/// loaded by any user context). A `None` result means the context's hash is
/// unavailable, which makes type references from it "unknown".
pub trait LoadingContextHasher: Send + Sync {
    /// Hashes `context`, or returns `None` if it cannot be identified.
    fn hash(&self, context: Option<&LoadingContext>) -> Option<ContentHash>;
}

/// A [`LoadingContextHasher`] that derives the hash from the context id.
#[derive(Debug, Clone, Default)]
pub struct IdContextHasher {
    unhashable: HashSet<String>,
}

impl IdContextHasher {
    /// Creates a hasher that can hash every context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a context id whose hash is unavailable.
    pub fn with_unhashable(mut self, id: impl Into<String>) -> Self {
        self.unhashable.insert(id.into());
        self
    }
}

impl LoadingContextHasher for IdContextHasher {
    fn hash(&self, context: Option<&LoadingContext>) -> Option<ContentHash> {
        match context {
            None => Some(ContentHash::from_bytes(b"builtin")),
            Some(context) if self.unhashable.contains(&context.id) => None,
            Some(context) => Some(ContentHash::from_bytes(
                format!("context:{}", context.id).as_bytes(),
            )),
        }
    }
}

/// Resolves loading contexts by id when decoding isolated values.
#[derive(Debug, Clone, Default)]
pub struct LoadingContextRegistry {
    contexts: HashMap<String, Arc<LoadingContext>>,
}

impl LoadingContextRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context under its id, replacing any previous one.
    pub fn register(&mut self, context: Arc<LoadingContext>) {
        self.contexts.insert(context.id.clone(), context);
    }

    /// Looks up a context by id.
    pub fn get(&self, id: &str) -> Option<&Arc<LoadingContext>> {
        self.contexts.get(id)
    }
}
