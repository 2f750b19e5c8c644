//! Pluggable serializers for object types that need custom encoding.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{Decoder, Encoder};
use crate::context::LoadingContext;
use crate::error::BoxError;
use crate::value::ObjectValue;

/// Which serializer produced the bytes of a serialized-fallback node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializedCodec {
    /// A serializer from the [`SerializerRegistry`] claimed the exact type.
    Registered,
    /// The object's own generic serialization.
    Generic,
}

/// Encodes and decodes objects of one exact type.
pub trait ValueSerializer: Send + Sync {
    /// Writes `value` to `encoder`.
    fn write(&self, encoder: &mut Encoder, value: &dyn ObjectValue) -> Result<(), BoxError>;

    /// Reads a value previously written by [`ValueSerializer::write`].
    fn read(&self, decoder: &mut Decoder<'_>) -> Result<Arc<dyn ObjectValue>, BoxError>;
}

/// Serializers keyed by exact type name.
///
/// The registry is filled before the snapshotter is built and is read-only
/// afterwards.
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: HashMap<String, Arc<dyn ValueSerializer>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `serializer` for objects whose type name is `type_name`.
    pub fn register(&mut self, type_name: impl Into<String>, serializer: Arc<dyn ValueSerializer>) {
        self.serializers.insert(type_name.into(), serializer);
    }

    /// Builder-style [`SerializerRegistry::register`].
    pub fn with_serializer(
        mut self,
        type_name: impl Into<String>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Self {
        self.register(type_name, serializer);
        self
    }

    /// Returns `true` if a serializer claims `type_name`.
    pub fn can_serialize(&self, type_name: &str) -> bool {
        self.serializers.contains_key(type_name)
    }

    /// Returns the serializer for `type_name`.
    pub fn serializer_for(&self, type_name: &str) -> Option<&Arc<dyn ValueSerializer>> {
        self.serializers.get(type_name)
    }

    /// Encodes `value` with the serializer registered for its type.
    pub fn encode(&self, value: &dyn ObjectValue) -> Result<Vec<u8>, BoxError> {
        let serializer = self
            .serializer_for(value.type_name())
            .ok_or_else(|| format!("no serializer for '{}'", value.type_name()))?;
        let mut encoder = Encoder::new();
        serializer.write(&mut encoder, value)?;
        Ok(encoder.finish()?)
    }

    /// Decodes an object of `type_name` from bytes produced by [`SerializerRegistry::encode`].
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Arc<dyn ObjectValue>, BoxError> {
        let serializer = self
            .serializer_for(type_name)
            .ok_or_else(|| format!("no serializer for '{type_name}'"))?;
        let mut decoder = Decoder::new(bytes);
        let value = serializer.read(&mut decoder)?;
        decoder.finish()?;
        Ok(value)
    }

    /// Rebuilds an object from bytes produced by `codec`.
    ///
    /// Registered bytes go back through this registry; generic bytes are
    /// loaded by `context`.
    pub fn load(
        &self,
        codec: SerializedCodec,
        type_name: &str,
        context: Option<&Arc<LoadingContext>>,
        bytes: &[u8],
    ) -> Result<Arc<dyn ObjectValue>, BoxError> {
        match codec {
            SerializedCodec::Registered => self.decode(type_name, bytes),
            SerializedCodec::Generic => {
                let context = context
                    .ok_or_else(|| format!("type '{type_name}' has no loading context"))?;
                context.load(type_name, bytes)
            }
        }
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.serializers.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("SerializerRegistry")
            .field("types", &types)
            .finish()
    }
}
