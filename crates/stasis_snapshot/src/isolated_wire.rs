//! Tagged binary encoding of isolatable trees.
//!
//! Uses the snapshot tags from [`crate::wire::tag`], plus
//! [`tag::PROPERTIES`] so maps keep their flavor. Nodes that rebuild values
//! also carry what reconstruction needs: type references (name, context id,
//! synthetic flag), managed factory ids and the serializer that produced
//! serialized bytes. Decoding resolves those through the codec's registries.

use std::path::PathBuf;
use std::sync::Arc;

use crate::codec::{Decoder, Encoder};
use crate::context::LoadingContextRegistry;
use crate::error::{DecodeError, EncodeError};
use crate::isolated::{Isolatable, IsolatedNode};
use crate::managed::ManagedFactoryRegistry;
use crate::serializer::{SerializedCodec, SerializerRegistry};
use crate::snapshotter::ValueSnapshotter;
use crate::value::{AttributeDef, EnumValue, MapFlavor, TypeRef};
use crate::wire::tag;

const CODEC_REGISTERED: u8 = 0;
const CODEC_GENERIC: u8 = 1;

/// Encodes isolatables and decodes them against a set of registries.
#[derive(Debug, Clone)]
pub struct IsolatableCodec {
    contexts: Arc<LoadingContextRegistry>,
    managed_factories: Arc<ManagedFactoryRegistry>,
    serializers: Arc<SerializerRegistry>,
}

impl IsolatableCodec {
    /// Creates a codec over explicit registries.
    pub fn new(
        contexts: LoadingContextRegistry,
        managed_factories: Arc<ManagedFactoryRegistry>,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        Self {
            contexts: Arc::new(contexts),
            managed_factories,
            serializers,
        }
    }

    /// Creates a codec sharing `snapshotter`'s factories and serializers.
    pub fn for_snapshotter(contexts: LoadingContextRegistry, snapshotter: &ValueSnapshotter) -> Self {
        Self::new(
            contexts,
            Arc::clone(snapshotter.managed_factories()),
            snapshotter.serializers_arc(),
        )
    }

    /// Encodes `isolatable` into a fresh buffer.
    pub fn encode(&self, isolatable: &Isolatable) -> Result<Vec<u8>, EncodeError> {
        let mut encoder = Encoder::new();
        self.write(&mut encoder, isolatable);
        encoder.finish()
    }

    /// Decodes exactly one isolatable from `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Isolatable, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let isolatable = self.read(&mut decoder)?;
        decoder.finish()?;
        Ok(isolatable)
    }

    /// Writes `isolatable` and its whole subtree.
    pub fn write(&self, encoder: &mut Encoder, isolatable: &Isolatable) {
        match isolatable.node() {
            IsolatedNode::Null => encoder.write_u8(tag::NULL),
            IsolatedNode::Boolean(true) => encoder.write_u8(tag::TRUE),
            IsolatedNode::Boolean(false) => encoder.write_u8(tag::FALSE),
            IsolatedNode::String(s) => {
                encoder.write_u8(tag::STRING);
                encoder.write_string(s);
            }
            IsolatedNode::Integer(n) => {
                encoder.write_u8(tag::INTEGER);
                encoder.write_i32(*n);
            }
            IsolatedNode::Long(n) => {
                encoder.write_u8(tag::LONG);
                encoder.write_i64(*n);
            }
            IsolatedNode::Short(n) => {
                encoder.write_u8(tag::SHORT);
                encoder.write_i16(*n);
            }
            IsolatedNode::File(path) => {
                encoder.write_u8(tag::FILE);
                encoder.write_string(&path.to_string_lossy());
            }
            IsolatedNode::Enum(e) => {
                encoder.write_u8(tag::ENUM);
                write_type_ref(encoder, &e.enum_type);
                encoder.write_string(&e.member);
            }
            IsolatedNode::Attribute {
                definition,
                context_hash,
            } => {
                encoder.write_u8(tag::ATTRIBUTE);
                encoder.write_string(&definition.name);
                write_type_ref(encoder, &definition.value_type);
                encoder.write_optional_hash(context_hash.as_ref());
            }
            IsolatedNode::Array(elements) if elements.is_empty() => {
                encoder.write_u8(tag::EMPTY_ARRAY)
            }
            IsolatedNode::Array(elements) => self.write_elements(encoder, tag::ARRAY, elements),
            IsolatedNode::List(elements) if elements.is_empty() => encoder.write_u8(tag::EMPTY_LIST),
            IsolatedNode::List(elements) => self.write_elements(encoder, tag::LIST, elements),
            IsolatedNode::Set(elements) => self.write_elements(encoder, tag::SET, elements),
            IsolatedNode::Map { flavor, entries } => {
                encoder.write_u8(match flavor {
                    MapFlavor::Map => tag::MAP,
                    MapFlavor::Properties => tag::PROPERTIES,
                });
                encoder.write_count(entries.len());
                for (key, value) in entries {
                    self.write(encoder, key);
                    self.write(encoder, value);
                }
            }
            IsolatedNode::Managed {
                value_type,
                factory_id,
                state,
                ..
            } => {
                encoder.write_u8(tag::MANAGED);
                write_type_ref(encoder, value_type);
                encoder.write_u32(*factory_id);
                self.write(encoder, state);
            }
            IsolatedNode::ImmutableManaged {
                value_type,
                factory_id,
                state,
                ..
            } => {
                encoder.write_u8(tag::IMMUTABLE_MANAGED);
                write_type_ref(encoder, value_type);
                encoder.write_u32(*factory_id);
                encoder.write_string(state);
            }
            IsolatedNode::Serialized {
                original_type,
                codec,
                context_hash,
                bytes,
                ..
            } => {
                encoder.write_u8(tag::SERIALIZED);
                write_type_ref(encoder, original_type);
                encoder.write_u8(match codec {
                    SerializedCodec::Registered => CODEC_REGISTERED,
                    SerializedCodec::Generic => CODEC_GENERIC,
                });
                encoder.write_optional_hash(context_hash.as_ref());
                encoder.write_binary(bytes);
            }
        }
    }

    fn write_elements(&self, encoder: &mut Encoder, tag: u8, elements: &[Isolatable]) {
        encoder.write_u8(tag);
        encoder.write_count(elements.len());
        for element in elements {
            self.write(encoder, element);
        }
    }

    /// Reads one isolatable tree written by [`IsolatableCodec::write`].
    pub fn read(&self, decoder: &mut Decoder<'_>) -> Result<Isolatable, DecodeError> {
        let tag = decoder.read_u8()?;
        let node = match tag {
            tag::NULL => IsolatedNode::Null,
            tag::TRUE => IsolatedNode::Boolean(true),
            tag::FALSE => IsolatedNode::Boolean(false),
            tag::STRING => IsolatedNode::String(decoder.read_string()?),
            tag::INTEGER => IsolatedNode::Integer(decoder.read_i32()?),
            tag::LONG => IsolatedNode::Long(decoder.read_i64()?),
            tag::SHORT => IsolatedNode::Short(decoder.read_i16()?),
            tag::FILE => IsolatedNode::File(PathBuf::from(decoder.read_string()?)),
            tag::ENUM => {
                let enum_type = self.read_type_ref(decoder)?;
                let member = decoder.read_string()?;
                IsolatedNode::Enum(EnumValue::new(enum_type, member))
            }
            tag::ATTRIBUTE => {
                let name = decoder.read_string()?;
                let value_type = self.read_type_ref(decoder)?;
                let context_hash = decoder.read_optional_hash()?;
                IsolatedNode::Attribute {
                    definition: AttributeDef::new(name, value_type),
                    context_hash,
                }
            }
            tag::EMPTY_ARRAY => IsolatedNode::Array(Vec::new()),
            tag::ARRAY => IsolatedNode::Array(self.read_elements(decoder)?),
            tag::EMPTY_LIST => IsolatedNode::List(Vec::new()),
            tag::LIST => IsolatedNode::List(self.read_elements(decoder)?),
            tag::SET => IsolatedNode::Set(self.read_elements(decoder)?),
            tag::MAP | tag::PROPERTIES => {
                let flavor = if tag == tag::MAP {
                    MapFlavor::Map
                } else {
                    MapFlavor::Properties
                };
                let count = decoder.read_count()?;
                let mut entries = Vec::with_capacity(count.min(decoder.remaining()));
                for _ in 0..count {
                    let key = self.read(decoder)?;
                    let value = self.read(decoder)?;
                    entries.push((key, value));
                }
                IsolatedNode::Map { flavor, entries }
            }
            tag::MANAGED => {
                let value_type = self.read_type_ref(decoder)?;
                let factory_id = self.read_factory_id(decoder)?;
                let state = self.read(decoder)?;
                IsolatedNode::Managed {
                    value_type,
                    factory_id,
                    factories: Arc::clone(&self.managed_factories),
                    state,
                }
            }
            tag::IMMUTABLE_MANAGED => {
                let value_type = self.read_type_ref(decoder)?;
                let factory_id = self.read_factory_id(decoder)?;
                let state = decoder.read_string()?;
                IsolatedNode::ImmutableManaged {
                    value_type,
                    factory_id,
                    factories: Arc::clone(&self.managed_factories),
                    state,
                    live: None,
                }
            }
            tag::SERIALIZED => {
                let original_type = self.read_type_ref(decoder)?;
                let codec = match decoder.read_u8()? {
                    CODEC_REGISTERED => SerializedCodec::Registered,
                    CODEC_GENERIC => SerializedCodec::Generic,
                    other => return Err(DecodeError::UnknownTag { tag: other }),
                };
                if codec == SerializedCodec::Registered
                    && !self.serializers.can_serialize(original_type.name())
                {
                    return Err(DecodeError::UnknownSerializer {
                        type_name: original_type.name().to_string(),
                    });
                }
                let context_hash = decoder.read_optional_hash()?;
                let bytes = decoder.read_binary()?;
                IsolatedNode::Serialized {
                    original_type,
                    codec,
                    context_hash,
                    bytes,
                    serializers: Arc::clone(&self.serializers),
                }
            }
            other => return Err(DecodeError::UnknownTag { tag: other }),
        };
        Ok(Isolatable::from_node(node))
    }

    fn read_elements(&self, decoder: &mut Decoder<'_>) -> Result<Vec<Isolatable>, DecodeError> {
        let count = decoder.read_count()?;
        let mut elements = Vec::with_capacity(count.min(decoder.remaining()));
        for _ in 0..count {
            elements.push(self.read(decoder)?);
        }
        Ok(elements)
    }

    fn read_type_ref(&self, decoder: &mut Decoder<'_>) -> Result<TypeRef, DecodeError> {
        let name = decoder.read_string()?;
        let context = if decoder.read_bool()? {
            let id = decoder.read_string()?;
            let context = self
                .contexts
                .get(&id)
                .ok_or_else(|| DecodeError::UnknownContext { id: id.clone() })?;
            Some(Arc::clone(context))
        } else {
            None
        };
        let synthetic = decoder.read_bool()?;
        Ok(match (synthetic, context) {
            (true, context) => TypeRef::lambda(name, context),
            (false, Some(context)) => TypeRef::in_context(name, context),
            (false, None) => TypeRef::builtin(name),
        })
    }

    fn read_factory_id(&self, decoder: &mut Decoder<'_>) -> Result<u32, DecodeError> {
        let factory_id = decoder.read_u32()?;
        if self.managed_factories.lookup(factory_id).is_none() {
            return Err(DecodeError::UnknownFactory { factory_id });
        }
        Ok(factory_id)
    }
}

fn write_type_ref(encoder: &mut Encoder, type_ref: &TypeRef) {
    encoder.write_string(type_ref.name());
    match type_ref.context() {
        Some(context) => {
            encoder.write_bool(true);
            encoder.write_string(context.id());
        }
        None => encoder.write_bool(false),
    }
    encoder.write_bool(type_ref.is_synthetic());
}
