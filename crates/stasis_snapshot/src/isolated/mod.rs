//! The isolatable hierarchy: snapshots that can rebuild their value.
//!
//! An [`Isolatable`] holds everything needed to materialize an independent
//! copy of the original value. Its content (equality, hashing) is exactly
//! that of the [`ValueSnapshot`] it corresponds to.

use std::fmt;
use std::hash::{Hash, Hasher as StdHasher};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use stasis_common::{ContentHash, Hasher};
use tracing::debug;

use crate::error::IsolationError;
use crate::managed::{Managed, ManagedFactoryRegistry};
use crate::serializer::{SerializedCodec, SerializerRegistry};
use crate::snapshot::ValueSnapshot;
use crate::value::{AttributeDef, EnumValue, MapFlavor, MapValue, TypeRef, Value};

#[derive(Debug)]
pub(crate) enum IsolatedNode {
    Null,
    Boolean(bool),
    String(String),
    Integer(i32),
    Long(i64),
    Short(i16),
    File(PathBuf),
    Enum(EnumValue),
    Attribute {
        definition: AttributeDef,
        context_hash: Option<ContentHash>,
    },
    Array(Vec<Isolatable>),
    List(Vec<Isolatable>),
    Set(Vec<Isolatable>),
    Map {
        flavor: MapFlavor,
        entries: Vec<(Isolatable, Isolatable)>,
    },
    Managed {
        value_type: TypeRef,
        factory_id: u32,
        factories: Arc<ManagedFactoryRegistry>,
        state: Isolatable,
    },
    ImmutableManaged {
        value_type: TypeRef,
        factory_id: u32,
        factories: Arc<ManagedFactoryRegistry>,
        state: String,
        live: Option<Arc<dyn Managed>>,
    },
    Serialized {
        original_type: TypeRef,
        codec: SerializedCodec,
        context_hash: Option<ContentHash>,
        bytes: Vec<u8>,
        serializers: Arc<SerializerRegistry>,
    },
}

/// An immutable snapshot that can also reconstruct its value.
///
/// Cloning copies the handle, not the tree. The content-only view is built
/// at most once per node.
#[derive(Clone)]
pub struct Isolatable(Arc<IsolatedEntry>);

#[derive(Debug)]
struct IsolatedEntry {
    node: IsolatedNode,
    snapshot: OnceLock<ValueSnapshot>,
}

impl Isolatable {
    pub(crate) fn from_node(node: IsolatedNode) -> Self {
        Isolatable(Arc::new(IsolatedEntry {
            node,
            snapshot: OnceLock::new(),
        }))
    }

    pub(crate) fn node(&self) -> &IsolatedNode {
        &self.0.node
    }

    /// Returns `true` if both handles point at the same node instance.
    pub fn same_instance(&self, other: &Isolatable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// A short description of the node's kind.
    pub fn kind_name(&self) -> &'static str {
        match self.node() {
            IsolatedNode::Null => "null",
            IsolatedNode::Boolean(_) => "boolean",
            IsolatedNode::String(_) => "string",
            IsolatedNode::Integer(_) => "integer",
            IsolatedNode::Long(_) => "long",
            IsolatedNode::Short(_) => "short",
            IsolatedNode::File(_) => "file",
            IsolatedNode::Enum(_) => "enum",
            IsolatedNode::Attribute { .. } => "attribute",
            IsolatedNode::Array(_) => "array",
            IsolatedNode::List(_) => "list",
            IsolatedNode::Set(_) => "set",
            IsolatedNode::Map {
                flavor: MapFlavor::Map,
                ..
            } => "map",
            IsolatedNode::Map {
                flavor: MapFlavor::Properties,
                ..
            } => "properties",
            IsolatedNode::Managed { .. } => "managed value",
            IsolatedNode::ImmutableManaged { .. } => "immutable managed value",
            IsolatedNode::Serialized { .. } => "serialized object",
        }
    }

    /// Materializes an independent copy of the original value.
    ///
    /// Collections are rebuilt from scratch, so mutating the result never
    /// affects this node or other copies. Immutable managed values captured
    /// in this process return the original instance.
    pub fn isolate(&self) -> Result<Value, IsolationError> {
        Ok(match self.node() {
            IsolatedNode::Null => Value::Null,
            IsolatedNode::Boolean(b) => Value::Boolean(*b),
            IsolatedNode::String(s) => Value::String(s.clone()),
            IsolatedNode::Integer(n) => Value::Integer(*n),
            IsolatedNode::Long(n) => Value::Long(*n),
            IsolatedNode::Short(n) => Value::Short(*n),
            IsolatedNode::File(path) => Value::File(path.clone()),
            IsolatedNode::Enum(e) => Value::Enum(e.clone()),
            IsolatedNode::Attribute { definition, .. } => Value::Attribute(definition.clone()),
            IsolatedNode::Array(elements) => Value::Array(isolate_all(elements)?),
            IsolatedNode::List(elements) => Value::List(isolate_all(elements)?),
            IsolatedNode::Set(elements) => Value::Set(isolate_all(elements)?),
            IsolatedNode::Map { flavor, entries } => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.isolate()?, v.isolate()?)))
                    .collect::<Result<Vec<_>, IsolationError>>()?;
                Value::Map(MapValue {
                    flavor: *flavor,
                    entries,
                })
            }
            IsolatedNode::Managed {
                value_type,
                factory_id,
                factories,
                state,
            } => rebuild_managed(factories, *factory_id, value_type, state.isolate()?)?,
            IsolatedNode::ImmutableManaged {
                live: Some(live), ..
            } => Value::Managed(Arc::clone(live)),
            IsolatedNode::ImmutableManaged {
                value_type,
                factory_id,
                factories,
                state,
                live: None,
            } => rebuild_managed(factories, *factory_id, value_type, Value::String(state.clone()))?,
            IsolatedNode::Serialized {
                original_type,
                codec,
                bytes,
                serializers,
                ..
            } => {
                let object = serializers
                    .load(*codec, original_type.name(), original_type.context(), bytes)
                    .map_err(|source| IsolationError::Reconstruction {
                        type_name: original_type.name().to_string(),
                        reason: source.to_string(),
                    })?;
                Value::Object(object)
            }
        })
    }

    /// Tries to produce a value of type `target`.
    ///
    /// Returns `Ok(None)` when this node cannot take that shape. Errors are
    /// reserved for failures to rebuild a value that should be coercible.
    pub fn coerce(&self, target: &TypeRef) -> Result<Option<Value>, IsolationError> {
        match self.node() {
            IsolatedNode::Null => Ok(Some(Value::Null)),
            IsolatedNode::Managed {
                value_type,
                factory_id,
                factories,
                state,
            } => {
                if target == value_type {
                    return self.isolate().map(Some);
                }
                coerce_managed(factories, *factory_id, target, || state.isolate())
            }
            IsolatedNode::ImmutableManaged {
                value_type,
                factory_id,
                factories,
                state,
                ..
            } => {
                if target == value_type {
                    return self.isolate().map(Some);
                }
                coerce_managed(factories, *factory_id, target, || {
                    Ok(Value::String(state.clone()))
                })
            }
            IsolatedNode::Serialized {
                original_type,
                codec,
                bytes,
                serializers,
                ..
            } => {
                if target.accepts(original_type.name(), original_type.context()) {
                    return self.isolate().map(Some);
                }
                if target.name() != original_type.name() {
                    return Ok(None);
                }
                match serializers.load(*codec, target.name(), target.context(), bytes) {
                    Ok(object) => Ok(Some(Value::Object(object))),
                    Err(source) => {
                        debug!(
                            type_name = target.name(),
                            error = %source,
                            "cannot deserialize value in target context"
                        );
                        Ok(None)
                    }
                }
            }
            IsolatedNode::Enum(e) => {
                if target.accepts(e.enum_type.name(), e.enum_type.context()) {
                    Ok(Some(Value::Enum(e.clone())))
                } else if target.name() == e.enum_type.name() {
                    Ok(Some(Value::Enum(EnumValue::new(target.clone(), e.member.clone()))))
                } else {
                    Ok(None)
                }
            }
            _ => {
                let value = self.isolate()?;
                Ok(target.is_assignable_from(&value).then_some(value))
            }
        }
    }

    /// The content-only snapshot equivalent of this node.
    ///
    /// Computed on first use and shared afterwards, so repeated calls
    /// return the same instance.
    pub fn as_snapshot(&self) -> ValueSnapshot {
        self.0.snapshot.get_or_init(|| self.build_snapshot()).clone()
    }

    fn build_snapshot(&self) -> ValueSnapshot {
        match self.node() {
            IsolatedNode::Null => ValueSnapshot::null(),
            IsolatedNode::Boolean(b) => ValueSnapshot::boolean(*b),
            IsolatedNode::String(s) => ValueSnapshot::string(s.as_str()),
            IsolatedNode::Integer(n) => ValueSnapshot::integer(*n),
            IsolatedNode::Long(n) => ValueSnapshot::long(*n),
            IsolatedNode::Short(n) => ValueSnapshot::short(*n),
            IsolatedNode::File(path) => ValueSnapshot::file(path.to_string_lossy()),
            IsolatedNode::Enum(e) => ValueSnapshot::enum_value(e.enum_type.name(), e.member.as_str()),
            IsolatedNode::Attribute {
                definition,
                context_hash,
            } => ValueSnapshot::attribute(
                definition.name.as_str(),
                definition.value_type.name(),
                *context_hash,
            ),
            IsolatedNode::Array(elements) => ValueSnapshot::array(snapshot_all(elements)),
            IsolatedNode::List(elements) => ValueSnapshot::list(snapshot_all(elements)),
            IsolatedNode::Set(elements) => ValueSnapshot::set(snapshot_all(elements)),
            IsolatedNode::Map { entries, .. } => ValueSnapshot::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.as_snapshot(), v.as_snapshot()))
                    .collect(),
            ),
            IsolatedNode::Managed {
                value_type, state, ..
            } => ValueSnapshot::managed(value_type.name(), state.as_snapshot()),
            IsolatedNode::ImmutableManaged {
                value_type, state, ..
            } => ValueSnapshot::immutable_managed(value_type.name(), state.as_str()),
            IsolatedNode::Serialized {
                context_hash,
                bytes,
                ..
            } => ValueSnapshot::serialized(*context_hash, bytes.clone()),
        }
    }

    /// Appends this node's content to `hasher`.
    pub fn append_to_hasher(&self, hasher: &mut dyn Hasher) {
        self.as_snapshot().append_to_hasher(hasher);
    }
}

fn isolate_all(elements: &[Isolatable]) -> Result<Vec<Value>, IsolationError> {
    elements.iter().map(Isolatable::isolate).collect()
}

fn snapshot_all(elements: &[Isolatable]) -> Vec<ValueSnapshot> {
    elements.iter().map(Isolatable::as_snapshot).collect()
}

fn rebuild_managed(
    factories: &ManagedFactoryRegistry,
    factory_id: u32,
    value_type: &TypeRef,
    state: Value,
) -> Result<Value, IsolationError> {
    let factory = factories
        .lookup(factory_id)
        .ok_or_else(|| IsolationError::UnknownFactory {
            factory_id,
            type_name: value_type.name().to_string(),
        })?;
    factory
        .from_state(value_type, state)
        .ok_or_else(|| IsolationError::Reconstruction {
            type_name: value_type.name().to_string(),
            reason: format!("managed factory {factory_id} cannot create this type"),
        })
}

fn coerce_managed(
    factories: &ManagedFactoryRegistry,
    factory_id: u32,
    target: &TypeRef,
    state: impl FnOnce() -> Result<Value, IsolationError>,
) -> Result<Option<Value>, IsolationError> {
    match factories.lookup(factory_id) {
        Some(factory) => Ok(factory.from_state(target, state()?)),
        None => Ok(None),
    }
}

impl PartialEq for Isolatable {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other) || self.as_snapshot() == other.as_snapshot()
    }
}

impl Eq for Isolatable {}

impl Hash for Isolatable {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.as_snapshot().hash(state);
    }
}

impl fmt::Debug for Isolatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Isolatable").field(&self.as_snapshot()).finish()
    }
}
