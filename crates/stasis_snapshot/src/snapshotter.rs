//! The public entry point: snapshot, re-snapshot and isolate values.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use stasis_common::ContentHash;

use crate::context::{IdContextHasher, LoadingContext, LoadingContextHasher};
use crate::dispatch::{ValueDispatcher, ValueVisitor};
use crate::error::{IsolationError, SnapshotError};
use crate::isolated::{Isolatable, IsolatedNode};
use crate::managed::{Managed, ManagedFactoryRegistry};
use crate::serializer::{SerializedCodec, SerializerRegistry};
use crate::snapshot::{ImplementationSnapshot, ValueSnapshot};
use crate::value::{AttributeDef, EnumValue, MapFlavor, ObjectValue, TypeRef, Value};

/// Produces snapshots and isolatables from live values.
///
/// Holds only read-only collaborators, so one instance can be shared by
/// every thread that snapshots task inputs.
#[derive(Clone)]
pub struct ValueSnapshotter {
    dispatcher: ValueDispatcher,
    context_hasher: Arc<dyn LoadingContextHasher>,
    managed_factories: Arc<ManagedFactoryRegistry>,
}

impl ValueSnapshotter {
    /// Starts configuring a snapshotter.
    pub fn builder() -> ValueSnapshotterBuilder {
        ValueSnapshotterBuilder::default()
    }

    /// Snapshots `value`.
    pub fn snapshot(&self, value: &Value) -> Result<ValueSnapshot, SnapshotError> {
        self.dispatcher
            .classify_and_visit(value, &SnapshotVisitor { snapshotter: self })
    }

    /// Snapshots `value`, reusing `candidate` where the content is unchanged.
    ///
    /// Returns `candidate` itself when nothing changed.
    pub fn snapshot_with_candidate(
        &self,
        value: &Value,
        candidate: &ValueSnapshot,
    ) -> Result<ValueSnapshot, SnapshotError> {
        candidate.snapshot_against(value, self)
    }

    /// Captures `value` so that independent copies can be materialized.
    ///
    /// Fails for bare type references and other values with no copyable
    /// state.
    pub fn isolate(&self, value: &Value) -> Result<Isolatable, IsolationError> {
        self.dispatcher
            .classify_and_visit(value, &IsolateVisitor { snapshotter: self })
    }

    /// The pluggable serializer registry.
    pub fn serializers(&self) -> &SerializerRegistry {
        self.dispatcher.serializers()
    }

    /// The managed factory registry.
    pub fn managed_factories(&self) -> &Arc<ManagedFactoryRegistry> {
        &self.managed_factories
    }

    /// Hashes the loading context of a type, `None` meaning unknown.
    pub fn context_hash(&self, context: Option<&Arc<LoadingContext>>) -> Option<ContentHash> {
        self.context_hasher.hash(context.map(Arc::as_ref))
    }

    pub(crate) fn serializers_arc(&self) -> Arc<SerializerRegistry> {
        self.dispatcher.serializers_arc()
    }
}

impl Default for ValueSnapshotter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for ValueSnapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSnapshotter")
            .field("serializers", self.serializers())
            .field("managed_factories", &self.managed_factories)
            .finish_non_exhaustive()
    }
}

/// Collects collaborators for a [`ValueSnapshotter`].
///
/// Defaults: [`IdContextHasher`] and empty registries.
#[derive(Default)]
pub struct ValueSnapshotterBuilder {
    context_hasher: Option<Arc<dyn LoadingContextHasher>>,
    managed_factories: ManagedFactoryRegistry,
    serializers: SerializerRegistry,
}

impl ValueSnapshotterBuilder {
    /// Sets the loading context hasher.
    pub fn context_hasher(mut self, hasher: impl LoadingContextHasher + 'static) -> Self {
        self.context_hasher = Some(Arc::new(hasher));
        self
    }

    /// Sets the managed factory registry.
    pub fn managed_factories(mut self, factories: ManagedFactoryRegistry) -> Self {
        self.managed_factories = factories;
        self
    }

    /// Sets the pluggable serializer registry.
    pub fn serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    /// Freezes the collaborators into a snapshotter.
    pub fn build(self) -> ValueSnapshotter {
        ValueSnapshotter {
            dispatcher: ValueDispatcher::new(Arc::new(self.serializers)),
            context_hasher: self
                .context_hasher
                .unwrap_or_else(|| Arc::new(IdContextHasher::new())),
            managed_factories: Arc::new(self.managed_factories),
        }
    }
}

/// Binds dispatch outcomes to [`ValueSnapshot`] nodes.
struct SnapshotVisitor<'a> {
    snapshotter: &'a ValueSnapshotter,
}

impl ValueVisitor for SnapshotVisitor<'_> {
    type Output = ValueSnapshot;
    type Error = SnapshotError;

    fn null_value(&self) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::null())
    }

    fn string_value(&self, value: &str) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::string(value))
    }

    fn boolean_value(&self, value: bool) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::boolean(value))
    }

    fn empty_list(&self) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::list(Vec::new()))
    }

    fn list(&self, elements: Vec<ValueSnapshot>) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::list(elements))
    }

    fn enum_value(&self, value: &EnumValue) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::enum_value(
            value.enum_type.name(),
            value.member.as_str(),
        ))
    }

    fn type_reference(&self, type_ref: &TypeRef) -> Result<ValueSnapshot, SnapshotError> {
        let context_hash = self.snapshotter.context_hash(type_ref.context());
        Ok(ValueSnapshot::implementation(ImplementationSnapshot::of(
            type_ref.name(),
            context_hash,
            type_ref.is_synthetic(),
        )))
    }

    fn file_value(&self, path: &Path) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::file(path.to_string_lossy()))
    }

    fn integer_value(&self, value: i32) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::integer(value))
    }

    fn long_value(&self, value: i64) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::long(value))
    }

    fn short_value(&self, value: i16) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::short(value))
    }

    fn set(&self, elements: Vec<ValueSnapshot>) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::set(elements))
    }

    fn map(
        &self,
        entries: Vec<(ValueSnapshot, ValueSnapshot)>,
    ) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::map(entries))
    }

    fn properties(
        &self,
        entries: Vec<(ValueSnapshot, ValueSnapshot)>,
    ) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::map(entries))
    }

    fn empty_array(&self) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::array(Vec::new()))
    }

    fn array(&self, elements: Vec<ValueSnapshot>) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::array(elements))
    }

    fn attribute_value(&self, value: &AttributeDef) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::attribute(
            value.name.as_str(),
            value.value_type.name(),
            self.snapshotter.context_hash(value.value_type.context()),
        ))
    }

    fn managed_immutable(
        &self,
        managed: &Arc<dyn Managed>,
        state: &str,
    ) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::immutable_managed(
            managed.public_type().name(),
            state,
        ))
    }

    fn managed(
        &self,
        managed: &Arc<dyn Managed>,
        state: ValueSnapshot,
    ) -> Result<ValueSnapshot, SnapshotError> {
        Ok(ValueSnapshot::managed(managed.public_type().name(), state))
    }

    fn isolated_value(&self, value: &Isolatable) -> Result<ValueSnapshot, SnapshotError> {
        Ok(value.as_snapshot())
    }

    fn snapshot_value(&self, value: &ValueSnapshot) -> Result<ValueSnapshot, SnapshotError> {
        Ok(value.clone())
    }

    fn serialized(
        &self,
        object: &Arc<dyn ObjectValue>,
        bytes: Vec<u8>,
        _codec: SerializedCodec,
    ) -> Result<ValueSnapshot, SnapshotError> {
        let context_hash = self.snapshotter.context_hash(object.context());
        Ok(ValueSnapshot::serialized(context_hash, bytes))
    }
}

/// Binds dispatch outcomes to [`Isolatable`] nodes.
struct IsolateVisitor<'a> {
    snapshotter: &'a ValueSnapshotter,
}

impl IsolateVisitor<'_> {
    fn node(&self, node: IsolatedNode) -> Result<Isolatable, IsolationError> {
        Ok(Isolatable::from_node(node))
    }
}

impl ValueVisitor for IsolateVisitor<'_> {
    type Output = Isolatable;
    type Error = IsolationError;

    fn null_value(&self) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Null)
    }

    fn string_value(&self, value: &str) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::String(value.to_string()))
    }

    fn boolean_value(&self, value: bool) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Boolean(value))
    }

    fn empty_list(&self) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::List(Vec::new()))
    }

    fn list(&self, elements: Vec<Isolatable>) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::List(elements))
    }

    fn enum_value(&self, value: &EnumValue) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Enum(value.clone()))
    }

    fn type_reference(&self, type_ref: &TypeRef) -> Result<Isolatable, IsolationError> {
        Err(IsolationError::TypeReference {
            type_name: type_ref.name().to_string(),
        })
    }

    fn file_value(&self, path: &Path) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::File(path.to_path_buf()))
    }

    fn integer_value(&self, value: i32) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Integer(value))
    }

    fn long_value(&self, value: i64) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Long(value))
    }

    fn short_value(&self, value: i16) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Short(value))
    }

    fn set(&self, elements: Vec<Isolatable>) -> Result<Isolatable, IsolationError> {
        let mut seen = HashSet::with_capacity(elements.len());
        let distinct = elements
            .into_iter()
            .filter(|element| seen.insert(element.as_snapshot()))
            .collect();
        self.node(IsolatedNode::Set(distinct))
    }

    fn map(&self, entries: Vec<(Isolatable, Isolatable)>) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Map {
            flavor: MapFlavor::Map,
            entries,
        })
    }

    fn properties(
        &self,
        entries: Vec<(Isolatable, Isolatable)>,
    ) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Map {
            flavor: MapFlavor::Properties,
            entries,
        })
    }

    fn empty_array(&self) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Array(Vec::new()))
    }

    fn array(&self, elements: Vec<Isolatable>) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Array(elements))
    }

    fn attribute_value(&self, value: &AttributeDef) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::Attribute {
            definition: value.clone(),
            context_hash: self.snapshotter.context_hash(value.value_type.context()),
        })
    }

    fn managed_immutable(
        &self,
        managed: &Arc<dyn Managed>,
        state: &str,
    ) -> Result<Isolatable, IsolationError> {
        self.node(IsolatedNode::ImmutableManaged {
            value_type: managed.public_type().clone(),
            factory_id: managed.factory_id(),
            factories: Arc::clone(&self.snapshotter.managed_factories),
            state: state.to_string(),
            live: Some(Arc::clone(managed)),
        })
    }

    fn managed(
        &self,
        managed: &Arc<dyn Managed>,
        state: Isolatable,
    ) -> Result<Isolatable, IsolationError> {
        let factory_id = managed.factory_id();
        if self.snapshotter.managed_factories.lookup(factory_id).is_none() {
            return Err(IsolationError::UnknownFactory {
                factory_id,
                type_name: managed.public_type().name().to_string(),
            });
        }
        self.node(IsolatedNode::Managed {
            value_type: managed.public_type().clone(),
            factory_id,
            factories: Arc::clone(&self.snapshotter.managed_factories),
            state,
        })
    }

    fn isolated_value(&self, value: &Isolatable) -> Result<Isolatable, IsolationError> {
        Ok(value.clone())
    }

    fn snapshot_value(&self, _value: &ValueSnapshot) -> Result<Isolatable, IsolationError> {
        Err(IsolationError::NotIsolatable {
            kind: "value snapshot".to_string(),
        })
    }

    fn serialized(
        &self,
        object: &Arc<dyn ObjectValue>,
        bytes: Vec<u8>,
        codec: SerializedCodec,
    ) -> Result<Isolatable, IsolationError> {
        let original_type = match object.context() {
            Some(context) => TypeRef::in_context(object.type_name(), Arc::clone(context)),
            None => TypeRef::builtin(object.type_name()),
        };
        self.node(IsolatedNode::Serialized {
            original_type,
            codec,
            context_hash: self.snapshotter.context_hash(object.context()),
            bytes,
            serializers: self.snapshotter.serializers_arc(),
        })
    }
}
