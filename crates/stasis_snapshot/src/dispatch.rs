//! Value classification shared by the snapshot and isolation paths.
//!
//! [`ValueDispatcher::classify_and_visit`] is the single traversal entry
//! point. It classifies a value with a fixed, first-match-wins precedence,
//! recurses into substructure, and hands the pieces to a [`ValueVisitor`]
//! that builds one of the two result hierarchies.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::SnapshotError;
use crate::isolated::Isolatable;
use crate::managed::Managed;
use crate::serializer::{SerializedCodec, SerializerRegistry};
use crate::snapshot::ValueSnapshot;
use crate::value::{AttributeDef, EnumValue, MapFlavor, ObjectValue, TypeRef, Value};

/// Builds one result node per dispatch outcome.
///
/// Composite callbacks receive the already-visited children in order.
pub trait ValueVisitor {
    /// The node type produced.
    type Output;

    /// The failure type. Dispatcher-level failures are [`SnapshotError`]s.
    type Error: From<SnapshotError>;

    /// Absence of a value.
    fn null_value(&self) -> Result<Self::Output, Self::Error>;

    /// A string.
    fn string_value(&self, value: &str) -> Result<Self::Output, Self::Error>;

    /// A boolean.
    fn boolean_value(&self, value: bool) -> Result<Self::Output, Self::Error>;

    /// A list with no elements.
    fn empty_list(&self) -> Result<Self::Output, Self::Error>;

    /// A non-empty list.
    fn list(&self, elements: Vec<Self::Output>) -> Result<Self::Output, Self::Error>;

    /// An enum member.
    fn enum_value(&self, value: &EnumValue) -> Result<Self::Output, Self::Error>;

    /// A bare type reference.
    fn type_reference(&self, type_ref: &TypeRef) -> Result<Self::Output, Self::Error>;

    /// A filesystem path.
    fn file_value(&self, path: &Path) -> Result<Self::Output, Self::Error>;

    /// A 32-bit integer.
    fn integer_value(&self, value: i32) -> Result<Self::Output, Self::Error>;

    /// A 64-bit integer.
    fn long_value(&self, value: i64) -> Result<Self::Output, Self::Error>;

    /// A 16-bit integer.
    fn short_value(&self, value: i16) -> Result<Self::Output, Self::Error>;

    /// A set, possibly empty, possibly holding duplicates.
    fn set(&self, elements: Vec<Self::Output>) -> Result<Self::Output, Self::Error>;

    /// A plain map.
    fn map(&self, entries: Vec<(Self::Output, Self::Output)>) -> Result<Self::Output, Self::Error>;

    /// A properties-flavored map.
    fn properties(
        &self,
        entries: Vec<(Self::Output, Self::Output)>,
    ) -> Result<Self::Output, Self::Error>;

    /// An array with no elements.
    fn empty_array(&self) -> Result<Self::Output, Self::Error>;

    /// A non-empty array.
    fn array(&self, elements: Vec<Self::Output>) -> Result<Self::Output, Self::Error>;

    /// An attribute definition.
    fn attribute_value(&self, value: &AttributeDef) -> Result<Self::Output, Self::Error>;

    /// An immutable managed value and its packed state.
    fn managed_immutable(
        &self,
        managed: &Arc<dyn Managed>,
        state: &str,
    ) -> Result<Self::Output, Self::Error>;

    /// A mutable managed value and its visited state.
    fn managed(
        &self,
        managed: &Arc<dyn Managed>,
        state: Self::Output,
    ) -> Result<Self::Output, Self::Error>;

    /// A value that was already isolated.
    fn isolated_value(&self, value: &Isolatable) -> Result<Self::Output, Self::Error>;

    /// A value that was already snapshotted.
    fn snapshot_value(&self, value: &ValueSnapshot) -> Result<Self::Output, Self::Error>;

    /// An object captured as serialized bytes.
    fn serialized(
        &self,
        object: &Arc<dyn ObjectValue>,
        bytes: Vec<u8>,
        codec: SerializedCodec,
    ) -> Result<Self::Output, Self::Error>;
}

/// Classifies values and drives a [`ValueVisitor`] over them.
///
/// Holds only its read-only serializer registry, so one dispatcher can be
/// shared across threads.
#[derive(Debug, Clone, Default)]
pub struct ValueDispatcher {
    serializers: Arc<SerializerRegistry>,
}

impl ValueDispatcher {
    /// Creates a dispatcher that consults `serializers` for object values.
    pub fn new(serializers: Arc<SerializerRegistry>) -> Self {
        Self { serializers }
    }

    /// The pluggable serializer registry.
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    pub(crate) fn serializers_arc(&self) -> Arc<SerializerRegistry> {
        Arc::clone(&self.serializers)
    }

    /// Classifies `value` and invokes the matching `visitor` callback.
    ///
    /// Precedence, first match wins: null, string, boolean, list, enum,
    /// type reference, file, integer, long, short, set, map/properties,
    /// array, attribute, managed, already isolated/snapshotted, registered
    /// serializer, generic serialization.
    pub fn classify_and_visit<V>(&self, value: &Value, visitor: &V) -> Result<V::Output, V::Error>
    where
        V: ValueVisitor + ?Sized,
    {
        match value {
            Value::Null => visitor.null_value(),
            Value::String(s) => visitor.string_value(s),
            Value::Boolean(b) => visitor.boolean_value(*b),
            Value::List(items) if items.is_empty() => visitor.empty_list(),
            Value::List(items) => {
                let elements = self.visit_all(items, visitor)?;
                visitor.list(elements)
            }
            Value::Enum(e) => visitor.enum_value(e),
            Value::Type(t) => visitor.type_reference(t),
            Value::File(path) => visitor.file_value(path),
            Value::Integer(n) => visitor.integer_value(*n),
            Value::Long(n) => visitor.long_value(*n),
            Value::Short(n) => visitor.short_value(*n),
            Value::Set(items) => {
                let elements = self.visit_all(items, visitor)?;
                visitor.set(elements)
            }
            Value::Map(map) => {
                let mut entries = Vec::with_capacity(map.entries.len());
                for (key, value) in &map.entries {
                    let key = self.classify_and_visit(key, visitor)?;
                    let value = self.classify_and_visit(value, visitor)?;
                    entries.push((key, value));
                }
                match map.flavor {
                    MapFlavor::Map => visitor.map(entries),
                    MapFlavor::Properties => visitor.properties(entries),
                }
            }
            Value::Array(items) if items.is_empty() => visitor.empty_array(),
            Value::Array(items) => {
                let elements = self.visit_all(items, visitor)?;
                visitor.array(elements)
            }
            Value::Attribute(def) => visitor.attribute_value(def),
            Value::Managed(managed) => self.visit_managed(managed, visitor),
            Value::Isolated(isolated) => visitor.isolated_value(isolated),
            Value::Snapshot(snapshot) => visitor.snapshot_value(snapshot),
            Value::Object(object) => self.visit_object(object, visitor),
        }
    }

    fn visit_all<V>(&self, items: &[Value], visitor: &V) -> Result<Vec<V::Output>, V::Error>
    where
        V: ValueVisitor + ?Sized,
    {
        items
            .iter()
            .map(|item| self.classify_and_visit(item, visitor))
            .collect()
    }

    fn visit_managed<V>(&self, managed: &Arc<dyn Managed>, visitor: &V) -> Result<V::Output, V::Error>
    where
        V: ValueVisitor + ?Sized,
    {
        let state = managed.unpack_state();
        if managed.is_immutable() {
            match state {
                Value::String(state) => visitor.managed_immutable(managed, &state),
                _ => Err(SnapshotError::ImmutableState {
                    type_name: managed.public_type().name().to_string(),
                }
                .into()),
            }
        } else {
            let state = self.classify_and_visit(&state, visitor)?;
            visitor.managed(managed, state)
        }
    }

    fn visit_object<V>(&self, object: &Arc<dyn ObjectValue>, visitor: &V) -> Result<V::Output, V::Error>
    where
        V: ValueVisitor + ?Sized,
    {
        let type_name = object.type_name();
        let (bytes, codec) = if self.serializers.can_serialize(type_name) {
            debug!(type_name, "serializing value with registered serializer");
            let bytes = self.serializers.encode(object.as_ref());
            (bytes, SerializedCodec::Registered)
        } else {
            debug!(type_name, "falling back to generic serialization");
            (object.to_bytes(), SerializedCodec::Generic)
        };
        let bytes = bytes.map_err(|source| SnapshotError::Serialization {
            type_name: type_name.to_string(),
            source,
        })?;
        visitor.serialized(object, bytes, codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::value::builtin;
    use std::any::Any;

    /// Renders the dispatch outcome as text to observe classification.
    struct Describe;

    impl ValueVisitor for Describe {
        type Output = String;
        type Error = SnapshotError;

        fn null_value(&self) -> Result<String, SnapshotError> {
            Ok("null".into())
        }
        fn string_value(&self, value: &str) -> Result<String, SnapshotError> {
            Ok(format!("string({value})"))
        }
        fn boolean_value(&self, value: bool) -> Result<String, SnapshotError> {
            Ok(format!("bool({value})"))
        }
        fn empty_list(&self) -> Result<String, SnapshotError> {
            Ok("list[]".into())
        }
        fn list(&self, elements: Vec<String>) -> Result<String, SnapshotError> {
            Ok(format!("list[{}]", elements.join(",")))
        }
        fn enum_value(&self, value: &EnumValue) -> Result<String, SnapshotError> {
            Ok(format!("enum({}.{})", value.enum_type.name(), value.member))
        }
        fn type_reference(&self, type_ref: &TypeRef) -> Result<String, SnapshotError> {
            Ok(format!("type({})", type_ref.name()))
        }
        fn file_value(&self, path: &Path) -> Result<String, SnapshotError> {
            Ok(format!("file({})", path.display()))
        }
        fn integer_value(&self, value: i32) -> Result<String, SnapshotError> {
            Ok(format!("int({value})"))
        }
        fn long_value(&self, value: i64) -> Result<String, SnapshotError> {
            Ok(format!("long({value})"))
        }
        fn short_value(&self, value: i16) -> Result<String, SnapshotError> {
            Ok(format!("short({value})"))
        }
        fn set(&self, elements: Vec<String>) -> Result<String, SnapshotError> {
            Ok(format!("set{{{}}}", elements.join(",")))
        }
        fn map(&self, entries: Vec<(String, String)>) -> Result<String, SnapshotError> {
            let parts: Vec<String> = entries.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
            Ok(format!("map{{{}}}", parts.join(",")))
        }
        fn properties(&self, entries: Vec<(String, String)>) -> Result<String, SnapshotError> {
            Ok(format!("props({})", entries.len()))
        }
        fn empty_array(&self) -> Result<String, SnapshotError> {
            Ok("array[]".into())
        }
        fn array(&self, elements: Vec<String>) -> Result<String, SnapshotError> {
            Ok(format!("array[{}]", elements.join(",")))
        }
        fn attribute_value(&self, value: &AttributeDef) -> Result<String, SnapshotError> {
            Ok(format!("attr({})", value.name))
        }
        fn managed_immutable(
            &self,
            managed: &Arc<dyn Managed>,
            state: &str,
        ) -> Result<String, SnapshotError> {
            Ok(format!("immutable({}:{state})", managed.public_type().name()))
        }
        fn managed(&self, managed: &Arc<dyn Managed>, state: String) -> Result<String, SnapshotError> {
            Ok(format!("managed({}:{state})", managed.public_type().name()))
        }
        fn isolated_value(&self, _value: &Isolatable) -> Result<String, SnapshotError> {
            Ok("isolated".into())
        }
        fn snapshot_value(&self, _value: &ValueSnapshot) -> Result<String, SnapshotError> {
            Ok("snapshot".into())
        }
        fn serialized(
            &self,
            object: &Arc<dyn ObjectValue>,
            bytes: Vec<u8>,
            codec: SerializedCodec,
        ) -> Result<String, SnapshotError> {
            Ok(format!("{codec:?}({}:{})", object.type_name(), bytes.len()))
        }
    }

    #[derive(Debug)]
    struct Version {
        public_type: TypeRef,
        state: Value,
        immutable: bool,
    }

    impl Managed for Version {
        fn public_type(&self) -> &TypeRef {
            &self.public_type
        }
        fn factory_id(&self) -> u32 {
            1
        }
        fn is_immutable(&self) -> bool {
            self.immutable
        }
        fn unpack_state(&self) -> Value {
            self.state.clone()
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl ObjectValue for Broken {
        fn type_name(&self) -> &str {
            "app::Broken"
        }
        fn context(&self) -> Option<&Arc<crate::context::LoadingContext>> {
            None
        }
        fn to_bytes(&self) -> Result<Vec<u8>, BoxError> {
            Err("socket handles are not serializable".into())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn dyn_eq(&self, _other: &dyn ObjectValue) -> bool {
            false
        }
    }

    fn describe(value: &Value) -> Result<String, SnapshotError> {
        ValueDispatcher::default().classify_and_visit(value, &Describe)
    }

    #[test]
    fn scalars_classified() {
        assert_eq!(describe(&Value::Null).unwrap(), "null");
        assert_eq!(describe(&Value::from("a")).unwrap(), "string(a)");
        assert_eq!(describe(&Value::from(true)).unwrap(), "bool(true)");
        assert_eq!(describe(&Value::from(1i32)).unwrap(), "int(1)");
        assert_eq!(describe(&Value::from(1i64)).unwrap(), "long(1)");
        assert_eq!(describe(&Value::from(1i16)).unwrap(), "short(1)");
    }

    #[test]
    fn empty_list_and_array_are_distinguished() {
        assert_eq!(describe(&Value::List(vec![])).unwrap(), "list[]");
        assert_eq!(describe(&Value::Array(vec![])).unwrap(), "array[]");
        assert_eq!(describe(&Value::Set(vec![])).unwrap(), "set{}");
    }

    #[test]
    fn composites_recurse_in_order() {
        let value = Value::list([
            Value::from("a"),
            Value::set([1, 2]),
            Value::map([("k", Value::array([3i64]))]),
        ]);
        assert_eq!(
            describe(&value).unwrap(),
            "list[string(a),set{int(1),int(2)},map{string(k)=array[long(3)]}]"
        );
    }

    #[test]
    fn properties_flavor_tagged() {
        let value = Value::properties([("a", "1"), ("b", "2")]);
        assert_eq!(describe(&value).unwrap(), "props(2)");
    }

    #[test]
    fn managed_values() {
        let mutable = Value::managed(Version {
            public_type: TypeRef::builtin("app::Prop"),
            state: Value::list(["x"]),
            immutable: false,
        });
        assert_eq!(
            describe(&mutable).unwrap(),
            "managed(app::Prop:list[string(x)])"
        );

        let immutable = Value::managed(Version {
            public_type: TypeRef::builtin("app::Version"),
            state: Value::from("1.2"),
            immutable: true,
        });
        assert_eq!(describe(&immutable).unwrap(), "immutable(app::Version:1.2)");
    }

    #[test]
    fn immutable_managed_with_structured_state_fails() {
        let value = Value::managed(Version {
            public_type: TypeRef::builtin("app::Version"),
            state: Value::from(12),
            immutable: true,
        });
        let err = describe(&value).unwrap_err();
        assert!(matches!(err, SnapshotError::ImmutableState { .. }));
    }

    #[test]
    fn other_leaves() {
        let enum_type = TypeRef::builtin("app::Mode");
        assert_eq!(
            describe(&EnumValue::new(enum_type, "Fast").into()).unwrap(),
            "enum(app::Mode.Fast)"
        );
        assert_eq!(
            describe(&TypeRef::builtin("app::Task").into()).unwrap(),
            "type(app::Task)"
        );
        assert_eq!(
            describe(&Value::file("/tmp/out")).unwrap(),
            "file(/tmp/out)"
        );
        let attr = AttributeDef::new("usage", TypeRef::builtin(builtin::STRING));
        assert_eq!(describe(&attr.into()).unwrap(), "attr(usage)");
    }

    #[test]
    fn objects_use_generic_serialization() {
        let value = Value::object(crate::value::SerdeObject::new("app::Cfg", None, 9u8));
        assert_eq!(describe(&value).unwrap(), "Generic(app::Cfg:1)");
    }

    #[test]
    fn serialization_failure_names_type() {
        let err = describe(&Value::object(Broken)).unwrap_err();
        match err {
            SnapshotError::Serialization { type_name, source } => {
                assert_eq!(type_name, "app::Broken");
                assert!(source.to_string().contains("socket"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failure_in_nested_child_propagates() {
        let value = Value::list([Value::from(1), Value::object(Broken)]);
        assert!(describe(&value).is_err());
    }
}
