//! The dynamic value model that snapshots and isolatables are taken from.
//!
//! [`Value`] covers every shape the dispatcher knows how to classify. User
//! types enter through [`ObjectValue`] (usually [`SerdeObject`]) or
//! [`Managed`](crate::managed::Managed).

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::context::LoadingContext;
use crate::error::BoxError;
use crate::isolated::Isolatable;
use crate::managed::Managed;
use crate::snapshot::ValueSnapshot;

/// Type names reported for builtin value kinds.
pub mod builtin {
    /// Strings.
    pub const STRING: &str = "String";
    /// Booleans.
    pub const BOOLEAN: &str = "bool";
    /// 32-bit integers.
    pub const INTEGER: &str = "i32";
    /// 64-bit integers.
    pub const LONG: &str = "i64";
    /// 16-bit integers.
    pub const SHORT: &str = "i16";
    /// File paths.
    pub const FILE: &str = "PathBuf";
    /// Ordered lists.
    pub const LIST: &str = "List";
    /// Sets.
    pub const SET: &str = "Set";
    /// Plain maps.
    pub const MAP: &str = "Map";
    /// Properties-flavored maps.
    pub const PROPERTIES: &str = "Properties";
    /// Arrays.
    pub const ARRAY: &str = "Array";
    /// Attribute definitions.
    pub const ATTRIBUTE: &str = "Attribute";
    /// Bare type references.
    pub const TYPE: &str = "Type";
    /// The absent value.
    pub const NULL: &str = "Null";
}

/// A reference to a type, as loaded by an optional [`LoadingContext`].
///
/// Used both as a value (a bare type reference, snapshotted as an
/// implementation identity) and as the target shape for coercion.
#[derive(Clone)]
pub struct TypeRef {
    name: String,
    context: Option<Arc<LoadingContext>>,
    synthetic: bool,
}

impl TypeRef {
    /// A builtin type with no loading context.
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: None,
            synthetic: false,
        }
    }

    /// A type loaded by `context`.
    pub fn in_context(name: impl Into<String>, context: Arc<LoadingContext>) -> Self {
        Self {
            name: name.into(),
            context: Some(context),
            synthetic: false,
        }
    }

    /// A synthetic (lambda or anonymous) implementation type.
    pub fn lambda(name: impl Into<String>, context: Option<Arc<LoadingContext>>) -> Self {
        Self {
            name: name.into(),
            context,
            synthetic: true,
        }
    }

    /// The fully qualified type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context that loaded this type, if any.
    pub fn context(&self) -> Option<&Arc<LoadingContext>> {
        self.context.as_ref()
    }

    /// Returns `true` for lambda or anonymous implementation types.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Returns `true` if a value of type `type_name` loaded by `context` can
    /// be used where this type is expected.
    pub fn accepts(&self, type_name: &str, context: Option<&Arc<LoadingContext>>) -> bool {
        self.name == type_name && LoadingContext::same(self.context.as_ref(), context)
    }

    /// Returns `true` if `value` is already of this type.
    pub fn is_assignable_from(&self, value: &Value) -> bool {
        self.accepts(value.type_name(), value.context())
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.synthetic == other.synthetic
            && LoadingContext::same(self.context.as_ref(), other.context.as_ref())
    }
}

impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({}", self.name)?;
        if let Some(context) = &self.context {
            write!(f, " @ {}", context.id())?;
        }
        if self.synthetic {
            write!(f, ", synthetic")?;
        }
        write!(f, ")")
    }
}

/// One member of an enumerated type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// The enumerated type.
    pub enum_type: TypeRef,
    /// The member name.
    pub member: String,
}

impl EnumValue {
    /// Creates an enum member value.
    pub fn new(enum_type: TypeRef, member: impl Into<String>) -> Self {
        Self {
            enum_type,
            member: member.into(),
        }
    }
}

/// A named, typed classification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    /// The attribute name.
    pub name: String,
    /// The type of values the attribute holds.
    pub value_type: TypeRef,
}

impl AttributeDef {
    /// Creates an attribute definition.
    pub fn new(name: impl Into<String>, value_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Which map container a map value came from.
///
/// Only affects reconstruction: both flavors snapshot identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapFlavor {
    /// A general map.
    Map,
    /// A string-keyed properties map.
    Properties,
}

/// An ordered sequence of key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    /// The container flavor.
    pub flavor: MapFlavor,
    /// Entries in iteration order.
    pub entries: Vec<(Value, Value)>,
}

/// A user object with no structural handling.
///
/// Objects are snapshotted either by a serializer registered for their exact
/// type name or by their own generic serialization ([`ObjectValue::to_bytes`]).
pub trait ObjectValue: fmt::Debug + Send + Sync + 'static {
    /// The exact type name of the object.
    fn type_name(&self) -> &str;

    /// The context that loaded the object's type, if any.
    fn context(&self) -> Option<&Arc<LoadingContext>>;

    /// Serializes the object's full state.
    fn to_bytes(&self) -> Result<Vec<u8>, BoxError>;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Native equality against another object.
    fn dyn_eq(&self, other: &dyn ObjectValue) -> bool;
}

/// An [`ObjectValue`] for any `serde` type, serialized with `bincode`.
pub struct SerdeObject<T> {
    type_name: String,
    context: Option<Arc<LoadingContext>>,
    value: T,
}

impl<T> SerdeObject<T> {
    /// Wraps `value` as an object of `type_name`.
    pub fn new(
        type_name: impl Into<String>,
        context: Option<Arc<LoadingContext>>,
        value: T,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            context,
            value,
        }
    }

    /// Returns the wrapped value.
    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for SerdeObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeObject")
            .field("type_name", &self.type_name)
            .field("context", &self.context.as_ref().map(|c| c.id()))
            .field("value", &self.value)
            .finish()
    }
}

impl<T> ObjectValue for SerdeObject<T>
where
    T: Serialize + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn context(&self) -> Option<&Arc<LoadingContext>> {
        self.context.as_ref()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, BoxError> {
        Ok(bincode::serde::encode_to_vec(
            &self.value,
            bincode::config::standard(),
        )?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ObjectValue) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|other| {
            other.type_name == self.type_name
                && LoadingContext::same(other.context.as_ref(), self.context.as_ref())
                && other.value == self.value
        })
    }
}

/// A live value presented for snapshotting or isolation.
///
/// Variants are listed in the dispatcher's classification order.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A string.
    String(String),
    /// A boolean.
    Boolean(bool),
    /// An ordered list.
    List(Vec<Value>),
    /// A member of an enumerated type.
    Enum(EnumValue),
    /// A bare reference to a type.
    Type(TypeRef),
    /// A filesystem path.
    File(PathBuf),
    /// A 32-bit integer.
    Integer(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A 16-bit integer.
    Short(i16),
    /// An unordered collection. Duplicates are dropped when captured.
    Set(Vec<Value>),
    /// A map or properties container.
    Map(MapValue),
    /// A fixed-size array.
    Array(Vec<Value>),
    /// An attribute definition.
    Attribute(AttributeDef),
    /// A factory-backed managed value.
    Managed(Arc<dyn Managed>),
    /// A value that was already isolated.
    Isolated(Isolatable),
    /// A value that was already snapshotted.
    Snapshot(ValueSnapshot),
    /// Any other object.
    Object(Arc<dyn ObjectValue>),
}

impl Value {
    /// Builds a list value.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a set value.
    pub fn set<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    /// Builds an array value.
    pub fn array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Builds a plain map value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::map_with_flavor(MapFlavor::Map, entries)
    }

    /// Builds a properties-flavored map value.
    pub fn properties<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::map_with_flavor(MapFlavor::Properties, entries)
    }

    fn map_with_flavor<I, K, V>(flavor: MapFlavor, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(MapValue {
            flavor,
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Builds a file value.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Value::File(path.as_ref().to_path_buf())
    }

    /// Wraps a user object.
    pub fn object(object: impl ObjectValue) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Wraps a managed value.
    pub fn managed(managed: impl Managed) -> Self {
        Value::Managed(Arc::new(managed))
    }

    /// The name of the value's type, used for assignability checks.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => builtin::NULL,
            Value::String(_) => builtin::STRING,
            Value::Boolean(_) => builtin::BOOLEAN,
            Value::List(_) => builtin::LIST,
            Value::Enum(e) => e.enum_type.name(),
            Value::Type(_) => builtin::TYPE,
            Value::File(_) => builtin::FILE,
            Value::Integer(_) => builtin::INTEGER,
            Value::Long(_) => builtin::LONG,
            Value::Short(_) => builtin::SHORT,
            Value::Set(_) => builtin::SET,
            Value::Map(m) => match m.flavor {
                MapFlavor::Map => builtin::MAP,
                MapFlavor::Properties => builtin::PROPERTIES,
            },
            Value::Array(_) => builtin::ARRAY,
            Value::Attribute(_) => builtin::ATTRIBUTE,
            Value::Managed(m) => m.public_type().name(),
            Value::Isolated(_) => "Isolatable",
            Value::Snapshot(_) => "ValueSnapshot",
            Value::Object(o) => o.type_name(),
        }
    }

    /// The loading context of the value's type, if it has one.
    pub fn context(&self) -> Option<&Arc<LoadingContext>> {
        match self {
            Value::Enum(e) => e.enum_type.context(),
            Value::Managed(m) => m.public_type().context(),
            Value::Object(o) => o.context(),
            _ => None,
        }
    }

    /// A short description of the value's kind for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::List(_) => "list",
            Value::Enum(_) => "enum",
            Value::Type(_) => "type reference",
            Value::File(_) => "file",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Short(_) => "short",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Attribute(_) => "attribute",
            Value::Managed(_) => "managed value",
            Value::Isolated(_) => "isolated value",
            Value::Snapshot(_) => "value snapshot",
            Value::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::File(a), Value::File(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Attribute(a), Value::Attribute(b)) => a == b,
            (Value::Managed(a), Value::Managed(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.factory_id() == b.factory_id()
                        && a.public_type() == b.public_type()
                        && a.unpack_state() == b.unpack_state())
            }
            (Value::Isolated(a), Value::Isolated(b)) => a == b,
            (Value::Snapshot(a), Value::Snapshot(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.dyn_eq(b.as_ref()),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Short(value)
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::File(value)
    }
}

impl From<TypeRef> for Value {
    fn from(value: TypeRef) -> Self {
        Value::Type(value)
    }
}

impl From<EnumValue> for Value {
    fn from(value: EnumValue) -> Self {
        Value::Enum(value)
    }
}

impl From<AttributeDef> for Value {
    fn from(value: AttributeDef) -> Self {
        Value::Attribute(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::list(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
