//! The content-only snapshot hierarchy.
//!
//! A [`ValueSnapshot`] is a cheap, shareable handle to an immutable
//! [`SnapshotNode`] tree. Equality and hashing are structural; handle
//! identity ([`ValueSnapshot::same_instance`]) is only used by the
//! re-snapshot fast path to report "nothing changed".

mod implementation;
mod resnapshot;

use std::collections::HashSet;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher as StdHasher};
use std::sync::{Arc, LazyLock};

use stasis_common::{ContentHash, ContentHasher, Hasher};

pub use implementation::{ImplementationSnapshot, UnknownReason};
pub use resnapshot::{SequenceBuilder, SequenceKind};

static NULL: LazyLock<ValueSnapshot> = LazyLock::new(|| ValueSnapshot::from_node(SnapshotNode::Null));
static TRUE: LazyLock<ValueSnapshot> =
    LazyLock::new(|| ValueSnapshot::from_node(SnapshotNode::Boolean(true)));
static FALSE: LazyLock<ValueSnapshot> =
    LazyLock::new(|| ValueSnapshot::from_node(SnapshotNode::Boolean(false)));
static EMPTY_LIST: LazyLock<ValueSnapshot> =
    LazyLock::new(|| ValueSnapshot::from_node(SnapshotNode::List(Vec::new())));
static EMPTY_ARRAY: LazyLock<ValueSnapshot> =
    LazyLock::new(|| ValueSnapshot::from_node(SnapshotNode::Array(Vec::new())));

/// One node of a snapshot tree.
#[derive(Debug)]
pub enum SnapshotNode {
    /// Absence of a value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A string.
    String(String),
    /// A 32-bit integer.
    Integer(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A 16-bit integer.
    Short(i16),
    /// A filesystem path, as a string.
    File(String),
    /// An enum member.
    Enum {
        /// The enumerated type's name.
        type_name: String,
        /// The member name.
        member: String,
    },
    /// An attribute definition.
    Attribute {
        /// The attribute name.
        name: String,
        /// Name of the attribute's value type.
        type_name: String,
        /// Hash of the value type's loading context, if obtainable.
        context_hash: Option<ContentHash>,
    },
    /// An ordered array.
    Array(Vec<ValueSnapshot>),
    /// An ordered list.
    List(Vec<ValueSnapshot>),
    /// A set of distinct elements in first-insertion order.
    Set(Vec<ValueSnapshot>),
    /// Distinct map or properties entries in first-insertion order.
    Map(Vec<(ValueSnapshot, ValueSnapshot)>),
    /// A mutable managed value and its unpacked state.
    Managed {
        /// Public type name of the managed value.
        type_name: String,
        /// The state snapshot.
        state: ValueSnapshot,
    },
    /// An immutable managed value and its packed state.
    ImmutableManaged {
        /// Public type name of the managed value.
        type_name: String,
        /// The opaque packed state.
        state: String,
    },
    /// Implementation identity of a type reference.
    Implementation(ImplementationSnapshot),
    /// An object captured as serialized bytes.
    Serialized {
        /// Hash of the object's loading context, if obtainable.
        context_hash: Option<ContentHash>,
        /// The serialized state.
        bytes: Vec<u8>,
    },
}

impl SnapshotNode {
    /// Stable discriminator that starts every hash contribution.
    fn discriminator(&self) -> &'static str {
        match self {
            SnapshotNode::Null => "null",
            SnapshotNode::Boolean(_) => "boolean",
            SnapshotNode::String(_) => "string",
            SnapshotNode::Integer(_) => "integer",
            SnapshotNode::Long(_) => "long",
            SnapshotNode::Short(_) => "short",
            SnapshotNode::File(_) => "file",
            SnapshotNode::Enum { .. } => "enum",
            SnapshotNode::Attribute { .. } => "attribute",
            SnapshotNode::Array(_) => "array",
            SnapshotNode::List(_) => "list",
            SnapshotNode::Set(_) => "set",
            SnapshotNode::Map(_) => "map",
            SnapshotNode::Managed { .. } => "managed",
            SnapshotNode::ImmutableManaged { .. } => "immutable-managed",
            SnapshotNode::Implementation(_) => "implementation",
            SnapshotNode::Serialized { .. } => "serialized",
        }
    }
}

impl PartialEq for SnapshotNode {
    fn eq(&self, other: &Self) -> bool {
        use SnapshotNode::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (File(a), File(b)) => a == b,
            (
                Enum {
                    type_name: ta,
                    member: ma,
                },
                Enum {
                    type_name: tb,
                    member: mb,
                },
            ) => ta == tb && ma == mb,
            (
                Attribute {
                    name: na,
                    type_name: ta,
                    context_hash: ha,
                },
                Attribute {
                    name: nb,
                    type_name: tb,
                    context_hash: hb,
                },
            ) => na == nb && ta == tb && ha == hb,
            (Array(a), Array(b)) | (List(a), List(b)) => a == b,
            (Set(a), Set(b)) => {
                let b: HashSet<&ValueSnapshot> = b.iter().collect();
                a.len() == b.len() && a.iter().all(|element| b.contains(element))
            }
            (Map(a), Map(b)) => {
                let b: HashSet<(&ValueSnapshot, &ValueSnapshot)> =
                    b.iter().map(|(k, v)| (k, v)).collect();
                a.len() == b.len() && a.iter().all(|(k, v)| b.contains(&(k, v)))
            }
            (
                Managed {
                    type_name: ta,
                    state: sa,
                },
                Managed {
                    type_name: tb,
                    state: sb,
                },
            ) => ta == tb && sa == sb,
            (
                ImmutableManaged {
                    type_name: ta,
                    state: sa,
                },
                ImmutableManaged {
                    type_name: tb,
                    state: sb,
                },
            ) => ta == tb && sa == sb,
            (Implementation(a), Implementation(b)) => a == b,
            (
                Serialized {
                    context_hash: ha,
                    bytes: ba,
                },
                Serialized {
                    context_hash: hb,
                    bytes: bb,
                },
            ) => ha == hb && ba == bb,
            _ => false,
        }
    }
}

impl Eq for SnapshotNode {}

impl Hash for SnapshotNode {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.discriminator().hash(state);
        match self {
            SnapshotNode::Null => {}
            SnapshotNode::Boolean(b) => b.hash(state),
            SnapshotNode::String(s) | SnapshotNode::File(s) => s.hash(state),
            SnapshotNode::Integer(n) => n.hash(state),
            SnapshotNode::Long(n) => n.hash(state),
            SnapshotNode::Short(n) => n.hash(state),
            SnapshotNode::Enum { type_name, member } => {
                type_name.hash(state);
                member.hash(state);
            }
            SnapshotNode::Attribute {
                name,
                type_name,
                context_hash,
            } => {
                name.hash(state);
                type_name.hash(state);
                context_hash.hash(state);
            }
            SnapshotNode::Array(elements) | SnapshotNode::List(elements) => elements.hash(state),
            // Unordered: combine per-element hashes commutatively.
            SnapshotNode::Set(elements) => unordered_hash(elements.iter()).hash(state),
            SnapshotNode::Map(entries) => {
                unordered_hash(entries.iter().map(|(k, v)| (k, v))).hash(state)
            }
            SnapshotNode::Managed {
                type_name,
                state: inner,
            } => {
                type_name.hash(state);
                inner.hash(state);
            }
            SnapshotNode::ImmutableManaged {
                type_name,
                state: inner,
            } => {
                type_name.hash(state);
                inner.hash(state);
            }
            SnapshotNode::Implementation(implementation) => implementation.hash(state),
            SnapshotNode::Serialized {
                context_hash,
                bytes,
            } => {
                context_hash.hash(state);
                bytes.hash(state);
            }
        }
    }
}

fn unordered_hash<T: Hash>(items: impl Iterator<Item = T>) -> u64 {
    items
        .map(|item| {
            let mut hasher = DefaultHasher::new();
            item.hash(&mut hasher);
            hasher.finish()
        })
        .fold(0u64, u64::wrapping_add)
}

/// An immutable snapshot of a value's content.
///
/// Cloning copies the handle, not the tree.
#[derive(Clone)]
pub struct ValueSnapshot(Arc<SnapshotNode>);

impl ValueSnapshot {
    fn from_node(node: SnapshotNode) -> Self {
        ValueSnapshot(Arc::new(node))
    }

    /// The null singleton.
    pub fn null() -> Self {
        NULL.clone()
    }

    /// One of the two boolean singletons.
    pub fn boolean(value: bool) -> Self {
        if value {
            TRUE.clone()
        } else {
            FALSE.clone()
        }
    }

    /// A string snapshot.
    pub fn string(value: impl Into<String>) -> Self {
        Self::from_node(SnapshotNode::String(value.into()))
    }

    /// A 32-bit integer snapshot.
    pub fn integer(value: i32) -> Self {
        Self::from_node(SnapshotNode::Integer(value))
    }

    /// A 64-bit integer snapshot.
    pub fn long(value: i64) -> Self {
        Self::from_node(SnapshotNode::Long(value))
    }

    /// A 16-bit integer snapshot.
    pub fn short(value: i16) -> Self {
        Self::from_node(SnapshotNode::Short(value))
    }

    /// A file snapshot of `path`.
    pub fn file(path: impl Into<String>) -> Self {
        Self::from_node(SnapshotNode::File(path.into()))
    }

    /// An enum member snapshot.
    pub fn enum_value(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Self::from_node(SnapshotNode::Enum {
            type_name: type_name.into(),
            member: member.into(),
        })
    }

    /// An attribute definition snapshot.
    pub fn attribute(
        name: impl Into<String>,
        type_name: impl Into<String>,
        context_hash: Option<ContentHash>,
    ) -> Self {
        Self::from_node(SnapshotNode::Attribute {
            name: name.into(),
            type_name: type_name.into(),
            context_hash,
        })
    }

    /// An array snapshot. Empty arrays share one instance.
    pub fn array(elements: Vec<ValueSnapshot>) -> Self {
        if elements.is_empty() {
            EMPTY_ARRAY.clone()
        } else {
            Self::from_node(SnapshotNode::Array(elements))
        }
    }

    /// A list snapshot. Empty lists share one instance.
    pub fn list(elements: Vec<ValueSnapshot>) -> Self {
        if elements.is_empty() {
            EMPTY_LIST.clone()
        } else {
            Self::from_node(SnapshotNode::List(elements))
        }
    }

    /// A set snapshot. Later duplicates are dropped, keeping first-insertion
    /// order.
    pub fn set(elements: Vec<ValueSnapshot>) -> Self {
        let mut seen = HashSet::with_capacity(elements.len());
        let mut distinct = Vec::with_capacity(elements.len());
        for element in elements {
            if seen.insert(element.clone()) {
                distinct.push(element);
            }
        }
        Self::from_node(SnapshotNode::Set(distinct))
    }

    /// A map snapshot. Properties-flavored maps snapshot the same way.
    ///
    /// Repeated key/value pairs are dropped, keeping the first occurrence,
    /// so the entries form a set of pairs.
    pub fn map(entries: Vec<(ValueSnapshot, ValueSnapshot)>) -> Self {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut distinct = Vec::with_capacity(entries.len());
        for entry in entries {
            if seen.insert(entry.clone()) {
                distinct.push(entry);
            }
        }
        Self::from_node(SnapshotNode::Map(distinct))
    }

    /// A mutable managed value snapshot.
    pub fn managed(type_name: impl Into<String>, state: ValueSnapshot) -> Self {
        Self::from_node(SnapshotNode::Managed {
            type_name: type_name.into(),
            state,
        })
    }

    /// An immutable managed value snapshot.
    pub fn immutable_managed(type_name: impl Into<String>, state: impl Into<String>) -> Self {
        Self::from_node(SnapshotNode::ImmutableManaged {
            type_name: type_name.into(),
            state: state.into(),
        })
    }

    /// An implementation identity snapshot.
    pub fn implementation(implementation: ImplementationSnapshot) -> Self {
        Self::from_node(SnapshotNode::Implementation(implementation))
    }

    /// A serialized-fallback snapshot.
    pub fn serialized(context_hash: Option<ContentHash>, bytes: Vec<u8>) -> Self {
        Self::from_node(SnapshotNode::Serialized {
            context_hash,
            bytes,
        })
    }

    /// The node behind this handle.
    pub fn node(&self) -> &SnapshotNode {
        &self.0
    }

    /// Returns `true` if both handles point at the same node instance.
    pub fn same_instance(&self, other: &ValueSnapshot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Elements of an array, list or set snapshot.
    pub fn elements(&self) -> Option<&[ValueSnapshot]> {
        match self.node() {
            SnapshotNode::Array(elements)
            | SnapshotNode::List(elements)
            | SnapshotNode::Set(elements) => Some(elements),
            _ => None,
        }
    }

    /// Entries of a map snapshot.
    pub fn entries(&self) -> Option<&[(ValueSnapshot, ValueSnapshot)]> {
        match self.node() {
            SnapshotNode::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Appends this snapshot's content to `hasher`.
    ///
    /// Every node starts with its kind discriminator. Set elements and map
    /// entries are hashed individually and fed in sorted order, so the
    /// contribution does not depend on iteration order.
    pub fn append_to_hasher(&self, hasher: &mut dyn Hasher) {
        let node = self.node();
        hasher.put_string(node.discriminator());
        match node {
            SnapshotNode::Null => hasher.put_null(),
            SnapshotNode::Boolean(b) => hasher.put_bool(*b),
            SnapshotNode::String(s) | SnapshotNode::File(s) => hasher.put_string(s),
            SnapshotNode::Integer(n) => hasher.put_int(*n),
            SnapshotNode::Long(n) => hasher.put_long(*n),
            SnapshotNode::Short(n) => hasher.put_int(i32::from(*n)),
            SnapshotNode::Enum { type_name, member } => {
                hasher.put_string(type_name);
                hasher.put_string(member);
            }
            SnapshotNode::Attribute {
                name,
                type_name,
                context_hash,
            } => {
                hasher.put_string(name);
                hasher.put_string(type_name);
                put_optional_hash(hasher, context_hash.as_ref());
            }
            SnapshotNode::Array(elements) | SnapshotNode::List(elements) => {
                hasher.put_int(len_i32(elements.len()));
                for element in elements {
                    element.append_to_hasher(hasher);
                }
            }
            SnapshotNode::Set(elements) => {
                let mut hashes: Vec<ContentHash> =
                    elements.iter().map(ValueSnapshot::content_hash).collect();
                put_sorted(hasher, &mut hashes);
            }
            SnapshotNode::Map(entries) => {
                let mut hashes: Vec<ContentHash> = entries
                    .iter()
                    .map(|(key, value)| {
                        let mut entry = ContentHasher::new();
                        key.append_to_hasher(&mut entry);
                        value.append_to_hasher(&mut entry);
                        entry.finish()
                    })
                    .collect();
                put_sorted(hasher, &mut hashes);
            }
            SnapshotNode::Managed { type_name, state } => {
                hasher.put_string(type_name);
                state.append_to_hasher(hasher);
            }
            SnapshotNode::ImmutableManaged { type_name, state } => {
                hasher.put_string(type_name);
                hasher.put_string(state);
            }
            SnapshotNode::Implementation(implementation) => implementation.append_to_hasher(hasher),
            SnapshotNode::Serialized {
                context_hash,
                bytes,
            } => {
                put_optional_hash(hasher, context_hash.as_ref());
                hasher.put_bytes(bytes);
            }
        }
    }

    /// The hash of this snapshot alone.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        self.append_to_hasher(&mut hasher);
        hasher.finish()
    }
}

fn put_optional_hash(hasher: &mut dyn Hasher, hash: Option<&ContentHash>) {
    match hash {
        Some(hash) => hasher.put_hash(hash),
        None => hasher.put_null(),
    }
}

fn put_sorted(hasher: &mut dyn Hasher, hashes: &mut [ContentHash]) {
    hashes.sort_unstable();
    hasher.put_int(len_i32(hashes.len()));
    for hash in hashes.iter() {
        hasher.put_hash(hash);
    }
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl PartialEq for ValueSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other) || self.0 == other.0
    }
}

impl Eq for ValueSnapshot {}

impl Hash for ValueSnapshot {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for ValueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.node(), f)
    }
}
