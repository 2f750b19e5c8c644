//! Value snapshotting and isolation for incremental execution and caching.
//!
//! A [`ValueSnapshotter`] turns arbitrary in-memory [`Value`]s into immutable,
//! content-addressable trees:
//!
//! - [`ValueSnapshot`]: content only. Supports structural equality, hash
//!   contribution for cache keys, and cheap re-snapshotting against a new
//!   live value that reuses unchanged substructure.
//! - [`Isolatable`]: content plus reconstruction. Produces independent copies
//!   of the original value for isolated execution and coerces itself into
//!   other target types.
//!
//! Both trees are produced by one [`ValueDispatcher`] that classifies values
//! with a fixed precedence and drives a [`ValueVisitor`]. Snapshot trees can be
//! persisted with the tagged codec in [`wire`] and framed with [`stream`].
//!
//! Traversal is recursive, so the call stack grows with the nesting depth of
//! the input. Pathologically deep values can overflow the stack; this is a
//! known limitation and is not guarded against.

#![warn(missing_docs)]

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod inputs;
pub mod isolated;
pub mod isolated_wire;
pub mod managed;
pub mod serializer;
pub mod snapshot;
pub mod snapshotter;
pub mod stream;
pub mod value;
pub mod wire;

pub use codec::{Decoder, Encoder};
pub use context::{IdContextHasher, LoadingContext, LoadingContextHasher, LoadingContextRegistry};
pub use dispatch::{ValueDispatcher, ValueVisitor};
pub use error::{DecodeError, EncodeError, IsolationError, SnapshotError};
pub use inputs::{fingerprint, snapshot_inputs, InputChanges, InputSnapshots};
pub use isolated::Isolatable;
pub use isolated_wire::IsolatableCodec;
pub use managed::{Managed, ManagedFactory, ManagedFactoryRegistry};
pub use serializer::{SerializedCodec, SerializerRegistry, ValueSerializer};
pub use snapshot::{ImplementationSnapshot, SnapshotNode, UnknownReason, ValueSnapshot};
pub use snapshotter::{ValueSnapshotter, ValueSnapshotterBuilder};
pub use value::{AttributeDef, EnumValue, MapFlavor, MapValue, ObjectValue, SerdeObject, TypeRef, Value};
