//! Error types for snapshotting, isolation and stream encoding and decoding.

/// A boxed error from a collaborator (serializer, loading context, factory).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while producing a snapshot.
///
/// These are never recovered inside this crate; the caller decides whether
/// an unsnapshottable input is fatal or just disables caching.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A value with no structural handling could not be serialized.
    #[error("could not serialize value of type '{type_name}': {source}")]
    Serialization {
        /// The exact type name of the offending value.
        type_name: String,
        /// The underlying serialization failure.
        #[source]
        source: BoxError,
    },

    /// An immutable managed value packed its state into something other
    /// than a string.
    #[error("immutable managed value of type '{type_name}' has non-string state")]
    ImmutableState {
        /// Public type name of the managed value.
        type_name: String,
    },

    /// A named input property could not be snapshotted.
    #[error("cannot snapshot input property '{name}': {source}")]
    Property {
        /// The property name.
        name: String,
        /// The failure for the property's value.
        #[source]
        source: Box<SnapshotError>,
    },
}

/// Errors raised while producing or materializing an isolated value.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// Bare type references have no instance state to copy.
    #[error("cannot isolate type reference '{type_name}'")]
    TypeReference {
        /// The referenced type name.
        type_name: String,
    },

    /// The value has a shape that can be snapshotted but not isolated.
    #[error("cannot isolate {kind}")]
    NotIsolatable {
        /// Human readable description of the value's kind.
        kind: String,
    },

    /// No managed factory is registered under the value's factory id.
    #[error("no managed factory with id {factory_id} for type '{type_name}'")]
    UnknownFactory {
        /// The factory id the value was created by.
        factory_id: u32,
        /// Public type name of the managed value.
        type_name: String,
    },

    /// An isolated copy could not be rebuilt from its stored state.
    #[error("could not reconstruct value of type '{type_name}': {reason}")]
    Reconstruction {
        /// The type being reconstructed.
        type_name: String,
        /// Description of the failure.
        reason: String,
    },

    /// Capturing the value failed before isolation could start.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Errors raised while decoding a persisted snapshot or isolatable stream.
///
/// Every variant means the stream is corrupt or was written by an
/// incompatible producer; none of them is tolerated silently.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The stream ended before a complete value was read.
    #[error("truncated stream: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the current read.
        needed: usize,
        /// Bytes left in the stream.
        remaining: usize,
    },

    /// A node tag outside the known table was read.
    #[error("unknown tag {tag} in stream")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
    },

    /// A string payload was not valid UTF-8.
    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// A length or count field was negative or otherwise impossible.
    #[error("invalid length {length} in stream")]
    InvalidLength {
        /// The length value read.
        length: i32,
    },

    /// A type reference named a loading context that is not registered.
    #[error("unknown loading context '{id}'")]
    UnknownContext {
        /// The context id read from the stream.
        id: String,
    },

    /// A managed value referenced a factory that is not registered.
    #[error("unknown managed factory {factory_id}")]
    UnknownFactory {
        /// The factory id read from the stream.
        factory_id: u32,
    },

    /// A registry-serialized value names a type with no registered serializer.
    #[error("no serializer registered for type '{type_name}'")]
    UnknownSerializer {
        /// The type name read from the stream.
        type_name: String,
    },

    /// The stream header is missing or malformed.
    #[error("invalid stream header: {reason}")]
    InvalidHeader {
        /// Description of the header problem.
        reason: String,
    },

    /// The stream was written with a different format version.
    #[error("stream version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The format version this build reads.
        expected: u32,
        /// The format version found in the stream.
        actual: u32,
    },

    /// The payload checksum does not match the header.
    #[error("stream checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The checksum stored in the header.
        expected: String,
        /// The checksum computed from the payload.
        actual: String,
    },

    /// Bytes remained after the top-level value was decoded.
    #[error("{remaining} trailing bytes after stream payload")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },
}

/// Errors raised while encoding a snapshot or isolatable stream.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A string, blob or collection is longer than an `i32` length prefix
    /// can describe.
    #[error("length {length} exceeds the maximum encodable length {}", i32::MAX)]
    LengthOverflow {
        /// The length that could not be written.
        length: usize,
    },

    /// The stream header could not be serialized.
    #[error("could not encode stream header: {reason}")]
    Header {
        /// Description of the failure.
        reason: String,
    },
}
