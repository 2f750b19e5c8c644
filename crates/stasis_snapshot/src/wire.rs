//! Tagged binary encoding of snapshot trees.
//!
//! Each node is a one-byte tag followed by a kind-specific payload. Numbers
//! are fixed-width little-endian, strings and byte blobs are length
//! prefixed. Unknown tags are corruption and fail the decode.

use crate::codec::{Decoder, Encoder};
use crate::error::{DecodeError, EncodeError};
use crate::snapshot::{ImplementationSnapshot, SnapshotNode, ValueSnapshot};

/// Node tags shared by the snapshot and isolatable encodings.
pub mod tag {
    /// Null.
    pub const NULL: u8 = 0;
    /// Boolean `true`.
    pub const TRUE: u8 = 1;
    /// Boolean `false`.
    pub const FALSE: u8 = 2;
    /// String.
    pub const STRING: u8 = 3;
    /// 32-bit integer.
    pub const INTEGER: u8 = 4;
    /// 64-bit integer.
    pub const LONG: u8 = 5;
    /// 16-bit integer.
    pub const SHORT: u8 = 6;
    /// File path.
    pub const FILE: u8 = 7;
    /// Enum member.
    pub const ENUM: u8 = 8;
    /// Array with no elements.
    pub const EMPTY_ARRAY: u8 = 9;
    /// Array with elements.
    pub const ARRAY: u8 = 10;
    /// List with no elements.
    pub const EMPTY_LIST: u8 = 11;
    /// List with elements.
    pub const LIST: u8 = 12;
    /// Set.
    pub const SET: u8 = 13;
    /// Map.
    pub const MAP: u8 = 14;
    /// Mutable managed value.
    pub const MANAGED: u8 = 15;
    /// Immutable managed value.
    pub const IMMUTABLE_MANAGED: u8 = 16;
    /// Implementation identity.
    pub const IMPLEMENTATION: u8 = 17;
    /// Serialized-fallback object.
    pub const SERIALIZED: u8 = 18;
    /// Attribute definition.
    pub const ATTRIBUTE: u8 = 19;
    /// Properties-flavored map. Only isolatables keep the flavor.
    pub const PROPERTIES: u8 = 20;
}

/// Writes `snapshot` and its whole subtree.
pub fn write_snapshot(encoder: &mut Encoder, snapshot: &ValueSnapshot) {
    match snapshot.node() {
        SnapshotNode::Null => encoder.write_u8(tag::NULL),
        SnapshotNode::Boolean(true) => encoder.write_u8(tag::TRUE),
        SnapshotNode::Boolean(false) => encoder.write_u8(tag::FALSE),
        SnapshotNode::String(s) => {
            encoder.write_u8(tag::STRING);
            encoder.write_string(s);
        }
        SnapshotNode::Integer(n) => {
            encoder.write_u8(tag::INTEGER);
            encoder.write_i32(*n);
        }
        SnapshotNode::Long(n) => {
            encoder.write_u8(tag::LONG);
            encoder.write_i64(*n);
        }
        SnapshotNode::Short(n) => {
            encoder.write_u8(tag::SHORT);
            encoder.write_i16(*n);
        }
        SnapshotNode::File(path) => {
            encoder.write_u8(tag::FILE);
            encoder.write_string(path);
        }
        SnapshotNode::Enum { type_name, member } => {
            encoder.write_u8(tag::ENUM);
            encoder.write_string(type_name);
            encoder.write_string(member);
        }
        SnapshotNode::Array(elements) if elements.is_empty() => encoder.write_u8(tag::EMPTY_ARRAY),
        SnapshotNode::Array(elements) => write_elements(encoder, tag::ARRAY, elements),
        SnapshotNode::List(elements) if elements.is_empty() => encoder.write_u8(tag::EMPTY_LIST),
        SnapshotNode::List(elements) => write_elements(encoder, tag::LIST, elements),
        SnapshotNode::Set(elements) => write_elements(encoder, tag::SET, elements),
        SnapshotNode::Map(entries) => {
            encoder.write_u8(tag::MAP);
            encoder.write_count(entries.len());
            for (key, value) in entries {
                write_snapshot(encoder, key);
                write_snapshot(encoder, value);
            }
        }
        SnapshotNode::Managed { type_name, state } => {
            encoder.write_u8(tag::MANAGED);
            encoder.write_string(type_name);
            write_snapshot(encoder, state);
        }
        SnapshotNode::ImmutableManaged { type_name, state } => {
            encoder.write_u8(tag::IMMUTABLE_MANAGED);
            encoder.write_string(type_name);
            encoder.write_string(state);
        }
        SnapshotNode::Implementation(implementation) => {
            encoder.write_u8(tag::IMPLEMENTATION);
            implementation.encode(encoder);
        }
        SnapshotNode::Serialized {
            context_hash,
            bytes,
        } => {
            encoder.write_u8(tag::SERIALIZED);
            encoder.write_optional_hash(context_hash.as_ref());
            encoder.write_binary(bytes);
        }
        SnapshotNode::Attribute {
            name,
            type_name,
            context_hash,
        } => {
            encoder.write_u8(tag::ATTRIBUTE);
            encoder.write_string(name);
            encoder.write_string(type_name);
            encoder.write_optional_hash(context_hash.as_ref());
        }
    }
}

fn write_elements(encoder: &mut Encoder, tag: u8, elements: &[ValueSnapshot]) {
    encoder.write_u8(tag);
    encoder.write_count(elements.len());
    for element in elements {
        write_snapshot(encoder, element);
    }
}

/// Reads one snapshot tree written by [`write_snapshot`].
pub fn read_snapshot(decoder: &mut Decoder<'_>) -> Result<ValueSnapshot, DecodeError> {
    let tag = decoder.read_u8()?;
    Ok(match tag {
        tag::NULL => ValueSnapshot::null(),
        tag::TRUE => ValueSnapshot::boolean(true),
        tag::FALSE => ValueSnapshot::boolean(false),
        tag::STRING => ValueSnapshot::string(decoder.read_string()?),
        tag::INTEGER => ValueSnapshot::integer(decoder.read_i32()?),
        tag::LONG => ValueSnapshot::long(decoder.read_i64()?),
        tag::SHORT => ValueSnapshot::short(decoder.read_i16()?),
        tag::FILE => ValueSnapshot::file(decoder.read_string()?),
        tag::ENUM => {
            let type_name = decoder.read_string()?;
            let member = decoder.read_string()?;
            ValueSnapshot::enum_value(type_name, member)
        }
        tag::EMPTY_ARRAY => ValueSnapshot::array(Vec::new()),
        tag::ARRAY => ValueSnapshot::array(read_elements(decoder)?),
        tag::EMPTY_LIST => ValueSnapshot::list(Vec::new()),
        tag::LIST => ValueSnapshot::list(read_elements(decoder)?),
        tag::SET => ValueSnapshot::set(read_elements(decoder)?),
        tag::MAP => {
            let count = decoder.read_count()?;
            let mut entries = Vec::with_capacity(count.min(decoder.remaining()));
            for _ in 0..count {
                let key = read_snapshot(decoder)?;
                let value = read_snapshot(decoder)?;
                entries.push((key, value));
            }
            ValueSnapshot::map(entries)
        }
        tag::MANAGED => {
            let type_name = decoder.read_string()?;
            let state = read_snapshot(decoder)?;
            ValueSnapshot::managed(type_name, state)
        }
        tag::IMMUTABLE_MANAGED => {
            let type_name = decoder.read_string()?;
            let state = decoder.read_string()?;
            ValueSnapshot::immutable_managed(type_name, state)
        }
        tag::IMPLEMENTATION => ValueSnapshot::implementation(ImplementationSnapshot::decode(decoder)?),
        tag::SERIALIZED => {
            let context_hash = decoder.read_optional_hash()?;
            let bytes = decoder.read_binary()?;
            ValueSnapshot::serialized(context_hash, bytes)
        }
        tag::ATTRIBUTE => {
            let name = decoder.read_string()?;
            let type_name = decoder.read_string()?;
            let context_hash = decoder.read_optional_hash()?;
            ValueSnapshot::attribute(name, type_name, context_hash)
        }
        tag => return Err(DecodeError::UnknownTag { tag }),
    })
}

fn read_elements(decoder: &mut Decoder<'_>) -> Result<Vec<ValueSnapshot>, DecodeError> {
    let count = decoder.read_count()?;
    let mut elements = Vec::with_capacity(count.min(decoder.remaining()));
    for _ in 0..count {
        elements.push(read_snapshot(decoder)?);
    }
    Ok(elements)
}

/// Encodes a snapshot tree into a fresh buffer.
pub fn encode_snapshot(snapshot: &ValueSnapshot) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::new();
    write_snapshot(&mut encoder, snapshot);
    encoder.finish()
}

/// Decodes exactly one snapshot tree from `bytes`.
pub fn decode_snapshot(bytes: &[u8]) -> Result<ValueSnapshot, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let snapshot = read_snapshot(&mut decoder)?;
    decoder.finish()?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stasis_common::ContentHash;

    fn roundtrip(snapshot: &ValueSnapshot) -> ValueSnapshot {
        decode_snapshot(&encode_snapshot(snapshot).unwrap()).unwrap()
    }

    #[test]
    fn leaf_tags() {
        assert_eq!(encode_snapshot(&ValueSnapshot::null()).unwrap(), vec![tag::NULL]);
        assert_eq!(encode_snapshot(&ValueSnapshot::boolean(true)).unwrap(), vec![tag::TRUE]);
        assert_eq!(encode_snapshot(&ValueSnapshot::boolean(false)).unwrap(), vec![tag::FALSE]);
        assert_eq!(
            encode_snapshot(&ValueSnapshot::integer(1)).unwrap(),
            vec![tag::INTEGER, 1, 0, 0, 0]
        );
        assert_eq!(encode_snapshot(&ValueSnapshot::short(-1)).unwrap(), vec![tag::SHORT, 0xff, 0xff]);
    }

    #[test]
    fn empty_sequences_have_no_count() {
        assert_eq!(encode_snapshot(&ValueSnapshot::list(vec![])).unwrap(), vec![tag::EMPTY_LIST]);
        assert_eq!(encode_snapshot(&ValueSnapshot::array(vec![])).unwrap(), vec![tag::EMPTY_ARRAY]);
        assert!(roundtrip(&ValueSnapshot::list(vec![])).same_instance(&ValueSnapshot::list(vec![])));
    }

    #[test]
    fn every_kind_survives() {
        let hash = ContentHash::from_bytes(b"ctx");
        let tree = ValueSnapshot::list(vec![
            ValueSnapshot::null(),
            ValueSnapshot::boolean(true),
            ValueSnapshot::string("s"),
            ValueSnapshot::long(i64::MIN),
            ValueSnapshot::file("/a/b"),
            ValueSnapshot::enum_value("app::Mode", "Fast"),
            ValueSnapshot::array(vec![ValueSnapshot::integer(2)]),
            ValueSnapshot::set(vec![ValueSnapshot::integer(1), ValueSnapshot::integer(2)]),
            ValueSnapshot::map(vec![(ValueSnapshot::string("k"), ValueSnapshot::short(3))]),
            ValueSnapshot::managed("app::Prop", ValueSnapshot::string("v")),
            ValueSnapshot::immutable_managed("app::Version", "1.0"),
            ValueSnapshot::implementation(ImplementationSnapshot::of("app::Task", Some(hash), false)),
            ValueSnapshot::implementation(ImplementationSnapshot::of("app::Task$1", None, true)),
            ValueSnapshot::serialized(Some(hash), vec![9, 8, 7]),
            ValueSnapshot::serialized(None, vec![]),
            ValueSnapshot::attribute("usage", "Usage", None),
        ]);
        assert_eq!(roundtrip(&tree), tree);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        assert!(matches!(
            decode_snapshot(&[42]),
            Err(DecodeError::UnknownTag { tag: 42 })
        ));
        // Properties are never written by the snapshot encoder.
        assert!(matches!(
            decode_snapshot(&[tag::PROPERTIES]),
            Err(DecodeError::UnknownTag { .. })
        ));
    }

    #[test]
    fn truncated_stream_fails() {
        let bytes = encode_snapshot(&ValueSnapshot::string("hello")).unwrap();
        assert!(matches!(
            decode_snapshot(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut bytes = encode_snapshot(&ValueSnapshot::null()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(DecodeError::TrailingBytes { .. })
        ));
    }
}
