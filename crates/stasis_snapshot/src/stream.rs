//! Framing for snapshot trees persisted across process runs.
//!
//! A stream is a 4-byte little-endian header length, a `bincode`-encoded
//! [`StreamHeader`], and the tagged payload from [`crate::wire`]. The header
//! carries magic bytes, a format version and a checksum of the payload, all
//! of which are validated on read.

use serde::{Deserialize, Serialize};
use stasis_common::ContentHash;

use crate::codec::Decoder;
use crate::error::{DecodeError, EncodeError};
use crate::snapshot::ValueSnapshot;
use crate::wire;

/// Magic bytes identifying a persisted snapshot stream.
const STREAM_MAGIC: [u8; 4] = *b"STSS";

/// Current stream format version. Increment on breaking changes to the
/// header or the node encoding.
pub const STREAM_FORMAT_VERSION: u32 = 1;

/// Header prepended to every persisted snapshot tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    /// Magic bytes: must be `b"STSS"`.
    pub magic: [u8; 4],

    /// Stream format version.
    pub format_version: u32,

    /// Content hash of the payload.
    pub checksum: ContentHash,
}

/// Encodes `snapshot` as a framed stream.
pub fn write_stream(snapshot: &ValueSnapshot) -> Result<Vec<u8>, EncodeError> {
    let payload = wire::encode_snapshot(snapshot)?;
    let header = StreamHeader {
        magic: STREAM_MAGIC,
        format_version: STREAM_FORMAT_VERSION,
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| EncodeError::Header {
            reason: e.to_string(),
        })?;
    let header_len = u32::try_from(header_bytes.len()).map_err(|_| EncodeError::LengthOverflow {
        length: header_bytes.len(),
    })?;

    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Reads the header of a framed stream and returns it with the payload.
pub fn read_header(raw: &[u8]) -> Result<(StreamHeader, &[u8]), DecodeError> {
    let mut decoder = Decoder::new(raw);
    let header_len = decoder.read_u32()? as usize;
    if raw.len() < 4 + header_len {
        return Err(DecodeError::Truncated {
            needed: header_len,
            remaining: raw.len() - 4,
        });
    }

    let (header, used): (StreamHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|e| DecodeError::InvalidHeader {
                reason: e.to_string(),
            })?;
    if used != header_len {
        return Err(DecodeError::InvalidHeader {
            reason: format!("header length {header_len} but {used} bytes decoded"),
        });
    }
    if header.magic != STREAM_MAGIC {
        return Err(DecodeError::InvalidHeader {
            reason: format!("bad magic {:?}", header.magic),
        });
    }
    if header.format_version != STREAM_FORMAT_VERSION {
        return Err(DecodeError::VersionMismatch {
            expected: STREAM_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(DecodeError::ChecksumMismatch {
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok((header, payload))
}

/// Decodes a framed stream written by [`write_stream`].
pub fn read_stream(raw: &[u8]) -> Result<ValueSnapshot, DecodeError> {
    let (_, payload) = read_header(raw)?;
    wire::decode_snapshot(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ValueSnapshot {
        ValueSnapshot::map(vec![(
            ValueSnapshot::string("sources"),
            ValueSnapshot::list(vec![ValueSnapshot::file("src/lib.rs")]),
        )])
    }

    fn reframe(header: &StreamHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes = bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut out = (header_bytes.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn write_then_read() {
        let raw = write_stream(&sample()).unwrap();
        assert_eq!(read_stream(&raw).unwrap(), sample());
        let (header, _) = read_header(&raw).unwrap();
        assert_eq!(header.magic, *b"STSS");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut raw = write_stream(&sample()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(matches!(
            read_stream(&raw),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn wrong_magic_rejected() {
        let raw = write_stream(&sample()).unwrap();
        let (mut header, payload) = read_header(&raw).unwrap();
        header.magic = *b"NOPE";
        let raw = reframe(&header, payload);
        assert!(matches!(
            read_stream(&raw),
            Err(DecodeError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let raw = write_stream(&sample()).unwrap();
        let (mut header, payload) = read_header(&raw).unwrap();
        header.format_version = 99;
        let raw = reframe(&header, payload);
        assert!(matches!(
            read_stream(&raw),
            Err(DecodeError::VersionMismatch {
                expected: 1,
                actual: 99
            })
        ));
    }

    #[test]
    fn short_input_is_truncated() {
        assert!(matches!(read_stream(&[1, 0]), Err(DecodeError::Truncated { .. })));
        assert!(matches!(
            read_stream(&[200, 0, 0, 0, 1]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_payload_bytes_rejected() {
        let raw = write_stream(&sample()).unwrap();
        let (header, payload) = read_header(&raw).unwrap();
        let mut payload = payload.to_vec();
        payload.push(0);
        let header = StreamHeader {
            checksum: ContentHash::from_bytes(&payload),
            ..header
        };
        assert!(matches!(
            read_stream(&reframe(&header, &payload)),
            Err(DecodeError::TrailingBytes { remaining: 1 })
        ));
    }
}
