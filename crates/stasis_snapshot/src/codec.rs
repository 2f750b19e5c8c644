//! Byte-level encoder and decoder shared by the snapshot and isolatable codecs.
//!
//! Numbers are fixed width and little-endian. Strings and blobs are prefixed
//! with an `i32` byte length. A length that does not fit is recorded by the
//! encoder and reported by [`Encoder::finish`].

use stasis_common::ContentHash;

use crate::error::{DecodeError, EncodeError};

/// Appends primitive values to an in-memory buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
    overflow: Option<usize>,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Writes a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Writes a 16-bit integer.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a 32-bit integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a 64-bit integer.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a collection size.
    ///
    /// A size above `i32::MAX` is not written; it fails [`Encoder::finish`].
    pub fn write_count(&mut self, count: usize) {
        self.try_write_count(count);
    }

    fn try_write_count(&mut self, count: usize) -> bool {
        match i32::try_from(count) {
            Ok(count) => {
                self.write_i32(count);
                true
            }
            Err(_) => {
                self.overflow.get_or_insert(count);
                false
            }
        }
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    /// Writes a length-prefixed byte blob.
    pub fn write_binary(&mut self, value: &[u8]) {
        if self.try_write_count(value.len()) {
            self.buf.extend_from_slice(value);
        }
    }

    /// Writes the 16 raw bytes of a hash.
    pub fn write_hash(&mut self, value: &ContentHash) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Writes a presence flag followed by the hash when present.
    pub fn write_optional_hash(&mut self, value: Option<&ContentHash>) {
        match value {
            Some(hash) => {
                self.write_bool(true);
                self.write_hash(hash);
            }
            None => self.write_bool(false),
        }
    }

    /// Returns the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder and returns its buffer, or the first length
    /// that could not be encoded.
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        match self.overflow {
            Some(length) => Err(EncodeError::LengthOverflow { length }),
            None => Ok(self.buf),
        }
    }
}

/// Reads primitive values from a byte slice, failing on truncation.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(DecodeError::TrailingBytes { remaining }),
        }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a boolean byte.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a 16-bit integer.
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    /// Reads a 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads a 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Reads a collection size, rejecting negative values.
    pub fn read_count(&mut self) -> Result<usize, DecodeError> {
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| DecodeError::InvalidLength { length })
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Reads a length-prefixed byte blob.
    pub fn read_binary(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads the 16 raw bytes of a hash.
    pub fn read_hash(&mut self) -> Result<ContentHash, DecodeError> {
        Ok(ContentHash::from_raw(self.take_array()?))
    }

    /// Reads a presence flag and the hash when present.
    pub fn read_optional_hash(&mut self) -> Result<Option<ContentHash>, DecodeError> {
        if self.read_bool()? {
            Ok(Some(self.read_hash()?))
        } else {
            Ok(None)
        }
    }
}
