//! Hash accumulators that snapshot nodes append their content to.
//!
//! Every `put_*` call writes a one-byte marker before its payload, and
//! variable-length payloads are length-prefixed, so that different call
//! sequences never produce the same byte stream.

use xxhash_rust::xxh3::Xxh3;

use crate::hash::ContentHash;

const NULL_MARKER: u8 = 0;
const STRING_MARKER: u8 = 1;
const INT_MARKER: u8 = 2;
const LONG_MARKER: u8 = 3;
const BOOL_MARKER: u8 = 4;
const BYTES_MARKER: u8 = 5;
const HASH_MARKER: u8 = 6;

/// A running hash accumulator.
///
/// Composite snapshot nodes call these in a fixed order (type discriminator
/// first, then children) so that equal content always yields an equal hash.
pub trait Hasher {
    /// Appends an absent value.
    fn put_null(&mut self);

    /// Appends a string.
    fn put_string(&mut self, value: &str);

    /// Appends a 32-bit integer.
    fn put_int(&mut self, value: i32);

    /// Appends a 64-bit integer.
    fn put_long(&mut self, value: i64);

    /// Appends a boolean.
    fn put_bool(&mut self, value: bool);

    /// Appends an opaque byte blob.
    fn put_bytes(&mut self, value: &[u8]);

    /// Appends a previously computed hash.
    fn put_hash(&mut self, value: &ContentHash);
}

/// Streaming XXH3-128 implementation of [`Hasher`].
#[derive(Clone)]
pub struct ContentHasher {
    state: Xxh3,
}

impl ContentHasher {
    /// Creates a fresh accumulator.
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    /// Consumes the accumulator and returns the final hash.
    pub fn finish(self) -> ContentHash {
        ContentHash::from_raw(self.state.digest128().to_le_bytes())
    }

    fn marker(&mut self, marker: u8) {
        self.state.update(&[marker]);
    }

    fn length(&mut self, len: usize) {
        self.state.update(&(len as u64).to_le_bytes());
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for ContentHasher {
    fn put_null(&mut self) {
        self.marker(NULL_MARKER);
    }

    fn put_string(&mut self, value: &str) {
        self.marker(STRING_MARKER);
        self.length(value.len());
        self.state.update(value.as_bytes());
    }

    fn put_int(&mut self, value: i32) {
        self.marker(INT_MARKER);
        self.state.update(&value.to_le_bytes());
    }

    fn put_long(&mut self, value: i64) {
        self.marker(LONG_MARKER);
        self.state.update(&value.to_le_bytes());
    }

    fn put_bool(&mut self, value: bool) {
        self.marker(BOOL_MARKER);
        self.state.update(&[u8::from(value)]);
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.marker(BYTES_MARKER);
        self.length(value.len());
        self.state.update(value);
    }

    fn put_hash(&mut self, value: &ContentHash) {
        self.marker(HASH_MARKER);
        self.state.update(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(f: impl FnOnce(&mut ContentHasher)) -> ContentHash {
        let mut hasher = ContentHasher::new();
        f(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn same_sequence_same_hash() {
        let a = hash_of(|h| {
            h.put_string("a");
            h.put_int(1);
        });
        let b = hash_of(|h| {
            h.put_string("a");
            h.put_int(1);
        });
        assert_eq!(a, b);
    }

    #[test]
    fn string_boundaries_are_unambiguous() {
        let a = hash_of(|h| {
            h.put_string("ab");
            h.put_string("c");
        });
        let b = hash_of(|h| {
            h.put_string("a");
            h.put_string("bc");
        });
        assert_ne!(a, b);
    }

    #[test]
    fn int_and_long_differ() {
        let a = hash_of(|h| h.put_int(5));
        let b = hash_of(|h| h.put_long(5));
        assert_ne!(a, b);
    }

    #[test]
    fn null_differs_from_empty_string() {
        let a = hash_of(|h| h.put_null());
        let b = hash_of(|h| h.put_string(""));
        assert_ne!(a, b);
    }

    #[test]
    fn empty_accumulator_is_stable() {
        assert_eq!(ContentHasher::new().finish(), ContentHasher::default().finish());
    }
}
