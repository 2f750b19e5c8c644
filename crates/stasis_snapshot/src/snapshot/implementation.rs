//! Implementation identity: which code produced a behavior.

use std::fmt;

use stasis_common::{ContentHash, Hasher};

use crate::codec::{Decoder, Encoder};
use crate::error::DecodeError;

const KNOWN: u8 = 0;
const UNKNOWN_CONTEXT: u8 = 1;
const LAMBDA: u8 = 2;

/// Identity of a type's implementation, used to detect plugin or task logic
/// changes between builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImplementationSnapshot {
    /// A named type whose loading context could be hashed.
    Known {
        /// Fully qualified type name.
        type_name: String,
        /// Hash of the loading context.
        context_hash: ContentHash,
    },
    /// A named type whose loading context could not be hashed.
    UnknownContext {
        /// Fully qualified type name.
        type_name: String,
    },
    /// A lambda or anonymous implementation.
    Lambda {
        /// The synthetic type name.
        type_name: String,
    },
}

/// Why an implementation cannot be reliably identified across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    /// The type's loading context has no stable hash.
    UnknownContext,
    /// The implementation is a lambda, whose identity is not stable.
    Lambda,
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::UnknownContext => write!(f, "was loaded by an unknown loading context"),
            UnknownReason::Lambda => write!(f, "was implemented by a lambda"),
        }
    }
}

impl ImplementationSnapshot {
    /// Picks the variant for a type reference.
    ///
    /// Synthetic types are always lambdas; otherwise the presence of a
    /// context hash decides between known and unknown.
    pub fn of(type_name: impl Into<String>, context_hash: Option<ContentHash>, synthetic: bool) -> Self {
        let type_name = type_name.into();
        match (synthetic, context_hash) {
            (true, _) => ImplementationSnapshot::Lambda { type_name },
            (false, Some(context_hash)) => ImplementationSnapshot::Known {
                type_name,
                context_hash,
            },
            (false, None) => ImplementationSnapshot::UnknownContext { type_name },
        }
    }

    /// The implementation's type name.
    pub fn type_name(&self) -> &str {
        match self {
            ImplementationSnapshot::Known { type_name, .. }
            | ImplementationSnapshot::UnknownContext { type_name }
            | ImplementationSnapshot::Lambda { type_name } => type_name,
        }
    }

    /// The loading context hash, for known implementations.
    pub fn context_hash(&self) -> Option<&ContentHash> {
        match self {
            ImplementationSnapshot::Known { context_hash, .. } => Some(context_hash),
            _ => None,
        }
    }

    /// Returns why this implementation is not reliably identifiable, if so.
    pub fn unknown_reason(&self) -> Option<UnknownReason> {
        match self {
            ImplementationSnapshot::Known { .. } => None,
            ImplementationSnapshot::UnknownContext { .. } => Some(UnknownReason::UnknownContext),
            ImplementationSnapshot::Lambda { .. } => Some(UnknownReason::Lambda),
        }
    }

    /// The variant discriminator written before the payload on the wire.
    pub fn ordinal(&self) -> u8 {
        match self {
            ImplementationSnapshot::Known { .. } => KNOWN,
            ImplementationSnapshot::UnknownContext { .. } => UNKNOWN_CONTEXT,
            ImplementationSnapshot::Lambda { .. } => LAMBDA,
        }
    }

    /// Appends the implementation's identity to `hasher`.
    pub fn append_to_hasher(&self, hasher: &mut dyn Hasher) {
        hasher.put_int(i32::from(self.ordinal()));
        hasher.put_string(self.type_name());
        if let Some(hash) = self.context_hash() {
            hasher.put_hash(hash);
        }
    }

    /// Writes the ordinal and variant payload.
    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.ordinal());
        encoder.write_string(self.type_name());
        if let Some(hash) = self.context_hash() {
            encoder.write_hash(hash);
        }
    }

    /// Reads an implementation written by [`ImplementationSnapshot::encode`].
    pub fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let ordinal = decoder.read_u8()?;
        match ordinal {
            KNOWN => {
                let type_name = decoder.read_string()?;
                let context_hash = decoder.read_hash()?;
                Ok(ImplementationSnapshot::Known {
                    type_name,
                    context_hash,
                })
            }
            UNKNOWN_CONTEXT => Ok(ImplementationSnapshot::UnknownContext {
                type_name: decoder.read_string()?,
            }),
            LAMBDA => Ok(ImplementationSnapshot::Lambda {
                type_name: decoder.read_string()?,
            }),
            tag => Err(DecodeError::UnknownTag { tag }),
        }
    }
}

impl fmt::Display for ImplementationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplementationSnapshot::Known {
                type_name,
                context_hash,
            } => write!(f, "{type_name}@{context_hash}"),
            ImplementationSnapshot::UnknownContext { type_name } => {
                write!(f, "{type_name}@<unknown context>")
            }
            ImplementationSnapshot::Lambda { type_name } => write!(f, "{type_name}@<lambda>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::from_bytes(b"plugin-context")
    }

    #[test]
    fn variant_selection() {
        assert!(matches!(
            ImplementationSnapshot::of("a.Task", Some(hash()), false),
            ImplementationSnapshot::Known { .. }
        ));
        assert!(matches!(
            ImplementationSnapshot::of("a.Task", None, false),
            ImplementationSnapshot::UnknownContext { .. }
        ));
        assert!(matches!(
            ImplementationSnapshot::of("a.Task$$Lambda", Some(hash()), true),
            ImplementationSnapshot::Lambda { .. }
        ));
    }

    #[test]
    fn unknown_reasons() {
        let known = ImplementationSnapshot::of("a.Task", Some(hash()), false);
        assert_eq!(known.unknown_reason(), None);
        let unknown = ImplementationSnapshot::of("a.Task", None, false);
        assert_eq!(unknown.unknown_reason(), Some(UnknownReason::UnknownContext));
        assert!(UnknownReason::Lambda.to_string().contains("lambda"));
    }

    #[test]
    fn wire_payloads() {
        for implementation in [
            ImplementationSnapshot::of("a.Task", Some(hash()), false),
            ImplementationSnapshot::of("a.Task", None, false),
            ImplementationSnapshot::of("a.Task$1", None, true),
        ] {
            let mut enc = Encoder::new();
            implementation.encode(&mut enc);
            let bytes = enc.finish().unwrap();
            assert_eq!(bytes[0], implementation.ordinal());
            let mut dec = Decoder::new(&bytes);
            assert_eq!(ImplementationSnapshot::decode(&mut dec).unwrap(), implementation);
            assert!(dec.finish().is_ok());
        }
    }

    #[test]
    fn unknown_ordinal_rejected() {
        let mut dec = Decoder::new(&[9]);
        assert!(matches!(
            ImplementationSnapshot::decode(&mut dec),
            Err(DecodeError::UnknownTag { tag: 9 })
        ));
    }

    #[test]
    fn display_forms() {
        let lambda = ImplementationSnapshot::of("Build$1", None, true);
        assert_eq!(lambda.to_string(), "Build$1@<lambda>");
    }
}
