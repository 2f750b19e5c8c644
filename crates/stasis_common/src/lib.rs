//! Shared foundational types for the Stasis value-snapshotting engine.
//!
//! This crate provides the content hash used for cache keys and change
//! detection, and the hash accumulator that snapshot nodes feed their
//! content into.

#![warn(missing_docs)]

pub mod hash;
pub mod hasher;

pub use hash::ContentHash;
pub use hasher::{ContentHasher, Hasher};
