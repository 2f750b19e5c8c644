//! Incremental re-snapshotting against a previous snapshot.

use std::sync::Arc;

use stasis_common::ContentHash;
use tracing::trace;

use super::{SnapshotNode, ValueSnapshot};
use crate::error::SnapshotError;
use crate::serializer::SerializedCodec;
use crate::snapshotter::ValueSnapshotter;
use crate::value::{ObjectValue, Value};

/// Which ordered container a [`SequenceBuilder`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// A list snapshot.
    List,
    /// An array snapshot.
    Array,
}

/// Assembles a new list or array snapshot from reused and fresh elements.
///
/// Reused elements are the previous snapshot's own nodes; only pushed
/// elements are new.
#[derive(Debug)]
pub struct SequenceBuilder {
    kind: SequenceKind,
    elements: Vec<ValueSnapshot>,
}

impl SequenceBuilder {
    /// Creates a builder for `capacity` elements.
    pub fn with_capacity(kind: SequenceKind, capacity: usize) -> Self {
        Self {
            kind,
            elements: Vec::with_capacity(capacity),
        }
    }

    /// Appends existing nodes without re-snapshotting them.
    pub fn reuse(&mut self, nodes: &[ValueSnapshot]) {
        self.elements.extend(nodes.iter().cloned());
    }

    /// Appends one node.
    pub fn push(&mut self, node: ValueSnapshot) {
        self.elements.push(node);
    }

    /// Finishes the snapshot.
    pub fn build(self) -> ValueSnapshot {
        match self.kind {
            SequenceKind::List => ValueSnapshot::list(self.elements),
            SequenceKind::Array => ValueSnapshot::array(self.elements),
        }
    }
}

impl ValueSnapshot {
    /// Snapshots `value`, using `self` as the previous snapshot.
    ///
    /// Returns `self` (the same instance) when the new content is
    /// structurally equal. Lists and arrays reuse the unchanged prefix of
    /// their previous elements.
    pub fn snapshot_against(
        &self,
        value: &Value,
        snapshotter: &ValueSnapshotter,
    ) -> Result<ValueSnapshot, SnapshotError> {
        match (self.node(), value) {
            (SnapshotNode::List(previous), Value::List(items)) => {
                self.resnapshot_sequence(SequenceKind::List, previous, items, snapshotter)
            }
            (SnapshotNode::Array(previous), Value::Array(items)) => {
                self.resnapshot_sequence(SequenceKind::Array, previous, items, snapshotter)
            }
            (SnapshotNode::Serialized { context_hash, bytes }, Value::Object(object)) => {
                let previous = PreviousBytes {
                    context_hash: context_hash.as_ref(),
                    bytes,
                };
                self.resnapshot_serialized(previous, object, snapshotter)
            }
            _ if self.holds_scalar(value) => Ok(self.clone()),
            _ => Ok(self.keep_if_equal(snapshotter.snapshot(value)?)),
        }
    }

    /// Returns `self` if `fresh` has the same content, otherwise `fresh`.
    fn keep_if_equal(&self, fresh: ValueSnapshot) -> ValueSnapshot {
        if fresh == *self {
            trace!(kind = self.node().discriminator(), "re-snapshot unchanged");
            self.clone()
        } else {
            fresh
        }
    }

    /// Compares leaf content without allocating a fresh node.
    fn holds_scalar(&self, value: &Value) -> bool {
        match (self.node(), value) {
            (SnapshotNode::Null, Value::Null) => true,
            (SnapshotNode::Boolean(a), Value::Boolean(b)) => a == b,
            (SnapshotNode::String(a), Value::String(b)) => a == b,
            (SnapshotNode::Integer(a), Value::Integer(b)) => a == b,
            (SnapshotNode::Long(a), Value::Long(b)) => a == b,
            (SnapshotNode::Short(a), Value::Short(b)) => a == b,
            (SnapshotNode::File(a), Value::File(b)) => b.to_str() == Some(a.as_str()),
            _ => false,
        }
    }

    fn resnapshot_sequence(
        &self,
        kind: SequenceKind,
        previous: &[ValueSnapshot],
        items: &[Value],
        snapshotter: &ValueSnapshotter,
    ) -> Result<ValueSnapshot, SnapshotError> {
        let common = previous.len().min(items.len());
        let mut differing = None;
        for (index, (node, item)) in previous.iter().zip(items).enumerate() {
            let next = node.snapshot_against(item, snapshotter)?;
            if next != *node {
                differing = Some((index, next));
                break;
            }
        }

        if differing.is_none() && previous.len() == items.len() {
            trace!(len = previous.len(), "sequence unchanged");
            return Ok(self.clone());
        }

        let prefix = differing.as_ref().map_or(common, |(index, _)| *index);
        trace!(reused = prefix, len = items.len(), "rebuilding sequence");
        let mut builder = SequenceBuilder::with_capacity(kind, items.len());
        builder.reuse(&previous[..prefix]);
        let mut rest = prefix;
        if let Some((_, node)) = differing {
            builder.push(node);
            rest += 1;
        }
        for item in &items[rest..] {
            builder.push(snapshotter.snapshot(item)?);
        }
        Ok(builder.build())
    }

    fn resnapshot_serialized(
        &self,
        previous: PreviousBytes<'_>,
        object: &Arc<dyn ObjectValue>,
        snapshotter: &ValueSnapshotter,
    ) -> Result<ValueSnapshot, SnapshotError> {
        let fresh = snapshotter.snapshot(&Value::Object(Arc::clone(object)))?;
        let SnapshotNode::Serialized {
            context_hash,
            bytes,
        } = fresh.node()
        else {
            return Ok(fresh);
        };
        if context_hash.as_ref() != previous.context_hash {
            return Ok(fresh);
        }
        if bytes == previous.bytes {
            return Ok(self.clone());
        }
        // Legacy fallback: serialization is not guaranteed deterministic, so
        // the old value is rebuilt and compared natively before reporting a
        // change. Equal values with unequal bytes keep the candidate.
        let serializers = snapshotter.serializers();
        let codec = if serializers.can_serialize(object.type_name()) {
            SerializedCodec::Registered
        } else {
            SerializedCodec::Generic
        };
        match serializers.load(codec, object.type_name(), object.context(), previous.bytes) {
            Ok(old) if old.dyn_eq(object.as_ref()) => {
                trace!(
                    type_name = object.type_name(),
                    "serialized bytes differ but values are equal"
                );
                Ok(self.clone())
            }
            _ => Ok(fresh),
        }
    }
}

struct PreviousBytes<'a> {
    context_hash: Option<&'a ContentHash>,
    bytes: &'a [u8],
}
