//! Snapshotting named input properties and detecting what changed.
//!
//! A task's inputs are a sorted map of property name to value. Between two
//! executions the previous snapshots are used as re-snapshot candidates, so
//! unchanged properties come back as the very same snapshot instances.

use std::collections::BTreeMap;

use stasis_common::{ContentHash, ContentHasher, Hasher};
use tracing::debug;

use crate::error::SnapshotError;
use crate::snapshot::ValueSnapshot;
use crate::snapshotter::ValueSnapshotter;
use crate::value::Value;

/// Snapshots of named input properties, in name order.
pub type InputSnapshots = BTreeMap<String, ValueSnapshot>;

/// Snapshots every property in `inputs`.
///
/// Properties present in `previous` are re-snapshotted against their old
/// snapshot. A failure names the property it came from.
pub fn snapshot_inputs(
    snapshotter: &ValueSnapshotter,
    inputs: &BTreeMap<String, Value>,
    previous: Option<&InputSnapshots>,
) -> Result<InputSnapshots, SnapshotError> {
    let mut snapshots = InputSnapshots::new();
    for (name, value) in inputs {
        let candidate = previous.and_then(|previous| previous.get(name));
        let snapshot = match candidate {
            Some(candidate) => snapshotter.snapshot_with_candidate(value, candidate),
            None => snapshotter.snapshot(value),
        }
        .map_err(|source| SnapshotError::Property {
            name: name.clone(),
            source: Box::new(source),
        })?;
        snapshots.insert(name.clone(), snapshot);
    }
    Ok(snapshots)
}

/// Folds property names and their hash contributions into one hash.
pub fn fingerprint(snapshots: &InputSnapshots) -> ContentHash {
    let mut hasher = ContentHasher::new();
    for (name, snapshot) in snapshots {
        hasher.put_string(name);
        snapshot.append_to_hasher(&mut hasher);
    }
    hasher.finish()
}

/// Result of comparing the input snapshots of two executions.
///
/// Each list is sorted by property name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputChanges {
    /// Properties that did not exist before.
    pub added: Vec<String>,

    /// Properties whose snapshot content changed.
    pub modified: Vec<String>,

    /// Properties that no longer exist.
    pub removed: Vec<String>,

    /// Properties whose snapshot is the same instance or has equal content.
    pub unchanged: Vec<String>,
}

impl InputChanges {
    /// Compares `current` against `previous`.
    pub fn detect(previous: &InputSnapshots, current: &InputSnapshots) -> Self {
        let mut changes = InputChanges::default();
        for (name, snapshot) in current {
            match previous.get(name) {
                Some(old) if old.same_instance(snapshot) || old == snapshot => {
                    changes.unchanged.push(name.clone());
                }
                Some(_) => changes.modified.push(name.clone()),
                None => changes.added.push(name.clone()),
            }
        }
        changes.removed = previous
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();

        debug!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            unchanged = changes.unchanged.len(),
            "detected input changes"
        );
        changes
    }

    /// Returns `true` if no property was added, modified or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Number of properties that were added, modified or removed.
    pub fn changed_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::value::ObjectValue;
    use std::any::Any;
    use std::sync::Arc;

    fn inputs(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[derive(Debug)]
    struct Unserializable;

    impl ObjectValue for Unserializable {
        fn type_name(&self) -> &str {
            "app::Handle"
        }
        fn context(&self) -> Option<&Arc<crate::context::LoadingContext>> {
            None
        }
        fn to_bytes(&self) -> Result<Vec<u8>, BoxError> {
            Err("not serializable".into())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn dyn_eq(&self, _other: &dyn ObjectValue) -> bool {
            false
        }
    }

    #[test]
    fn unchanged_inputs_reuse_instances() {
        let snapshotter = ValueSnapshotter::default();
        let values = inputs(&[
            ("sources", Value::list(["a.rs", "b.rs"])),
            ("debug", Value::from(true)),
        ]);
        let first = snapshot_inputs(&snapshotter, &values, None).unwrap();
        let second = snapshot_inputs(&snapshotter, &values, Some(&first)).unwrap();
        assert!(first["sources"].same_instance(&second["sources"]));

        let changes = InputChanges::detect(&first, &second);
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, vec!["debug", "sources"]);
        assert_eq!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn classifies_changes() {
        let snapshotter = ValueSnapshotter::default();
        let before = inputs(&[
            ("level", Value::from(1)),
            ("name", Value::from("x")),
            ("old", Value::Null),
        ]);
        let after = inputs(&[
            ("level", Value::from(2)),
            ("name", Value::from("x")),
            ("new", Value::from(1i64)),
        ]);
        let first = snapshot_inputs(&snapshotter, &before, None).unwrap();
        let second = snapshot_inputs(&snapshotter, &after, Some(&first)).unwrap();
        let changes = InputChanges::detect(&first, &second);
        assert_eq!(changes.added, vec!["new"]);
        assert_eq!(changes.modified, vec!["level"]);
        assert_eq!(changes.removed, vec!["old"]);
        assert_eq!(changes.unchanged, vec!["name"]);
        assert_eq!(changes.changed_count(), 3);
        assert_ne!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn fingerprint_includes_names() {
        let snapshotter = ValueSnapshotter::default();
        let a = snapshot_inputs(&snapshotter, &inputs(&[("a", Value::from(1))]), None).unwrap();
        let b = snapshot_inputs(&snapshotter, &inputs(&[("b", Value::from(1))]), None).unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn failure_names_property() {
        let snapshotter = ValueSnapshotter::default();
        let values = inputs(&[("handle", Value::object(Unserializable))]);
        let err = snapshot_inputs(&snapshotter, &values, None).unwrap_err();
        match err {
            SnapshotError::Property { name, source } => {
                assert_eq!(name, "handle");
                assert!(matches!(*source, SnapshotError::Serialization { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
