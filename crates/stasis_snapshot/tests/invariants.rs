//! Property-based checks over randomly generated value trees.

use proptest::prelude::*;
use stasis_snapshot::wire::{decode_snapshot, encode_snapshot};
use stasis_snapshot::{Value, ValueSnapshot, ValueSnapshotter};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i32>().prop_map(Value::Integer),
        any::<i64>().prop_map(Value::Long),
        any::<i16>().prop_map(Value::Short),
        "[a-z]{0,8}".prop_map(Value::String),
        "[a-z]{1,6}(/[a-z]{1,6}){0,2}".prop_map(|path| Value::file(path)),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Set),
            prop::collection::vec((inner.clone(), inner), 0..4).prop_map(|e| Value::map(e)),
        ]
    })
}

proptest! {
    #[test]
    fn snapshots_are_deterministic(value in value()) {
        let snapshotter = ValueSnapshotter::default();
        let a = snapshotter.snapshot(&value).unwrap();
        let b = snapshotter.snapshot(&value).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn resnapshot_of_unchanged_value_is_identity(value in value()) {
        let snapshotter = ValueSnapshotter::default();
        let snapshot = snapshotter.snapshot(&value).unwrap();
        let again = snapshotter.snapshot_with_candidate(&value, &snapshot).unwrap();
        prop_assert!(again.same_instance(&snapshot));
    }

    #[test]
    fn resnapshot_matches_fresh_snapshot(before in value(), after in value()) {
        let snapshotter = ValueSnapshotter::default();
        let candidate = snapshotter.snapshot(&before).unwrap();
        let resnapshot = snapshotter.snapshot_with_candidate(&after, &candidate).unwrap();
        let fresh = snapshotter.snapshot(&after).unwrap();
        prop_assert_eq!(resnapshot.content_hash(), fresh.content_hash());
        prop_assert_eq!(resnapshot, fresh);
    }

    #[test]
    fn set_snapshots_ignore_order(items in prop::collection::vec(value(), 0..8)) {
        let snapshotter = ValueSnapshotter::default();
        let mut reversed = items.clone();
        reversed.reverse();
        let forward = snapshotter.snapshot(&Value::Set(items)).unwrap();
        let backward = snapshotter.snapshot(&Value::Set(reversed)).unwrap();
        prop_assert_eq!(forward.content_hash(), backward.content_hash());
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn list_diff_keeps_prefix(
        items in prop::collection::vec("[a-z]{1,4}", 1..8),
        index in any::<prop::sample::Index>(),
    ) {
        let snapshotter = ValueSnapshotter::default();
        let changed_at = index.index(items.len());
        let before = snapshotter.snapshot(&Value::list(items.clone())).unwrap();

        let mut changed = items;
        changed[changed_at] = "CHANGED".to_string();
        let after = snapshotter
            .snapshot_with_candidate(&Value::list(changed), &before)
            .unwrap();

        prop_assert_ne!(&after, &before);
        let old = before.elements().unwrap();
        let new = after.elements().unwrap();
        for i in 0..changed_at {
            prop_assert!(new[i].same_instance(&old[i]));
        }
        prop_assert_eq!(&new[changed_at], &ValueSnapshot::string("CHANGED"));
    }

    #[test]
    fn encoded_snapshots_decode_to_equal_trees(value in value()) {
        let snapshot = ValueSnapshotter::default().snapshot(&value).unwrap();
        let decoded = decode_snapshot(&encode_snapshot(&snapshot).unwrap()).unwrap();
        prop_assert_eq!(decoded.content_hash(), snapshot.content_hash());
        prop_assert_eq!(decoded, snapshot);
    }
}
