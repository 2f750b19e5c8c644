//! A single snapshotter shared across worker threads.

use rayon::prelude::*;
use stasis_snapshot::{Value, ValueSnapshot, ValueSnapshotter};

fn inputs() -> Vec<Value> {
    (0..64i32)
        .map(|i| {
            Value::map([
                (Value::from("index"), Value::from(i)),
                (
                    Value::from("files"),
                    Value::list((0..i % 7).map(|n| format!("src/{n}.rs"))),
                ),
                (Value::from("flags"), Value::set(["a", "b", "c"])),
            ])
        })
        .collect()
}

#[test]
fn parallel_snapshots_match_sequential() {
    let snapshotter = ValueSnapshotter::default();
    let inputs = inputs();

    let sequential: Vec<ValueSnapshot> = inputs
        .iter()
        .map(|value| snapshotter.snapshot(value).unwrap())
        .collect();
    let parallel: Vec<ValueSnapshot> = inputs
        .par_iter()
        .map(|value| snapshotter.snapshot(value).unwrap())
        .collect();

    assert_eq!(sequential, parallel);
    for (a, b) in sequential.iter().zip(&parallel) {
        assert_eq!(a.content_hash(), b.content_hash());
    }
}

#[test]
fn shared_candidate_is_reused_from_every_thread() {
    let snapshotter = ValueSnapshotter::default();
    let value = Value::list(["a.rs", "b.rs", "c.rs"]);
    let candidate = snapshotter.snapshot(&value).unwrap();

    let all_reused = (0..32).into_par_iter().all(|_| {
        snapshotter
            .snapshot_with_candidate(&value, &candidate)
            .unwrap()
            .same_instance(&candidate)
    });
    assert!(all_reused);
}

#[test]
fn parallel_isolation_yields_equal_values() {
    let snapshotter = ValueSnapshotter::default();
    let value = Value::list([Value::from("x"), Value::set([1, 2]), Value::from(7i64)]);
    let isolatable = snapshotter.isolate(&value).unwrap();

    let copies: Vec<Value> = (0..16)
        .into_par_iter()
        .map(|_| isolatable.isolate().unwrap())
        .collect();
    assert!(copies.iter().all(|copy| *copy == value));
}
