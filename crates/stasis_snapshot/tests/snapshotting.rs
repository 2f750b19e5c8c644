//! End-to-end behavior of snapshotting, re-snapshotting and isolation.

use std::sync::Arc;

use stasis_snapshot::stream::{read_stream, write_stream};
use stasis_snapshot::{
    IsolatableCodec, IsolationError, LoadingContext, LoadingContextRegistry, Managed,
    ManagedFactory, ManagedFactoryRegistry, TypeRef, Value, ValueSnapshot, ValueSnapshotter,
};

#[derive(Debug)]
struct Counter {
    public_type: TypeRef,
    count: i32,
}

impl Managed for Counter {
    fn public_type(&self) -> &TypeRef {
        &self.public_type
    }
    fn factory_id(&self) -> u32 {
        11
    }
    fn is_immutable(&self) -> bool {
        false
    }
    fn unpack_state(&self) -> Value {
        Value::Integer(self.count)
    }
}

struct CounterFactory;

impl ManagedFactory for CounterFactory {
    fn id(&self) -> u32 {
        11
    }
    fn from_state(&self, target: &TypeRef, state: Value) -> Option<Value> {
        match state {
            Value::Integer(count) => Some(Value::managed(Counter {
                public_type: target.clone(),
                count,
            })),
            _ => None,
        }
    }
}

fn snapshotter() -> ValueSnapshotter {
    ValueSnapshotter::builder()
        .managed_factories(ManagedFactoryRegistry::new().with_factory(Arc::new(CounterFactory)))
        .build()
}

fn plugin() -> Arc<LoadingContext> {
    Arc::new(LoadingContext::new("plugin").with_type::<(String, u32)>("plugin::Target"))
}

#[test]
fn snapshot_is_deterministic() {
    let snapshotter = snapshotter();
    let value = Value::map([
        (Value::from("sources"), Value::list(["a.rs", "b.rs"])),
        (Value::from("opt"), Value::from(3)),
    ]);
    let first = snapshotter.snapshot(&value).unwrap();
    let second = snapshotter.snapshot(&value).unwrap();
    assert_eq!(first, second);
    assert!(!first.same_instance(&second));
    assert_eq!(first.content_hash(), second.content_hash());
}

#[test]
fn unchanged_collections_resnapshot_to_same_instance() {
    let snapshotter = snapshotter();
    let values = [
        Value::list(["a", "b"]),
        Value::set([1, 2, 3]),
        Value::map([("k", 1)]),
        Value::array([true, false]),
    ];
    for value in &values {
        let snapshot = snapshotter.snapshot(value).unwrap();
        let again = snapshotter.snapshot_with_candidate(value, &snapshot).unwrap();
        assert!(again.same_instance(&snapshot), "{value:?} was re-created");
    }
}

#[test]
fn changed_list_reuses_unchanged_prefix() {
    let snapshotter = snapshotter();
    let before = snapshotter.snapshot(&Value::list(["a", "b", "c"])).unwrap();
    let after = snapshotter
        .snapshot_with_candidate(&Value::list(["a", "b", "d"]), &before)
        .unwrap();

    assert_ne!(after, before);
    let old = before.elements().unwrap();
    let new = after.elements().unwrap();
    assert!(new[0].same_instance(&old[0]));
    assert!(new[1].same_instance(&old[1]));
    assert_eq!(new[2], ValueSnapshot::string("d"));
}

#[test]
fn list_order_matters_but_set_order_does_not() {
    let snapshotter = snapshotter();
    let list_ab = snapshotter.snapshot(&Value::list(["a", "b"])).unwrap();
    let list_ba = snapshotter.snapshot(&Value::list(["b", "a"])).unwrap();
    assert_ne!(list_ab, list_ba);
    assert_ne!(list_ab.content_hash(), list_ba.content_hash());

    let set_ab = snapshotter.snapshot(&Value::set(["a", "b"])).unwrap();
    let set_ba = snapshotter.snapshot(&Value::set(["b", "a"])).unwrap();
    assert_eq!(set_ab, set_ba);
    assert_eq!(set_ab.content_hash(), set_ba.content_hash());
}

#[test]
fn numeric_widths_are_distinct() {
    let snapshotter = snapshotter();
    let int = snapshotter.snapshot(&Value::from(5)).unwrap();
    let long = snapshotter.snapshot(&Value::from(5i64)).unwrap();
    let short = snapshotter.snapshot(&Value::from(5i16)).unwrap();
    assert_ne!(int, long);
    assert_ne!(int.content_hash(), long.content_hash());
    assert_ne!(long.content_hash(), short.content_hash());
}

#[test]
fn isolated_copies_are_independent() {
    let snapshotter = snapshotter();
    let original = Value::list([Value::managed(Counter {
        public_type: TypeRef::builtin("app::Counter"),
        count: 4,
    })]);
    let isolatable = snapshotter.isolate(&original).unwrap();

    let first = isolatable.isolate().unwrap();
    let second = isolatable.isolate().unwrap();
    assert_eq!(first, original);
    assert_eq!(second, original);

    let (Value::List(first), Value::List(second), Value::List(source)) =
        (&first, &second, &original)
    else {
        panic!("isolated list changed kind");
    };
    let (Value::Managed(a), Value::Managed(b), Value::Managed(c)) =
        (&first[0], &second[0], &source[0])
    else {
        panic!("isolated element changed kind");
    };
    assert!(!Arc::ptr_eq(a, b));
    assert!(!Arc::ptr_eq(a, c));
}

#[test]
fn isolatable_snapshot_matches_direct_snapshot() {
    let snapshotter = snapshotter();
    let plugin = plugin();
    let value = Value::map([
        (Value::from("target"), plugin.object("plugin::Target", ("x86".to_string(), 64u32))),
        (Value::from("tags"), Value::set(["fast", "small"])),
    ]);
    let direct = snapshotter.snapshot(&value).unwrap();
    let isolatable = snapshotter.isolate(&value).unwrap();
    assert_eq!(isolatable.as_snapshot(), direct);
    assert_eq!(
        snapshotter.snapshot(&Value::Isolated(isolatable)).unwrap(),
        direct
    );
}

#[test]
fn type_references_snapshot_but_do_not_isolate() {
    let snapshotter = snapshotter();
    let type_ref = Value::from(plugin().type_ref("plugin::Task"));
    assert!(snapshotter.snapshot(&type_ref).is_ok());
    assert!(matches!(
        snapshotter.isolate(&type_ref),
        Err(IsolationError::TypeReference { .. })
    ));
}

#[test]
fn persisted_snapshot_survives_a_restart() {
    let snapshotter = snapshotter();
    let value = Value::properties([("release", true), ("lto", false)]);
    let snapshot = snapshotter.snapshot(&value).unwrap();

    let raw = write_stream(&snapshot).unwrap();
    let restored = read_stream(&raw).unwrap();
    assert_eq!(restored, snapshot);

    // A restored snapshot still serves as a re-snapshot candidate.
    let again = snapshotter.snapshot_with_candidate(&value, &restored).unwrap();
    assert!(again.same_instance(&restored));
}

#[test]
fn persisted_isolatable_rebuilds_values() {
    let snapshotter = snapshotter();
    let plugin = plugin();
    let mut contexts = LoadingContextRegistry::new();
    contexts.register(Arc::clone(&plugin));
    let codec = IsolatableCodec::for_snapshotter(contexts, &snapshotter);

    let value = Value::list([
        plugin.object("plugin::Target", ("arm".to_string(), 32u32)),
        Value::managed(Counter {
            public_type: TypeRef::builtin("app::Counter"),
            count: 9,
        }),
    ]);
    let isolatable = snapshotter.isolate(&value).unwrap();
    let decoded = codec.decode(&codec.encode(&isolatable).unwrap()).unwrap();
    assert_eq!(decoded, isolatable);
    assert_eq!(decoded.isolate().unwrap(), value);
}
