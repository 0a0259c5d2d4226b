//! # Property-Based Tests
//!
//! Determinism and identity invariants, checked with proptest.

use diggy_core::{
    Field, Graph, NodeType, Reverse, ScalarKind, Tokenizer, TypeRegistry, Uid, Value,
};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

// =============================================================================
// FIXTURES
// =============================================================================

fn pool_type(index: usize) -> NodeType {
    let name = || Field::scalar("name", ScalarKind::String).index_with([Tokenizer::Exact]);
    let population = || Field::scalar("population", ScalarKind::Int).index();
    let built = match index {
        0 => NodeType::builder("Country")
            .field(name())
            .field(Field::node("provinces", "Province").list().reverse(Reverse::new()))
            .build(),
        1 => NodeType::builder("Province")
            .field(name())
            .field(population())
            .build(),
        2 => NodeType::builder("City")
            .field(name())
            .field(population())
            .field(Field::node("province", "Province"))
            .build(),
        3 => NodeType::builder("Person")
            .field(Field::scalar("name", ScalarKind::String).count())
            .field(Field::scalar("age", ScalarKind::Int))
            .build(),
        _ => NodeType::builder("Region")
            .field(name())
            .field(Field::node("borders", "Region").list().reverse(Reverse::new()).count())
            .build(),
    };
    built.expect("pool type")
}

fn registry_in(order: &[usize]) -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    for &i in order {
        registry.register(pool_type(i)).expect("register");
    }
    registry
}

fn person_graph() -> Graph {
    let mut registry = TypeRegistry::new();
    registry.register(pool_type(3)).expect("register");
    Graph::new(registry)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Schema text does not depend on registration order.
    #[test]
    fn schema_is_order_independent(order in Just(vec![0usize, 1, 2, 3, 4]).prop_shuffle()) {
        let baseline = Graph::new(registry_in(&[0, 1, 2, 3, 4]))
            .generate_schema()
            .expect("baseline");
        let shuffled = Graph::new(registry_in(&order))
            .generate_schema()
            .expect("shuffled");

        prop_assert_eq!(baseline.text(), shuffled.text());
    }

    /// A scalar-only instance emits two type lines plus one line per set field,
    /// whatever the string contents.
    #[test]
    fn scalar_mutation_line_count(
        name in proptest::option::of("\\PC{0,30}"),
        age in proptest::option::of(any::<i64>()),
    ) {
        let mut g = person_graph();
        let mut builder = g.build("Person");
        if let Some(name) = &name {
            builder = builder.set("name", name.as_str());
        }
        if let Some(age) = age {
            builder = builder.set("age", age);
        }
        let uid = builder.finish().expect("create");
        g.stage(&uid).expect("stage");

        let mutation = g.generate_mutation().expect("generate");
        let expected = 2 + usize::from(name.is_some()) + usize::from(age.is_some());
        prop_assert_eq!(mutation.lines().count(), expected);
        for line in mutation.lines() {
            prop_assert!(line.starts_with("_:unsaved.0 <"));
            prop_assert!(line.ends_with(" ."));
        }
    }

    /// New instances receive sequential, distinct provisional identifiers.
    #[test]
    fn provisional_identifiers_are_sequential(count in 1usize..40) {
        let mut g = person_graph();
        let uids: Vec<Uid> = (0..count)
            .map(|_| g.create("Person").expect("create"))
            .collect();

        for (n, uid) in uids.iter().enumerate() {
            prop_assert_eq!(uid, &Uid::provisional(n as u64));
        }
        prop_assert_eq!(g.len(), count);
    }

    /// Hydration resolves each identifier to exactly one instance, and reports
    /// records in result order.
    #[test]
    fn hydration_identity(uids in vec(1u64..64, 1..40)) {
        let records: Vec<serde_json::Value> = uids
            .iter()
            .map(|uid| json!({"uid": format!("{:#x}", uid), "_type": "Person", "age": *uid as i64}))
            .collect();
        let mut g = person_graph();
        let out = g.hydrate(&json!({"people": records})).expect("hydrate");

        let returned: Vec<Uid> = out["people"]
            .iter()
            .filter_map(|h| h.uid().cloned())
            .collect();
        let expected: Vec<Uid> = uids.iter().map(|&u| Uid::Persisted(u)).collect();
        prop_assert_eq!(returned, expected);

        let distinct: BTreeSet<u64> = uids.iter().copied().collect();
        prop_assert_eq!(g.len(), distinct.len());
    }

    /// After any assignment a province carries a back-reference exactly when
    /// the country's current list contains it.
    #[test]
    fn back_references_follow_assignment(
        first in btree_set(0usize..8, 0..8),
        second in btree_set(0usize..8, 0..8),
    ) {
        let mut g = Graph::new(registry_in(&[0, 1]));
        let provinces: Vec<Uid> = (0..8)
            .map(|_| g.create("Province").expect("province"))
            .collect();
        let country = g.create("Country").expect("country");

        for chosen in [&first, &second] {
            let list: Vec<Uid> = chosen.iter().map(|&i| provinces[i].clone()).collect();
            g.set(&country, "provinces", list).expect("assign");
        }

        for (i, province) in provinces.iter().enumerate() {
            let back = g.node(province).expect("node").back_reference("_provinces");
            if second.contains(&i) {
                prop_assert_eq!(back, Some(&Value::Node(country.clone())));
            } else {
                prop_assert!(back.is_none());
            }
        }
    }
}
