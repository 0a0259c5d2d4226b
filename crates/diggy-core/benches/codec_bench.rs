//! # Codec Benchmarks
//!
//! Schema, mutation, hydration and dump throughput for diggy-core.
//!
//! Run with: `cargo bench -p diggy-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use diggy_core::primitives::DEFAULT_EXPLODE_DEPTH;
use diggy_core::{Field, Graph, NodeType, Reverse, ScalarKind, TypeRegistry, Uid};
use serde_json::json;
use std::hint::black_box;

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            NodeType::builder("Region")
                .field(Field::scalar("name", ScalarKind::String).index())
                .field(Field::scalar("population", ScalarKind::Int).index())
                .field(Field::node("borders", "Region").list().reverse(Reverse::new().many()))
                .build()
                .expect("Region"),
        )
        .expect("register");
    registry
}

/// A chain of N new regions, each bordering the previous one.
fn create_chain(size: usize) -> (Graph, Vec<Uid>) {
    let mut graph = Graph::new(registry());
    let mut uids: Vec<Uid> = Vec::with_capacity(size);

    for i in 0..size {
        let uid = graph
            .build("Region")
            .set("name", format!("Region {}", i))
            .set("population", i as i64)
            .finish()
            .expect("create");
        if let Some(prev) = uids.last() {
            graph
                .set(&uid, "borders", vec![prev.clone()])
                .expect("borders");
        }
        uids.push(uid);
    }

    (graph, uids)
}

/// The query result a store would return for the same chain.
fn chain_result(size: usize) -> serde_json::Value {
    let records: Vec<serde_json::Value> = (1..=size)
        .map(|i| {
            let mut record = json!({
                "uid": format!("{:#x}", i),
                "_type": "Region",
                "name": format!("Region {}", i),
                "population": i,
            });
            if i > 1 {
                record["borders"] = json!([{"uid": format!("{:#x}", i - 1), "_type": "Region"}]);
            }
            record
        })
        .collect();
    json!({"data": {"regions": records}})
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_schema(c: &mut Criterion) {
    let graph = Graph::new(registry());
    c.bench_function("generate_schema", |b| {
        b.iter(|| black_box(graph.generate_schema().expect("schema")));
    });
}

fn bench_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_mutation");

    for size in [100, 1000, 10000].iter() {
        let (mut graph, uids) = create_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for uid in &uids {
                    graph.stage(uid).expect("stage");
                }
                black_box(graph.generate_mutation().expect("generate"))
            });
        });
    }

    group.finish();
}

fn bench_hydrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrate");

    for size in [100, 1000, 10000].iter() {
        let result = chain_result(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut graph = Graph::new(registry());
                black_box(graph.hydrate(&result).expect("hydrate"))
            });
        });
    }

    group.finish();
}

fn bench_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_json");

    for size in [100, 1000].iter() {
        let (graph, _) = create_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(graph.to_json(DEFAULT_EXPLODE_DEPTH)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_schema, bench_mutation, bench_hydrate, bench_dump);

criterion_main!(benches);
