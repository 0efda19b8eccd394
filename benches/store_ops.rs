//! Benchmarks for triple storage, cached queries, and deduction.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use noesis::config::EngineConfig;
use noesis::engine::Engine;
use noesis::graph::rules::NewRule;
use noesis::graph::{NewTriple, TripleQuery};

fn populated_engine(n: usize) -> Engine {
    let engine = Engine::new(EngineConfig::in_memory()).unwrap();
    for i in 0..n {
        engine
            .add_triple(NewTriple::new(
                format!("node{i}"),
                "links_to",
                format!("node{}", (i + 1) % n),
            ))
            .unwrap();
    }
    engine
}

fn bench_add_triple(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::in_memory()).unwrap();
    let mut i = 0u64;
    c.bench_function("add_triple", |bench| {
        bench.iter(|| {
            i += 1;
            black_box(
                engine
                    .add_triple(NewTriple::new(format!("s{i}"), "p", format!("o{i}")))
                    .unwrap(),
            )
        })
    });
}

fn bench_query(c: &mut Criterion) {
    let engine = populated_engine(10_000);
    let query = TripleQuery::new().subject("node42");

    c.bench_function("query_cached_10k", |bench| {
        bench.iter(|| black_box(engine.query(query.clone()).unwrap()))
    });

    c.bench_function("query_uncached_10k", |bench| {
        bench.iter(|| {
            engine.clear_cache();
            black_box(engine.query(query.clone()).unwrap())
        })
    });
}

fn bench_deduce(c: &mut Criterion) {
    let engine = populated_engine(1_000);
    engine
        .add_rule(NewRule::new(
            "two_hop",
            ["?a links_to ?b", "?b links_to ?c"],
            "?a reaches ?c",
        ))
        .unwrap();
    let premises = vec!["node1 links_to node2".to_string()];

    c.bench_function("deduce_two_hop_1k", |bench| {
        bench.iter(|| black_box(engine.deduce(&premises, "").unwrap()))
    });
}

criterion_group!(benches, bench_add_triple, bench_query, bench_deduce);
criterion_main!(benches);
