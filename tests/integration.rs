//! End-to-end tests for the noesis engine.
//!
//! These drive the public API the way an application would: store facts,
//! read them back through the cached query layer, reason over them, and
//! issue the same operations through JSON dispatch.

use noesis::config::EngineConfig;
use noesis::dispatch::{Operation, OperationOutput};
use noesis::engine::Engine;
use noesis::graph::rules::NewRule;
use noesis::graph::{NewTriple, TripleQuery, ValidationStatus};
use noesis::pattern::NewPattern;
use noesis::provenance::InferenceMode;
use serde_json::json;

fn engine() -> Engine {
    Engine::new(EngineConfig::in_memory()).unwrap()
}

#[test]
fn repeated_queries_hit_the_cache_until_a_write() {
    let engine = engine();
    engine
        .add_triple(NewTriple::new("api", "depends_on", "database"))
        .unwrap();

    let query = TripleQuery::new().subject("api");
    assert!(!engine.query(query.clone()).unwrap().cache_hit);
    assert!(engine.query(query.clone()).unwrap().cache_hit);

    engine
        .add_triple(NewTriple::new("api", "depends_on", "queue"))
        .unwrap();
    let fresh = engine.query(query).unwrap();
    assert!(!fresh.cache_hit);
    assert_eq!(fresh.output.len(), 2);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_hits(), 1);
    assert_eq!(metrics.total_misses(), 2);
}

#[test]
fn deduction_writes_back_a_derived_fact() {
    let engine = engine();
    engine
        .add_triple(NewTriple::new("socrates", "is_a", "human").with_confidence(0.9))
        .unwrap();
    engine
        .add_rule(NewRule::new("mortality", ["?x is_a human"], "?x is mortal"))
        .unwrap();

    let deduction = engine
        .deduce(&["socrates is_a human".to_string()], "")
        .unwrap();
    assert_eq!(deduction.conclusion, "socrates is mortal");
    assert!((deduction.confidence - 0.9).abs() < 1e-6);

    let stored = engine.get_triple(deduction.stored.unwrap()).unwrap();
    assert_eq!(
        stored.metadata.validation,
        ValidationStatus::Derived {
            mode: InferenceMode::Deduction
        }
    );
    let rows = engine
        .query(TripleQuery::new().subject("socrates"))
        .unwrap();
    assert_eq!(rows.output.len(), 2);
}

#[test]
fn pattern_usage_feeds_back_into_lookups() {
    let engine = engine();
    let id = engine
        .add_pattern(NewPattern::new(
            "retry_with_backoff",
            json!({"approach": "retry failed calls with exponential backoff"}),
            ["network", "reliability"],
        ))
        .unwrap();

    let found = engine.find_patterns(&["reliability"]).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert!(engine.find_patterns(&["billing"]).unwrap().is_empty());

    engine.record_pattern_usage(id, true).unwrap();
    let pattern = engine.record_pattern_usage(id, false).unwrap();
    assert_eq!(pattern.usage.count, 2);
    assert!((pattern.usage.success_rate - 0.5).abs() < 1e-6);
}

#[test]
fn hyperedges_bridge_domains_during_expansion() {
    let engine = engine();
    engine
        .add_triple(NewTriple::new("latency", "affects", "revenue").with_context("business"))
        .unwrap();
    engine
        .connect_domains(
            "cache",
            &["latency", "memory"],
            "trades_off",
            &["infra", "business"],
            Some(0.9),
        )
        .unwrap();

    let ctx = engine
        .expand_context(&["cache"], "", Some(2), Some(0.1))
        .unwrap();
    assert!(ctx.contains("latency"));
    assert!(ctx.contains("memory"));
    assert!(ctx.contains("revenue"));
    assert_eq!(ctx.depth_of("revenue"), Some(2));
}

#[test]
fn exploration_operations_answer_blank_input_with_validation_errors() {
    let engine = engine();
    assert!(engine.analogy::<&str>("", "pipeline", &[]).unwrap_err().is_validation());
    assert!(engine.causal_chain("  ", "", 3).unwrap_err().is_validation());
    assert!(engine.sequential_analysis("", 5, "").unwrap_err().is_validation());
    assert!(
        engine
            .generate_candidates::<&str>("", 3, &[])
            .unwrap_err()
            .is_validation()
    );
}

#[test]
fn candidates_are_ranked_and_bounded() {
    let engine = engine();
    let set = engine
        .generate_candidates::<&str>("the database is slow and needs to be faster", 3, &[])
        .unwrap();
    assert_eq!(set.ranked.len(), 3);
    assert!(
        set.ranked
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score)
    );
    assert_eq!(set.selected.name, set.ranked[0].name);
}

#[test]
fn json_batch_runs_through_dispatch() {
    let engine = engine();
    let ops: Vec<Operation> = serde_json::from_value(json!([
        {"op": "add_triple", "subject": "disk", "predicate": "has_status", "object": "full", "context": "ops"},
        {"op": "add_rule", "name": "alert", "conditions": ["?x has_status full"], "conclusion": "?x needs cleanup"},
        {"op": "deduce", "premises": ["disk has_status full"], "domain": "ops"},
        {"op": "export_triples"}
    ]))
    .unwrap();

    let outputs: Vec<OperationOutput> = ops
        .into_iter()
        .map(|op| engine.dispatch(op).unwrap())
        .collect();

    let OperationOutput::Deduction(deduction) = &outputs[2] else {
        panic!("expected a deduction");
    };
    assert_eq!(deduction.conclusion, "disk needs cleanup");

    let OperationOutput::Triples(triples) = &outputs[3] else {
        panic!("expected exported triples");
    };
    assert_eq!(triples.len(), 2);

    let rendered = serde_json::to_value(&outputs[0]).unwrap();
    assert_eq!(rendered["kind"], "triple_id");
}
