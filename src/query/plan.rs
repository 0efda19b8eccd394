//! Execution plans.
//!
//! A triple query is driven by the bound field with the smallest posting
//! list; the remaining bound fields become filters in selectivity order. An
//! unbound query is a full ordered scan.

use serde::{Deserialize, Serialize};

use crate::error::NoesisResult;
use crate::graph::store::TripleStore;
use crate::graph::{TripleField, TripleQuery};
use crate::pattern::PatternStore;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    /// Read the posting list of a field.
    IndexLookup { field: TripleField, cardinality: usize },
    /// Check a bound field on every candidate.
    Filter { field: TripleField, cardinality: usize },
    /// Visit every stored triple in insertion order.
    FullScan { rows: usize },
    /// Apply stored rules once over the candidates.
    InferencePass,
    /// Intersect pattern contexts with normalized tags.
    ContextMatch { tags: usize, rows: usize },
    /// Confidence, recency, insertion order.
    Rank,
}

/// An execution plan with its estimated cost (rows touched by the driver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
    pub estimated_cost: usize,
}

impl QueryPlan {
    /// The driving index, if the plan starts with an index lookup.
    pub fn driver(&self) -> Option<TripleField> {
        match self.steps.first() {
            Some(PlanStep::IndexLookup { field, .. }) => Some(*field),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| match s {
                PlanStep::IndexLookup { field, cardinality } => {
                    format!("index({field}) ~{cardinality}")
                }
                PlanStep::Filter { field, .. } => format!("filter({field})"),
                PlanStep::FullScan { rows } => format!("scan ~{rows}"),
                PlanStep::InferencePass => "infer".to_string(),
                PlanStep::ContextMatch { tags, rows } => format!("context({tags} tags) ~{rows}"),
                PlanStep::Rank => "rank".to_string(),
            })
            .collect();
        write!(f, "{} (cost {})", steps.join(" -> "), self.estimated_cost)
    }
}

/// Plan a triple query against current index statistics.
pub fn plan_triples(store: &TripleStore, query: &TripleQuery) -> NoesisResult<QueryPlan> {
    let mut bound = store.cardinalities(query)?;
    // Stable: ties keep subject, predicate, object, context order.
    bound.sort_by_key(|&(_, n)| n);

    let mut steps = Vec::with_capacity(bound.len() + 2);
    let estimated_cost = match bound.split_first() {
        Some((&(field, cardinality), rest)) => {
            steps.push(PlanStep::IndexLookup { field, cardinality });
            steps.extend(
                rest.iter()
                    .map(|&(field, cardinality)| PlanStep::Filter { field, cardinality }),
            );
            cardinality
        }
        None => {
            let rows = store.len()?;
            steps.push(PlanStep::FullScan { rows });
            rows
        }
    };
    steps.push(PlanStep::InferencePass);
    steps.push(PlanStep::Rank);
    Ok(QueryPlan {
        steps,
        estimated_cost,
    })
}

/// Plan a context lookup: every pattern is checked against the tags.
pub fn plan_patterns(store: &PatternStore, tags: &[String]) -> NoesisResult<QueryPlan> {
    let rows = store.len()?;
    Ok(QueryPlan {
        steps: vec![
            PlanStep::ContextMatch {
                tags: tags.len(),
                rows,
            },
            PlanStep::Rank,
        ],
        estimated_cost: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewTriple;

    fn store() -> TripleStore {
        let store = TripleStore::new();
        for animal in ["dog", "cat", "cow", "pig"] {
            store.add(NewTriple::new(animal, "is_a", "mammal")).unwrap();
        }
        store.add(NewTriple::new("dog", "has", "fur")).unwrap();
        store
    }

    #[test]
    fn most_selective_field_drives() {
        let store = store();
        let plan = plan_triples(
            &store,
            &TripleQuery::new().predicate("is_a").subject("dog"),
        )
        .unwrap();
        assert_eq!(plan.driver(), Some(TripleField::Subject));
        assert_eq!(plan.estimated_cost, 2);
        assert_eq!(
            plan.steps[1],
            PlanStep::Filter {
                field: TripleField::Predicate,
                cardinality: 4
            }
        );
    }

    #[test]
    fn unbound_query_scans_everything() {
        let store = store();
        let plan = plan_triples(&store, &TripleQuery::new()).unwrap();
        assert_eq!(plan.driver(), None);
        assert_eq!(plan.steps[0], PlanStep::FullScan { rows: 5 });
        assert!(plan.to_string().starts_with("scan ~5"));
    }
}
