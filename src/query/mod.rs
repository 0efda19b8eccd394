//! Query layer: planning, caching, and timing metrics.
//!
//! Callers build a [`Query`], and [`cache::QueryCache::execute`] answers it
//! from the cache or by planning and running it against the stores.

pub mod cache;
pub mod metrics;
pub mod plan;

use serde::{Deserialize, Serialize};

use crate::graph::{Triple, TripleQuery};
use crate::pattern::{Pattern, normalize_tags};

pub use cache::QueryCache;
pub use metrics::{MetricsSnapshot, QueryMetric, QueryMetrics, ShapeStats};
pub use plan::{PlanStep, QueryPlan};

/// A query the cache layer can answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    /// Partial-match triple query (with the store's inference pass).
    Triples(TripleQuery),
    /// Active patterns whose context intersects the tags.
    PatternsByContext { tags: Vec<String> },
}

impl Query {
    /// Normalized form: triple fields trimmed, tags normalized, sorted, and
    /// deduplicated.
    pub fn normalized(&self) -> Self {
        match self {
            Query::Triples(q) => Query::Triples(q.normalized()),
            Query::PatternsByContext { tags } => Query::PatternsByContext {
                tags: normalize_tags(tags).into_iter().collect(),
            },
        }
    }

    /// Cache key of the normalized query.
    pub fn key(&self) -> QueryKey {
        QueryKey::of(&self.normalized())
    }
}

/// Cache key derived from a normalized query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    /// Full normalized text; equal for equal queries.
    pub text: String,
    /// Which fields are bound, e.g. `triples[subject,context]`. Used to
    /// aggregate metrics across queries of the same form.
    pub shape: String,
}

impl QueryKey {
    fn of(normalized: &Query) -> Self {
        match normalized {
            Query::Triples(q) => {
                let field = |v: &Option<String>| v.as_deref().unwrap_or("*").to_string();
                let text = format!(
                    "triples|s={}|p={}|o={}|c={}|min={}|limit={}",
                    field(&q.subject),
                    field(&q.predicate),
                    field(&q.object),
                    field(&q.context),
                    q.min_confidence.map_or("*".into(), |m| m.to_string()),
                    q.limit.map_or("*".into(), |l| l.to_string()),
                );
                let bound: Vec<String> = crate::graph::index::bound_fields(q)
                    .map(|(f, _)| f.to_string())
                    .collect();
                Self {
                    text,
                    shape: format!("triples[{}]", bound.join(",")),
                }
            }
            Query::PatternsByContext { tags } => Self {
                text: format!("patterns|tags={}", tags.join(",")),
                shape: format!("patterns[{}]", tags.len()),
            },
        }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// The result rows of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum QueryOutput {
    Triples(Vec<Triple>),
    Patterns(Vec<Pattern>),
}

impl QueryOutput {
    pub fn len(&self) -> usize {
        match self {
            QueryOutput::Triples(t) => t.len(),
            QueryOutput::Patterns(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The triple rows, or an empty slice for pattern output.
    pub fn triples(&self) -> &[Triple] {
        match self {
            QueryOutput::Triples(t) => t,
            QueryOutput::Patterns(_) => &[],
        }
    }

    /// The pattern rows, or an empty slice for triple output.
    pub fn patterns(&self) -> &[Pattern] {
        match self {
            QueryOutput::Patterns(p) => p,
            QueryOutput::Triples(_) => &[],
        }
    }
}

/// What [`QueryCache::execute`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub output: QueryOutput,
    pub cache_hit: bool,
    /// The plan that produced the output (the original plan on a hit).
    pub plan: QueryPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_queries_share_a_key() {
        let a = Query::Triples(TripleQuery::new().subject(" server ").context("ops"));
        let b = Query::Triples(TripleQuery::new().subject("server").context("ops").object(""));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().shape, "triples[subject,context]");

        let c = Query::Triples(TripleQuery::new().subject("Server").context("ops"));
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn tag_order_and_case_do_not_matter() {
        let a = Query::PatternsByContext {
            tags: vec!["Ops".into(), "db".into(), "ops".into()],
        };
        let b = Query::PatternsByContext {
            tags: vec!["db".into(), "ops".into()],
        };
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().text, "patterns|tags=db,ops");
    }

    #[test]
    fn queries_round_trip_through_json() {
        let q = Query::Triples(TripleQuery::new().predicate("is_a").limit(3));
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.contains("\"kind\":\"triples\""));
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
