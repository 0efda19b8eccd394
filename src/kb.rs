//! Shared handle to the stores and the query cache.
//!
//! Reads go through the [`QueryCache`]; writes go to the stores and then
//! clear the cache when `invalidate_on_write` is set, so a cached result never
//! outlives a write that could change it. Cloning is cheap (three `Arc`s).

use std::sync::Arc;

use crate::error::NoesisResult;
use crate::graph::rules::{NewRule, Rule, RuleId};
use crate::graph::store::TripleStore;
use crate::graph::{NewTriple, Triple, TripleId, TripleQuery, ValidationStatus};
use crate::pattern::{NewPattern, Pattern, PatternId, PatternStore};
use crate::provenance::InferenceMode;
use crate::query::{Query, QueryCache, QueryOutput, QueryResponse};

#[derive(Clone)]
pub struct KnowledgeBase {
    pub triples: Arc<TripleStore>,
    pub patterns: Arc<PatternStore>,
    pub cache: Arc<QueryCache>,
    invalidate_on_write: bool,
}

impl KnowledgeBase {
    pub fn new(
        triples: Arc<TripleStore>,
        patterns: Arc<PatternStore>,
        cache: Arc<QueryCache>,
        invalidate_on_write: bool,
    ) -> Self {
        Self {
            triples,
            patterns,
            cache,
            invalidate_on_write,
        }
    }

    /// Run a query through the cache.
    pub fn execute(&self, query: &Query) -> NoesisResult<QueryResponse> {
        self.cache.execute(query, &self.triples, &self.patterns)
    }

    /// Triple rows for a query, through the cache.
    pub fn fetch_triples(&self, query: TripleQuery) -> NoesisResult<Vec<Triple>> {
        match self.execute(&Query::Triples(query))?.output {
            QueryOutput::Triples(rows) => Ok(rows),
            QueryOutput::Patterns(_) => Ok(Vec::new()),
        }
    }

    /// Stored (not inferred) triple rows for a query, through the cache.
    pub fn fetch_stored(&self, query: TripleQuery) -> NoesisResult<Vec<Triple>> {
        let mut rows = self.fetch_triples(query)?;
        rows.retain(|t| t.id.is_some());
        Ok(rows)
    }

    /// Active patterns for context tags, through the cache.
    pub fn fetch_patterns<S: AsRef<str>>(&self, tags: &[S]) -> NoesisResult<Vec<Pattern>> {
        let tags = tags.iter().map(|t| t.as_ref().to_string()).collect();
        match self.execute(&Query::PatternsByContext { tags })?.output {
            QueryOutput::Patterns(rows) => Ok(rows),
            QueryOutput::Triples(_) => Ok(Vec::new()),
        }
    }

    fn after_write(&self) {
        if self.invalidate_on_write {
            self.cache.clear();
        }
    }

    pub fn add_triple(&self, triple: NewTriple) -> NoesisResult<TripleId> {
        let id = self.triples.add(triple)?;
        self.after_write();
        Ok(id)
    }

    /// Store a conclusion produced by a reasoning mode, tagged with the mode.
    pub fn add_derived(&self, triple: NewTriple, mode: InferenceMode) -> NoesisResult<TripleId> {
        let triple = triple.with_source(mode.source_tag());
        let id = self
            .triples
            .add_with_status(triple, ValidationStatus::Derived { mode })?;
        self.after_write();
        Ok(id)
    }

    pub fn add_rule(&self, rule: NewRule) -> NoesisResult<RuleId> {
        let id = self.triples.add_rule(rule)?;
        self.after_write();
        Ok(id)
    }

    pub fn rules_for_domain(&self, domain: &str) -> NoesisResult<Vec<Rule>> {
        self.triples.rules_for_domain(domain)
    }

    pub fn add_pattern(&self, pattern: NewPattern) -> NoesisResult<PatternId> {
        let id = self.patterns.add(pattern)?;
        self.after_write();
        Ok(id)
    }

    pub fn record_usage(&self, id: PatternId, success: bool) -> NoesisResult<Pattern> {
        let pattern = self.patterns.record_usage(id, success)?;
        self.after_write();
        Ok(pattern)
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("triples", &self.triples)
            .field("patterns", &self.patterns)
            .field("invalidate_on_write", &self.invalidate_on_write)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_kb() -> KnowledgeBase {
    KnowledgeBase::new(
        Arc::new(TripleStore::new()),
        Arc::new(PatternStore::new()),
        Arc::new(QueryCache::new(256, std::time::Duration::from_secs(60), 16)),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_clear_the_cache() {
        let kb = test_kb();
        kb.add_triple(NewTriple::new("a", "p", "b")).unwrap();
        assert_eq!(kb.fetch_triples(TripleQuery::new().subject("a")).unwrap().len(), 1);
        assert_eq!(kb.cache.len(), 1);

        kb.add_triple(NewTriple::new("a", "p", "c")).unwrap();
        assert!(kb.cache.is_empty());
        assert_eq!(kb.fetch_triples(TripleQuery::new().subject("a")).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_readers_never_cache_past_a_write() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let kb = test_kb();
        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let kb = kb.clone();
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        kb.fetch_triples(TripleQuery::new().subject("x")).unwrap();
                    }
                })
            })
            .collect();

        for i in 0..1000 {
            kb.add_triple(NewTriple::new("x", "p", format!("o{i}"))).unwrap();
            let rows = kb.fetch_triples(TripleQuery::new().subject("x")).unwrap();
            assert_eq!(rows.len(), i + 1, "stale rows after write {i}");
        }

        done.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn derived_triples_carry_their_mode() {
        let kb = test_kb();
        let id = kb
            .add_derived(NewTriple::new("a", "p", "b"), InferenceMode::Deduction)
            .unwrap();
        let t = kb.triples.get(id).unwrap();
        assert_eq!(t.metadata.source, "reasoning:deduction");
        assert_eq!(
            t.metadata.validation,
            ValidationStatus::Derived {
                mode: InferenceMode::Deduction
            }
        );
    }
}
