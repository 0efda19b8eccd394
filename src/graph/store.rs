//! The triple store: validated, indexed, optionally durable.
//!
//! All state sits behind one `RwLock`, so a reader sees a consistent snapshot
//! for the whole call and writes serialize. A write validates first, then
//! commits to the durable tier (when configured) and indexes the record
//! before releasing the lock: a triple is never visible before it is durable
//! and indexed, and is always visible once `add` returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{NoesisResult, StoreError};
use crate::store::{DurableStore, RecordTable, now_millis};

use super::index::TripleIndex;
use super::rules::{Bindings, NewRule, Rule, RuleId, TriplePattern};
use super::{
    NewTriple, Triple, TripleField, TripleId, TripleMetadata, TripleQuery, ValidationStatus, rank,
};

/// Default cap on conclusions a single rule may contribute to one inference pass.
pub const DEFAULT_MAX_INFERRED_PER_RULE: usize = 256;

#[derive(Debug)]
struct StoreState {
    index: TripleIndex,
    rules: BTreeMap<RuleId, Rule>,
    next_triple: u64,
    next_rule: u64,
    last_timestamp: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            index: TripleIndex::new(),
            rules: BTreeMap::new(),
            next_triple: 1,
            next_rule: 1,
            last_timestamp: 0,
        }
    }
}

/// A premise set that satisfies every condition of a rule.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub bindings: Bindings,
    /// One supporting triple per condition, in condition order.
    pub support: Vec<Triple>,
}

/// Validated, indexed triple storage with stored rules.
pub struct TripleStore {
    state: RwLock<StoreState>,
    durable: Option<Arc<DurableStore>>,
    max_inferred_per_rule: usize,
}

impl TripleStore {
    /// Create an empty memory-only store.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_INFERRED_PER_RULE)
    }

    /// Create an empty memory-only store with a custom inference cap.
    pub fn with_limits(max_inferred_per_rule: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            durable: None,
            max_inferred_per_rule: max_inferred_per_rule.max(1),
        }
    }

    /// Open a store that writes through to `durable`, reloading every
    /// persisted triple and rule in insertion order.
    pub fn open(durable: Arc<DurableStore>, max_inferred_per_rule: usize) -> NoesisResult<Self> {
        let mut state = StoreState::default();

        let triples: Vec<(u64, Triple)> = durable.load_all(RecordTable::Triples)?;
        for (raw, triple) in triples {
            state.next_triple = state.next_triple.max(raw + 1);
            state.last_timestamp = state.last_timestamp.max(triple.timestamp);
            state.index.insert(triple);
        }

        let rules: Vec<(u64, Rule)> = durable.load_all(RecordTable::Rules)?;
        for (raw, rule) in rules {
            state.next_rule = state.next_rule.max(raw + 1);
            state.rules.insert(rule.id, rule);
        }

        tracing::info!(
            triples = state.index.len(),
            rules = state.rules.len(),
            "reloaded triple store"
        );

        Ok(Self {
            state: RwLock::new(state),
            durable: Some(durable),
            max_inferred_per_rule: max_inferred_per_rule.max(1),
        })
    }

    fn read(&self, op: &'static str) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned { op })
    }

    fn write(&self, op: &'static str) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned { op })
    }

    /// Validate and store a triple.
    pub fn add(&self, triple: NewTriple) -> NoesisResult<TripleId> {
        self.add_with_status(triple, ValidationStatus::Validated)
    }

    /// Validate and store a triple with an explicit validation status. Used for
    /// write-back of derived conclusions.
    pub(crate) fn add_with_status(
        &self,
        triple: NewTriple,
        validation: ValidationStatus,
    ) -> NoesisResult<TripleId> {
        const OP: &str = "add_triple";
        let triple = triple.validated(OP)?;

        let mut state = self.write(OP)?;
        let raw = state.next_triple;
        let id = TripleId::new(raw).ok_or(StoreError::IdExhausted { op: OP })?;
        let next = raw.checked_add(1).ok_or(StoreError::IdExhausted { op: OP })?;
        let timestamp = now_millis().max(state.last_timestamp);

        let stored = Triple {
            id: Some(id),
            subject: triple.subject,
            predicate: triple.predicate,
            object: triple.object,
            confidence: triple.confidence,
            timestamp,
            metadata: TripleMetadata {
                source: triple.source,
                context: triple.context,
                validation,
            },
        };

        if let Some(durable) = &self.durable {
            durable.put(RecordTable::Triples, raw, &stored)?;
        }

        tracing::debug!(%id, subject = %stored.subject, predicate = %stored.predicate, "stored triple");
        state.index.insert(stored);
        state.next_triple = next;
        state.last_timestamp = timestamp;
        Ok(id)
    }

    /// Fetch a stored triple by id.
    pub fn get(&self, id: TripleId) -> NoesisResult<Triple> {
        const OP: &str = "get_triple";
        let state = self.read(OP)?;
        state.index.get(id).cloned().ok_or_else(|| {
            StoreError::NotFound {
                op: OP,
                kind: "triple",
                id: id.get(),
            }
            .into()
        })
    }

    /// Partial-match query with one inference pass and ranking.
    ///
    /// Candidates come from the most selective bound index. Stored rules whose
    /// conclusion is compatible with the query contribute inferred triples
    /// (not stored). Results are ranked by confidence, recency, then
    /// insertion order.
    pub fn query(&self, query: &TripleQuery) -> NoesisResult<Vec<Triple>> {
        self.query_with_driver(query, None)
    }

    /// Like [`query`](Self::query) but with the driving index chosen by the
    /// caller (the query planner). `None` lets the store choose.
    pub fn query_with_driver(
        &self,
        query: &TripleQuery,
        driver: Option<TripleField>,
    ) -> NoesisResult<Vec<Triple>> {
        const OP: &str = "query_triples";
        query.validate(OP)?;
        let query = query.normalized();

        let state = self.read(OP)?;
        let driver = driver.or_else(|| state.index.most_selective(&query).map(|(f, _)| f));
        let mut results = state.index.scan(&query, driver);
        let inferred = self.inference_pass(&state, &query);
        drop(state);

        results.extend(inferred);
        rank(&mut results);
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Index match only: no inference, insertion order, no limit.
    pub fn lookup(&self, query: &TripleQuery) -> NoesisResult<Vec<Triple>> {
        const OP: &str = "lookup_triples";
        query.validate(OP)?;
        let query = query.normalized();
        let state = self.read(OP)?;
        let driver = state.index.most_selective(&query).map(|(f, _)| f);
        Ok(state.index.scan(&query, driver))
    }

    /// Posting-list sizes for every bound field of a query.
    pub fn cardinalities(&self, query: &TripleQuery) -> NoesisResult<Vec<(TripleField, usize)>> {
        let query = query.normalized();
        let state = self.read("plan_query")?;
        Ok(super::index::bound_fields(&query)
            .map(|(field, value)| (field, state.index.cardinality(field, value)))
            .collect())
    }

    /// Total number of stored triples.
    pub fn len(&self) -> NoesisResult<usize> {
        Ok(self.read("count_triples")?.index.len())
    }

    pub fn is_empty(&self) -> NoesisResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every stored triple in insertion order.
    pub fn all(&self) -> NoesisResult<Vec<Triple>> {
        Ok(self.read("export_triples")?.index.iter().cloned().collect())
    }

    /// The strongest stored triple with this subject, predicate, and object,
    /// optionally restricted to a context.
    pub fn find_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        context: Option<&str>,
    ) -> NoesisResult<Option<Triple>> {
        let mut query = TripleQuery::new()
            .subject(subject)
            .predicate(predicate)
            .object(object);
        query.context = context.map(str::to_string);
        let mut hits = self.lookup(&query)?;
        rank(&mut hits);
        Ok(hits.into_iter().next())
    }

    /// Whether the fact is stored (in `context`, when given).
    pub fn contains(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        context: Option<&str>,
    ) -> NoesisResult<bool> {
        Ok(self.find_fact(subject, predicate, object, context)?.is_some())
    }

    /// Number of stored triples with `field == value`.
    pub fn cardinality(&self, field: TripleField, value: &str) -> NoesisResult<usize> {
        Ok(self.read("plan_query")?.index.cardinality(field, value.trim()))
    }

    /// Whether a predicate appears in any stored triple or rule.
    pub fn is_known_predicate(&self, predicate: &str) -> NoesisResult<bool> {
        let state = self.read("known_predicate")?;
        if state.index.has_predicate(predicate) {
            return Ok(true);
        }
        Ok(state.rules.values().any(|r| {
            r.conditions
                .iter()
                .chain(std::iter::once(&r.conclusion))
                .any(|p| matches!(&p.predicate, super::rules::Term::Const(c) if c == predicate))
        }))
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Validate, compile, and store a rule.
    pub fn add_rule(&self, rule: NewRule) -> NoesisResult<RuleId> {
        const OP: &str = "add_rule";
        let mut state = self.write(OP)?;
        let raw = state.next_rule;
        let id = RuleId::new(raw).ok_or(StoreError::IdExhausted { op: OP })?;
        let rule = rule.compile(OP, id)?;

        if let Some(durable) = &self.durable {
            durable.put(RecordTable::Rules, raw, &rule)?;
        }
        tracing::debug!(%id, rule = %rule, "stored rule");
        state.rules.insert(id, rule);
        state.next_rule = raw + 1;
        Ok(id)
    }

    pub fn get_rule(&self, id: RuleId) -> NoesisResult<Rule> {
        const OP: &str = "get_rule";
        let state = self.read(OP)?;
        state.rules.get(&id).cloned().ok_or_else(|| {
            StoreError::NotFound {
                op: OP,
                kind: "rule",
                id: id.get(),
            }
            .into()
        })
    }

    /// Every stored rule in insertion order.
    pub fn rules(&self) -> NoesisResult<Vec<Rule>> {
        Ok(self.read("list_rules")?.rules.values().cloned().collect())
    }

    /// Rules applicable to a domain (see [`Rule::applies_to`]).
    pub fn rules_for_domain(&self, domain: &str) -> NoesisResult<Vec<Rule>> {
        Ok(self
            .read("list_rules")?
            .rules
            .values()
            .filter(|r| r.applies_to(domain))
            .cloned()
            .collect())
    }

    /// Every way the rule's conditions are satisfied by stored triples,
    /// starting from `seed` bindings, capped at the store's inference limit.
    pub fn match_rule(
        &self,
        rule: &Rule,
        seed: &Bindings,
        context: Option<&str>,
    ) -> NoesisResult<Vec<RuleMatch>> {
        let state = self.read("match_rule")?;
        let mut out = Vec::new();
        solve(
            &state.index,
            &rule.conditions,
            seed.clone(),
            context,
            &mut Vec::new(),
            &mut out,
            self.max_inferred_per_rule,
        );
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Inference
    // -----------------------------------------------------------------------

    /// One forward pass of every applicable rule, restricted to conclusions
    /// that match the query and are not already stored.
    fn inference_pass(&self, state: &StoreState, query: &TripleQuery) -> Vec<Triple> {
        let context = query.context.as_deref();
        let mut derived: HashMap<(String, String, String), Triple> = HashMap::new();

        for rule in state.rules.values() {
            if let Some(ctx) = context {
                if !rule.applies_to(ctx) {
                    continue;
                }
            }
            let Some(seed) = rule.conclusion.unify_values(
                query.subject.as_deref(),
                query.predicate.as_deref(),
                query.object.as_deref(),
                &Bindings::new(),
            ) else {
                continue;
            };

            let mut matches = Vec::new();
            solve(
                &state.index,
                &rule.conditions,
                seed,
                context,
                &mut Vec::new(),
                &mut matches,
                self.max_inferred_per_rule,
            );

            for m in matches {
                let Some((s, p, o)) = rule.conclusion.instantiate(&m.bindings) else {
                    continue;
                };
                let already_stored = state
                    .index
                    .ids_for(TripleField::Subject, &s)
                    .iter()
                    .filter_map(|id| state.index.get(*id))
                    .any(|t| {
                        t.same_fact(&s, &p, &o) && context.is_none_or(|c| c == t.metadata.context)
                    });
                if already_stored {
                    continue;
                }

                let weakest = m
                    .support
                    .iter()
                    .map(|t| t.confidence)
                    .fold(1.0f32, f32::min);
                let timestamp = m.support.iter().map(|t| t.timestamp).max().unwrap_or(0);
                let candidate = Triple {
                    id: None,
                    subject: s.clone(),
                    predicate: p.clone(),
                    object: o.clone(),
                    confidence: rule.derive_confidence(weakest),
                    timestamp,
                    metadata: TripleMetadata {
                        source: format!("inference:{}", rule.name),
                        context: context
                            .map(str::to_string)
                            .or_else(|| rule.domain.clone())
                            .unwrap_or_default(),
                        validation: ValidationStatus::Inferred {
                            rule: rule.name.clone(),
                        },
                    },
                };
                if !query.matches(&candidate) {
                    continue;
                }
                let key = (s, p, o);
                let stronger = derived
                    .get(&key)
                    .is_none_or(|existing| candidate.confidence > existing.confidence);
                if stronger {
                    derived.insert(key, candidate);
                }
            }
        }

        if !derived.is_empty() {
            tracing::debug!(inferred = derived.len(), "query inference pass");
        }
        derived.into_values().collect()
    }
}

/// Backtracking join of rule conditions against the index.
fn solve(
    index: &TripleIndex,
    conditions: &[TriplePattern],
    bindings: Bindings,
    context: Option<&str>,
    support: &mut Vec<Triple>,
    out: &mut Vec<RuleMatch>,
    limit: usize,
) {
    if out.len() >= limit {
        return;
    }
    let Some((first, rest)) = conditions.split_first() else {
        out.push(RuleMatch {
            bindings,
            support: support.clone(),
        });
        return;
    };

    let mut query = first.to_query(&bindings);
    query.context = context.map(str::to_string);
    let driver = index.most_selective(&query).map(|(f, _)| f);
    for triple in index.scan(&query, driver) {
        if out.len() >= limit {
            return;
        }
        if let Some(next) = first.unify(&triple, &bindings) {
            support.push(triple);
            solve(index, rest, next, context, support, out, limit);
            support.pop();
        }
    }
}

impl Default for TripleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleStore")
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_triple() -> NewTriple {
        NewTriple::new("server", "has_status", "healthy")
            .with_confidence(0.9)
            .with_source("monitor")
            .with_context("ops")
    }

    #[test]
    fn add_then_query_returns_exactly_the_triple() {
        let store = TripleStore::new();
        let id = store.add(server_triple()).unwrap();

        let hits = store.query(&TripleQuery::new().subject("server")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, Some(id));
        assert_eq!(hits[0].object, "healthy");
        assert_eq!(hits[0].metadata.source, "monitor");
        assert_eq!(hits[0].metadata.context, "ops");
        assert_eq!(hits[0].metadata.validation, ValidationStatus::Validated);
    }

    #[test]
    fn invalid_triples_never_become_visible() {
        let store = TripleStore::new();
        assert!(store.add(NewTriple::new("", "p", "o")).is_err());
        assert!(store.add(NewTriple::new("s", "p", "o").with_confidence(-0.1)).is_err());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = TripleStore::new();
        let err = store.get(TripleId::new(99).unwrap()).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("get_triple"));
    }

    #[test]
    fn read_after_write_keeps_earlier_order() {
        let store = TripleStore::new();
        let a = store.add(NewTriple::new("x", "p", "a").with_confidence(0.9)).unwrap();
        let b = store.add(NewTriple::new("x", "p", "b").with_confidence(0.9)).unwrap();
        let c = store.add(NewTriple::new("x", "p", "c").with_confidence(0.95)).unwrap();

        let before: Vec<_> = store
            .query(&TripleQuery::new().subject("x"))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();

        let d = store.add(NewTriple::new("x", "p", "d").with_confidence(0.9)).unwrap();
        let after: Vec<_> = store
            .query(&TripleQuery::new().subject("x"))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();

        assert!(after.contains(&Some(d)));
        let kept: Vec<_> = after.iter().filter(|id| **id != Some(d)).cloned().collect();
        assert_eq!(kept, before);
        assert_eq!(after[0], Some(c));

        // Equal confidence: newest first, same millisecond by id.
        let (ta, tb) = (store.get(a).unwrap().timestamp, store.get(b).unwrap().timestamp);
        let pos_a = after.iter().position(|id| *id == Some(a)).unwrap();
        let pos_b = after.iter().position(|id| *id == Some(b)).unwrap();
        assert_eq!(pos_a < pos_b, ta == tb);
    }

    #[test]
    fn equal_confidence_ranks_newest_first() {
        let store = TripleStore::new();
        let older = store.add(NewTriple::new("x", "p", "a").with_confidence(0.9)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));
        let newer = store.add(NewTriple::new("x", "p", "b").with_confidence(0.9)).unwrap();

        let ids: Vec<_> = store
            .query(&TripleQuery::new().subject("x"))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![Some(newer), Some(older)]);
    }

    #[test]
    fn query_runs_one_inference_pass() {
        let store = TripleStore::new();
        store
            .add(NewTriple::new("dog", "is_a", "mammal").with_confidence(0.8))
            .unwrap();
        store
            .add_rule(
                NewRule::new("mammal_fur", ["?x is_a mammal"], "?x has fur")
                    .with_confidence(0.9)
                    .with_priority(0.5),
            )
            .unwrap();
        store
            .add_rule(NewRule::new("fur_warm", ["?x has fur"], "?x is warm"))
            .unwrap();

        let hits = store.query(&TripleQuery::new().subject("dog")).unwrap();
        let fur = hits.iter().find(|t| t.predicate == "has").unwrap();
        assert!(fur.id.is_none());
        assert!((fur.confidence - 0.4).abs() < 1e-6);
        assert_eq!(
            fur.metadata.validation,
            ValidationStatus::Inferred {
                rule: "mammal_fur".into()
            }
        );
        // One pass only: the second rule needs the first rule's output.
        assert!(!hits.iter().any(|t| t.predicate == "is"));
        assert_eq!(hits[0].predicate, "is_a");
    }

    #[test]
    fn inference_skips_facts_already_stored() {
        let store = TripleStore::new();
        store.add(NewTriple::new("dog", "is_a", "mammal")).unwrap();
        store.add(NewTriple::new("dog", "has", "fur")).unwrap();
        store
            .add_rule(NewRule::new("mammal_fur", ["?x is_a mammal"], "?x has fur"))
            .unwrap();
        let hits = store.query(&TripleQuery::new().predicate("has")).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].id.is_some());
    }

    #[test]
    fn multi_condition_rules_join_on_shared_variables() {
        let store = TripleStore::new();
        store.add(NewTriple::new("a", "parent_of", "b")).unwrap();
        store.add(NewTriple::new("b", "parent_of", "c")).unwrap();
        store
            .add_rule(NewRule::new(
                "grandparent",
                ["?x parent_of ?y", "?y parent_of ?z"],
                "?x grandparent_of ?z",
            ))
            .unwrap();
        let hits = store
            .query(&TripleQuery::new().predicate("grandparent_of"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].same_fact("a", "grandparent_of", "c"));
    }

    #[test]
    fn lookup_skips_inference() {
        let store = TripleStore::new();
        store.add(NewTriple::new("dog", "is_a", "mammal")).unwrap();
        store
            .add_rule(NewRule::new("fur", ["?x is_a mammal"], "?x has fur"))
            .unwrap();
        assert_eq!(store.lookup(&TripleQuery::new().subject("dog")).unwrap().len(), 1);
        assert_eq!(store.query(&TripleQuery::new().subject("dog")).unwrap().len(), 2);
    }

    #[test]
    fn durable_store_reloads_in_insertion_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let ids: Vec<TripleId>;
        {
            let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
            let store = TripleStore::open(durable, 16).unwrap();
            ids = (0..3)
                .map(|i| {
                    store
                        .add(NewTriple::new("x", "p", format!("o{i}")).with_confidence(0.5))
                        .unwrap()
                })
                .collect();
            store
                .add_rule(NewRule::new("r", ["?a p ?b"], "?a q ?b"))
                .unwrap();
        }

        let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
        let store = TripleStore::open(durable, 16).unwrap();
        let all: Vec<TripleId> = store.all().unwrap().iter().filter_map(|t| t.id).collect();
        assert_eq!(all, ids);
        assert_eq!(store.rules().unwrap().len(), 1);

        let next = store.add(NewTriple::new("y", "p", "z")).unwrap();
        assert!(next > ids[2]);
    }

    #[test]
    fn concurrent_adds_are_all_visible() {
        let store = Arc::new(TripleStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        store
                            .add(NewTriple::new(format!("s{i}"), "p", format!("o{j}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 200);
        assert_eq!(store.query(&TripleQuery::new().subject("s3")).unwrap().len(), 25);
    }
}
