//! Reusable reasoning patterns with context-aware ranking.
//!
//! A pattern is a canonicalized JSON structure tagged with the contexts it
//! applies to. Structures are normalized before storage (sorted keys,
//! NFKC-folded lower-case strings with collapsed whitespace) so that two
//! registrations of the same shape compare equal byte for byte. Patterns are
//! never deleted: a higher-confidence pattern of the same kind and structure
//! with overlapping context supersedes the weaker one, which then drops out
//! of context lookups.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, StoreError, ValidationError};
use crate::explore::text::normalize;
use crate::graph::{check_unit, non_empty};
use crate::store::{DurableStore, RecordTable, now_millis};

/// Unique identifier for a stored pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PatternId(NonZeroU64);

impl PatternId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(PatternId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pattern:{}", self.0)
    }
}

/// Application statistics for a pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternUsage {
    pub count: u64,
    /// Running mean of successes, in [0, 1].
    pub success_rate: f32,
    /// Milliseconds since the UNIX epoch of the last recorded use.
    pub last_used: Option<u64>,
}

impl PatternUsage {
    fn record(&mut self, success: bool, now: u64) {
        self.count += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / self.count as f32;
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
        self.last_used = Some(now);
    }
}

/// A stored pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub kind: String,
    /// Canonical JSON text of the structure.
    pub structure: String,
    pub context: BTreeSet<String>,
    pub confidence: f32,
    pub usage: PatternUsage,
    pub source: String,
    pub superseded_by: Option<PatternId>,
    pub created_at: u64,
}

impl Pattern {
    /// Whether the pattern still takes part in lookups.
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// The structure parsed back into JSON.
    pub fn structure_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.structure).unwrap_or(serde_json::Value::Null)
    }

    /// Look up a top-level string field of the structure.
    pub fn field(&self, key: &str) -> Option<String> {
        match self.structure_value().get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn overlap(&self, tags: &BTreeSet<String>) -> usize {
        self.context.intersection(tags).count()
    }
}

/// A pattern submitted for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPattern {
    pub kind: String,
    pub structure: serde_json::Value,
    pub context: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_confidence() -> f32 {
    0.5
}

fn default_source() -> String {
    "user".into()
}

impl NewPattern {
    pub fn new(
        kind: impl Into<String>,
        structure: serde_json::Value,
        context: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            kind: kind.into(),
            structure,
            context: context.into_iter().map(Into::into).collect(),
            confidence: default_confidence(),
            source: default_source(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Canonical form of a structure: keys and strings normalized, keys sorted.
///
/// Normalization folds case and collapses whitespace, so structures that
/// differ only in those respects share one canonical form and compete for
/// supersession.
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(normalize(s)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (normalize(k), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        other => other.clone(),
    }
}

/// Normalize context tags: normalized, blank tags dropped, deduplicated.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| normalize(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug)]
struct PatternState {
    patterns: BTreeMap<PatternId, Pattern>,
    next_id: u64,
}

/// Context-indexed pattern storage.
pub struct PatternStore {
    state: RwLock<PatternState>,
    durable: Option<Arc<DurableStore>>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PatternState {
                patterns: BTreeMap::new(),
                next_id: 1,
            }),
            durable: None,
        }
    }

    /// Open a store backed by `durable`, reloading patterns in insertion order.
    pub fn open(durable: Arc<DurableStore>) -> NoesisResult<Self> {
        let mut patterns = BTreeMap::new();
        let mut next_id = 1;
        let loaded: Vec<(u64, Pattern)> = durable.load_all(RecordTable::Patterns)?;
        for (raw, pattern) in loaded {
            next_id = next_id.max(raw + 1);
            patterns.insert(pattern.id, pattern);
        }
        tracing::info!(patterns = patterns.len(), "reloaded pattern store");
        Ok(Self {
            state: RwLock::new(PatternState { patterns, next_id }),
            durable: Some(durable),
        })
    }

    fn read(&self, op: &'static str) -> Result<RwLockReadGuard<'_, PatternState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned { op })
    }

    fn write(&self, op: &'static str) -> Result<RwLockWriteGuard<'_, PatternState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned { op })
    }

    fn persist(&self, pattern: &Pattern) -> Result<(), StoreError> {
        if let Some(durable) = &self.durable {
            durable.put(RecordTable::Patterns, pattern.id.get(), pattern)?;
        }
        Ok(())
    }

    /// Validate, canonicalize, and store a pattern, applying supersession
    /// against active patterns of the same kind and structure.
    pub fn add(&self, pattern: NewPattern) -> NoesisResult<PatternId> {
        const OP: &str = "add_pattern";
        let kind = normalize(&non_empty(OP, "kind", &pattern.kind)?);
        if pattern.structure.is_null() {
            return Err(ValidationError::EmptyField {
                op: OP,
                field: "structure",
            }
            .into());
        }
        let context = normalize_tags(&pattern.context);
        if context.is_empty() {
            return Err(ValidationError::EmptyField {
                op: OP,
                field: "context",
            }
            .into());
        }
        check_unit(OP, "confidence", pattern.confidence)?;
        let source = non_empty(OP, "source", &pattern.source)?;
        let structure = serde_json::to_string(&canonicalize(&pattern.structure)).map_err(|e| {
            ValidationError::Malformed {
                op: OP,
                input: pattern.structure.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut state = self.write(OP)?;
        let raw = state.next_id;
        let id = PatternId::new(raw).ok_or(StoreError::IdExhausted { op: OP })?;

        let rivals: Vec<PatternId> = state
            .patterns
            .values()
            .filter(|p| {
                p.is_active()
                    && p.kind == kind
                    && p.structure == structure
                    && p.overlap(&context) > 0
            })
            .map(|p| p.id)
            .collect();

        let mut superseded_by = None;
        let mut displaced = Vec::new();
        for rival_id in rivals {
            let Some(rival) = state.patterns.get(&rival_id) else {
                continue;
            };
            if pattern.confidence > rival.confidence {
                displaced.push(rival_id);
            } else if superseded_by.is_none() {
                superseded_by = Some(rival_id);
            }
        }

        let stored = Pattern {
            id,
            kind,
            structure,
            context,
            confidence: pattern.confidence,
            usage: PatternUsage::default(),
            source,
            superseded_by,
            created_at: now_millis(),
        };
        let demoted: Vec<Pattern> = displaced
            .iter()
            .filter_map(|rival_id| state.patterns.get(rival_id))
            .map(|rival| Pattern {
                superseded_by: Some(id),
                ..rival.clone()
            })
            .collect();

        // The new pattern and every demoted rival commit together or not at all.
        if let Some(durable) = &self.durable {
            let records: Vec<(u64, &Pattern)> = std::iter::once(&stored)
                .chain(&demoted)
                .map(|p| (p.id.get(), p))
                .collect();
            durable.put_all(RecordTable::Patterns, &records)?;
        }

        for rival in demoted {
            tracing::debug!(rival_id = %rival.id, by = %id, "pattern superseded");
            state.patterns.insert(rival.id, rival);
        }
        state.patterns.insert(id, stored);
        state.next_id = raw + 1;
        Ok(id)
    }

    pub fn get(&self, id: PatternId) -> NoesisResult<Pattern> {
        const OP: &str = "get_pattern";
        let state = self.read(OP)?;
        state.patterns.get(&id).cloned().ok_or_else(|| {
            StoreError::NotFound {
                op: OP,
                kind: "pattern",
                id: id.get(),
            }
            .into()
        })
    }

    /// Active patterns whose context intersects `tags`, ranked by overlap,
    /// confidence, and success rate (all descending), ties by id.
    pub fn find_by_context<S: AsRef<str>>(&self, tags: &[S]) -> NoesisResult<Vec<Pattern>> {
        let tags = normalize_tags(tags);
        let state = self.read("find_patterns")?;
        let mut hits: Vec<(usize, &Pattern)> = state
            .patterns
            .values()
            .filter(|p| p.is_active())
            .map(|p| (p.overlap(&tags), p))
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        hits.sort_by(|(oa, a), (ob, b)| {
            ob.cmp(oa)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| b.usage.success_rate.total_cmp(&a.usage.success_rate))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits.into_iter().map(|(_, p)| p.clone()).collect())
    }

    /// Record one application of a pattern.
    pub fn record_usage(&self, id: PatternId, success: bool) -> NoesisResult<Pattern> {
        const OP: &str = "record_pattern_usage";
        let mut state = self.write(OP)?;
        let pattern = state.patterns.get_mut(&id).ok_or(StoreError::NotFound {
            op: OP,
            kind: "pattern",
            id: id.get(),
        })?;
        let mut updated = pattern.clone();
        updated.usage.record(success, now_millis());
        self.persist(&updated)?;
        *pattern = updated.clone();
        Ok(updated)
    }

    pub fn len(&self) -> NoesisResult<usize> {
        Ok(self.read("count_patterns")?.patterns.len())
    }

    pub fn is_empty(&self) -> NoesisResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every pattern, including superseded ones, in insertion order.
    pub fn all(&self) -> NoesisResult<Vec<Pattern>> {
        Ok(self
            .read("export_patterns")?
            .patterns
            .values()
            .cloned()
            .collect())
    }
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatternStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternStore")
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_structure_ignores_key_order_case_and_spacing() {
        let store = PatternStore::new();
        let a = store
            .add(NewPattern::new(
                "diagnosis",
                json!({"Symptom": "High  Latency", "cause": "GC"}),
                ["ops"],
            ))
            .unwrap();
        let b = store
            .add(
                NewPattern::new(
                    "Diagnosis",
                    json!({"cause": "gc", "symptom": "high latency"}),
                    ["OPS"],
                )
                .with_confidence(0.9),
            )
            .unwrap();

        let first = store.get(a).unwrap();
        let second = store.get(b).unwrap();
        assert_eq!(first.structure, second.structure);
        assert_eq!(first.structure, r#"{"cause":"gc","symptom":"high latency"}"#);
        assert_eq!(first.superseded_by, Some(b));
        assert!(second.is_active());
    }

    #[test]
    fn weaker_duplicate_is_born_superseded() {
        let store = PatternStore::new();
        let strong = store
            .add(NewPattern::new("k", json!({"x": 1}), ["a", "b"]).with_confidence(0.8))
            .unwrap();
        let weak = store
            .add(NewPattern::new("k", json!({"x": 1}), ["b"]).with_confidence(0.4))
            .unwrap();
        assert_eq!(store.get(weak).unwrap().superseded_by, Some(strong));
        let found = store.find_by_context(&["b"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, strong);
    }

    #[test]
    fn disjoint_contexts_do_not_supersede() {
        let store = PatternStore::new();
        let a = store
            .add(NewPattern::new("k", json!({"x": 1}), ["a"]).with_confidence(0.4))
            .unwrap();
        store
            .add(NewPattern::new("k", json!({"x": 1}), ["b"]).with_confidence(0.9))
            .unwrap();
        assert!(store.get(a).unwrap().is_active());
    }

    #[test]
    fn find_by_context_ranks_overlap_then_confidence_then_success() {
        let store = PatternStore::new();
        let one_tag = store
            .add(NewPattern::new("k1", json!("a"), ["ops"]).with_confidence(0.9))
            .unwrap();
        let two_tags = store
            .add(NewPattern::new("k2", json!("b"), ["ops", "db"]).with_confidence(0.3))
            .unwrap();
        let tied_low = store
            .add(NewPattern::new("k3", json!("c"), ["ops"]).with_confidence(0.9))
            .unwrap();
        store.record_usage(tied_low, true).unwrap();
        store.add(NewPattern::new("k4", json!("d"), ["web"])).unwrap();

        let ids: Vec<PatternId> = store
            .find_by_context(&["ops", "db"])
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![two_tags, tied_low, one_tag]);
    }

    #[test]
    fn record_usage_keeps_a_running_mean() {
        let store = PatternStore::new();
        let id = store.add(NewPattern::new("k", json!({}), ["x"])).unwrap();
        store.record_usage(id, true).unwrap();
        store.record_usage(id, false).unwrap();
        let p = store.record_usage(id, true).unwrap();
        assert_eq!(p.usage.count, 3);
        assert!((p.usage.success_rate - 2.0 / 3.0).abs() < 1e-6);
        assert!(p.usage.last_used.is_some());

        let missing = PatternId::new(42).unwrap();
        assert!(store.record_usage(missing, true).unwrap_err().is_not_found());
    }

    #[test]
    fn validation_rejects_bad_patterns() {
        let store = PatternStore::new();
        assert!(store.add(NewPattern::new(" ", json!({}), ["x"])).is_err());
        assert!(store.add(NewPattern::new("k", json!(null), ["x"])).is_err());
        assert!(store.add(NewPattern::new("k", json!({}), ["  "])).is_err());
        assert!(store
            .add(NewPattern::new("k", json!({}), ["x"]).with_confidence(2.0))
            .is_err());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn patterns_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let id;
        {
            let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
            let store = PatternStore::open(durable).unwrap();
            id = store.add(NewPattern::new("k", json!({"a": [1, 2]}), ["x"])).unwrap();
            store.record_usage(id, true).unwrap();
        }
        let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
        let store = PatternStore::open(durable).unwrap();
        let p = store.get(id).unwrap();
        assert_eq!(p.usage.count, 1);
        assert_eq!(p.structure_value(), json!({"a": [1, 2]}));
        let next = store.add(NewPattern::new("k2", json!(1), ["x"])).unwrap();
        assert!(next > id);
    }

    #[test]
    fn supersession_is_durable_on_both_sides() {
        let dir = tempfile::TempDir::new().unwrap();
        let (weak, strong);
        {
            let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
            let store = PatternStore::open(durable).unwrap();
            weak = store
                .add(NewPattern::new("k", json!({"x": 1}), ["ops"]).with_confidence(0.3))
                .unwrap();
            strong = store
                .add(NewPattern::new("k", json!({"x": 1}), ["ops"]).with_confidence(0.9))
                .unwrap();
        }

        let durable = Arc::new(DurableStore::open(dir.path()).unwrap());
        let on_disk: Vec<(u64, Pattern)> = durable.load_all(RecordTable::Patterns).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[0].1.superseded_by, Some(strong));
        assert!(on_disk[1].1.is_active());

        let store = PatternStore::open(durable).unwrap();
        assert_eq!(store.get(weak).unwrap().superseded_by, Some(strong));
        let found = store.find_by_context(&["ops"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, strong);
    }
}
