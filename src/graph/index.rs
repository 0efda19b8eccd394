//! In-memory triple index.
//!
//! Owns the triple records plus one posting list per indexed field value, so
//! any single-field lookup is one hash access rather than a scan. Posting lists
//! are kept in insertion order (ids are monotonic), which keeps scans and
//! tie-breaking stable. The index is not synchronized; [`TripleStore`]
//! guards it with a lock.
//!
//! [`TripleStore`]: super::store::TripleStore

use std::collections::{BTreeMap, HashMap};

use super::{Triple, TripleField, TripleId, TripleQuery};

/// Records plus secondary indexes.
#[derive(Debug, Default)]
pub struct TripleIndex {
    by_id: BTreeMap<TripleId, Triple>,
    subject_index: HashMap<String, Vec<TripleId>>,
    predicate_index: HashMap<String, Vec<TripleId>>,
    object_index: HashMap<String, Vec<TripleId>>,
    context_index: HashMap<String, Vec<TripleId>>,
}

impl TripleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stored triple. The triple must carry an id larger than every
    /// id already present.
    pub fn insert(&mut self, triple: Triple) {
        let Some(id) = triple.id else {
            return;
        };
        self.subject_index
            .entry(triple.subject.clone())
            .or_default()
            .push(id);
        self.predicate_index
            .entry(triple.predicate.clone())
            .or_default()
            .push(id);
        self.object_index
            .entry(triple.object.clone())
            .or_default()
            .push(id);
        self.context_index
            .entry(triple.metadata.context.clone())
            .or_default()
            .push(id);
        self.by_id.insert(id, triple);
    }

    pub fn get(&self, id: TripleId) -> Option<&Triple> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All triples in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.by_id.values()
    }

    fn postings(&self, field: TripleField) -> &HashMap<String, Vec<TripleId>> {
        match field {
            TripleField::Subject => &self.subject_index,
            TripleField::Predicate => &self.predicate_index,
            TripleField::Object => &self.object_index,
            TripleField::Context => &self.context_index,
        }
    }

    /// Number of triples with `field == value`.
    pub fn cardinality(&self, field: TripleField, value: &str) -> usize {
        self.postings(field).get(value).map_or(0, Vec::len)
    }

    /// Ids of triples with `field == value`, in insertion order.
    pub fn ids_for(&self, field: TripleField, value: &str) -> &[TripleId] {
        self.postings(field)
            .get(value)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a predicate occurs in the index.
    pub fn has_predicate(&self, predicate: &str) -> bool {
        self.predicate_index.contains_key(predicate)
    }

    /// Match a query by probing the posting list of `driver` and filtering
    /// the rest. With no driver, scans all triples. Results are in insertion
    /// order; ranking and limits are the caller's concern.
    pub fn scan(&self, query: &TripleQuery, driver: Option<TripleField>) -> Vec<Triple> {
        let driver_value = driver.and_then(|field| bound_value(query, field).map(|v| (field, v)));
        match driver_value {
            Some((field, value)) => self
                .ids_for(field, value)
                .iter()
                .filter_map(|id| self.by_id.get(id))
                .filter(|t| query.matches(t))
                .cloned()
                .collect(),
            None => self.iter().filter(|t| query.matches(t)).cloned().collect(),
        }
    }

    /// The bound field with the smallest posting list, with its size.
    pub fn most_selective(&self, query: &TripleQuery) -> Option<(TripleField, usize)> {
        bound_fields(query)
            .map(|(field, value)| (field, self.cardinality(field, value)))
            .min_by_key(|&(_, n)| n)
    }
}

/// The value a query binds for a field, if any.
pub fn bound_value(query: &TripleQuery, field: TripleField) -> Option<&str> {
    match field {
        TripleField::Subject => query.subject.as_deref(),
        TripleField::Predicate => query.predicate.as_deref(),
        TripleField::Object => query.object.as_deref(),
        TripleField::Context => query.context.as_deref(),
    }
}

/// Every bound field of a query with its value, in a fixed field order.
pub fn bound_fields(query: &TripleQuery) -> impl Iterator<Item = (TripleField, &str)> {
    [
        TripleField::Subject,
        TripleField::Predicate,
        TripleField::Object,
        TripleField::Context,
    ]
    .into_iter()
    .filter_map(move |field| bound_value(query, field).map(|v| (field, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{TripleMetadata, ValidationStatus};

    fn t(id: u64, s: &str, p: &str, o: &str, ctx: &str) -> Triple {
        Triple {
            id: TripleId::new(id),
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            confidence: 1.0,
            timestamp: id,
            metadata: TripleMetadata {
                source: "test".into(),
                context: ctx.into(),
                validation: ValidationStatus::Validated,
            },
        }
    }

    fn sample() -> TripleIndex {
        let mut idx = TripleIndex::new();
        idx.insert(t(1, "dog", "is_a", "mammal", "bio"));
        idx.insert(t(2, "cat", "is_a", "mammal", "bio"));
        idx.insert(t(3, "dog", "has", "fur", "bio"));
        idx.insert(t(4, "server", "has_status", "healthy", "ops"));
        idx
    }

    #[test]
    fn single_field_lookups_use_postings() {
        let idx = sample();
        assert_eq!(idx.cardinality(TripleField::Subject, "dog"), 2);
        assert_eq!(idx.cardinality(TripleField::Predicate, "is_a"), 2);
        assert_eq!(idx.cardinality(TripleField::Object, "mammal"), 2);
        assert_eq!(idx.cardinality(TripleField::Context, "ops"), 1);
        assert_eq!(idx.cardinality(TripleField::Subject, "unknown"), 0);
        assert_eq!(idx.len(), 4);
    }

    #[test]
    fn scan_with_driver_filters_remaining_fields() {
        let idx = sample();
        let q = TripleQuery::new().subject("dog").predicate("is_a");
        let hits = idx.scan(&q, Some(TripleField::Subject));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object, "mammal");

        let all = idx.scan(&TripleQuery::new(), None);
        let ids: Vec<u64> = all.iter().map(|t| t.id.unwrap().get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn most_selective_picks_smallest_posting_list() {
        let idx = sample();
        let q = TripleQuery::new().predicate("is_a").object("mammal").subject("cat");
        assert_eq!(idx.most_selective(&q), Some((TripleField::Subject, 1)));
        assert_eq!(idx.most_selective(&TripleQuery::new()), None);
    }
}
