//! Knowledge graph: validated, indexed triple storage.
//!
//! The knowledge graph stores triples (subject, predicate, object) with a
//! confidence score and provenance metadata.
//!
//! - [`index::TripleIndex`]: secondary indexes on subject, predicate, object, context
//! - [`rules`]: stored implication rules over triple patterns
//! - [`store::TripleStore`]: the locked, optionally durable store with one-pass
//!   rule inference on query

pub mod index;
pub mod rules;
pub mod store;

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::provenance::InferenceMode;

/// Unique identifier for a stored triple.
///
/// Ids are assigned in insertion order, so comparing two ids compares when the
/// triples were added to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TripleId(NonZeroU64);

impl TripleId {
    /// Create a `TripleId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(TripleId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for TripleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "triple:{}", self.0)
    }
}

/// How a triple came to be visible to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// Passed validation and was stored.
    Validated,
    /// Produced on the fly by the query inference pass; not stored.
    Inferred { rule: String },
    /// Written back to the store by a reasoning operation.
    Derived { mode: InferenceMode },
}

/// Provenance metadata carried by every triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripleMetadata {
    /// Where the assertion came from (a monitor name, `extractor`, `reasoning:deduction`, ...).
    pub source: String,
    /// Domain or context tag the assertion belongs to. Empty means unscoped.
    pub context: String,
    /// Validation state.
    pub validation: ValidationStatus,
}

/// A triple (subject, predicate, object) in the knowledge graph.
///
/// Triples are immutable once stored. Updating a fact means adding a new
/// triple with a fresh timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Store-assigned id. `None` for triples produced by inference and not stored.
    pub id: Option<TripleId>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Confidence score in [0.0, 1.0].
    pub confidence: f32,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub metadata: TripleMetadata,
}

impl Triple {
    /// Whether this triple has the given subject, predicate, and object.
    pub fn same_fact(&self, subject: &str, predicate: &str, object: &str) -> bool {
        self.subject == subject && self.predicate == predicate && self.object == object
    }

    /// Render as `subject predicate object`.
    pub fn render(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// A triple submitted for storage. The store assigns id, timestamp, and
/// validation status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub context: String,
}

fn default_confidence() -> f32 {
    1.0
}

fn default_source() -> String {
    "user".into()
}

impl NewTriple {
    /// Create a new triple with full confidence, source `user`, and no context.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: default_confidence(),
            source: default_source(),
            context: String::new(),
        }
    }

    /// Set the confidence score. Out-of-range values are rejected by the store.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the provenance source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the context (domain) tag.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Validate and normalize: trims all fields and checks every invariant.
    pub fn validated(self, op: &'static str) -> Result<Self, ValidationError> {
        let subject = non_empty(op, "subject", &self.subject)?;
        let predicate = non_empty(op, "predicate", &self.predicate)?;
        let object = non_empty(op, "object", &self.object)?;
        let source = non_empty(op, "source", &self.source)?;
        check_unit(op, "confidence", self.confidence)?;
        Ok(Self {
            subject,
            predicate,
            object,
            confidence: self.confidence,
            source,
            context: self.context.trim().to_string(),
        })
    }
}

/// Trim `value` and reject it if nothing is left.
pub(crate) fn non_empty(
    op: &'static str,
    field: &'static str,
    value: &str,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField { op, field });
    }
    Ok(trimmed.to_string())
}

/// Reject non-finite values and values outside [0, 1].
pub(crate) fn check_unit(
    op: &'static str,
    field: &'static str,
    value: f32,
) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange { op, field, value });
    }
    Ok(())
}

/// A partial-match triple query. Unset fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripleQuery {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Drop results below this confidence.
    #[serde(default)]
    pub min_confidence: Option<f32>,
    /// Truncate after ranking.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TripleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Trim bound fields; blank fields become wildcards.
    pub fn normalized(&self) -> Self {
        fn norm(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }
        Self {
            subject: norm(&self.subject),
            predicate: norm(&self.predicate),
            object: norm(&self.object),
            context: norm(&self.context),
            min_confidence: self.min_confidence,
            limit: self.limit,
        }
    }

    /// Check the numeric bounds.
    pub fn validate(&self, op: &'static str) -> Result<(), ValidationError> {
        if let Some(min) = self.min_confidence {
            check_unit(op, "min_confidence", min)?;
        }
        Ok(())
    }

    /// Whether a triple satisfies every bound field (limit is not considered).
    pub fn matches(&self, triple: &Triple) -> bool {
        self.subject.as_deref().is_none_or(|s| s == triple.subject)
            && self.predicate.as_deref().is_none_or(|p| p == triple.predicate)
            && self.object.as_deref().is_none_or(|o| o == triple.object)
            && self
                .context
                .as_deref()
                .is_none_or(|c| c == triple.metadata.context)
            && self.min_confidence.is_none_or(|m| triple.confidence >= m)
    }
}

/// The indexed fields of a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripleField {
    Subject,
    Predicate,
    Object,
    Context,
}

impl std::fmt::Display for TripleField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripleField::Subject => write!(f, "subject"),
            TripleField::Predicate => write!(f, "predicate"),
            TripleField::Object => write!(f, "object"),
            TripleField::Context => write!(f, "context"),
        }
    }
}

/// Rank triples: confidence descending, most recent first, then insertion order.
pub fn rank(triples: &mut [Triple]) {
    triples.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| match (a.id, b.id) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: u64, confidence: f32, timestamp: u64) -> Triple {
        Triple {
            id: TripleId::new(id),
            subject: "s".into(),
            predicate: "p".into(),
            object: format!("o{id}"),
            confidence,
            timestamp,
            metadata: TripleMetadata {
                source: "test".into(),
                context: String::new(),
                validation: ValidationStatus::Validated,
            },
        }
    }

    #[test]
    fn validation_trims_and_rejects() {
        let ok = NewTriple::new(" server ", "has_status", "healthy")
            .with_context(" ops ")
            .validated("add_triple")
            .unwrap();
        assert_eq!(ok.subject, "server");
        assert_eq!(ok.context, "ops");

        let err = NewTriple::new("  ", "p", "o").validated("add_triple").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::EmptyField {
                field: "subject",
                ..
            }
        ));

        let err = NewTriple::new("s", "p", "o")
            .with_confidence(1.2)
            .validated("add_triple")
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));

        let err = NewTriple::new("s", "p", "o")
            .with_confidence(f32::NAN)
            .validated("add_triple")
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));
    }

    #[test]
    fn ranking_orders_confidence_then_recency_then_insertion() {
        let mut triples = vec![
            stored(1, 0.5, 10),
            stored(2, 0.9, 10),
            stored(3, 0.9, 20),
            stored(4, 0.5, 10),
        ];
        rank(&mut triples);
        let ids: Vec<u64> = triples.iter().map(|t| t.id.unwrap().get()).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }

    #[test]
    fn query_normalization_and_matching() {
        let q = TripleQuery::new().subject("  s ").object("").normalized();
        assert_eq!(q.subject.as_deref(), Some("s"));
        assert!(q.object.is_none());
        assert!(q.matches(&stored(1, 0.5, 0)));
        assert!(!TripleQuery::new().subject("x").matches(&stored(1, 0.5, 0)));
        assert!(!TripleQuery::new().min_confidence(0.6).matches(&stored(1, 0.5, 0)));
    }
}
