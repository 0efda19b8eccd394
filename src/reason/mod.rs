//! Reasoning core: deduction, induction, abduction.
//!
//! Each call is independent. The core reads triples and patterns through the
//! query cache and writes conclusions back through the [`KnowledgeBase`],
//! tagged with the [`InferenceMode`] that produced them.

pub mod abduce;
pub mod deduce;
pub mod induce;

use serde::{Deserialize, Serialize};

use crate::config::ReasoningConfig;
use crate::error::{NoesisResult, ValidationError};
use crate::graph::rules::is_general_domain;
use crate::kb::KnowledgeBase;
use crate::provenance::InferenceMode;

pub use abduce::{Abduction, Explanation};
pub use deduce::Deduction;
pub use induce::Induction;

/// Predicates read as cause → effect.
pub const CAUSAL_PREDICATES: &[&str] = &["causes", "leads_to", "results_in", "triggers", "explains"];

/// Predicates read as effect → cause.
pub const REVERSE_CAUSAL_PREDICATES: &[&str] = &["caused_by", "explained_by"];

/// Deductive, inductive, and abductive inference over the knowledge base.
#[derive(Debug, Clone)]
pub struct ReasoningCore {
    kb: KnowledgeBase,
    config: ReasoningConfig,
}

impl ReasoningCore {
    pub fn new(kb: KnowledgeBase, config: ReasoningConfig) -> Self {
        Self { kb, config }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    pub(crate) fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Parse a statement, splitting at a predicate the store knows when there
    /// is one.
    pub(crate) fn parse(&self, text: &str) -> NoesisResult<Option<Statement>> {
        let store = &self.kb.triples;
        let mut error = None;
        let parsed = Statement::parse(text, |p| match store.is_known_predicate(p) {
            Ok(known) => known,
            Err(e) => {
                error.get_or_insert(e);
                false
            }
        });
        match error {
            Some(e) => Err(e),
            None => Ok(parsed),
        }
    }
}

/// A `subject predicate object` statement parsed from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Statement {
    /// Parse free text into a statement.
    ///
    /// The first token (or underscore-joined token pair) after the subject
    /// that `is_known` accepts becomes the predicate, so multi-word subjects
    /// and objects survive: `web server has_status degraded`. Without a known
    /// predicate the second token is the predicate. Fewer than three tokens
    /// is not a statement.
    pub fn parse(text: &str, mut is_known: impl FnMut(&str) -> bool) -> Option<Self> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() < 3 {
            return None;
        }
        let build = |i: usize, width: usize, predicate: String| Statement {
            subject: words[..i].join(" "),
            predicate,
            object: words[i + width..].join(" "),
        };
        for i in 1..words.len() - 1 {
            if is_known(words[i]) {
                return Some(build(i, 1, words[i].to_string()));
            }
            if i + 2 < words.len() {
                let joined = format!("{}_{}", words[i], words[i + 1]);
                if is_known(&joined) {
                    return Some(build(i, 2, joined));
                }
            }
        }
        Some(build(1, 1, words[1].to_string()))
    }

    pub fn render(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// The context filter for a domain: `None` for the general domain.
pub fn domain_context(domain: &str) -> Option<String> {
    let d = domain.trim();
    (!is_general_domain(d)).then(|| d.to_string())
}

/// Reject an empty list or a blank item.
pub(crate) fn non_empty_items(
    op: &'static str,
    field: &'static str,
    items: &[String],
) -> Result<Vec<String>, ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyField { op, field });
    }
    items
        .iter()
        .map(|item| crate::graph::non_empty(op, field, item))
        .collect()
}

/// Every reasoning result names the mode that produced it.
pub trait Conclusion {
    fn mode(&self) -> InferenceMode;
    fn confidence(&self) -> f32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_split_at_known_predicates() {
        let known = |p: &str| p == "has_status" || p == "is_a";
        let s = Statement::parse("web server has_status degraded", known).unwrap();
        assert_eq!(s.subject, "web server");
        assert_eq!(s.predicate, "has_status");
        assert_eq!(s.object, "degraded");

        let s = Statement::parse("dog is a mammal", known).unwrap();
        assert_eq!(s.predicate, "is_a");
        assert_eq!(s.object, "mammal");

        let s = Statement::parse("rain makes streets wet", known).unwrap();
        assert_eq!(s.subject, "rain");
        assert_eq!(s.predicate, "makes");
        assert_eq!(s.object, "streets wet");

        assert!(Statement::parse("wet grass", known).is_none());
    }

    #[test]
    fn general_domain_has_no_context_filter() {
        assert_eq!(domain_context("general"), None);
        assert_eq!(domain_context(" "), None);
        assert_eq!(domain_context(" ops "), Some("ops".into()));
    }
}
