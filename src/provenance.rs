//! Provenance: how a piece of knowledge was derived.
//!
//! Every conclusion records the [`InferenceMode`] that produced it. Triples
//! written back by reasoning carry the mode in their
//! [`ValidationStatus`](crate::graph::ValidationStatus) and a matching source
//! tag (`reasoning:deduction`, ...), so a reader can always tell asserted
//! knowledge from derived knowledge.

use serde::{Deserialize, Serialize};

/// The reasoning mode behind a conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Premises plus stored rules, forward-chained.
    Deduction,
    /// Generalization from examples.
    Induction,
    /// Best explanation for observations.
    Abduction,
    /// Structural mapping between domains.
    Analogy,
    /// Cause and effect chaining.
    Causal,
    /// Staged step-by-step analysis.
    Sequential,
    /// Scored candidate generation.
    Candidates,
}

impl InferenceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deduction => "deduction",
            Self::Induction => "induction",
            Self::Abduction => "abduction",
            Self::Analogy => "analogy",
            Self::Causal => "causal",
            Self::Sequential => "sequential",
            Self::Candidates => "candidates",
        }
    }

    /// Source tag for triples and patterns this mode writes back.
    pub fn source_tag(self) -> String {
        format!("reasoning:{}", self.as_str())
    }
}

impl std::fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
