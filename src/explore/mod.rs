//! Exploration engine: analogy, causal chains, staged analysis, and scored
//! candidate generation.
//!
//! Every heuristic is deterministic. Text handling lives in [`text`]; stored
//! knowledge is read through the query cache.

pub mod analogy;
pub mod candidates;
pub mod causal;
pub mod sequential;
pub mod text;

use crate::config::ExplorationConfig;
use crate::kb::KnowledgeBase;

pub use analogy::{Analogy, ElementMapping};
pub use candidates::{Candidate, CandidateOrigin, CandidateSet};
pub use causal::{CausalAnalysis, CausalLink};
pub use sequential::{AnalysisStep, SequentialAnalysis, Stage};

/// Exploratory reasoning over the knowledge base.
#[derive(Debug, Clone)]
pub struct ExplorationEngine {
    kb: KnowledgeBase,
    config: ExplorationConfig,
}

impl ExplorationEngine {
    pub fn new(kb: KnowledgeBase, config: ExplorationConfig) -> Self {
        Self { kb, config }
    }

    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    pub(crate) fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> ExplorationEngine {
    ExplorationEngine::new(crate::kb::test_kb(), ExplorationConfig::default())
}
