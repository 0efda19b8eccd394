//! Engine facade: top-level API for noesis.
//!
//! The `Engine` owns every store and reasoning component and exposes one
//! method per operation. Components share the stores through a
//! [`KnowledgeBase`] handle; nothing is global.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, ExtractError, NoesisResult};
use crate::explore::{Analogy, CandidateSet, CausalAnalysis, ExplorationEngine, SequentialAnalysis};
use crate::extract::{OllamaExtractor, TextToTriples};
use crate::graph::rules::{NewRule, Rule, RuleId};
use crate::graph::store::TripleStore;
use crate::graph::{NewTriple, Triple, TripleId, TripleQuery};
use crate::hyper::{ExpandedContext, HyperEdge, HyperEdgeId, HyperGraph};
use crate::kb::KnowledgeBase;
use crate::pattern::{NewPattern, Pattern, PatternId, PatternStore};
use crate::query::{MetricsSnapshot, Query, QueryCache, QueryResponse};
use crate::reason::{Abduction, Deduction, Induction, ReasoningCore};
use crate::store::DurableStore;

/// The noesis knowledge graph reasoning engine.
pub struct Engine {
    config: EngineConfig,
    kb: KnowledgeBase,
    reasoning: ReasoningCore,
    exploration: ExplorationEngine,
    hyper: Arc<HyperGraph>,
    extractor: Option<Arc<dyn TextToTriples>>,
}

impl Engine {
    /// Create an engine. With a data directory, every store is reopened from
    /// disk in insertion order.
    pub fn new(config: EngineConfig) -> NoesisResult<Self> {
        config.validate()?;
        tracing::info!(
            persistent = config.data_dir.is_some(),
            cache_entries = config.cache.max_entries,
            ttl_secs = config.cache.ttl_secs,
            "initializing noesis engine"
        );

        let max_inferred = config.reasoning.max_inferred_per_rule;
        let (triples, patterns, hyper) = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|_| EngineError::DataDir {
                    path: dir.display().to_string(),
                })?;
                let durable = Arc::new(DurableStore::open(dir)?);
                (
                    TripleStore::open(Arc::clone(&durable), max_inferred)?,
                    PatternStore::open(Arc::clone(&durable))?,
                    HyperGraph::open(durable)?,
                )
            }
            None => (
                TripleStore::with_limits(max_inferred),
                PatternStore::new(),
                HyperGraph::new(),
            ),
        };

        let cache = QueryCache::new(
            config.cache.max_entries,
            config.cache.ttl(),
            config.cache.metrics_window,
        );
        let kb = KnowledgeBase::new(
            Arc::new(triples),
            Arc::new(patterns),
            Arc::new(cache),
            config.cache.invalidate_on_write,
        );
        let extractor = config.extractor.clone().map(|c| {
            tracing::info!(model = %c.model, base_url = %c.base_url, "text extraction enabled");
            Arc::new(OllamaExtractor::new(c)) as Arc<dyn TextToTriples>
        });

        Ok(Self {
            reasoning: ReasoningCore::new(kb.clone(), config.reasoning.clone()),
            exploration: ExplorationEngine::new(kb.clone(), config.exploration.clone()),
            hyper: Arc::new(hyper),
            kb,
            extractor,
            config,
        })
    }

    /// Attach (or replace) the text extraction collaborator.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextToTriples>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the stores and the query cache.
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    // -- triples and rules --------------------------------------------------

    pub fn add_triple(&self, triple: NewTriple) -> NoesisResult<TripleId> {
        self.kb.add_triple(triple)
    }

    pub fn get_triple(&self, id: TripleId) -> NoesisResult<Triple> {
        self.kb.triples.get(id)
    }

    /// Query triples through the cache.
    pub fn query(&self, query: TripleQuery) -> NoesisResult<QueryResponse> {
        self.kb.execute(&Query::Triples(query))
    }

    /// Execute any query through the cache.
    pub fn execute(&self, query: &Query) -> NoesisResult<QueryResponse> {
        self.kb.execute(query)
    }

    pub fn add_rule(&self, rule: NewRule) -> NoesisResult<RuleId> {
        self.kb.add_rule(rule)
    }

    pub fn get_rule(&self, id: RuleId) -> NoesisResult<Rule> {
        self.kb.triples.get_rule(id)
    }

    pub fn rules(&self) -> NoesisResult<Vec<Rule>> {
        self.kb.triples.rules()
    }

    // -- patterns -----------------------------------------------------------

    pub fn add_pattern(&self, pattern: NewPattern) -> NoesisResult<PatternId> {
        self.kb.add_pattern(pattern)
    }

    pub fn get_pattern(&self, id: PatternId) -> NoesisResult<Pattern> {
        self.kb.patterns.get(id)
    }

    /// Active patterns for context tags, best first, through the cache.
    pub fn find_patterns<S: AsRef<str>>(&self, tags: &[S]) -> NoesisResult<Vec<Pattern>> {
        self.kb.fetch_patterns(tags)
    }

    pub fn record_pattern_usage(&self, id: PatternId, success: bool) -> NoesisResult<Pattern> {
        self.kb.record_usage(id, success)
    }

    // -- reasoning ----------------------------------------------------------

    pub fn deduce(&self, premises: &[String], domain: &str) -> NoesisResult<Deduction> {
        self.reasoning.deduce(premises, domain)
    }

    pub fn induce(&self, examples: &[String], min_confidence: f32) -> NoesisResult<Induction> {
        self.reasoning.induce(examples, min_confidence)
    }

    pub fn abduce(&self, observations: &[String], context: &str) -> NoesisResult<Abduction> {
        self.reasoning.abduce(observations, context)
    }

    // -- exploration --------------------------------------------------------

    pub fn analogy<S: AsRef<str>>(
        &self,
        source: &str,
        target: &str,
        criteria: &[S],
    ) -> NoesisResult<Analogy> {
        self.exploration.analogy(source, target, criteria)
    }

    pub fn causal_chain(
        &self,
        situation: &str,
        domain: &str,
        depth: usize,
    ) -> NoesisResult<CausalAnalysis> {
        self.exploration.causal_chain(situation, domain, depth)
    }

    pub fn sequential_analysis(
        &self,
        problem: &str,
        max_steps: usize,
        domain: &str,
    ) -> NoesisResult<SequentialAnalysis> {
        self.exploration.sequential_analysis(problem, max_steps, domain)
    }

    pub fn generate_candidates<S: AsRef<str>>(
        &self,
        problem: &str,
        count: usize,
        criteria: &[S],
    ) -> NoesisResult<CandidateSet> {
        self.exploration.generate_candidates(problem, count, criteria)
    }

    // -- hypergraph ---------------------------------------------------------

    /// Relate concepts across domains. `confidence` defaults to
    /// `hyper.default_confidence`.
    pub fn connect_domains<S: AsRef<str>, D: AsRef<str>>(
        &self,
        source: &str,
        targets: &[S],
        relationship: &str,
        domains: &[D],
        confidence: Option<f32>,
    ) -> NoesisResult<HyperEdgeId> {
        let confidence = confidence.unwrap_or(self.config.hyper.default_confidence);
        self.hyper
            .connect_domains(source, targets, relationship, domains, confidence)
    }

    pub fn get_hyperedge(&self, id: HyperEdgeId) -> NoesisResult<HyperEdge> {
        self.hyper.get(id)
    }

    /// Expand seeds into their surrounding context. Bounds default to the
    /// `hyper` config section.
    pub fn expand_context<S: AsRef<str>>(
        &self,
        seeds: &[S],
        domain: &str,
        max_depth: Option<usize>,
        min_confidence: Option<f32>,
    ) -> NoesisResult<ExpandedContext> {
        self.hyper.expand_context(
            &self.kb,
            seeds,
            domain,
            max_depth.unwrap_or(self.config.hyper.default_max_depth),
            min_confidence.unwrap_or(self.config.hyper.default_min_confidence),
        )
    }

    // -- extraction ---------------------------------------------------------

    /// Extract triples from free text and store the valid ones.
    pub fn extract_knowledge(&self, text: &str, context: &str) -> NoesisResult<Vec<TripleId>> {
        const OP: &str = "extract_knowledge";
        let extractor = self
            .extractor
            .as_ref()
            .ok_or(ExtractError::Unavailable { op: OP })?;
        let text = crate::graph::non_empty(OP, "text", text)?;

        let extracted = extractor.extract(&text, context)?;
        let mut ids = Vec::with_capacity(extracted.len());
        for triple in extracted {
            match self.kb.add_triple(triple) {
                Ok(id) => ids.push(id),
                Err(e) if e.is_validation() => {
                    tracing::warn!(error = %e, "skipping invalid extracted triple");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(stored = ids.len(), "knowledge extracted");
        Ok(ids)
    }

    pub fn has_extractor(&self) -> bool {
        self.extractor.is_some()
    }

    // -- housekeeping -------------------------------------------------------

    pub fn clear_cache(&self) {
        self.kb.cache.clear();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.kb.cache.metrics()
    }

    pub fn export_triples(&self) -> NoesisResult<Vec<Triple>> {
        self.kb.triples.all()
    }

    pub fn export_patterns(&self) -> NoesisResult<Vec<Pattern>> {
        self.kb.patterns.all()
    }

    pub fn export_hyperedges(&self) -> NoesisResult<Vec<HyperEdge>> {
        self.hyper.all()
    }

    /// Counts and flags describing the engine state.
    pub fn info(&self) -> NoesisResult<EngineInfo> {
        Ok(EngineInfo {
            triple_count: self.kb.triples.len()?,
            rule_count: self.kb.triples.rules()?.len(),
            pattern_count: self.kb.patterns.len()?,
            hyperedge_count: self.hyper.len()?,
            cache_entries: self.kb.cache.len(),
            persistent: self.config.data_dir.is_some(),
            extractor: self.extractor.is_some(),
        })
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub triple_count: usize,
    pub rule_count: usize,
    pub pattern_count: usize,
    pub hyperedge_count: usize,
    pub cache_entries: u64,
    pub persistent: bool,
    pub extractor: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "noesis engine info")?;
        writeln!(f, "  triples:      {}", self.triple_count)?;
        writeln!(f, "  rules:        {}", self.rule_count)?;
        writeln!(f, "  patterns:     {}", self.pattern_count)?;
        writeln!(f, "  hyperedges:   {}", self.hyperedge_count)?;
        writeln!(f, "  cached:       {}", self.cache_entries)?;
        writeln!(f, "  persistent:   {}", self.persistent)?;
        writeln!(f, "  extractor:    {}", self.extractor)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("kb", &self.kb)
            .field("hyper", &self.hyper)
            .field("extractor", &self.extractor.is_some())
            .finish()
    }
}
