//! Closed operation dispatch.
//!
//! Every engine operation has one [`Operation`] variant. Callers that speak
//! JSON (the CLI `run` command, a future network front end) deserialize an
//! `Operation`, hand it to [`Engine::dispatch`], and serialize the
//! [`OperationOutput`]. Adding an operation means adding a variant; the
//! compiler then points at every place that must handle it.
//!
//! ```json
//! {"op": "add_triple", "subject": "server", "predicate": "has_status", "object": "healthy"}
//! {"op": "deduce", "premises": ["server has_status healthy"], "domain": "ops"}
//! ```

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineInfo};
use crate::error::NoesisResult;
use crate::explore::{Analogy, CandidateSet, CausalAnalysis, SequentialAnalysis};
use crate::graph::rules::{NewRule, Rule, RuleId};
use crate::graph::{NewTriple, Triple, TripleId, TripleQuery};
use crate::hyper::{ExpandedContext, HyperEdge, HyperEdgeId};
use crate::pattern::{NewPattern, Pattern, PatternId};
use crate::query::{MetricsSnapshot, QueryResponse};
use crate::reason::{Abduction, Deduction, Induction};

fn default_min_confidence() -> f32 {
    0.5
}

fn default_depth() -> usize {
    3
}

fn default_max_steps() -> usize {
    5
}

fn default_count() -> usize {
    3
}

/// A structured request for one engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddTriple(NewTriple),
    GetTriple {
        id: TripleId,
    },
    Query(TripleQuery),
    AddRule(NewRule),
    GetRule {
        id: RuleId,
    },
    ListRules,
    AddPattern(NewPattern),
    FindPatterns {
        tags: Vec<String>,
    },
    RecordPatternUsage {
        id: PatternId,
        success: bool,
    },
    Deduce {
        premises: Vec<String>,
        #[serde(default)]
        domain: String,
    },
    Induce {
        examples: Vec<String>,
        #[serde(default = "default_min_confidence")]
        min_confidence: f32,
    },
    Abduce {
        observations: Vec<String>,
        #[serde(default)]
        context: String,
    },
    Analogy {
        source: String,
        target: String,
        #[serde(default)]
        criteria: Vec<String>,
    },
    CausalChain {
        situation: String,
        #[serde(default)]
        domain: String,
        #[serde(default = "default_depth")]
        depth: usize,
    },
    SequentialAnalysis {
        problem: String,
        #[serde(default = "default_max_steps")]
        max_steps: usize,
        #[serde(default)]
        domain: String,
    },
    GenerateCandidates {
        problem: String,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default)]
        criteria: Vec<String>,
    },
    ConnectDomains {
        source: String,
        targets: Vec<String>,
        relationship: String,
        #[serde(default)]
        domains: Vec<String>,
        #[serde(default)]
        confidence: Option<f32>,
    },
    ExpandContext {
        seeds: Vec<String>,
        #[serde(default)]
        domain: String,
        #[serde(default)]
        max_depth: Option<usize>,
        #[serde(default)]
        min_confidence: Option<f32>,
    },
    ExtractKnowledge {
        text: String,
        #[serde(default)]
        context: String,
    },
    Info,
    Metrics,
    ExportTriples,
    ExportPatterns,
    ExportHyperedges,
}

impl Operation {
    /// The operation name as it appears in the `op` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddTriple(_) => "add_triple",
            Operation::GetTriple { .. } => "get_triple",
            Operation::Query(_) => "query",
            Operation::AddRule(_) => "add_rule",
            Operation::GetRule { .. } => "get_rule",
            Operation::ListRules => "list_rules",
            Operation::AddPattern(_) => "add_pattern",
            Operation::FindPatterns { .. } => "find_patterns",
            Operation::RecordPatternUsage { .. } => "record_pattern_usage",
            Operation::Deduce { .. } => "deduce",
            Operation::Induce { .. } => "induce",
            Operation::Abduce { .. } => "abduce",
            Operation::Analogy { .. } => "analogy",
            Operation::CausalChain { .. } => "causal_chain",
            Operation::SequentialAnalysis { .. } => "sequential_analysis",
            Operation::GenerateCandidates { .. } => "generate_candidates",
            Operation::ConnectDomains { .. } => "connect_domains",
            Operation::ExpandContext { .. } => "expand_context",
            Operation::ExtractKnowledge { .. } => "extract_knowledge",
            Operation::Info => "info",
            Operation::Metrics => "metrics",
            Operation::ExportTriples => "export_triples",
            Operation::ExportPatterns => "export_patterns",
            Operation::ExportHyperedges => "export_hyperedges",
        }
    }
}

/// The result of one [`Operation`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum OperationOutput {
    TripleId(TripleId),
    Triple(Triple),
    Query(QueryResponse),
    RuleId(RuleId),
    Rule(Rule),
    Rules(Vec<Rule>),
    PatternId(PatternId),
    Pattern(Pattern),
    Patterns(Vec<Pattern>),
    Deduction(Deduction),
    Induction(Induction),
    Abduction(Abduction),
    Analogy(Analogy),
    CausalAnalysis(CausalAnalysis),
    SequentialAnalysis(SequentialAnalysis),
    Candidates(CandidateSet),
    HyperEdgeId(HyperEdgeId),
    ExpandedContext(ExpandedContext),
    Extracted(Vec<TripleId>),
    Info(EngineInfo),
    Metrics(MetricsSnapshot),
    Triples(Vec<Triple>),
    HyperEdges(Vec<HyperEdge>),
}

impl Engine {
    /// Run one operation.
    pub fn dispatch(&self, op: Operation) -> NoesisResult<OperationOutput> {
        tracing::debug!(op = op.name(), "dispatch");
        Ok(match op {
            Operation::AddTriple(triple) => OperationOutput::TripleId(self.add_triple(triple)?),
            Operation::GetTriple { id } => OperationOutput::Triple(self.get_triple(id)?),
            Operation::Query(query) => OperationOutput::Query(self.query(query)?),
            Operation::AddRule(rule) => OperationOutput::RuleId(self.add_rule(rule)?),
            Operation::GetRule { id } => OperationOutput::Rule(self.get_rule(id)?),
            Operation::ListRules => OperationOutput::Rules(self.rules()?),
            Operation::AddPattern(pattern) => {
                OperationOutput::PatternId(self.add_pattern(pattern)?)
            }
            Operation::FindPatterns { tags } => {
                OperationOutput::Patterns(self.find_patterns(&tags)?)
            }
            Operation::RecordPatternUsage { id, success } => {
                OperationOutput::Pattern(self.record_pattern_usage(id, success)?)
            }
            Operation::Deduce { premises, domain } => {
                OperationOutput::Deduction(self.deduce(&premises, &domain)?)
            }
            Operation::Induce {
                examples,
                min_confidence,
            } => OperationOutput::Induction(self.induce(&examples, min_confidence)?),
            Operation::Abduce {
                observations,
                context,
            } => OperationOutput::Abduction(self.abduce(&observations, &context)?),
            Operation::Analogy {
                source,
                target,
                criteria,
            } => OperationOutput::Analogy(self.analogy(&source, &target, &criteria)?),
            Operation::CausalChain {
                situation,
                domain,
                depth,
            } => OperationOutput::CausalAnalysis(self.causal_chain(&situation, &domain, depth)?),
            Operation::SequentialAnalysis {
                problem,
                max_steps,
                domain,
            } => OperationOutput::SequentialAnalysis(
                self.sequential_analysis(&problem, max_steps, &domain)?,
            ),
            Operation::GenerateCandidates {
                problem,
                count,
                criteria,
            } => OperationOutput::Candidates(self.generate_candidates(&problem, count, &criteria)?),
            Operation::ConnectDomains {
                source,
                targets,
                relationship,
                domains,
                confidence,
            } => OperationOutput::HyperEdgeId(self.connect_domains(
                &source,
                &targets,
                &relationship,
                &domains,
                confidence,
            )?),
            Operation::ExpandContext {
                seeds,
                domain,
                max_depth,
                min_confidence,
            } => OperationOutput::ExpandedContext(self.expand_context(
                &seeds,
                &domain,
                max_depth,
                min_confidence,
            )?),
            Operation::ExtractKnowledge { text, context } => {
                OperationOutput::Extracted(self.extract_knowledge(&text, &context)?)
            }
            Operation::Info => OperationOutput::Info(self.info()?),
            Operation::Metrics => OperationOutput::Metrics(self.metrics()),
            Operation::ExportTriples => OperationOutput::Triples(self.export_triples()?),
            Operation::ExportPatterns => OperationOutput::Patterns(self.export_patterns()?),
            Operation::ExportHyperedges => OperationOutput::HyperEdges(self.export_hyperedges()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn op(json: &str) -> Operation {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn requests_parse_with_defaults() {
        assert_eq!(
            op(r#"{"op": "causal_chain", "situation": "x"}"#),
            Operation::CausalChain {
                situation: "x".into(),
                domain: String::new(),
                depth: 3,
            }
        );
        let add = op(r#"{"op": "add_triple", "subject": "a", "predicate": "b", "object": "c"}"#);
        assert_eq!(add, Operation::AddTriple(NewTriple::new("a", "b", "c")));
        assert_eq!(add.name(), "add_triple");
        assert!(serde_json::from_str::<Operation>(r#"{"op": "launch_rockets"}"#).is_err());
    }

    #[test]
    fn dispatch_round_trips_through_the_engine() {
        let engine = Engine::new(EngineConfig::in_memory()).unwrap();
        let out = engine
            .dispatch(op(r#"{"op": "add_triple", "subject": "dog", "predicate": "is_a", "object": "mammal"}"#))
            .unwrap();
        assert!(matches!(out, OperationOutput::TripleId(_)));

        let out = engine
            .dispatch(op(r#"{"op": "query", "subject": "dog"}"#))
            .unwrap();
        let OperationOutput::Query(response) = out else {
            panic!("expected a query response");
        };
        assert_eq!(response.output.len(), 1);

        let json = serde_json::to_value(engine.dispatch(Operation::Info).unwrap()).unwrap();
        assert_eq!(json["kind"], "info");
        assert_eq!(json["result"]["triple_count"], 1);
    }

    #[test]
    fn stored_rules_are_readable_by_id() {
        let engine = Engine::new(EngineConfig::in_memory()).unwrap();
        let OperationOutput::RuleId(id) = engine
            .dispatch(op(r#"{"op": "add_rule", "name": "alert", "conditions": ["?x has_status full"], "conclusion": "?x needs cleanup"}"#))
            .unwrap()
        else {
            panic!("expected a rule id");
        };

        let json = serde_json::to_value(id).unwrap();
        let request = serde_json::json!({"op": "get_rule", "id": json});
        let OperationOutput::Rule(rule) = engine
            .dispatch(serde_json::from_value(request).unwrap())
            .unwrap()
        else {
            panic!("expected a rule");
        };
        assert_eq!(rule.id, id);
        assert_eq!(rule.name, "alert");

        let OperationOutput::Rules(all) = engine.dispatch(Operation::ListRules).unwrap() else {
            panic!("expected rules");
        };
        assert_eq!(all.len(), 1);

        let missing = op(r#"{"op": "get_rule", "id": 99}"#);
        assert!(engine.dispatch(missing).unwrap_err().is_not_found());
    }

    #[test]
    fn errors_carry_the_operation_name() {
        let engine = Engine::new(EngineConfig::in_memory()).unwrap();
        let err = engine
            .dispatch(op(r#"{"op": "generate_candidates", "problem": "x", "count": 0}"#))
            .unwrap_err();
        assert!(err.to_string().starts_with("generate_candidates"));
    }
}
