//! Abduction: the best explanation for a set of observations.
//!
//! Candidates come from three places: rules whose conclusion matches an
//! observation (their conditions are the hypothesis), stored causal triples
//! pointing at what was observed, and context patterns carrying a
//! `cause`/`effect` pair. Candidates naming the same hypothesis merge. The
//! ranking is coverage of the observations first, confidence second.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::NoesisResult;
use crate::explore::causal::causal_facts;
use crate::explore::text;
use crate::graph::rules::Bindings;
use crate::provenance::InferenceMode;

use super::{Conclusion, ReasoningCore, Statement, domain_context, non_empty_items};

const OP: &str = "abduce";

/// Minimum token similarity for a causal fact or pattern to be about an
/// observation.
const MENTION_THRESHOLD: f32 = 0.5;

/// Rules whose conditions are not all known to hold are discounted.
const UNVERIFIED_RULE_FACTOR: f32 = 0.7;

/// One candidate explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub hypothesis: String,
    /// Fraction of observations this hypothesis explains.
    pub coverage: f32,
    pub confidence: f32,
    /// The observations explained, in input order.
    pub explains: Vec<String>,
    /// Where the hypothesis came from (`rule:<name>`, `triple:<id>`, `pattern:<id>`).
    pub sources: Vec<String>,
}

/// Result of an abduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abduction {
    pub mode: InferenceMode,
    pub best: Option<Explanation>,
    /// Up to two runners-up.
    pub alternatives: Vec<Explanation>,
    /// Best confidence scaled by its coverage; 0 without a candidate.
    pub confidence: f32,
    pub note: String,
}

impl Conclusion for Abduction {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

#[derive(Debug)]
struct Candidate {
    hypothesis: String,
    explains: BTreeSet<usize>,
    confidence: f32,
    sources: Vec<String>,
}

/// Observation in parsed and tokenized form.
struct Observation {
    statement: Option<Statement>,
    tokens: Vec<String>,
}

impl ReasoningCore {
    /// Explain observations within a context.
    pub fn abduce(&self, observations: &[String], context: &str) -> NoesisResult<Abduction> {
        let observations = non_empty_items(OP, "observations", observations)?;
        let ctx = domain_context(context);
        let span = tracing::info_span!("abduce", mode = %InferenceMode::Abduction, observations = observations.len());
        let _guard = span.enter();

        let parsed: Vec<Observation> = observations
            .iter()
            .map(|o| {
                Ok(Observation {
                    statement: self.parse(o)?,
                    tokens: text::tokens(o),
                })
            })
            .collect::<NoesisResult<_>>()?;

        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut offer = |hypothesis: String, observed: usize, confidence: f32, source: String| {
            let key = text::normalize(&hypothesis);
            if key.is_empty() {
                return;
            }
            let entry = candidates.entry(key).or_insert_with(|| Candidate {
                hypothesis,
                explains: BTreeSet::new(),
                confidence: 0.0,
                sources: Vec::new(),
            });
            entry.explains.insert(observed);
            entry.confidence = entry.confidence.max(confidence.clamp(0.0, 1.0));
            if !entry.sources.contains(&source) {
                entry.sources.push(source);
            }
        };

        // Rules whose conclusion unifies with an observation.
        for rule in self.kb().rules_for_domain(context)? {
            for (i, obs) in parsed.iter().enumerate() {
                let Some(statement) = &obs.statement else {
                    continue;
                };
                let Some(seed) = rule.conclusion.unify_values(
                    Some(statement.subject.as_str()),
                    Some(statement.predicate.as_str()),
                    Some(statement.object.as_str()),
                    &Bindings::new(),
                ) else {
                    continue;
                };
                let matches = self.kb().triples.match_rule(&rule, &seed, ctx.as_deref())?;
                let (bindings, confidence) = match matches.first() {
                    Some(m) => {
                        let weakest = m.support.iter().map(|t| t.confidence).fold(1.0, f32::min);
                        (m.bindings.clone(), rule.derive_confidence(weakest))
                    }
                    None => (
                        seed,
                        rule.confidence * rule.priority * UNVERIFIED_RULE_FACTOR,
                    ),
                };
                let hypothesis = rule
                    .conditions
                    .iter()
                    .map(|c| c.render(&bindings))
                    .collect::<Vec<_>>()
                    .join(" and ");
                offer(hypothesis, i, confidence, format!("rule:{}", rule.name));
            }
        }

        // Stored causal relations pointing at what was observed.
        for fact in causal_facts(self.kb(), ctx.as_deref())? {
            let effect_tokens = text::tokens(&fact.effect);
            for (i, obs) in parsed.iter().enumerate() {
                let sim = text::token_similarity(&effect_tokens, &obs.tokens)
                    .max(text::coverage(&obs.tokens, &effect_tokens));
                if sim >= MENTION_THRESHOLD {
                    offer(fact.cause.clone(), i, fact.confidence * sim, fact.source());
                }
            }
        }

        // Context patterns with a cause/effect pair.
        let tags = [ctx.clone().unwrap_or_else(|| "general".to_string())];
        for pattern in self.kb().fetch_patterns(&tags)? {
            let (Some(cause), Some(effect)) = (pattern.field("cause"), pattern.field("effect"))
            else {
                continue;
            };
            let effect_tokens = text::tokens(&effect);
            for (i, obs) in parsed.iter().enumerate() {
                let sim = text::token_similarity(&effect_tokens, &obs.tokens)
                    .max(text::coverage(&obs.tokens, &effect_tokens));
                if sim >= MENTION_THRESHOLD {
                    offer(cause.clone(), i, pattern.confidence * sim, pattern.id.to_string());
                }
            }
        }

        let n = observations.len() as f32;
        let mut ranked: Vec<Explanation> = candidates
            .into_values()
            .map(|c| Explanation {
                coverage: c.explains.len() as f32 / n,
                explains: c.explains.iter().map(|&i| observations[i].clone()).collect(),
                hypothesis: c.hypothesis,
                confidence: c.confidence,
                sources: c.sources,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.coverage
                .total_cmp(&a.coverage)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.hypothesis.cmp(&b.hypothesis))
        });

        let mut ranked = ranked.into_iter();
        let Some(best) = ranked.next() else {
            tracing::info!("no explanation found");
            return Ok(Abduction {
                mode: InferenceMode::Abduction,
                best: None,
                alternatives: Vec::new(),
                confidence: 0.0,
                note: "no stored rule, causal relation, or pattern explains the observations"
                    .into(),
            });
        };
        let alternatives: Vec<Explanation> = ranked.take(2).collect();
        let confidence = (best.confidence * best.coverage).clamp(0.0, 1.0);
        let note = if best.coverage < 1.0 {
            format!(
                "best explanation covers {} of {} observations",
                best.explains.len(),
                observations.len()
            )
        } else {
            "best explanation covers every observation".to_string()
        };

        tracing::info!(hypothesis = %best.hypothesis, confidence, "abduced");
        Ok(Abduction {
            mode: InferenceMode::Abduction,
            best: Some(best),
            alternatives,
            confidence,
            note,
        })
    }
}
