//! Causal chains from cue phrases and stored causal relations.
//!
//! The situation text is scanned for cue phrases (`because`, `leads to`, ...)
//! that split a clause into cause and effect. The chain then continues
//! through stored causal triples in the domain, starting from the last
//! effect, until it reaches the requested depth or runs out of links.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, ValidationError};
use crate::graph::{TripleId, TripleQuery, non_empty};
use crate::kb::KnowledgeBase;
use crate::provenance::InferenceMode;
use crate::reason::{CAUSAL_PREDICATES, Conclusion, REVERSE_CAUSAL_PREDICATES, domain_context};

use super::{ExplorationEngine, text};

const OP: &str = "causal_chain";

/// Confidence given to a link read straight from the situation text.
const TEXT_LINK_CONFIDENCE: f32 = 0.6;
/// Token similarity for a stored fact to continue a chain.
const LINK_THRESHOLD: f32 = 0.5;
const MAX_ALTERNATIVES: usize = 3;

static CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(because of|because|due to|caused by|as a result of|leads to|led to|results in|resulted in|causes|caused|therefore|so that|so)\b",
    )
    .unwrap()
});

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.;!?\n]+").unwrap());

/// One cause → effect step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalLink {
    pub cause: String,
    pub effect: String,
    pub confidence: f32,
    /// `text` for cue-phrase links, `triple:<id>` for stored ones.
    pub source: String,
}

/// Result of a causal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalAnalysis {
    pub mode: InferenceMode,
    pub causes: Vec<String>,
    pub effects: Vec<String>,
    /// At most `depth` links.
    pub chain: Vec<CausalLink>,
    pub confidence: f32,
    /// Other known causes or continuations not on the chain.
    pub alternatives: Vec<String>,
    /// Whether stored knowledge contributed a link.
    pub domain_knowledge: bool,
}

impl Conclusion for CausalAnalysis {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// A stored causal relation, normalized to cause → effect.
#[derive(Debug, Clone)]
pub(crate) struct CausalFact {
    pub id: Option<TripleId>,
    pub cause: String,
    pub effect: String,
    pub confidence: f32,
}

impl CausalFact {
    pub fn source(&self) -> String {
        self.id
            .map_or_else(|| "triple".to_string(), |id| id.to_string())
    }
}

/// Every stored causal relation in a context, through the cache.
pub(crate) fn causal_facts(kb: &KnowledgeBase, context: Option<&str>) -> NoesisResult<Vec<CausalFact>> {
    let mut facts = Vec::new();
    for (predicates, forward) in [(CAUSAL_PREDICATES, true), (REVERSE_CAUSAL_PREDICATES, false)] {
        for predicate in predicates {
            let mut query = TripleQuery::new().predicate(*predicate);
            query.context = context.map(str::to_string);
            for t in kb.fetch_stored(query)? {
                let (cause, effect) = if forward {
                    (t.subject, t.object)
                } else {
                    (t.object, t.subject)
                };
                facts.push(CausalFact {
                    id: t.id,
                    cause,
                    effect,
                    confidence: t.confidence,
                });
            }
        }
    }
    Ok(facts)
}

/// Split one sentence at its first cue phrase.
fn split_at_cue(sentence: &str) -> Option<CausalLink> {
    let cue = CUE.find(sentence)?;
    let trim = |s: &str| {
        s.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ':')
            .to_string()
    };
    let left = trim(&sentence[..cue.start()]);
    let right = trim(&sentence[cue.end()..]);
    let effect_first = matches!(
        cue.as_str(),
        "because of" | "because" | "due to" | "caused by" | "as a result of"
    );
    let (cause, effect) = if effect_first {
        (right, left)
    } else {
        (left, right)
    };
    if cause.is_empty() || effect.is_empty() {
        return None;
    }
    Some(CausalLink {
        cause,
        effect,
        confidence: TEXT_LINK_CONFIDENCE,
        source: "text".into(),
    })
}

/// Cause → effect links stated in free text, in reading order.
pub fn extract_links(situation: &str) -> Vec<CausalLink> {
    let normalized = text::normalize(situation);
    SENTENCE
        .split(&normalized)
        .filter_map(split_at_cue)
        .collect()
}

fn about(concept_tokens: &[String], other: &str) -> f32 {
    let other = text::tokens(other);
    text::token_similarity(concept_tokens, &other).max(text::coverage(concept_tokens, &other))
}

impl ExplorationEngine {
    /// Build a cause → effect chain of at most `depth` links.
    pub fn causal_chain(
        &self,
        situation: &str,
        domain: &str,
        depth: usize,
    ) -> NoesisResult<CausalAnalysis> {
        let situation = non_empty(OP, "situation", situation)?;
        if depth == 0 {
            return Err(ValidationError::InvalidArgument {
                op: OP,
                constraint: "depth must be at least 1".into(),
            }
            .into());
        }
        let span = tracing::info_span!("causal_chain", mode = %InferenceMode::Causal, depth);
        let _guard = span.enter();

        let mut chain = extract_links(&situation);
        chain.truncate(depth);
        let facts = causal_facts(self.kb(), domain_context(domain).as_deref())?;

        let mut used: BTreeSet<usize> = BTreeSet::new();
        let mut current = chain
            .last()
            .map(|l| l.effect.clone())
            .unwrap_or_else(|| text::normalize(&situation));
        while chain.len() < depth {
            let tokens = text::tokens(&current);
            let next = facts
                .iter()
                .enumerate()
                .filter(|(i, _)| !used.contains(i))
                .map(|(i, f)| (i, f, about(&tokens, &f.cause)))
                .filter(|(_, _, sim)| *sim >= LINK_THRESHOLD)
                .max_by(|a, b| {
                    (a.2 * a.1.confidence)
                        .total_cmp(&(b.2 * b.1.confidence))
                        .then_with(|| b.0.cmp(&a.0))
                });
            let Some((i, fact, _)) = next else {
                break;
            };
            used.insert(i);
            chain.push(CausalLink {
                cause: fact.cause.clone(),
                effect: fact.effect.clone(),
                confidence: fact.confidence,
                source: fact.source(),
            });
            current = fact.effect.clone();
        }

        // Other causes of the first effect, and other continuations of any
        // concept on the chain.
        let mut alternatives = Vec::new();
        if let Some(first) = chain.first() {
            let first_effect = text::tokens(&first.effect);
            let on_chain: Vec<Vec<String>> = chain.iter().map(|l| text::tokens(&l.cause)).collect();
            for (i, fact) in facts.iter().enumerate() {
                if used.contains(&i) || alternatives.len() >= MAX_ALTERNATIVES {
                    continue;
                }
                if about(&first_effect, &fact.effect) >= LINK_THRESHOLD
                    && text::normalize(&fact.cause) != text::normalize(&first.cause)
                {
                    alternatives.push(format!("{} may also cause {}", fact.cause, fact.effect));
                } else if on_chain.iter().any(|c| about(c, &fact.cause) >= LINK_THRESHOLD) {
                    alternatives.push(format!("{} may instead lead to {}", fact.cause, fact.effect));
                }
            }
        }

        let domain_knowledge = chain.iter().any(|l| l.source != "text");
        let mean_link = if chain.is_empty() {
            0.5
        } else {
            chain.iter().map(|l| l.confidence).sum::<f32>() / chain.len() as f32
        };
        let mut confidence = 0.4;
        if domain_knowledge {
            confidence += 0.2;
        }
        if chain.len() >= depth {
            confidence += 0.1;
        }
        let confidence = (confidence * mean_link).clamp(0.0, 0.95);

        let mut causes = Vec::new();
        let mut effects = Vec::new();
        for link in &chain {
            if !causes.contains(&link.cause) {
                causes.push(link.cause.clone());
            }
            if !effects.contains(&link.effect) {
                effects.push(link.effect.clone());
            }
        }

        tracing::info!(links = chain.len(), confidence, domain_knowledge, "causal chain built");
        Ok(CausalAnalysis {
            mode: InferenceMode::Causal,
            causes,
            effects,
            chain,
            confidence,
            alternatives,
            domain_knowledge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::test_engine;
    use crate::graph::NewTriple;

    #[test]
    fn cue_phrases_set_direction() {
        let links = extract_links("The service crashed because the disk filled up. High load leads to timeouts");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].cause, "the disk filled up");
        assert_eq!(links[0].effect, "the service crashed");
        assert_eq!(links[1].cause, "high load");
        assert_eq!(links[1].effect, "timeouts");
        assert!(extract_links("nothing causal here").is_empty());
    }

    #[test]
    fn stored_relations_extend_the_chain() {
        let engine = test_engine();
        let kb = engine.kb();
        kb.add_triple(NewTriple::new("disk full", "causes", "write failures").with_context("ops").with_confidence(0.9))
            .unwrap();
        kb.add_triple(NewTriple::new("write failures", "leads_to", "data loss").with_context("ops").with_confidence(0.8))
            .unwrap();

        let analysis = engine
            .causal_chain("logs grew so the disk full alarm fired", "ops", 3)
            .unwrap();
        assert!(analysis.domain_knowledge);
        assert!(analysis.chain.len() <= 3);
        assert_eq!(analysis.chain[0].source, "text");
        assert!(analysis.effects.iter().any(|e| e == "data loss"));
        assert!(analysis.confidence > 0.0 && analysis.confidence <= 0.95);
    }

    #[test]
    fn depth_bounds_the_chain() {
        let engine = test_engine();
        for (s, o) in [("a1", "a2"), ("a2", "a3"), ("a3", "a4"), ("a4", "a5")] {
            engine.kb().add_triple(NewTriple::new(s, "causes", o)).unwrap();
        }
        let analysis = engine.causal_chain("a1", "", 2).unwrap();
        assert_eq!(analysis.chain.len(), 2);
        assert_eq!(analysis.effects, vec!["a2".to_string(), "a3".to_string()]);
        // base 0.4 + 0.2 knowledge + 0.1 depth reached, times mean link 1.0
        assert!((analysis.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_input() {
        let engine = test_engine();
        assert!(engine.causal_chain("x", "", 0).unwrap_err().is_validation());
        assert!(engine.causal_chain("  ", "", 1).unwrap_err().is_validation());
        let weak = engine.causal_chain("it rained", "", 1).unwrap();
        assert!(weak.chain.is_empty());
        assert!((weak.confidence - 0.2).abs() < 1e-6);
    }
}
