//! Analogical mapping between two domain descriptions.
//!
//! Each domain contributes elements: its description phrases, its content
//! words, and the concepts of stored triples whose context is that domain.
//! Phrases are compared with phrases and terms with terms. Two terms that
//! both carry stored relations blend lexical similarity with the overlap of
//! their predicates, which lets `sun` map to `nucleus` on structure alone.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::NoesisResult;
use crate::graph::{TripleQuery, non_empty};
use crate::kb::KnowledgeBase;
use crate::provenance::InferenceMode;
use crate::reason::Conclusion;

use super::{ExplorationEngine, text};

const OP: &str = "analogy";

const LEXICAL_WEIGHT: f32 = 0.6;
const RELATIONAL_WEIGHT: f32 = 0.4;
const CRITERION_BONUS: f32 = 0.1;
const MAX_CONFIDENCE: f32 = 0.95;
/// Ceiling when nothing maps.
const UNMAPPED_CEILING: f32 = 0.3;
const MAX_INFERENCES: usize = 10;

/// Criteria satisfied by shared relational structure rather than wording.
const STRUCTURAL_CRITERIA: &[&str] = &["structure", "structural", "relation", "relations", "relational"];

/// One source element paired with its target counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMapping {
    pub source: String,
    pub target: String,
    pub similarity: f32,
}

/// Result of an analogy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analogy {
    pub mode: InferenceMode,
    pub source: String,
    pub target: String,
    /// In source element order.
    pub mapping: Vec<ElementMapping>,
    pub correspondence: String,
    /// Source relations carried over to the target.
    pub inferences: Vec<String>,
    pub confidence: f32,
    pub limitations: Vec<String>,
    pub criteria_met: Vec<String>,
}

impl Conclusion for Analogy {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Phrase,
    Term,
}

#[derive(Debug)]
struct Element {
    name: String,
    kind: ElementKind,
    tokens: Vec<String>,
    /// Predicates this element takes part in; `^p` marks the object side.
    predicates: BTreeSet<String>,
    /// Outgoing `(predicate, object)` relations.
    relations: Vec<(String, String)>,
}

impl Element {
    fn new(name: String, kind: ElementKind) -> Self {
        Self {
            tokens: text::tokens(&name),
            name,
            kind,
            predicates: BTreeSet::new(),
            relations: Vec::new(),
        }
    }
}

/// A domain's elements, in discovery order.
struct DomainElements {
    elements: Vec<Element>,
    context: String,
}

impl DomainElements {
    fn collect(kb: &KnowledgeBase, description: &str) -> NoesisResult<Self> {
        let context = description.trim().to_string();
        let mut elements: Vec<Element> = Vec::new();
        let mut by_name: BTreeMap<String, usize> = BTreeMap::new();

        for phrase in text::clauses(description) {
            if text::tokens(&phrase).len() > 1 && !by_name.contains_key(&phrase) {
                by_name.insert(phrase.clone(), elements.len());
                elements.push(Element::new(phrase, ElementKind::Phrase));
            }
        }
        for word in text::keywords(description) {
            if !by_name.contains_key(&word) {
                by_name.insert(word.clone(), elements.len());
                elements.push(Element::new(word, ElementKind::Term));
            }
        }

        let stored = kb.fetch_stored(TripleQuery::new().context(context.clone()))?;
        let mut index_of = |name: &str, elements: &mut Vec<Element>| -> usize {
            let key = text::normalize(name);
            *by_name.entry(key.clone()).or_insert_with(|| {
                elements.push(Element::new(key, ElementKind::Term));
                elements.len() - 1
            })
        };
        for t in stored {
            let s = index_of(&t.subject, &mut elements);
            let o = index_of(&t.object, &mut elements);
            elements[s].predicates.insert(t.predicate.clone());
            elements[s]
                .relations
                .push((t.predicate.clone(), text::normalize(&t.object)));
            elements[o].predicates.insert(format!("^{}", t.predicate));
        }

        Ok(Self { elements, context })
    }
}

/// Dice overlap of two predicate sets.
fn relational_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let shared = a.intersection(b).count();
    2.0 * shared as f32 / (a.len() + b.len()) as f32
}

fn similarity(a: &Element, b: &Element) -> (f32, bool) {
    if a.kind != b.kind {
        return (0.0, false);
    }
    let lexical = text::token_similarity(&a.tokens, &b.tokens);
    if a.predicates.is_empty() || b.predicates.is_empty() {
        return (lexical, false);
    }
    let relational = relational_similarity(&a.predicates, &b.predicates);
    (
        LEXICAL_WEIGHT * lexical + RELATIONAL_WEIGHT * relational,
        relational > 0.0,
    )
}

impl ExplorationEngine {
    /// Map elements of `source` onto `target` and carry relations across.
    pub fn analogy<S: AsRef<str>>(
        &self,
        source: &str,
        target: &str,
        criteria: &[S],
    ) -> NoesisResult<Analogy> {
        let source = non_empty(OP, "source_domain", source)?;
        let target = non_empty(OP, "target_domain", target)?;
        let criteria: Vec<String> = criteria
            .iter()
            .map(|c| text::normalize(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();
        let span = tracing::info_span!("analogy", mode = %InferenceMode::Analogy);
        let _guard = span.enter();

        let src = DomainElements::collect(self.kb(), &source)?;
        let tgt = DomainElements::collect(self.kb(), &target)?;

        let scores: Vec<Vec<(f32, bool)>> = src
            .elements
            .par_iter()
            .map(|a| tgt.elements.iter().map(|b| similarity(a, b)).collect())
            .collect();

        let threshold = self.config().similarity_threshold;
        let mut claimed = vec![false; tgt.elements.len()];
        let mut mapping = Vec::new();
        let mut counterpart: BTreeMap<&str, &str> = BTreeMap::new();
        let mut structural = false;
        for (i, row) in scores.iter().enumerate() {
            let best = row
                .iter()
                .enumerate()
                .filter(|(j, (sim, _))| !claimed[*j] && *sim >= threshold)
                .max_by(|a, b| a.1.0.total_cmp(&b.1.0).then_with(|| b.0.cmp(&a.0)));
            let Some((j, &(sim, relational))) = best else {
                continue;
            };
            claimed[j] = true;
            structural |= relational;
            counterpart.insert(&src.elements[i].name, &tgt.elements[j].name);
            mapping.push(ElementMapping {
                source: src.elements[i].name.clone(),
                target: tgt.elements[j].name.clone(),
                similarity: sim.clamp(0.0, 1.0),
            });
        }

        // A criterion holds when both mapped sides speak to it, or, for the
        // structural ones, when some pair matched on relations.
        let source_tokens: Vec<String> = mapping.iter().flat_map(|m| text::tokens(&m.source)).collect();
        let target_tokens: Vec<String> = mapping.iter().flat_map(|m| text::tokens(&m.target)).collect();
        let criteria_met: Vec<String> = criteria
            .iter()
            .filter(|c| {
                if STRUCTURAL_CRITERIA.contains(&c.as_str()) {
                    return structural;
                }
                let terms = text::tokens(c);
                !terms.is_empty()
                    && text::coverage(&source_tokens, &terms) >= 0.5
                    && text::coverage(&target_tokens, &terms) >= 0.5
            })
            .cloned()
            .collect();

        let mut inferences = Vec::new();
        for element in &src.elements {
            let Some(mapped_subject) = counterpart.get(element.name.as_str()) else {
                continue;
            };
            for (predicate, object) in &element.relations {
                if inferences.len() >= MAX_INFERENCES {
                    break;
                }
                let Some(mapped_object) = counterpart.get(object.as_str()) else {
                    continue;
                };
                let known = self.kb().triples.contains(
                    mapped_subject,
                    predicate,
                    mapped_object,
                    Some(&tgt.context),
                )?;
                if !known {
                    inferences.push(format!(
                        "{mapped_subject} {predicate} {mapped_object} (as {} {predicate} {object})",
                        element.name
                    ));
                }
            }
        }

        let mut limitations = Vec::new();
        let unmapped: Vec<&str> = src
            .elements
            .iter()
            .filter(|e| !counterpart.contains_key(e.name.as_str()))
            .map(|e| e.name.as_str())
            .collect();
        if !unmapped.is_empty() && !mapping.is_empty() {
            limitations.push(format!("no counterpart for: {}", unmapped.join(", ")));
        }
        if !structural {
            limitations.push("mapping rests on wording only; no shared stored relations".into());
        }
        let missed: Vec<&str> = criteria
            .iter()
            .filter(|c| !criteria_met.contains(c))
            .map(String::as_str)
            .collect();
        if !missed.is_empty() {
            limitations.push(format!("criteria not met: {}", missed.join(", ")));
        }

        let (correspondence, confidence) = if mapping.is_empty() {
            limitations.push("the domains share no vocabulary or stored structure".into());
            (
                format!("no clear mapping found between '{source}' and '{target}'"),
                (CRITERION_BONUS * criteria_met.len() as f32).min(UNMAPPED_CEILING),
            )
        } else {
            let mean = mapping.iter().map(|m| m.similarity).sum::<f32>() / mapping.len() as f32;
            let coverage = mapping.len() as f32 / src.elements.len() as f32;
            let confidence = (mean * coverage + CRITERION_BONUS * criteria_met.len() as f32)
                .clamp(0.0, MAX_CONFIDENCE);
            let pairs: Vec<String> = mapping
                .iter()
                .map(|m| format!("{} ~ {}", m.source, m.target))
                .collect();
            (
                format!("'{source}' corresponds to '{target}': {}", pairs.join(", ")),
                confidence,
            )
        };

        tracing::info!(mappings = mapping.len(), confidence, "analogy mapped");
        Ok(Analogy {
            mode: InferenceMode::Analogy,
            source,
            target,
            mapping,
            correspondence,
            inferences,
            confidence,
            limitations,
            criteria_met,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::test_engine;
    use crate::graph::NewTriple;

    #[test]
    fn disjoint_domains_report_no_mapping() {
        let engine = test_engine();
        let a = engine
            .analogy::<&str>("assembly line", "software pipeline", &[])
            .unwrap();
        assert!(a.mapping.is_empty());
        assert!(a.confidence <= 0.3);
        assert!(a.correspondence.starts_with("no clear mapping found"));
        assert!(!a.limitations.is_empty());
    }

    #[test]
    fn shared_stems_map_and_criteria_boost() {
        let engine = test_engine();
        let plain = engine
            .analogy::<&str>("heart pumps blood", "pump moves water", &[])
            .unwrap();
        assert!(plain
            .mapping
            .iter()
            .any(|m| m.source == "pumps" && m.target == "pump" && m.similarity > 0.8));

        let boosted = engine
            .analogy("heart pumps blood", "pump moves water", &["pumping"])
            .unwrap();
        assert_eq!(boosted.criteria_met, vec!["pumping".to_string()]);
        assert!((boosted.confidence - (plain.confidence + 0.1)).abs() < 1e-5);
        assert!(boosted.confidence <= 0.95);
    }

    #[test]
    fn stored_structure_maps_and_transfers_relations() {
        let engine = test_engine();
        let kb = engine.kb();
        for (s, p, o, ctx) in [
            ("sun", "attracts", "planet", "solar system"),
            ("planet", "orbits", "sun", "solar system"),
            ("sun", "heats", "planet", "solar system"),
            ("nucleus", "attracts", "electron", "atom"),
            ("electron", "orbits", "nucleus", "atom"),
        ] {
            kb.add_triple(NewTriple::new(s, p, o).with_context(ctx)).unwrap();
        }

        let a = engine
            .analogy("solar system", "atom", &["structure"])
            .unwrap();
        let pairs: Vec<(&str, &str)> = a
            .mapping
            .iter()
            .map(|m| (m.source.as_str(), m.target.as_str()))
            .collect();
        assert!(pairs.contains(&("sun", "nucleus")));
        assert!(pairs.contains(&("planet", "electron")));
        assert_eq!(a.criteria_met, vec!["structure".to_string()]);
        assert_eq!(a.inferences.len(), 1);
        assert!(a.inferences[0].starts_with("nucleus heats electron"));
    }

    #[test]
    fn blank_domains_are_rejected() {
        let engine = test_engine();
        assert!(engine.analogy::<&str>(" ", "x", &[]).unwrap_err().is_validation());
    }
}
