//! Induction: generalize a shared predicate pattern across examples.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{NoesisResult, ReasonError};
use crate::graph::check_unit;
use crate::graph::TripleQuery;
use crate::graph::rules::NewRule;
use crate::pattern::{NewPattern, PatternId};
use crate::provenance::InferenceMode;

use super::{Conclusion, ReasoningCore, non_empty_items};

const OP: &str = "induce";

/// Result of an induction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Induction {
    pub mode: InferenceMode,
    /// The generalization, e.g. `?x has fur` or `?x has_status ?y`.
    pub generalization: String,
    pub predicate: String,
    /// `None` when only the predicate generalizes.
    pub object: Option<String>,
    /// Fraction of examples supporting the generalization.
    pub confidence: f32,
    pub support: usize,
    pub example_count: usize,
    /// Examples that do not exhibit the generalization.
    pub counterexamples: Vec<String>,
    /// A rule relating the generalization to another shared feature.
    pub rule: Option<NewRule>,
    /// The learned pattern, when pattern learning is on.
    pub pattern: Option<PatternId>,
}

impl Conclusion for Induction {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// A `(predicate, object?)` feature shared across examples.
type Feature = (String, Option<String>);

/// Facts gathered for one example.
#[derive(Debug, Default)]
struct ExampleFacts {
    features: BTreeSet<Feature>,
    contexts: BTreeSet<String>,
}

impl ExampleFacts {
    fn add(&mut self, predicate: &str, object: &str) {
        self.features.insert((predicate.to_string(), Some(object.to_string())));
        self.features.insert((predicate.to_string(), None));
    }
}

impl ReasoningCore {
    /// Generalize across examples. Each example is a statement
    /// (`dog has fur`) or an entity name (`dog`); stored triples about its
    /// subject are added to what the example says.
    pub fn induce(&self, examples: &[String], min_confidence: f32) -> NoesisResult<Induction> {
        let examples = non_empty_items(OP, "examples", examples)?;
        check_unit(OP, "min_confidence", min_confidence)?;
        let span = tracing::info_span!("induce", mode = %InferenceMode::Induction, examples = examples.len());
        let _guard = span.enter();

        let mut facts: Vec<ExampleFacts> = Vec::with_capacity(examples.len());
        for example in &examples {
            let mut ex = ExampleFacts::default();
            let subject = match self.parse(example)? {
                Some(statement) => {
                    ex.add(&statement.predicate, &statement.object);
                    statement.subject
                }
                None => example.clone(),
            };
            for triple in self
                .kb()
                .fetch_stored(TripleQuery::new().subject(subject))?
            {
                ex.add(&triple.predicate, &triple.object);
                if !triple.metadata.context.is_empty() {
                    ex.contexts.insert(triple.metadata.context.clone());
                }
            }
            facts.push(ex);
        }

        let mut support: BTreeMap<&Feature, usize> = BTreeMap::new();
        for ex in &facts {
            for feature in &ex.features {
                *support.entry(feature).or_default() += 1;
            }
        }
        let n = examples.len();
        // A feature only generalizes if every example, or at least two, have it.
        let shared = n.min(2);
        // Max support; a concrete object beats a bare predicate; then
        // feature order for determinism.
        let Some((best, best_support)) = support
            .iter()
            .filter(|(_, s)| **s >= shared)
            .max_by(|(fa, sa), (fb, sb)| {
                sa.cmp(sb)
                    .then_with(|| fa.1.is_some().cmp(&fb.1.is_some()))
                    .then_with(|| fb.cmp(fa))
            })
            .map(|(f, s)| ((*f).clone(), *s))
        else {
            tracing::debug!(features = support.len(), "no shared feature to generalize");
            return Err(ReasonError::BelowThreshold {
                op: OP,
                confidence: 0.0,
                threshold: min_confidence,
            }
            .into());
        };

        let confidence = best_support as f32 / n as f32;
        if confidence < min_confidence {
            tracing::debug!(confidence, min_confidence, "induction discarded");
            return Err(ReasonError::BelowThreshold {
                op: OP,
                confidence,
                threshold: min_confidence,
            }
            .into());
        }

        let (predicate, object) = best.clone();
        let generalization = match &object {
            Some(o) => format!("?x {predicate} {o}"),
            None => format!("?x {predicate} ?y"),
        };
        let supporting: Vec<&ExampleFacts> =
            facts.iter().filter(|ex| ex.features.contains(&best)).collect();
        let counterexamples = examples
            .iter()
            .zip(&facts)
            .filter(|(_, ex)| !ex.features.contains(&best))
            .map(|(e, _)| e.clone())
            .collect();

        let rule = object.as_ref().and_then(|_| {
            support
                .keys()
                .filter(|f| f.1.is_some() && f.0 != predicate)
                .find(|f| supporting.iter().all(|ex| ex.features.contains(**f)))
                .map(|(p, o)| {
                    let o = o.as_deref().unwrap_or_default();
                    NewRule::new(
                        format!("induced_{predicate}"),
                        [format!("?x {p} {o}")],
                        generalization.clone(),
                    )
                    .with_confidence(confidence)
                })
        });

        let pattern = if self.config().learn_patterns {
            let mut context: Vec<String> = supporting
                .iter()
                .flat_map(|ex| ex.contexts.iter().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            context.push("general".into());
            let structure = json!({
                "generalization": generalization,
                "predicate": predicate,
                "object": object,
            });
            let id = self.kb().add_pattern(
                NewPattern::new("induction", structure, context)
                    .with_confidence(confidence)
                    .with_source(InferenceMode::Induction.source_tag()),
            )?;
            Some(id)
        } else {
            None
        };

        tracing::info!(%generalization, confidence, support = best_support, "induced");
        Ok(Induction {
            mode: InferenceMode::Induction,
            generalization,
            predicate,
            object,
            confidence,
            support: best_support,
            example_count: n,
            counterexamples,
            rule,
            pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReasoningConfig;
    use crate::error::NoesisError;
    use crate::graph::NewTriple;
    use crate::kb::test_kb;

    fn core() -> ReasoningCore {
        let core = ReasoningCore::new(test_kb(), ReasoningConfig::default());
        let kb = core.kb();
        for (s, p, o) in [
            ("dog", "has", "fur"),
            ("dog", "is_a", "mammal"),
            ("cat", "has", "fur"),
            ("cat", "is_a", "mammal"),
            ("cow", "is_a", "mammal"),
            ("trout", "has", "scales"),
        ] {
            kb.add_triple(NewTriple::new(s, p, o).with_context("bio")).unwrap();
        }
        core
    }

    #[test]
    fn generalizes_the_best_supported_feature() {
        let core = core();
        let examples: Vec<String> = ["dog", "cat", "cow"].map(String::from).to_vec();
        let ind = core.induce(&examples, 0.5).unwrap();
        assert_eq!(ind.generalization, "?x is_a mammal");
        assert_eq!(ind.support, 3);
        assert!((ind.confidence - 1.0).abs() < 1e-6);
        assert!(ind.counterexamples.is_empty());
        assert!(ind.rule.is_none());

        let pattern = core.kb().patterns.get(ind.pattern.unwrap()).unwrap();
        assert_eq!(pattern.kind, "induction");
        assert!(pattern.context.contains("bio"));
        assert_eq!(pattern.source, "reasoning:induction");
    }

    #[test]
    fn confidence_is_the_supporting_fraction() {
        let core = core();
        let examples: Vec<String> = ["dog has fur", "cat has fur", "trout has scales", "cow"]
            .map(String::from)
            .to_vec();
        let ind = core.induce(&examples, 0.3).unwrap();
        // `?x has ?y` also reaches 3 of 4; the concrete object wins the tie.
        assert_eq!(ind.generalization, "?x is_a mammal");
        assert!((ind.confidence - 0.75).abs() < 1e-6);
        assert_eq!(ind.counterexamples, vec!["trout has scales".to_string()]);
    }

    #[test]
    fn forms_a_rule_from_a_co_occurring_feature() {
        let core = core();
        let examples: Vec<String> = ["dog", "cat"].map(String::from).to_vec();
        let ind = core.induce(&examples, 0.9).unwrap();
        let rule = ind.rule.unwrap();
        assert_eq!(rule.conclusion, ind.generalization);
        assert_eq!(rule.conditions.len(), 1);
        assert_ne!(rule.conditions[0], ind.generalization);
    }

    #[test]
    fn below_threshold_is_an_error() {
        let core = core();
        let examples: Vec<String> = ["dog", "trout", "salmon", "rock"].map(String::from).to_vec();
        let err = core.induce(&examples, 0.9).unwrap_err();
        assert!(err.to_string().contains("below threshold"));
        assert!(core.induce(&[], 0.5).unwrap_err().is_validation());

        // Nothing shared at all still fails the threshold, at zero confidence.
        let unrelated: Vec<String> = ["trout", "rock"].map(String::from).to_vec();
        let err = core.induce(&unrelated, 0.0).unwrap_err();
        assert!(matches!(
            err,
            NoesisError::Reason(ReasonError::BelowThreshold { confidence, .. }) if confidence == 0.0
        ));
        assert!(core
            .induce(&["dog".to_string()], 1.5)
            .unwrap_err()
            .is_validation());
    }
}
