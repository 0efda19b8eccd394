//! Deduction: forward-chain stored rules from premise facts.
//!
//! Premises select stored triples (the working memory). Rules then fire in
//! rounds, each firing joining its conditions against working memory and the
//! store, and each needing at least one working-memory fact so the result
//! actually follows from the premises. Derived facts join working memory for
//! the next round. Confidence is the weakest link times rule priority, so a
//! conclusion never exceeds its weakest support.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, ReasonError, ValidationError};
use crate::graph::rules::{Bindings, Rule, TriplePattern};
use crate::graph::{NewTriple, Triple, TripleId, TripleQuery};
use crate::provenance::InferenceMode;

use super::{Conclusion, ReasoningCore, domain_context, non_empty_items};

const OP: &str = "deduce";

/// Result of a deduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub mode: InferenceMode,
    /// The conclusion as `subject predicate object`.
    pub conclusion: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    /// Name of the rule that drew the conclusion.
    pub rule: String,
    /// Stored triples the conclusion rests on.
    pub supporting_triples: Vec<Triple>,
    /// Rule firings from premises to conclusion, in order.
    pub chain: Vec<String>,
    /// Every other conclusion reached, strongest first.
    pub other_conclusions: Vec<(String, f32)>,
    /// Id of the written-back triple, when one was stored.
    pub stored: Option<TripleId>,
}

impl Conclusion for Deduction {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// A fact in working memory.
#[derive(Debug, Clone)]
struct Fact {
    triple: Triple,
    /// Firings that produced this fact; empty for premise facts.
    chain: Vec<String>,
    /// Stored triples this fact rests on.
    support: Vec<Triple>,
    /// Rule that derived it, if any.
    rule: Option<String>,
}

/// Where a condition match came from.
#[derive(Debug, Clone)]
enum Source {
    Working(usize),
    Stored(Triple),
}

impl ReasoningCore {
    /// Deduce conclusions from premises using stored rules for `domain`.
    pub fn deduce(&self, premises: &[String], domain: &str) -> NoesisResult<Deduction> {
        let premises = non_empty_items(OP, "premises", premises)?;
        let context = domain_context(domain);
        let span = tracing::info_span!("deduce", mode = %InferenceMode::Deduction, premises = premises.len());
        let _guard = span.enter();

        let mut working: Vec<Fact> = Vec::new();
        for premise in &premises {
            let statement = self.parse(premise)?.ok_or_else(|| ValidationError::Malformed {
                op: OP,
                input: premise.clone(),
                reason: "expected `subject predicate object`".into(),
            })?;
            let query = TripleQuery {
                subject: Some(statement.subject),
                predicate: Some(statement.predicate),
                object: Some(statement.object),
                context: context.clone(),
                ..Default::default()
            };
            for triple in self.kb().fetch_stored(query)? {
                if !working.iter().any(|f| f.triple.id == triple.id) {
                    working.push(Fact {
                        support: vec![triple.clone()],
                        triple,
                        chain: Vec::new(),
                        rule: None,
                    });
                }
            }
        }
        if working.is_empty() {
            return Err(ReasonError::InsufficientPremises {
                op: OP,
                reason: "no stored triple matches any premise".into(),
            }
            .into());
        }
        let premise_count = working.len();

        let rules = self.kb().rules_for_domain(domain)?;
        for round in 0..self.config().max_deduction_depth {
            let mut fresh = Vec::new();
            for rule in &rules {
                for (bindings, sources) in self.firings(rule, &working, context.as_deref())? {
                    if let Some(fact) = derive(rule, &bindings, &sources, &working) {
                        let known = working
                            .iter()
                            .chain(fresh.iter())
                            .any(|f: &Fact| same_fact(&f.triple, &fact.triple));
                        if !known {
                            fresh.push(fact);
                        }
                    }
                }
            }
            tracing::debug!(round, derived = fresh.len(), "deduction round");
            if fresh.is_empty() {
                break;
            }
            working.extend(fresh);
        }

        let derived = &working[premise_count..];
        let Some(best) = derived
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.triple
                    .confidence
                    .total_cmp(&b.triple.confidence)
                    .then_with(|| b.chain.len().cmp(&a.chain.len()))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, f)| f.clone())
        else {
            return Err(ReasonError::InsufficientPremises {
                op: OP,
                reason: format!(
                    "no stored rule fires on the premises ({} rule(s) considered)",
                    rules.len()
                ),
            }
            .into());
        };

        let mut other_conclusions: Vec<(String, f32)> = derived
            .iter()
            .filter(|f| !same_fact(&f.triple, &best.triple))
            .map(|f| (f.triple.render(), f.triple.confidence))
            .collect();
        other_conclusions.sort_by(|a, b| b.1.total_cmp(&a.1));

        let stored = if self.config().write_back {
            self.write_back(&best.triple, context.as_deref())?
        } else {
            None
        };

        tracing::info!(
            conclusion = %best.triple.render(),
            confidence = best.triple.confidence,
            "deduced"
        );
        Ok(Deduction {
            mode: InferenceMode::Deduction,
            conclusion: best.triple.render(),
            subject: best.triple.subject.clone(),
            predicate: best.triple.predicate.clone(),
            object: best.triple.object.clone(),
            confidence: best.triple.confidence,
            rule: best.rule.unwrap_or_default(),
            supporting_triples: best.support,
            chain: best.chain,
            other_conclusions,
            stored,
        })
    }

    /// Every way a rule's conditions are met with at least one working fact.
    fn firings(
        &self,
        rule: &Rule,
        working: &[Fact],
        context: Option<&str>,
    ) -> NoesisResult<Vec<(Bindings, Vec<Source>)>> {
        let mut out = Vec::new();
        self.join(
            &rule.conditions,
            Bindings::new(),
            working,
            context,
            &mut Vec::new(),
            &mut out,
        )?;
        out.retain(|(_, sources)| sources.iter().any(|s| matches!(s, Source::Working(_))));
        Ok(out)
    }

    fn join(
        &self,
        conditions: &[TriplePattern],
        bindings: Bindings,
        working: &[Fact],
        context: Option<&str>,
        sources: &mut Vec<Source>,
        out: &mut Vec<(Bindings, Vec<Source>)>,
    ) -> NoesisResult<()> {
        let limit = self.config().max_inferred_per_rule;
        if out.len() >= limit {
            return Ok(());
        }
        let Some((first, rest)) = conditions.split_first() else {
            out.push((bindings, sources.clone()));
            return Ok(());
        };

        for (i, fact) in working.iter().enumerate() {
            if let Some(next) = first.unify(&fact.triple, &bindings) {
                sources.push(Source::Working(i));
                self.join(rest, next, working, context, sources, out)?;
                sources.pop();
            }
        }

        let mut query = first.to_query(&bindings);
        query.context = context.map(str::to_string);
        for triple in self.kb().fetch_stored(query)? {
            if working.iter().any(|f| f.triple.id == triple.id) {
                continue;
            }
            if let Some(next) = first.unify(&triple, &bindings) {
                sources.push(Source::Stored(triple));
                self.join(rest, next, working, context, sources, out)?;
                sources.pop();
            }
        }
        Ok(())
    }

    /// Store the conclusion unless an identical or stronger triple exists.
    fn write_back(&self, triple: &Triple, context: Option<&str>) -> NoesisResult<Option<TripleId>> {
        let existing = self.kb().triples.find_fact(
            &triple.subject,
            &triple.predicate,
            &triple.object,
            context,
        )?;
        if let Some(existing) = existing {
            if existing.confidence >= triple.confidence {
                tracing::debug!(
                    conclusion = %triple.render(),
                    "write-back skipped: an equal or stronger triple is stored"
                );
                return Ok(None);
            }
        }
        let new = NewTriple::new(&triple.subject, &triple.predicate, &triple.object)
            .with_confidence(triple.confidence)
            .with_context(context.unwrap_or_default());
        let id = self.kb().add_derived(new, InferenceMode::Deduction)?;
        Ok(Some(id))
    }
}

/// Build the derived fact for one firing.
fn derive(rule: &Rule, bindings: &Bindings, sources: &[Source], working: &[Fact]) -> Option<Fact> {
    let (subject, predicate, object) = rule.conclusion.instantiate(bindings)?;

    let mut weakest = 1.0f32;
    let mut chain: Vec<String> = Vec::new();
    let mut support: BTreeMap<String, Triple> = BTreeMap::new();
    let mut timestamp = 0;
    let mut premises = Vec::new();
    for source in sources {
        let (triple, prior_chain, prior_support) = match source {
            Source::Working(i) => {
                let fact = &working[*i];
                (&fact.triple, fact.chain.as_slice(), fact.support.as_slice())
            }
            Source::Stored(t) => (t, &[][..], std::slice::from_ref(t)),
        };
        weakest = weakest.min(triple.confidence);
        timestamp = timestamp.max(triple.timestamp);
        premises.push(triple.render());
        for step in prior_chain {
            if !chain.contains(step) {
                chain.push(step.clone());
            }
        }
        for t in prior_support {
            support.entry(support_key(t)).or_insert_with(|| t.clone());
        }
    }

    let confidence = rule.derive_confidence(weakest);
    let conclusion = format!("{subject} {predicate} {object}");
    chain.push(format!(
        "{}: {} => {} ({confidence:.3})",
        rule.name,
        premises.join(" & "),
        conclusion
    ));

    Some(Fact {
        triple: Triple {
            id: None,
            subject,
            predicate,
            object,
            confidence,
            timestamp,
            metadata: crate::graph::TripleMetadata {
                source: InferenceMode::Deduction.source_tag(),
                context: rule.domain.clone().unwrap_or_default(),
                validation: crate::graph::ValidationStatus::Derived {
                    mode: InferenceMode::Deduction,
                },
            },
        },
        chain,
        support: support.into_values().collect(),
        rule: Some(rule.name.clone()),
    })
}

fn support_key(t: &Triple) -> String {
    match t.id {
        Some(id) => format!("{:020}", id.get()),
        None => t.render(),
    }
}

fn same_fact(a: &Triple, b: &Triple) -> bool {
    a.same_fact(&b.subject, &b.predicate, &b.object)
}
