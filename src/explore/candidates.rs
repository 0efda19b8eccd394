//! Candidate generation and selection over a fixed strategy menu.
//!
//! Every strategy is scored from its feasibility and how much of the problem
//! it speaks to. Stored patterns matching the problem's keywords join as
//! extra candidates, variations pad the list up to the requested count, and
//! criteria adjust the score by what they find in strengths and weaknesses.

use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, ValidationError};
use crate::graph::non_empty;
use crate::pattern::{Pattern, PatternId};
use crate::provenance::InferenceMode;
use crate::reason::Conclusion;

use super::{ExplorationEngine, text};

const OP: &str = "generate_candidates";

const FEASIBILITY_WEIGHT: f32 = 0.6;
const RELEVANCE_WEIGHT: f32 = 0.4;
/// Keyword hits at which relevance saturates.
const RELEVANCE_SATURATION: f32 = 2.0;
const STRENGTH_BONUS: f32 = 0.2;
const WEAKNESS_PENALTY: f32 = 0.15;
/// Each further variation of the same base scores this much less.
const VARIATION_DECAY: f32 = 0.9;
const MAX_ALTERNATIVES: usize = 2;

struct Strategy {
    name: &'static str,
    description: &'static str,
    strengths: &'static [&'static str],
    weaknesses: &'static [&'static str],
    feasibility: f32,
    keywords: &'static [&'static str],
}

const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "direct",
        description: "apply the most obvious fix to the immediate symptom",
        strengths: &["fast to apply", "simple and low cost"],
        weaknesses: &["may miss underlying causes", "limited for complex problems"],
        feasibility: 0.9,
        keywords: &["fix", "quick", "simple", "direct", "immediate", "urgent"],
    },
    Strategy {
        name: "divide_and_conquer",
        description: "split the problem into independent parts and solve each",
        strengths: &["handles complex problems", "parallel work", "clear progress tracking"],
        weaknesses: &["coordination overhead", "may miss interactions between parts"],
        feasibility: 0.8,
        keywords: &["complex", "large", "system", "multiple", "parts", "split", "scale"],
    },
    Strategy {
        name: "analogy",
        description: "adapt a solution from a similar, already solved problem",
        strengths: &["reuses proven solutions", "fast insight"],
        weaknesses: &["analogies may not transfer", "risk of surface similarity"],
        feasibility: 0.7,
        keywords: &["similar", "like", "pattern", "familiar", "known"],
    },
    Strategy {
        name: "first_principles",
        description: "rebuild the solution from fundamental facts and constraints",
        strengths: &["deep understanding", "novel robust solutions"],
        weaknesses: &["slow and time consuming", "high effort"],
        feasibility: 0.6,
        keywords: &["why", "fundamental", "root", "cause", "understand", "design"],
    },
    Strategy {
        name: "optimization",
        description: "measure the current approach and tune its bottlenecks",
        strengths: &["measurable improvement", "efficient use of resources"],
        weaknesses: &["needs metrics", "may reach a local optimum"],
        feasibility: 0.75,
        keywords: &["performance", "slow", "faster", "cost", "efficient", "optimize", "latency", "reduce"],
    },
    Strategy {
        name: "creative",
        description: "generate unconventional ideas that break current assumptions",
        strengths: &["novel ideas", "breaks assumptions"],
        weaknesses: &["uncertain outcome", "hard to evaluate"],
        feasibility: 0.5,
        keywords: &["new", "innovative", "creative", "idea", "novel", "stuck"],
    },
    Strategy {
        name: "technology_based",
        description: "introduce a tool or automation that removes the problem",
        strengths: &["scalable automation", "consistent results"],
        weaknesses: &["costly to adopt", "integration risk"],
        feasibility: 0.65,
        keywords: &["automate", "tool", "software", "technology", "platform", "data"],
    },
    Strategy {
        name: "iterative",
        description: "ship a small change, observe, and refine in cycles",
        strengths: &["low risk", "learns from feedback", "reliable progress"],
        weaknesses: &["slow to converge", "needs many cycles"],
        feasibility: 0.8,
        keywords: &["improve", "iterate", "feedback", "test", "experiment", "gradual", "uncertain"],
    },
];

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateOrigin {
    Strategy,
    Pattern { id: PatternId },
    Variation { of: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub description: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub feasibility: f32,
    pub relevance: f32,
    pub base_score: f32,
    /// Present when criteria were given.
    pub criteria_score: Option<f32>,
    pub score: f32,
    pub origin: CandidateOrigin,
}

impl Candidate {
    fn scored(
        name: String,
        description: String,
        strengths: Vec<String>,
        weaknesses: Vec<String>,
        feasibility: f32,
        relevance: f32,
        origin: CandidateOrigin,
    ) -> Self {
        let base_score =
            (FEASIBILITY_WEIGHT * feasibility + RELEVANCE_WEIGHT * relevance).clamp(0.0, 1.0);
        Self {
            name,
            description,
            strengths,
            weaknesses,
            feasibility,
            relevance,
            base_score,
            criteria_score: None,
            score: base_score,
            origin,
        }
    }

    fn from_strategy(strategy: &Strategy, problem_tokens: &[String]) -> Self {
        let hits = strategy
            .keywords
            .iter()
            .filter(|k| text::mentions(problem_tokens, k))
            .count();
        Self::scored(
            strategy.name.to_string(),
            strategy.description.to_string(),
            strategy.strengths.iter().map(|s| s.to_string()).collect(),
            strategy.weaknesses.iter().map(|s| s.to_string()).collect(),
            strategy.feasibility,
            relevance(hits),
            CandidateOrigin::Strategy,
        )
    }

    fn from_pattern(pattern: &Pattern, problem_tokens: &[String]) -> Self {
        let hits = pattern
            .context
            .iter()
            .filter(|tag| text::mentions(problem_tokens, tag))
            .count();
        let feasibility = if pattern.usage.count > 0 {
            pattern.usage.success_rate
        } else {
            pattern.confidence
        };
        let description = pattern
            .field("description")
            .unwrap_or_else(|| pattern.structure.clone());
        let mut strengths = vec!["proven in matching contexts".to_string()];
        strengths.extend(pattern.field("strengths"));
        let mut weaknesses = vec!["may not transfer to this problem".to_string()];
        weaknesses.extend(pattern.field("weaknesses"));
        Self::scored(
            format!("pattern:{}", pattern.kind),
            description,
            strengths,
            weaknesses,
            feasibility,
            relevance(hits),
            CandidateOrigin::Pattern { id: pattern.id },
        )
    }

    fn variation(&self, n: usize) -> Self {
        let decay = VARIATION_DECAY.powi(n as i32);
        let mut v = self.clone();
        v.name = format!("{} (variation {n})", self.name);
        v.description = format!("{}, adjusted", self.description);
        v.base_score = (self.base_score * decay).clamp(0.0, 1.0);
        v.score = v.base_score;
        v.origin = CandidateOrigin::Variation {
            of: self.name.clone(),
        };
        v
    }

    /// Blend the base score 50/50 with what the criteria find.
    fn apply_criteria(&mut self, criteria: &[Vec<String>]) {
        if criteria.is_empty() {
            return;
        }
        let strengths = text::tokens(&self.strengths.join(" "));
        let weaknesses = text::tokens(&self.weaknesses.join(" "));
        let evidenced = |tokens: &[String]| {
            criteria
                .iter()
                .filter(|c| text::coverage(tokens, c) >= 1.0)
                .count() as f32
        };
        let criteria_score =
            (0.5 + STRENGTH_BONUS * evidenced(&strengths) - WEAKNESS_PENALTY * evidenced(&weaknesses))
                .clamp(0.0, 1.0);
        self.criteria_score = Some(criteria_score);
        self.score = (0.5 * self.base_score + 0.5 * criteria_score).clamp(0.0, 1.0);
    }
}

fn relevance(hits: usize) -> f32 {
    (hits as f32 / RELEVANCE_SATURATION).min(1.0)
}

/// Ranked candidates and the selection made from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub mode: InferenceMode,
    pub problem: String,
    pub criteria: Vec<String>,
    /// Score descending; ties keep generation order.
    pub ranked: Vec<Candidate>,
    pub selected: Candidate,
    pub rejected_alternatives: Vec<Candidate>,
    pub rationale: String,
}

impl Conclusion for CandidateSet {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.selected.score
    }
}

impl ExplorationEngine {
    /// Generate `count` scored candidate solutions and select the best.
    pub fn generate_candidates<S: AsRef<str>>(
        &self,
        problem: &str,
        count: usize,
        criteria: &[S],
    ) -> NoesisResult<CandidateSet> {
        let problem = non_empty(OP, "problem", problem)?;
        let max = self.config().max_candidates;
        if count == 0 || count > max {
            return Err(ValidationError::InvalidArgument {
                op: OP,
                constraint: format!("count must be between 1 and {max}, got {count}"),
            }
            .into());
        }
        let criteria: Vec<String> = criteria
            .iter()
            .map(|c| text::normalize(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();
        let span = tracing::info_span!("generate_candidates", mode = %InferenceMode::Candidates, count);
        let _guard = span.enter();

        let problem_tokens = text::tokens(&problem);
        let mut candidates: Vec<Candidate> = STRATEGIES
            .iter()
            .map(|s| Candidate::from_strategy(s, &problem_tokens))
            .collect();

        let mut tags = text::keywords(&problem);
        tags.extend(criteria.iter().cloned());
        for pattern in self.kb().fetch_patterns(&tags)? {
            let candidate = Candidate::from_pattern(&pattern, &problem_tokens);
            if !candidates.iter().any(|c| c.name == candidate.name) {
                candidates.push(candidate);
            }
        }

        // Pad with variations of the strongest bases, round-robin.
        if candidates.len() < count {
            let mut bases = candidates.clone();
            bases.sort_by(|a, b| b.base_score.total_cmp(&a.base_score));
            let mut round = 1;
            while candidates.len() < count {
                for base in &bases {
                    if candidates.len() >= count {
                        break;
                    }
                    candidates.push(base.variation(round));
                }
                round += 1;
            }
        }

        let criteria_terms: Vec<Vec<String>> = criteria
            .iter()
            .map(|c| text::tokens(c))
            .filter(|t| !t.is_empty())
            .collect();
        for candidate in &mut candidates {
            candidate.apply_criteria(&criteria_terms);
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(count);

        let Some(selected) = candidates.first().cloned() else {
            return Err(ValidationError::InvalidArgument {
                op: OP,
                constraint: "no candidate could be generated".into(),
            }
            .into());
        };
        let rejected_alternatives: Vec<Candidate> = candidates
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .cloned()
            .collect();
        let rationale = rationale(&selected, rejected_alternatives.first());

        tracing::info!(selected = %selected.name, score = selected.score, "candidate selected");
        Ok(CandidateSet {
            mode: InferenceMode::Candidates,
            problem,
            criteria,
            ranked: candidates,
            selected,
            rejected_alternatives,
            rationale,
        })
    }
}

fn rationale(selected: &Candidate, runner_up: Option<&Candidate>) -> String {
    let mut out = format!(
        "selected {} (score {:.2}) for its strengths: {}",
        selected.name,
        selected.score,
        selected.strengths.join(", ")
    );
    match runner_up {
        Some(r) => out.push_str(&format!(
            "; runner-up {} (score {:.2}) is held back by: {}",
            r.name,
            r.score,
            r.weaknesses.join(", ")
        )),
        None => out.push_str("; no alternative was requested"),
    }
    out
}
