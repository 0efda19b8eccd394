//! Staged analysis of a problem: frame it, gather what is known, connect
//! the facts, weigh them, conclude. Each step reads the previous step's
//! conclusion; confidence compounds across steps.

use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, ValidationError};
use crate::graph::{Triple, TripleQuery, non_empty, rank};
use crate::provenance::InferenceMode;
use crate::reason::{Conclusion, domain_context};

use super::{ExplorationEngine, text};

const OP: &str = "sequential_analysis";

const MAX_EVIDENCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Frame,
    Gather,
    Connect,
    Evaluate,
    Conclude,
}

impl Stage {
    const ORDER: [Stage; 5] = [
        Stage::Frame,
        Stage::Gather,
        Stage::Connect,
        Stage::Evaluate,
        Stage::Conclude,
    ];

    pub fn description(self) -> &'static str {
        match self {
            Stage::Frame => "identify the key concepts of the problem",
            Stage::Gather => "collect stored facts about those concepts",
            Stage::Connect => "link facts that share concepts",
            Stage::Evaluate => "weigh the strongest and weakest support",
            Stage::Conclude => "state the best supported conclusion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStep {
    pub index: usize,
    pub stage: Stage,
    pub description: String,
    /// The previous step's conclusion (the problem for the first step).
    pub input: String,
    pub reasoning: String,
    pub conclusion: String,
    pub confidence: f32,
    pub evidence: Vec<String>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialAnalysis {
    pub mode: InferenceMode,
    pub problem: String,
    pub steps: Vec<AnalysisStep>,
    pub final_conclusion: String,
    /// Product of the step confidences.
    pub overall_confidence: f32,
}

impl Conclusion for SequentialAnalysis {
    fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn confidence(&self) -> f32 {
        self.overall_confidence
    }
}

/// What the steps have established so far.
#[derive(Default)]
struct Findings {
    keywords: Vec<String>,
    facts: Vec<Triple>,
    links: Vec<String>,
}

struct StepOutcome {
    reasoning: String,
    conclusion: String,
    confidence: f32,
    evidence: Vec<String>,
    is_final: bool,
}

fn mean_confidence(facts: &[Triple]) -> f32 {
    if facts.is_empty() {
        return 0.0;
    }
    facts.iter().map(|t| t.confidence).sum::<f32>() / facts.len() as f32
}

impl ExplorationEngine {
    /// Run at most `max_steps` analysis stages over a problem.
    pub fn sequential_analysis(
        &self,
        problem: &str,
        max_steps: usize,
        domain: &str,
    ) -> NoesisResult<SequentialAnalysis> {
        let problem = non_empty(OP, "problem", problem)?;
        if max_steps == 0 {
            return Err(ValidationError::InvalidArgument {
                op: OP,
                constraint: "max_steps must be at least 1".into(),
            }
            .into());
        }
        let span = tracing::info_span!("sequential_analysis", mode = %InferenceMode::Sequential, max_steps);
        let _guard = span.enter();

        let ctx = domain_context(domain);
        let mut findings = Findings::default();
        let mut steps: Vec<AnalysisStep> = Vec::new();
        let mut input = problem.clone();

        for (index, stage) in Stage::ORDER.into_iter().take(max_steps).enumerate() {
            let outcome = match stage {
                Stage::Frame => frame(&problem, &mut findings),
                Stage::Gather => self.gather(ctx.as_deref(), &mut findings)?,
                Stage::Connect => connect(&mut findings),
                Stage::Evaluate => evaluate(&findings),
                Stage::Conclude => conclude(&problem, &findings),
            };
            tracing::debug!(index, ?stage, confidence = outcome.confidence, "analysis step");
            let is_final = outcome.is_final || stage == Stage::Conclude;
            steps.push(AnalysisStep {
                index,
                stage,
                description: stage.description().to_string(),
                input: std::mem::replace(&mut input, outcome.conclusion.clone()),
                reasoning: outcome.reasoning,
                conclusion: outcome.conclusion,
                confidence: outcome.confidence.clamp(0.0, 1.0),
                evidence: outcome.evidence,
                is_final,
            });
            if is_final {
                break;
            }
        }

        let overall_confidence = steps.iter().map(|s| s.confidence).product::<f32>();
        let final_conclusion = steps
            .last()
            .map(|s| s.conclusion.clone())
            .unwrap_or_default();
        tracing::info!(steps = steps.len(), overall_confidence, "analysis finished");
        Ok(SequentialAnalysis {
            mode: InferenceMode::Sequential,
            problem,
            steps,
            final_conclusion,
            overall_confidence,
        })
    }

    /// Search stored facts for the problem's own keywords, as framed.
    fn gather(&self, context: Option<&str>, findings: &mut Findings) -> NoesisResult<StepOutcome> {
        let terms = findings.keywords.clone();
        let mut query = TripleQuery::new();
        query.context = context.map(str::to_string);
        let stored = self.kb().fetch_stored(query)?;
        let (mut facts, rest): (Vec<Triple>, Vec<Triple>) = stored.into_iter().partition(|t| {
            let concepts = text::tokens(&format!("{} {}", t.subject, t.object));
            terms.iter().any(|k| text::mentions(&concepts, k))
        });
        // One hop further: facts about what the direct matches point at.
        let reached: Vec<String> = facts.iter().map(|t| text::normalize(&t.object)).collect();
        facts.extend(
            rest.into_iter()
                .filter(|t| reached.contains(&text::normalize(&t.subject))),
        );
        rank(&mut facts);
        facts.truncate(MAX_EVIDENCE);
        findings.facts = facts;

        if findings.facts.is_empty() {
            return Ok(StepOutcome {
                reasoning: format!("searched stored facts for {}", terms.join(", ")),
                conclusion: "no stored knowledge bears on the problem".into(),
                confidence: 0.4,
                evidence: Vec::new(),
                is_final: true,
            });
        }
        let evidence: Vec<String> = findings.facts.iter().map(Triple::render).collect();
        Ok(StepOutcome {
            reasoning: format!("searched stored facts for {}", terms.join(", ")),
            conclusion: format!("found {} relevant facts: {}", evidence.len(), evidence.join("; ")),
            confidence: mean_confidence(&findings.facts),
            evidence,
            is_final: false,
        })
    }
}

fn frame(problem: &str, findings: &mut Findings) -> StepOutcome {
    findings.keywords = text::keywords(problem);
    if findings.keywords.is_empty() {
        return StepOutcome {
            reasoning: "the problem has no content words to work from".into(),
            conclusion: "nothing to analyze".into(),
            confidence: 0.3,
            evidence: Vec::new(),
            is_final: true,
        };
    }
    StepOutcome {
        reasoning: format!("{} content words extracted", findings.keywords.len()),
        conclusion: format!("the problem concerns {}", findings.keywords.join(", ")),
        confidence: 0.9,
        evidence: findings.keywords.clone(),
        is_final: false,
    }
}

/// Facts whose object is another fact's subject form a link.
fn connect(findings: &mut Findings) -> StepOutcome {
    let facts = &findings.facts;
    let mut links = Vec::new();
    let mut linked = vec![false; facts.len()];
    for (i, a) in facts.iter().enumerate() {
        for (j, b) in facts.iter().enumerate() {
            if i != j && text::normalize(&a.object) == text::normalize(&b.subject) {
                links.push(format!(
                    "{} {} {} {} {}",
                    a.subject, a.predicate, a.object, b.predicate, b.object
                ));
                linked[i] = true;
                linked[j] = true;
            }
        }
    }
    let connected = linked.iter().filter(|l| **l).count();
    let fraction = connected as f32 / facts.len().max(1) as f32;
    findings.links = links.clone();
    let conclusion = if links.is_empty() {
        "the facts stand independently".to_string()
    } else {
        format!("linked: {}", links.join("; "))
    };
    StepOutcome {
        reasoning: format!("{connected} of {} facts share a concept", facts.len()),
        conclusion,
        confidence: 0.6 + 0.4 * fraction,
        evidence: links,
        is_final: false,
    }
}

fn evaluate(findings: &Findings) -> StepOutcome {
    // Gathered facts are ranked, strongest first.
    let (Some(strongest), Some(weakest)) = (findings.facts.first(), findings.facts.last()) else {
        return StepOutcome {
            reasoning: "no facts to weigh".into(),
            conclusion: "no support".into(),
            confidence: 0.3,
            evidence: Vec::new(),
            is_final: true,
        };
    };
    StepOutcome {
        reasoning: format!(
            "{} facts with mean confidence {:.2}",
            findings.facts.len(),
            mean_confidence(&findings.facts)
        ),
        conclusion: format!(
            "strongest support: {} ({:.2}); weakest: {} ({:.2})",
            strongest.render(),
            strongest.confidence,
            weakest.render(),
            weakest.confidence
        ),
        confidence: mean_confidence(&findings.facts),
        evidence: vec![strongest.render(), weakest.render()],
        is_final: false,
    }
}

fn conclude(problem: &str, findings: &Findings) -> StepOutcome {
    let Some(strongest) = findings.facts.first() else {
        return StepOutcome {
            reasoning: "nothing established".into(),
            conclusion: format!("{problem}: undetermined"),
            confidence: 0.3,
            evidence: Vec::new(),
            is_final: true,
        };
    };
    let mut conclusion = format!("{problem}: best supported by {}", strongest.render());
    if let Some(link) = findings.links.first() {
        conclusion.push_str(&format!(", via {link}"));
    }
    StepOutcome {
        reasoning: "the strongest fact, extended by the first link found".into(),
        conclusion,
        confidence: strongest.confidence,
        evidence: vec![strongest.render()],
        is_final: true,
    }
}
