//! Stored implication rules over triple patterns.
//!
//! Rules are data, not code: `IF (?x is_a mammal) THEN (?x has fur)`. They are
//! parsed from a compact text form, stored alongside triples, and applied by
//! the query inference pass and by deduction/abduction.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::{Triple, TripleQuery, check_unit, non_empty};

// ---------------------------------------------------------------------------
// Terms and patterns
// ---------------------------------------------------------------------------

/// A term in a rule pattern: a variable or a constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A variable binding, written `?x`.
    Var(String),
    /// A concrete value.
    Const(String),
}

impl Term {
    /// Parse a term from a token. Variables start with `?`.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.strip_prefix('?') {
            Some(var) => Self::Var(var.to_string()),
            None => Self::Const(token.to_string()),
        }
    }

    /// Resolve against bindings: constants resolve to themselves, bound
    /// variables to their value, unbound variables to `None`.
    pub fn resolve<'a>(&'a self, bindings: &'a Bindings) -> Option<&'a str> {
        match self {
            Term::Const(c) => Some(c.as_str()),
            Term::Var(v) => bindings.get(v).map(String::as_str),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Var(v) => write!(f, "?{v}"),
            Term::Const(c) => write!(f, "{c}"),
        }
    }
}

/// Variable name → bound value.
pub type Bindings = HashMap<String, String>;

/// A triple pattern in a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl TriplePattern {
    /// Parse a pattern from `?x pred ?y` or `(?x pred ?y)` syntax.
    ///
    /// Objects may span several words: `?x located_in new york` binds the
    /// object to the constant `new york`.
    pub fn parse(op: &'static str, s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        let inner = s
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(s);
        let parts: Vec<&str> = inner.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(ValidationError::Malformed {
                op,
                input: s.to_string(),
                reason: format!("expected at least 3 terms, got {}", parts.len()),
            });
        }
        let object = parts[2..].join(" ");
        if parts.len() > 3 && object.contains('?') {
            return Err(ValidationError::Malformed {
                op,
                input: s.to_string(),
                reason: "a variable object must be a single term".into(),
            });
        }
        Ok(Self {
            subject: Term::parse(parts[0]),
            predicate: Term::parse(parts[1]),
            object: Term::parse(&object),
        })
    }

    /// Variables mentioned by this pattern.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(|t| match t {
                Term::Var(v) => Some(v.as_str()),
                Term::Const(_) => None,
            })
    }

    /// Build an index query for this pattern under the given bindings.
    pub fn to_query(&self, bindings: &Bindings) -> TripleQuery {
        TripleQuery {
            subject: self.subject.resolve(bindings).map(str::to_string),
            predicate: self.predicate.resolve(bindings).map(str::to_string),
            object: self.object.resolve(bindings).map(str::to_string),
            ..Default::default()
        }
    }

    /// Try to extend `bindings` so that this pattern matches `triple`.
    pub fn unify(&self, triple: &Triple, bindings: &Bindings) -> Option<Bindings> {
        let mut out = bindings.clone();
        for (term, value) in [
            (&self.subject, &triple.subject),
            (&self.predicate, &triple.predicate),
            (&self.object, &triple.object),
        ] {
            bind(term, value, &mut out)?;
        }
        Some(out)
    }

    /// Try to extend `bindings` so that this pattern matches the given values,
    /// where `None` stands for "anything".
    pub fn unify_values(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
        bindings: &Bindings,
    ) -> Option<Bindings> {
        let mut out = bindings.clone();
        for (term, value) in [
            (&self.subject, subject),
            (&self.predicate, predicate),
            (&self.object, object),
        ] {
            if let Some(value) = value {
                bind(term, value, &mut out)?;
            }
        }
        Some(out)
    }

    /// Instantiate with bindings. Returns `None` if a variable is unbound.
    pub fn instantiate(&self, bindings: &Bindings) -> Option<(String, String, String)> {
        Some((
            self.subject.resolve(bindings)?.to_string(),
            self.predicate.resolve(bindings)?.to_string(),
            self.object.resolve(bindings)?.to_string(),
        ))
    }

    /// Render with bound variables substituted and unbound ones read as
    /// `something`.
    pub fn render(&self, bindings: &Bindings) -> String {
        let show = |t: &Term| t.resolve(bindings).unwrap_or("something").to_string();
        format!(
            "{} {} {}",
            show(&self.subject),
            show(&self.predicate),
            show(&self.object)
        )
    }
}

fn bind(term: &Term, value: &str, bindings: &mut Bindings) -> Option<()> {
    match term {
        Term::Const(c) => (c == value).then_some(()),
        Term::Var(v) => match bindings.get(v) {
            Some(bound) => (bound == value).then_some(()),
            None => {
                bindings.insert(v.clone(), value.to_string());
                Some(())
            }
        },
    }
}

impl std::fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Unique identifier for a stored rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RuleId(NonZeroU64);

impl RuleId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(RuleId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// A stored implication: all conditions hold ⇒ the conclusion holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    /// Domain the rule applies to. `None` applies everywhere.
    pub domain: Option<String>,
    pub conditions: Vec<TriplePattern>,
    pub conclusion: TriplePattern,
    /// Belief in the rule itself.
    pub confidence: f32,
    /// Multiplied into every derived confidence. In (0, 1].
    pub priority: f32,
}

impl Rule {
    /// Whether this rule applies to the given domain. Unscoped rules apply
    /// everywhere, and an empty or `general` domain admits every rule.
    pub fn applies_to(&self, domain: &str) -> bool {
        match &self.domain {
            None => true,
            Some(d) => is_general_domain(domain) || d == domain,
        }
    }

    /// Confidence of a conclusion drawn from supports with the given minimum
    /// confidence: weakest link times rule priority.
    pub fn derive_confidence(&self, weakest_support: f32) -> f32 {
        (weakest_support.min(self.confidence) * self.priority).clamp(0.0, 1.0)
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let conds: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
        write!(f, "{}: IF {} THEN {}", self.name, conds.join(" AND "), self.conclusion)
    }
}

/// Whether a domain name means "no particular domain".
pub fn is_general_domain(domain: &str) -> bool {
    let d = domain.trim();
    d.is_empty() || d.eq_ignore_ascii_case("general")
}

/// A rule submitted for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Condition patterns in text form, e.g. `?x is_a mammal`.
    pub conditions: Vec<String>,
    /// Conclusion pattern in text form, e.g. `?x has fur`.
    pub conclusion: String,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f32,
    #[serde(default = "default_priority")]
    pub priority: f32,
}

fn default_rule_confidence() -> f32 {
    1.0
}

fn default_priority() -> f32 {
    1.0
}

impl NewRule {
    pub fn new(
        name: impl Into<String>,
        conditions: impl IntoIterator<Item = impl Into<String>>,
        conclusion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            domain: None,
            conditions: conditions.into_iter().map(Into::into).collect(),
            conclusion: conclusion.into(),
            confidence: default_rule_confidence(),
            priority: default_priority(),
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    /// Parse and validate into a rule with the given id.
    pub fn compile(self, op: &'static str, id: RuleId) -> Result<Rule, ValidationError> {
        let name = non_empty(op, "name", &self.name)?;
        check_unit(op, "confidence", self.confidence)?;
        check_unit(op, "priority", self.priority)?;
        if self.priority == 0.0 {
            return Err(ValidationError::InvalidArgument {
                op,
                constraint: "priority must be greater than 0".into(),
            });
        }
        if self.conditions.is_empty() {
            return Err(ValidationError::InvalidArgument {
                op,
                constraint: "a rule needs at least one condition".into(),
            });
        }
        let conditions = self
            .conditions
            .iter()
            .map(|c| TriplePattern::parse(op, c))
            .collect::<Result<Vec<_>, _>>()?;
        let conclusion = TriplePattern::parse(op, &self.conclusion)?;

        let bound: BTreeSet<&str> = conditions.iter().flat_map(|c| c.variables()).collect();
        if let Some(free) = conclusion.variables().find(|v| !bound.contains(v)) {
            return Err(ValidationError::InvalidArgument {
                op,
                constraint: format!("conclusion variable ?{free} does not appear in any condition"),
            });
        }

        let domain = self
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !is_general_domain(d))
            .map(str::to_string);

        Ok(Rule {
            id,
            name,
            domain,
            conditions,
            conclusion,
            confidence: self.confidence,
            priority: self.priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{TripleMetadata, ValidationStatus};

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple {
            id: None,
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            confidence: 1.0,
            timestamp: 0,
            metadata: TripleMetadata {
                source: "test".into(),
                context: String::new(),
                validation: ValidationStatus::Validated,
            },
        }
    }

    fn rid() -> RuleId {
        RuleId::new(1).unwrap()
    }

    #[test]
    fn parse_pattern_with_multiword_object() {
        let p = TriplePattern::parse("test", "(?x located_in new york)").unwrap();
        assert_eq!(p.subject, Term::Var("x".into()));
        assert_eq!(p.object, Term::Const("new york".into()));
        assert!(TriplePattern::parse("test", "?x p").is_err());
        assert!(TriplePattern::parse("test", "?x p ?y ?z").is_err());
    }

    #[test]
    fn unify_respects_existing_bindings() {
        let p = TriplePattern::parse("test", "?x is_a ?y").unwrap();
        let b = p.unify(&triple("dog", "is_a", "mammal"), &Bindings::new()).unwrap();
        assert_eq!(b["x"], "dog");
        assert_eq!(b["y"], "mammal");

        let mut pre = Bindings::new();
        pre.insert("x".into(), "cat".into());
        assert!(p.unify(&triple("dog", "is_a", "mammal"), &pre).is_none());

        let same = TriplePattern::parse("test", "?x likes ?x").unwrap();
        assert!(same.unify(&triple("a", "likes", "b"), &Bindings::new()).is_none());
        assert!(same.unify(&triple("a", "likes", "a"), &Bindings::new()).is_some());
    }

    #[test]
    fn compile_rejects_free_conclusion_variable() {
        let err = NewRule::new("bad", ["?x is_a mammal"], "?y has fur")
            .compile("add_rule", rid())
            .unwrap_err();
        assert!(err.to_string().contains("?y"));

        let err = NewRule::new("empty", Vec::<String>::new(), "a b c")
            .compile("add_rule", rid())
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidArgument { .. }));

        let err = NewRule::new("zero", ["?x a b"], "?x c d")
            .with_priority(0.0)
            .compile("add_rule", rid())
            .unwrap_err();
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn derive_confidence_is_weakest_link_times_priority() {
        let rule = NewRule::new("fur", ["?x is_a mammal"], "?x has fur")
            .with_confidence(0.9)
            .with_priority(0.5)
            .compile("add_rule", rid())
            .unwrap();
        assert!((rule.derive_confidence(0.8) - 0.4).abs() < 1e-6);
        assert!((rule.derive_confidence(1.0) - 0.45).abs() < 1e-6);
    }

    #[test]
    fn general_domain_admits_scoped_rules() {
        let rule = NewRule::new("r", ["?x a b"], "?x c d")
            .in_domain("ops")
            .compile("add_rule", rid())
            .unwrap();
        assert!(rule.applies_to("ops"));
        assert!(rule.applies_to("general"));
        assert!(rule.applies_to(""));
        assert!(!rule.applies_to("biology"));
    }
}
