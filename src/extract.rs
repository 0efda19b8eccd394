//! Optional text-to-triples collaborator.
//!
//! The engine works fully without one. When configured, free text is handed
//! to a [`TextToTriples`] implementation and the returned triples go through
//! the same validation as any other write.

use std::time::Duration;

use crate::config::ExtractorConfig;
use crate::error::ExtractError;
use crate::graph::NewTriple;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.7;

const SYSTEM_PROMPT: &str = "You are a knowledge extraction assistant. \
    Extract factual triples from the given text. \
    Return a JSON array of objects with fields: subject, predicate, object, confidence (0-1). \
    Use snake_case predicates. Only return the JSON array, no other text.";

/// Turns free text into candidate triples.
pub trait TextToTriples: Send + Sync {
    fn extract(&self, text: &str, context: &str) -> Result<Vec<NewTriple>, ExtractError>;
}

/// Extractor backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaExtractor {
    config: ExtractorConfig,
}

impl OllamaExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn generate(&self, prompt: &str) -> Result<String, ExtractError> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build();

        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "system": SYSTEM_PROMPT,
            "stream": false,
        });

        let resp = agent
            .post(&url)
            .send_json(body)
            .map_err(|e: ureq::Error| ExtractError::RequestFailed {
                message: e.to_string(),
            })?;

        let json: serde_json::Value = resp.into_json().map_err(|e| ExtractError::Parse {
            message: e.to_string(),
        })?;

        json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExtractError::Parse {
                message: "missing 'response' field".into(),
            })
    }
}

impl TextToTriples for OllamaExtractor {
    fn extract(&self, text: &str, context: &str) -> Result<Vec<NewTriple>, ExtractError> {
        let response = self.generate(text)?;
        let triples = parse_triples(&response, context)?;
        tracing::debug!(model = %self.config.model, triples = triples.len(), "extracted triples");
        Ok(triples)
    }
}

impl std::fmt::Debug for OllamaExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaExtractor")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Parse a model response holding a JSON array of
/// `{subject, predicate, object, confidence?}`. Text around the array is
/// ignored; entries missing a field are skipped.
pub fn parse_triples(response: &str, context: &str) -> Result<Vec<NewTriple>, ExtractError> {
    let trimmed = response.trim();
    let json_str = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => {
            return Err(ExtractError::Parse {
                message: "no JSON array found in response".into(),
            });
        }
    };

    let parsed: Vec<serde_json::Value> =
        serde_json::from_str(json_str).map_err(|e| ExtractError::Parse {
            message: format!("JSON parse error: {e}"),
        })?;

    let field = |val: &serde_json::Value, key: &str| {
        val[key]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut triples = Vec::new();
    for val in &parsed {
        let (Some(subject), Some(predicate), Some(object)) = (
            field(val, "subject"),
            field(val, "predicate"),
            field(val, "object"),
        ) else {
            continue;
        };
        let confidence = val["confidence"]
            .as_f64()
            .map_or(DEFAULT_CONFIDENCE, |c| (c as f32).clamp(0.0, 1.0));
        triples.push(
            NewTriple::new(subject, predicate, object)
                .with_confidence(confidence)
                .with_context(context.trim())
                .with_source("extractor"),
        );
    }
    Ok(triples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_inside_chatter() {
        let response = r#"Sure! Here you go:
            [{"subject": "rust", "predicate": "is_a", "object": "language", "confidence": 0.95},
             {"subject": "cargo", "predicate": "builds", "object": "crates"},
             {"subject": "", "predicate": "x", "object": "y"}]
            Hope that helps."#;
        let triples = parse_triples(response, "tech").unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].subject, "rust");
        assert!((triples[0].confidence - 0.95).abs() < 1e-6);
        assert!((triples[1].confidence - DEFAULT_CONFIDENCE).abs() < 1e-6);
        assert_eq!(triples[1].context, "tech");
    }

    #[test]
    fn rejects_responses_without_an_array() {
        assert!(matches!(
            parse_triples("no idea", ""),
            Err(ExtractError::Parse { .. })
        ));
        assert!(matches!(
            parse_triples("[not json]", ""),
            Err(ExtractError::Parse { .. })
        ));
    }

    #[test]
    fn unreachable_server_is_a_request_failure() {
        let extractor = OllamaExtractor::new(ExtractorConfig {
            base_url: "http://127.0.0.1:9".into(),
            model: "test".into(),
            timeout_secs: 1,
        });
        assert!(matches!(
            extractor.extract("rust is a language", ""),
            Err(ExtractError::RequestFailed { .. })
        ));
    }
}
