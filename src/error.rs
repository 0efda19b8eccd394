//! Rich diagnostic error types for the noesis engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Every hard failure names the operation
//! that raised it and the constraint that was violated.
//!
//! Reasoning "soft failures" (no match, weak support) are not errors: they come
//! back as results with a low confidence and an explanatory note. Only
//! structural problems surface here.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the noesis engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum NoesisError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reason(#[from] ReasonError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

impl NoesisError {
    /// Whether this error was raised before any state change because the
    /// input was malformed.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the requested record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("{op}: field '{field}' must not be empty")]
    #[diagnostic(
        code(noesis::validation::empty_field),
        help("Provide a non-blank value for '{field}'. Whitespace-only strings are rejected.")
    )]
    EmptyField { op: &'static str, field: &'static str },

    #[error("{op}: {field} {value} is outside [0.0, 1.0]")]
    #[diagnostic(
        code(noesis::validation::confidence_range),
        help("Confidence-like values must be finite and lie between 0.0 and 1.0 inclusive.")
    )]
    OutOfRange {
        op: &'static str,
        field: &'static str,
        value: f32,
    },

    #[error("{op}: hyperedge needs at least 2 distinct nodes, got {count}")]
    #[diagnostic(
        code(noesis::validation::too_few_nodes),
        help(
            "A hyperedge relates two or more concepts. Pass at least one target \
             node that differs from the source node."
        )
    )]
    TooFewNodes { op: &'static str, count: usize },

    #[error("{op}: cannot parse '{input}': {reason}")]
    #[diagnostic(
        code(noesis::validation::malformed),
        help("Triple patterns are written as three terms, e.g. `?x is_a mammal`.")
    )]
    Malformed {
        op: &'static str,
        input: String,
        reason: String,
    },

    #[error("{op}: {constraint}")]
    #[diagnostic(
        code(noesis::validation::invalid_argument),
        help("Check the request arguments against the operation's documented limits.")
    )]
    InvalidArgument { op: &'static str, constraint: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{op}: {kind} {id} not found")]
    #[diagnostic(
        code(noesis::store::not_found),
        help("The id does not exist in this store. Ids are only valid for the store that issued them.")
    )]
    NotFound {
        op: &'static str,
        kind: &'static str,
        id: u64,
    },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(noesis::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(noesis::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption; try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(noesis::store::serde),
        help(
            "Failed to serialize or deserialize a stored record. \
             This usually means the on-disk format changed between versions."
        )
    )]
    Serialization { message: String },

    #[error("{op}: lock poisoned by a panicking writer")]
    #[diagnostic(
        code(noesis::store::poisoned),
        help("A thread panicked while holding a store lock. Restart the engine to recover.")
    )]
    Poisoned { op: &'static str },

    #[error("{op}: id space exhausted")]
    #[diagnostic(
        code(noesis::store::exhausted),
        help("The store allocated u64::MAX ids. This should never happen in practice.")
    )]
    IdExhausted { op: &'static str },
}

// ---------------------------------------------------------------------------
// Reasoning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasonError {
    #[error("{op}: insufficient premises: {reason}")]
    #[diagnostic(
        code(noesis::reason::insufficient_premises),
        help(
            "Deduction needs stored triples matching the premises and at least one \
             stored rule in the domain whose conditions they satisfy. Add supporting \
             triples or rules, or widen the domain."
        )
    )]
    InsufficientPremises { op: &'static str, reason: String },

    #[error("{op}: confidence {confidence:.3} below threshold {threshold:.3}")]
    #[diagnostic(
        code(noesis::reason::below_threshold),
        help(
            "The generalization is supported by too few examples. Lower \
             `min_confidence` or provide more consistent examples."
        )
    )]
    BelowThreshold {
        op: &'static str,
        confidence: f32,
        threshold: f32,
    },
}

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("{op}: text extraction is not configured")]
    #[diagnostic(
        code(noesis::extract::unavailable),
        help(
            "Knowledge extraction requires a TextToTriples collaborator. Configure \
             `[extractor]` in the engine config or attach one with `Engine::with_extractor`."
        )
    )]
    Unavailable { op: &'static str },

    #[error("extraction request failed: {message}")]
    #[diagnostic(
        code(noesis::extract::request_failed),
        help("The extraction service could not be reached or returned an error status.")
    )]
    RequestFailed { message: String },

    #[error("extraction response could not be parsed: {message}")]
    #[diagnostic(
        code(noesis::extract::parse),
        help("The service must return a JSON array of {{subject, predicate, object}} objects.")
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(noesis::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(noesis::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },

    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(noesis::engine::config_read),
        help("Ensure the config file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(noesis::engine::config_parse),
        help("Check the TOML syntax and field names in the config file.")
    )]
    ConfigParse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(noesis::engine::config_write),
        help("Ensure you have write permissions to the config directory.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning noesis results.
pub type NoesisResult<T> = std::result::Result<T, NoesisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_to_noesis_error() {
        let err = ValidationError::EmptyField {
            op: "add_triple",
            field: "subject",
        };
        let top: NoesisError = err.into();
        assert!(top.is_validation());
        assert!(!top.is_not_found());
    }

    #[test]
    fn not_found_is_detected() {
        let top: NoesisError = StoreError::NotFound {
            op: "get_triple",
            kind: "triple",
            id: 42,
        }
        .into();
        assert!(top.is_not_found());
    }

    #[test]
    fn messages_name_operation_and_constraint() {
        let err = ValidationError::OutOfRange {
            op: "add_triple",
            field: "confidence",
            value: 1.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("add_triple"));
        assert!(msg.contains("1.5"));

        let err = ReasonError::BelowThreshold {
            op: "induce",
            confidence: 0.25,
            threshold: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("induce"));
        assert!(msg.contains("0.250"));
    }

    #[test]
    fn unavailable_names_operation() {
        let err = ExtractError::Unavailable {
            op: "extract_knowledge",
        };
        assert!(err.to_string().contains("extract_knowledge"));
    }
}
