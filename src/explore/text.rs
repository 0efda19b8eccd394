//! Deterministic text heuristics shared by exploration and pattern matching.
//!
//! Everything here is pure: NFKC-normalized, lower-cased tokens from a
//! Unicode word regex, a fixed stopword list, and word similarity from exact
//! match or a shared stem prefix.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}_'-]*").unwrap());

static CLAUSE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[,.;:!?]+|\s+(?:and|or|then|while)\s+").unwrap());

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "by", "for", "with",
    "from", "into", "is", "are", "was", "were", "be", "been", "being", "it", "its", "this",
    "that", "these", "those", "as", "if", "then", "than", "so", "do", "does", "did", "has",
    "have", "had", "not", "no", "we", "you", "they", "he", "she", "i", "our", "their", "my",
    "your", "can", "could", "should", "would", "will", "how", "what", "why", "when", "where",
    "which", "who", "there", "about", "very", "some", "any", "all",
];

/// Minimum shared prefix for two different words to count as the same stem.
const STEM_PREFIX: usize = 4;

/// NFKC-normalize, lower-case, trim, and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Normalized content words in order of first appearance, without duplicates.
pub fn tokens(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let mut seen = BTreeSet::new();
    WORD.find_iter(&normalized)
        .map(|m| m.as_str().trim_matches(|c| c == '\'' || c == '-'))
        .filter(|w| !w.is_empty() && !is_stopword(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Content words long enough to carry meaning on their own.
pub fn keywords(text: &str) -> Vec<String> {
    tokens(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 3)
        .collect()
}

/// Split free text into clauses at punctuation and simple conjunctions.
pub fn clauses(text: &str) -> Vec<String> {
    CLAUSE_SPLIT
        .split(text)
        .map(normalize)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Similarity of two normalized words in [0, 1].
///
/// Exact match scores 1. Words sharing a prefix of at least four characters
/// score by how much of the longer word the prefix covers, from 0.5 up.
/// Anything else scores 0.
pub fn word_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    let prefix = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    if prefix < STEM_PREFIX {
        return 0.0;
    }
    let longest = a.chars().count().max(b.chars().count()).max(1);
    0.5 + 0.5 * prefix as f32 / longest as f32
}

/// Soft Jaccard similarity over token lists: every token is matched with its
/// best counterpart on the other side, averaged over both sides.
pub fn token_similarity(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let best = |w: &String, other: &[String]| {
        other
            .iter()
            .map(|o| word_similarity(w, o))
            .fold(0.0f32, f32::max)
    };
    let forward: f32 = a.iter().map(|w| best(w, b)).sum();
    let backward: f32 = b.iter().map(|w| best(w, a)).sum();
    ((forward + backward) / (a.len() + b.len()) as f32).clamp(0.0, 1.0)
}

/// Token similarity of two phrases.
pub fn phrase_similarity(a: &str, b: &str) -> f32 {
    token_similarity(&tokens(a), &tokens(b))
}

/// Whether any token of `text` matches `word` (exact or shared stem).
pub fn mentions(text_tokens: &[String], word: &str) -> bool {
    text_tokens.iter().any(|t| word_similarity(t, word) > 0.0)
}

/// Fraction of `terms` mentioned by `text_tokens`.
pub fn coverage(text_tokens: &[String], terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let hit = terms.iter().filter(|t| mentions(text_tokens, t)).count();
    hit as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_width_case_and_space() {
        assert_eq!(normalize("  Ｓｅｒｖｅｒ   STATUS \n ok "), "server status ok");
    }

    #[test]
    fn tokens_drop_stopwords_and_duplicates() {
        assert_eq!(
            tokens("The server and the Server are down"),
            vec!["server", "down"]
        );
    }

    #[test]
    fn word_similarity_uses_stems_not_substrings() {
        assert_eq!(word_similarity("pipeline", "pipeline"), 1.0);
        assert!(word_similarity("pipelines", "pipeline") > 0.9);
        assert_eq!(word_similarity("line", "pipeline"), 0.0);
        assert_eq!(word_similarity("cat", "car"), 0.0);
    }

    #[test]
    fn unrelated_phrases_score_zero() {
        assert_eq!(phrase_similarity("assembly line", "software pipeline"), 0.0);
        assert!(phrase_similarity("heart pumps blood", "pump moves water") > 0.0);
    }

    #[test]
    fn clauses_split_on_punctuation_and_conjunctions() {
        assert_eq!(
            clauses("Disk filled up, and the service crashed. Users complained"),
            vec!["disk filled up", "the service crashed", "users complained"]
        );
    }
}
