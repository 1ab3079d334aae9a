//! Keyword extraction and set similarity.
//!
//! Tokenizer rules, fixed so that similarity thresholds stay stable:
//! 1. split on every non-alphanumeric character
//! 2. lowercase
//! 3. drop tokens shorter than [`MIN_TOKEN_LEN`] and all-digit tokens
//! 4. drop [`STOPWORDS`] and any configured extras
//!
//! `"fix login story 1.2 auth bug"` yields `{auth, bug, login, story}`.

use std::collections::BTreeSet;

/// Tokens shorter than this carry no matching signal.
pub const MIN_TOKEN_LEN: usize = 3;

/// English filler plus commit-message verbs and prefixes.
pub const STOPWORDS: &[&str] = &[
    // English filler
    "the", "and", "for", "with", "from", "that", "this", "will", "have", "has", "had", "should",
    "would", "could", "also", "each", "when", "into", "more", "other", "are", "was", "were",
    "not", "but", "all", "any", "can", "its", "our", "out", "via", "use", "using", "now",
    "then", "than", "some", "only", "just", "been", "being", "make", "made", "new",
    // Commit noise
    "fix", "fixes", "fixed", "add", "adds", "added", "update", "updates", "updated", "feat",
    "chore", "refactor", "merge", "merged", "wip", "remove", "removed", "change", "changed",
    "changes", "minor", "misc", "initial", "commit", "pull", "request", "branch",
];

/// Extracts normalized keyword sets from free text.
#[derive(Debug, Clone, Default)]
pub struct KeywordExtractor {
    extra_stopwords: BTreeSet<String>,
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the stopword list; entries are lowercased.
    pub fn with_extra_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_stopwords
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|token| self.keep(token))
            .collect()
    }

    fn keep(&self, token: &str) -> bool {
        token.chars().count() >= MIN_TOKEN_LEN
            && !token.chars().all(|c| c.is_ascii_digit())
            && !STOPWORDS.contains(&token)
            && !self.extra_stopwords.contains(token)
    }
}

/// Extract keywords with the default stopword list.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    KeywordExtractor::default().extract(text)
}

/// Jaccard similarity |A ∩ B| / |A ∪ B|. Two empty sets score 0.0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Normalized signature of a concept, used to find earlier vetting decisions
/// for the same idea under different wording.
pub fn concept_signature(title: &str, description: &str) -> String {
    let extractor = KeywordExtractor::default();
    let mut words = extractor.extract(title);
    words.extend(extractor.extract(description));
    words.into_iter().collect::<Vec<_>>().join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_extract_commit_message() {
        let keywords = extract_keywords("fix login story 1.2 auth bug");
        assert_eq!(keywords, set(&["auth", "bug", "login", "story"]));
    }

    #[test]
    fn test_extract_strips_punctuation_and_case() {
        let keywords = extract_keywords("Feat(Auth): OAuth2-based LOGIN, v2!");
        assert_eq!(keywords, set(&["auth", "based", "login", "oauth2"]));
    }

    #[test]
    fn test_extra_stopwords() {
        let extractor = KeywordExtractor::new().with_extra_stopwords(["Story"]);
        assert_eq!(extractor.extract("login story"), set(&["login"]));
    }

    #[test]
    fn test_jaccard_scenario() {
        let commit = extract_keywords("fix login story 1.2 auth bug");
        let node = set(&["login", "auth", "story"]);
        assert_eq!(jaccard(&commit, &node), 0.75);
    }

    #[test]
    fn test_jaccard_edges() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
        assert_eq!(jaccard(&set(&["a1b"]), &set(&[])), 0.0);
        assert_eq!(jaccard(&set(&["login"]), &set(&["login"])), 1.0);
    }

    #[test]
    fn test_concept_signature_is_order_insensitive() {
        let a = concept_signature("Login with OAuth", "Support the auth provider");
        let b = concept_signature("OAuth login", "auth provider support");
        assert_eq!(a, b);
        assert_eq!(a, "auth|login|oauth|provider|support");
    }
}
