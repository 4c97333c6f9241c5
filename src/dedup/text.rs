// src/dedup/text.rs
//! Title normalization and tokenization. Every dedup stage compares
//! signatures produced here, so the two functions must stay in lockstep:
//! `tokenize` only ever sees output of `normalize`.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;

/// Lowercase and keep only CJK ideographs and ASCII letters/digits.
/// Punctuation, spacing and case are the most frequent headline variants
/// and carry no semantic identity.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| is_cjk(*c) || c.is_ascii_alphanumeric())
        .collect()
}

#[inline]
fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

fn token_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // One CJK ideograph per token (no whitespace word boundaries in CJK),
    // one token per maximal ASCII letter/digit run.
    RE.get_or_init(|| Regex::new(r"[\x{4e00}-\x{9fa5}]|[a-z0-9]+").unwrap())
}

/// Token set of an already-normalized string.
pub fn tokenize(normalized: &str) -> HashSet<String> {
    token_re()
        .find_iter(normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A title with its dedup signature computed exactly once. The O(N²)
/// pairwise stages only touch these precomputed fields.
#[derive(Debug, Clone)]
pub struct PreparedTitle {
    pub title: String,
    pub normalized: String,
    /// `normalized` as chars, for edit distance over ideographs.
    pub chars: Vec<char>,
    pub tokens: HashSet<String>,
}

impl PreparedTitle {
    pub fn new(title: &str) -> Self {
        let normalized = normalize(title);
        let tokens = tokenize(&normalized);
        let chars: Vec<char> = normalized.chars().collect();
        Self {
            title: title.to_string(),
            normalized,
            chars,
            tokens,
        }
    }

    /// Signature length in chars (not bytes; CJK is multi-byte).
    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("Apple 发布 iPhone-16!"), "apple发布iphone16");
        assert_eq!(normalize("  "), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Hello, World!", "苹果发布iPhone16", "a b c 123", "凤凰！！"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn tokenize_cjk_chars_and_ascii_runs() {
        let tokens = tokenize(&normalize("苹果发布iPhone16 pro"));
        assert!(tokens.contains("苹"));
        assert!(tokens.contains("果"));
        // "iPhone16 pro" collapses into one run during normalization
        assert!(tokens.contains("iphone16pro"));
        assert_eq!(tokenize("iphone16pro").len(), 1);
    }

    #[test]
    fn tokenize_empty_is_empty() {
        assert!(tokenize("").is_empty());
    }
}
