// src/keywords.rs
//! Keyword configuration grammar. Groups are separated by blank lines;
//! within a group, one term per line:
//!   word    plain term, any match qualifies
//!   +word   required term, every one must be present
//!   !word   global filter, drops the title from all groups
//!   @N      per-group result cap
//! Matching is case-insensitive substring matching over the raw title.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordGroup {
    /// All of these must appear.
    pub required: Vec<String>,
    /// At least one of these must appear (when non-empty).
    pub normal: Vec<String>,
    /// Stable display key for the group.
    pub key: String,
    /// Per-group cap; 0 means "use the global default".
    pub max_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeywordConfig {
    pub groups: Vec<KeywordGroup>,
    /// Lowercased terms that drop a title outright.
    pub filter_words: Vec<String>,
}

/// Parse the user-editable keyword text. Empty or whitespace-only input
/// yields an empty config.
pub fn parse(text: &str) -> KeywordConfig {
    if text.trim().is_empty() {
        return KeywordConfig::default();
    }
    let text = text.replace('\r', "");

    let mut groups = Vec::new();
    let mut filter_words = Vec::new();

    for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut required = Vec::new();
        let mut normal = Vec::new();
        let mut max_count = 0usize;

        for line in block.lines() {
            let term = line.trim().to_lowercase();
            if term.is_empty() {
                continue;
            }
            if let Some(rest) = term.strip_prefix('@') {
                if let Ok(n) = rest.parse::<usize>() {
                    if n > 0 {
                        max_count = n;
                    }
                }
            } else if let Some(rest) = term.strip_prefix('!') {
                if !rest.is_empty() {
                    filter_words.push(rest.to_string());
                }
            } else if let Some(rest) = term.strip_prefix('+') {
                if !rest.is_empty() {
                    required.push(rest.to_string());
                }
            } else {
                normal.push(term);
            }
        }

        if required.is_empty() && normal.is_empty() {
            continue;
        }
        let key = if normal.is_empty() {
            required.join(" ")
        } else {
            normal.join(" ")
        };
        groups.push(KeywordGroup {
            required,
            normal,
            key,
            max_count,
        });
    }

    KeywordConfig {
        groups,
        filter_words,
    }
}

/// Match a pre-lowercased title against one group. A group with no normal
/// terms matches whenever all required terms are present; an entirely
/// empty group matches everything (catch-all).
pub fn title_matches(lower_title: &str, group: &KeywordGroup) -> bool {
    for req in &group.required {
        if !lower_title.contains(req.as_str()) {
            return false;
        }
    }
    if group.normal.is_empty() {
        return true;
    }
    group.normal.iter().any(|w| lower_title.contains(w.as_str()))
}

/// True when any global filter term occurs in the title.
pub fn is_filtered(lower_title: &str, filter_words: &[String]) -> bool {
    filter_words.iter().any(|w| lower_title.contains(w.as_str()))
}

/// Catch-all group used when no keywords are configured: every title
/// belongs to one default bucket.
pub fn catch_all() -> KeywordGroup {
    KeywordGroup {
        required: Vec::new(),
        normal: Vec::new(),
        key: "all".to_string(),
        max_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_groups_and_markers() {
        let text = "AI\n人工智能\n@20\n\n+新能源\n电动车\n!娱乐\n\n\n";
        let cfg = parse(text);
        assert_eq!(cfg.groups.len(), 2);

        let g0 = &cfg.groups[0];
        assert_eq!(g0.normal, vec!["ai", "人工智能"]);
        assert!(g0.required.is_empty());
        assert_eq!(g0.max_count, 20);
        assert_eq!(g0.key, "ai 人工智能");

        let g1 = &cfg.groups[1];
        assert_eq!(g1.required, vec!["新能源"]);
        assert_eq!(g1.normal, vec!["电动车"]);
        assert_eq!(cfg.filter_words, vec!["娱乐"]);
    }

    #[test]
    fn empty_input_parses_empty() {
        assert_eq!(parse(""), KeywordConfig::default());
        assert_eq!(parse("   \n\n  "), KeywordConfig::default());
    }

    #[test]
    fn required_terms_gate_the_match() {
        let cfg = parse("+新能源\n电动车\n固态电池");
        let g = &cfg.groups[0];
        assert!(title_matches("新能源电动车销量创新高", g));
        // Has a normal term but misses the required one.
        assert!(!title_matches("电动车销量创新高", g));
        // Has the required term but no normal term.
        assert!(!title_matches("新能源补贴政策调整", g));
    }

    #[test]
    fn required_only_group_matches_on_required_alone() {
        let cfg = parse("+chip");
        assert!(title_matches("new chip factory announced", &cfg.groups[0]));
        assert!(!title_matches("new fab announced", &cfg.groups[0]));
    }

    #[test]
    fn filters_and_catch_all() {
        let cfg = parse("火箭\n!明星");
        assert!(is_filtered("某明星火箭式蹿红", &cfg.filter_words));
        assert!(!is_filtered("火箭发射成功", &cfg.filter_words));
        assert!(title_matches("anything at all", &catch_all()));
    }
}
