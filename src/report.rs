// src/report.rs
//! Report shaping: flatten matched groups into one ranked list, drop
//! what earlier days already pushed, and render the text body the push
//! channels deliver.

use std::collections::{BTreeMap, HashSet};

use crate::dedup::text::normalize;
use crate::translate::TranslationCache;
use crate::types::{ReportInfo, ScoredItem};

/// Matched groups flattened into one list, heaviest first.
pub fn flatten(groups: &BTreeMap<String, Vec<ScoredItem>>) -> Vec<ScoredItem> {
    let mut items: Vec<ScoredItem> = groups.values().flatten().cloned().collect();
    items.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    items
}

#[derive(Debug, Default)]
pub struct IncrementalOutcome {
    /// Items not seen in the history window.
    pub fresh: Vec<ScoredItem>,
    /// Every title from this run, fresh or not, for the history append.
    pub current_titles: Vec<String>,
    pub fresh_count: usize,
}

/// Keep only items whose title is new relative to the pushed history.
/// Matching is exact first, then by normalized signature, so cosmetic
/// punctuation or spacing differences do not resurrect an old item.
pub fn filter_by_history(items: Vec<ScoredItem>, history_titles: &HashSet<String>) -> IncrementalOutcome {
    let mut signatures: HashSet<String> = HashSet::with_capacity(history_titles.len());
    for title in history_titles {
        signatures.insert(normalize(title));
    }

    let mut outcome = IncrementalOutcome::default();
    for item in items {
        outcome.current_titles.push(item.title.clone());
        if history_titles.contains(&item.title) {
            continue;
        }
        if signatures.contains(&normalize(&item.title)) {
            continue;
        }
        outcome.fresh.push(item);
    }
    outcome.fresh_count = outcome.fresh.len();
    outcome
}

/// Plain-text rendering shared by every channel. Titles with a cached
/// translation show it after the original.
pub fn render_text(
    items: &[ScoredItem],
    info: &ReportInfo,
    translations: &TranslationCache,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "📰 热点摘要 · {} {}\n",
        info.generated_date, info.generated_time
    ));
    out.push_str(&format!(
        "模式: {} | 抓取 {} 条, 入选 {} 条\n\n",
        info.report_mode, info.total_news, info.hot_news
    ));

    for (i, item) in items.iter().enumerate() {
        let title = match translations.get(&item.title) {
            Some(t) if t != &item.title => format!("{} ({})", item.title, t),
            _ => item.title.clone(),
        };
        let line = if item.url.is_empty() {
            format!("{}. {} - {}", i + 1, title, item.source)
        } else {
            format!("{}. [{}]({}) - {}", i + 1, title, item.url, item.source)
        };
        out.push_str(&line);
        if item.count > 1 {
            out.push_str(&format!(" ({}次)", item.count));
        }
        out.push('\n');
    }

    if items.is_empty() {
        out.push_str("本时段无新增热点。\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, weight: f64) -> ScoredItem {
        ScoredItem::from_title(title, weight)
    }

    #[test]
    fn flatten_sorts_heaviest_first() {
        let mut groups = BTreeMap::new();
        groups.insert("ai".to_string(), vec![item("a", 0.2), item("b", 0.9)]);
        groups.insert("chips".to_string(), vec![item("c", 0.5)]);
        let flat = flatten(&groups);
        let titles: Vec<&str> = flat.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
    }

    #[test]
    fn history_filter_drops_exact_and_normalized_matches() {
        let history: HashSet<String> =
            ["苹果发布iPhone16".to_string()].into_iter().collect();
        let items = vec![
            item("苹果发布iPhone16", 0.9),
            item("苹果 发布 iPhone 16", 0.8),
            item("特斯拉涨停", 0.7),
        ];
        let outcome = filter_by_history(items, &history);
        assert_eq!(outcome.fresh_count, 1);
        assert_eq!(outcome.fresh[0].title, "特斯拉涨停");
        assert_eq!(outcome.current_titles.len(), 3);
    }

    #[test]
    fn render_includes_links_and_counts() {
        let mut first = item("大模型发布", 0.9);
        first.url = "https://example.com/a".to_string();
        first.count = 3;
        let info = ReportInfo {
            report_mode: "daily".to_string(),
            total_news: 120,
            hot_news: 1,
            generated_date: "2024-01-02".to_string(),
            generated_time: "10:30".to_string(),
        };
        let text = render_text(&[first], &info, &TranslationCache::new());
        assert!(text.contains("1. [大模型发布](https://example.com/a)"));
        assert!(text.contains("(3次)"));
        assert!(text.contains("2024-01-02"));
    }

    #[test]
    fn render_shows_translation_beside_original() {
        let it = item("Apple unveils new chip", 0.5);
        let info = ReportInfo {
            report_mode: "current".to_string(),
            total_news: 1,
            hot_news: 1,
            generated_date: "2024-01-02".to_string(),
            generated_time: "10:30".to_string(),
        };
        let mut cache = TranslationCache::new();
        cache.insert(
            "Apple unveils new chip".to_string(),
            "苹果发布新芯片".to_string(),
        );
        let text = render_text(&[it], &info, &cache);
        assert!(text.contains("Apple unveils new chip (苹果发布新芯片)"));
    }
}
