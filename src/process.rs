// src/process.rs
//! Scoring stage: turns raw per-source rank observations into weighted
//! [`ScoredItem`]s grouped by keyword group, sorted and truncated.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keywords::{self, KeywordConfig};
use crate::types::{RawItem, ScoredItem};

/// Weight formula coefficients. Defaults follow the production tuning:
/// rank quality dominates, frequency matters, a top-10 share tops it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub rank_weight: f64,
    pub frequency_weight: f64,
    pub hotness_weight: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            rank_weight: 0.6,
            frequency_weight: 0.3,
            hotness_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Whether one title may land in several keyword groups. Pipeline
    /// variants disagree here, so it stays configurable; default allows it.
    pub multi_group: bool,
    /// Sort each group by weight alone; otherwise count-first, then weight.
    pub sort_by_weight_first: bool,
    /// Cap applied to groups without their own `@N`.
    pub max_per_group: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            multi_group: true,
            sort_by_weight_first: false,
            max_per_group: 10,
        }
    }
}

/// `weight = rank_w / avg(rank) + freq_w · |ranks| + hot_w · share(rank ≤ 10)`.
/// Never recomputed after this stage.
pub fn calculate_weight(ranks: &[u32], cfg: &WeightConfig) -> f64 {
    if ranks.is_empty() {
        return 0.0;
    }
    let n = ranks.len() as f64;
    let avg_rank = ranks.iter().map(|r| *r as f64).sum::<f64>() / n;
    let rank_score = 1.0 / avg_rank;
    let frequency_score = n;
    let hotness_score = ranks.iter().filter(|r| **r <= 10).count() as f64 / n;

    rank_score * cfg.rank_weight
        + frequency_score * cfg.frequency_weight
        + hotness_score * cfg.hotness_weight
}

/// Match, score, group, sort and truncate one crawl cycle's titles.
///
/// `results` is source-id → (title → aggregated observation); `id_to_name`
/// maps source ids to display names. With no configured groups a single
/// catch-all bucket keeps the pipeline useful.
pub fn process(
    results: &HashMap<String, HashMap<String, RawItem>>,
    id_to_name: &HashMap<String, String>,
    kw: &KeywordConfig,
    weights: &WeightConfig,
    opts: &ProcessOptions,
) -> BTreeMap<String, Vec<ScoredItem>> {
    let groups = if kw.groups.is_empty() {
        vec![keywords::catch_all()]
    } else {
        kw.groups.clone()
    };

    let mut matched: BTreeMap<String, Vec<ScoredItem>> = BTreeMap::new();
    for g in &groups {
        matched.insert(g.key.clone(), Vec::new());
    }

    for (source_id, titles) in results {
        let source_name = id_to_name
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| source_id.clone());

        for (title, info) in titles {
            let lower = title.to_lowercase();
            if keywords::is_filtered(&lower, &kw.filter_words) {
                debug!(target: "process", %title, "dropped by filter word");
                continue;
            }

            for group in &groups {
                if !keywords::title_matches(&lower, group) {
                    continue;
                }
                let weight = calculate_weight(&info.ranks, weights);
                let first_rank = info.ranks.iter().copied().min().unwrap_or(0);
                matched.entry(group.key.clone()).or_default().push(ScoredItem {
                        title: title.clone(),
                        source: source_name.clone(),
                        source_id: source_id.clone(),
                        ranks: info.ranks.clone(),
                        url: info.url.clone(),
                        mobile_url: info.mobile_url.clone(),
                        weight,
                        first_rank,
                        count: info.ranks.len(),
                    });
                if !opts.multi_group {
                    break;
                }
            }
        }
    }

    for group in &groups {
        let Some(list) = matched.get_mut(&group.key) else {
            continue;
        };
        if list.is_empty() {
            continue;
        }
        if opts.sort_by_weight_first {
            list.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        } else {
            list.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then_with(|| b.weight.total_cmp(&a.weight))
            });
        }
        let cap = if group.max_count > 0 {
            group.max_count
        } else {
            opts.max_per_group
        };
        if cap > 0 && list.len() > cap {
            list.truncate(cap);
        }
    }

    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::parse;

    fn raw(title: &str, ranks: &[u32]) -> (String, RawItem) {
        (
            title.to_string(),
            RawItem {
                title: title.to_string(),
                url: "https://example.test/x".into(),
                mobile_url: String::new(),
                ranks: ranks.to_vec(),
            },
        )
    }

    #[test]
    fn weight_formula_fixed_points() {
        let cfg = WeightConfig::default();
        // Single observation at rank 1: 0.6/1 + 0.3·1 + 0.1·1 = 1.0
        assert!((calculate_weight(&[1], &cfg) - 1.0).abs() < 1e-12);
        // Ranks 10 and 30: avg 20 → 0.03 + 0.6 + 0.05 = 0.68
        assert!((calculate_weight(&[10, 30], &cfg) - 0.68).abs() < 1e-12);
        assert_eq!(calculate_weight(&[], &cfg), 0.0);
    }

    #[test]
    fn grouping_filtering_and_caps() {
        let kw = parse("ai\nrobot\n@1\n\n芯片\n!spam");
        let mut titles = HashMap::new();
        for (t, r) in [
            raw("AI breakthrough announced", &[1]),
            raw("robot dog on sale", &[2, 4]),
            raw("芯片产能提升", &[3]),
            raw("spam ai nonsense", &[1]),
            raw("weather today", &[9]),
        ] {
            titles.insert(t, r);
        }
        let mut results = HashMap::new();
        results.insert("src".to_string(), titles);
        let mut names = HashMap::new();
        names.insert("src".to_string(), "Source".to_string());

        let out = process(
            &results,
            &names,
            &kw,
            &WeightConfig::default(),
            &ProcessOptions::default(),
        );

        // @1 cap keeps one item in the first group.
        assert_eq!(out.get("ai robot").unwrap().len(), 1);
        assert_eq!(out.get("芯片").unwrap().len(), 1);
        // The filtered title appears nowhere.
        for list in out.values() {
            assert!(list.iter().all(|i| !i.title.contains("spam")));
        }
    }

    #[test]
    fn multi_group_membership_is_configurable() {
        let kw = parse("tesla\n\n特斯拉\ntesla");
        let mut titles = HashMap::new();
        let (t, r) = raw("Tesla hits new high", &[1]);
        titles.insert(t, r);
        let mut results = HashMap::new();
        results.insert("src".to_string(), titles);
        let names = HashMap::new();

        let both = process(
            &results,
            &names,
            &kw,
            &WeightConfig::default(),
            &ProcessOptions::default(),
        );
        let hits: usize = both.values().map(|v| v.len()).sum();
        assert_eq!(hits, 2);

        let single = process(
            &results,
            &names,
            &kw,
            &WeightConfig::default(),
            &ProcessOptions {
                multi_group: false,
                ..Default::default()
            },
        );
        let hits: usize = single.values().map(|v| v.len()).sum();
        assert_eq!(hits, 1);
    }

    #[test]
    fn no_keywords_means_catch_all() {
        let kw = KeywordConfig::default();
        let mut titles = HashMap::new();
        let (t, r) = raw("anything", &[1]);
        titles.insert(t, r);
        let mut results = HashMap::new();
        results.insert("src".to_string(), titles);

        let out = process(
            &results,
            &HashMap::new(),
            &kw,
            &WeightConfig::default(),
            &ProcessOptions::default(),
        );
        assert_eq!(out.get("all").unwrap().len(), 1);
    }
}
