// src/dedup/prefilter.rs
//! Cheap suspicion pass ahead of the semantic stage. Jaccard only, no edit
//! distance: this runs over all pairs including history, and low precision
//! is fine because flagged items are re-judged by the classifier anyway.
//! Over-including is the intended bias; silently shipping a duplicate is
//! the failure mode being avoided.

use std::collections::HashSet;

use tracing::debug;

use super::text::PreparedTitle;
use super::{similarity, PreparedItem};

pub struct PreFilterOutcome {
    /// Items needing semantic review.
    pub suspicious: Vec<PreparedItem>,
    /// Items that bypass the classifier entirely.
    pub safe: Vec<PreparedItem>,
    /// Distinct history titles that triggered a flag, in trigger order,
    /// capped to bound the classifier payload.
    pub relevant_history: Vec<String>,
}

/// Flag every batch item whose Jaccard similarity to any history title or
/// any batch peer exceeds `low_threshold`.
pub fn split(
    batch: Vec<PreparedItem>,
    history: &[PreparedTitle],
    low_threshold: f64,
    history_cap: usize,
) -> PreFilterOutcome {
    let mut flagged: HashSet<usize> = HashSet::new();
    let mut relevant_history: Vec<String> = Vec::new();
    let mut relevant_seen: HashSet<String> = HashSet::new();

    for hist in history {
        let mut related = false;
        for (i, item) in batch.iter().enumerate() {
            let j = similarity::jaccard(&item.text.tokens, &hist.tokens);
            if j > low_threshold {
                flagged.insert(i);
                related = true;
                debug!(
                    target: "dedup",
                    jaccard = format!("{j:.2}"),
                    title = %item.text.title,
                    history = %hist.title,
                    "flagged against history"
                );
            }
        }
        if related && relevant_seen.insert(hist.title.clone()) {
            relevant_history.push(hist.title.clone());
        }
    }

    for i in 0..batch.len() {
        for j in (i + 1)..batch.len() {
            let sim = similarity::jaccard(&batch[i].text.tokens, &batch[j].text.tokens);
            if sim > low_threshold {
                flagged.insert(i);
                flagged.insert(j);
                debug!(
                    target: "dedup",
                    jaccard = format!("{sim:.2}"),
                    a = %batch[i].text.title,
                    b = %batch[j].text.title,
                    "flagged batch pair"
                );
            }
        }
    }

    relevant_history.truncate(history_cap);

    let mut suspicious = Vec::new();
    let mut safe = Vec::new();
    for (i, item) in batch.into_iter().enumerate() {
        if flagged.contains(&i) {
            suspicious.push(item);
        } else {
            safe.push(item);
        }
    }

    PreFilterOutcome {
        suspicious,
        safe,
        relevant_history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoredItem;

    fn prep(title: &str) -> PreparedItem {
        PreparedItem::new(ScoredItem::from_title(title, 1.0))
    }

    #[test]
    fn history_overlap_flags_and_collects_context() {
        let history = vec![PreparedTitle::new("苹果公司发布全新芯片")];
        let out = split(
            vec![prep("苹果芯片引发市场关注"), prep("世界杯揭幕战打响")],
            &history,
            0.1,
            50,
        );
        assert_eq!(out.suspicious.len(), 1);
        assert_eq!(out.suspicious[0].text.title, "苹果芯片引发市场关注");
        assert_eq!(out.safe.len(), 1);
        assert_eq!(out.relevant_history, vec!["苹果公司发布全新芯片"]);
    }

    #[test]
    fn batch_pairs_flag_both_members() {
        let out = split(
            vec![
                prep("苹果公司发布全新芯片产品"),
                prep("苹果芯片引发市场关注"),
                prep("世界杯揭幕战打响"),
            ],
            &[],
            0.1,
            50,
        );
        assert_eq!(out.suspicious.len(), 2);
        assert_eq!(out.safe.len(), 1);
        assert!(out.relevant_history.is_empty());
    }

    #[test]
    fn nothing_related_means_nothing_suspicious() {
        let out = split(
            vec![prep("央行宣布降息"), prep("世界杯揭幕战打响")],
            &[PreparedTitle::new("量子计算新突破")],
            0.1,
            50,
        );
        assert!(out.suspicious.is_empty());
        assert_eq!(out.safe.len(), 2);
        assert!(out.relevant_history.is_empty());
    }

    #[test]
    fn relevant_history_honors_the_cap() {
        let history: Vec<PreparedTitle> = (0..5)
            .map(|i| PreparedTitle::new(&format!("苹果芯片新闻第{i}条")))
            .collect();
        let out = split(vec![prep("苹果芯片引发市场关注")], &history, 0.1, 2);
        assert_eq!(out.relevant_history.len(), 2);
        // Trigger order is preserved under the cap.
        assert_eq!(out.relevant_history[0], "苹果芯片新闻第0条");
    }
}
