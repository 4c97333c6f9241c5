// src/dedup/mod.rs
//! Multi-stage deduplication pipeline:
//! exact-signature pass → algorithmic pass (hybrid similarity) →
//! semantic pre-filter → optional LLM pass → final exact-title sweep.
//!
//! The semantic stage is an enhancement, never a dependency: any failure
//! there degrades to the algorithmic output.

pub mod algorithmic;
pub mod prefilter;
pub mod semantic;
pub mod similarity;
pub mod text;

use std::collections::HashSet;
use std::time::Instant;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::ScoredItem;
use semantic::SemanticDeduplicator;
use text::PreparedTitle;

/// Tunables for the pipeline. The semantic-skip cutoff is deliberately a
/// parameter, not a constant: deployments disagree on the right value and
/// some rely on the pre-filter alone (`None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Algorithmic-pass similarity threshold.
    pub strict_threshold: f64,
    /// Pre-filter Jaccard threshold; permissive by design.
    pub prefilter_threshold: f64,
    /// Cap on history titles forwarded as classifier context.
    pub history_context_cap: usize,
    /// Skip the semantic stage when more than this many items survive the
    /// algorithmic pass. `None` disables the size cutoff.
    pub semantic_batch_cutoff: Option<usize>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            strict_threshold: 0.8,
            prefilter_threshold: 0.1,
            history_context_cap: 50,
            semantic_batch_cutoff: Some(200),
        }
    }
}

/// A scored item plus its precomputed dedup signature. Owned by a single
/// `deduplicate` invocation; never shared across calls.
#[derive(Debug, Clone)]
pub struct PreparedItem {
    pub item: ScoredItem,
    pub text: PreparedTitle,
}

impl PreparedItem {
    pub fn new(item: ScoredItem) -> Self {
        let text = PreparedTitle::new(&item.title);
        Self { item, text }
    }
}

pub struct Deduplicator {
    cfg: DedupConfig,
    semantic: Option<SemanticDeduplicator>,
}

impl Deduplicator {
    pub fn new(cfg: DedupConfig) -> Self {
        Self {
            cfg,
            semantic: None,
        }
    }

    /// Attach the LLM stage. Without it the pipeline stops after the
    /// algorithmic pass (deliberate skip, not an error).
    pub fn with_semantic(mut self, semantic: SemanticDeduplicator) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.cfg
    }

    pub fn semantic_enabled(&self) -> bool {
        self.semantic.is_some()
    }

    /// Full pipeline over one batch. `history_titles` are titles already
    /// delivered within the rolling window; they filter but are never
    /// themselves filtered.
    pub async fn deduplicate(
        &self,
        news: Vec<ScoredItem>,
        history_titles: &[String],
    ) -> Vec<ScoredItem> {
        if news.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        let input_len = news.len();

        // Signatures are computed exactly once here and shared by every
        // later stage.
        let prepared: Vec<PreparedItem> = news.into_iter().map(PreparedItem::new).collect();
        let history: Vec<PreparedTitle> = history_titles
            .iter()
            .map(|t| PreparedTitle::new(t))
            .collect();

        // Exact-signature pass: catches verbatim and punctuation-only
        // repeats before any quadratic work.
        let mut seen: HashSet<String> = history.iter().map(|h| h.normalized.clone()).collect();
        let mut unique: Vec<PreparedItem> = Vec::with_capacity(prepared.len());
        for item in prepared {
            if seen.contains(&item.text.normalized) {
                debug!(target: "dedup", title = %item.text.title, "dropped: exact signature repeat");
                continue;
            }
            seen.insert(item.text.normalized.clone());
            unique.push(item);
        }
        counter!("dedup_exact_removed_total").increment((input_len - unique.len()) as u64);
        if unique.is_empty() {
            return Vec::new();
        }

        let algo = algorithmic::reduce(unique, &history, self.cfg.strict_threshold);
        counter!("dedup_algo_survivors_total").increment(algo.len() as u64);
        debug!(
            target: "dedup",
            input = input_len,
            survivors = algo.len(),
            "algorithmic pass done"
        );

        let Some(semantic) = &self.semantic else {
            return finish(algo.into_iter().map(|p| p.item).collect(), started, input_len);
        };
        if algo.is_empty() {
            return Vec::new();
        }
        if let Some(cutoff) = self.cfg.semantic_batch_cutoff {
            if algo.len() > cutoff {
                info!(
                    target: "dedup",
                    survivors = algo.len(),
                    cutoff,
                    "batch above semantic cutoff, keeping algorithmic result"
                );
                return finish(algo.into_iter().map(|p| p.item).collect(), started, input_len);
            }
        }

        // Keep a copy of the algorithmic output for the fallback path.
        let algo_items: Vec<ScoredItem> = algo.iter().map(|p| p.item.clone()).collect();

        let outcome = prefilter::split(
            algo,
            &history,
            self.cfg.prefilter_threshold,
            self.cfg.history_context_cap,
        );
        if outcome.suspicious.is_empty() {
            debug!(target: "dedup", "pre-filter found nothing suspicious, skipping classifier");
            return finish(
                outcome.safe.into_iter().map(|p| p.item).collect(),
                started,
                input_len,
            );
        }

        info!(
            target: "dedup",
            suspicious = outcome.suspicious.len(),
            safe = outcome.safe.len(),
            context = outcome.relevant_history.len(),
            "running semantic pass"
        );

        let suspicious_items: Vec<ScoredItem> =
            outcome.suspicious.into_iter().map(|p| p.item).collect();
        match semantic
            .resolve(suspicious_items, &outcome.relevant_history)
            .await
        {
            Ok(kept) => {
                counter!("dedup_semantic_runs_total").increment(1);
                let mut merged: Vec<ScoredItem> =
                    outcome.safe.into_iter().map(|p| p.item).collect();
                merged.extend(kept);
                // Merge steps can in rare cases reintroduce an exact
                // duplicate; one last plain title sweep guards that.
                let mut final_seen: HashSet<String> = HashSet::new();
                merged.retain(|it| final_seen.insert(it.title.clone()));
                finish(merged, started, input_len)
            }
            Err(e) => {
                counter!("dedup_semantic_failures_total").increment(1);
                warn!(
                    target: "dedup",
                    error = ?e,
                    "semantic pass failed, falling back to algorithmic result"
                );
                finish(algo_items, started, input_len)
            }
        }
    }
}

fn finish(items: Vec<ScoredItem>, started: Instant, input_len: usize) -> Vec<ScoredItem> {
    info!(
        target: "dedup",
        input = input_len,
        output = items.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "deduplication finished"
    );
    items
}
