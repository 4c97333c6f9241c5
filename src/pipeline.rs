// src/pipeline.rs
//! One crawl-score-dedup-push cycle, and the shared application context
//! it runs against. The scheduler and the HTTP handlers both call
//! [`run_cycle`]; `force = true` (manual trigger) bypasses the rest-day
//! gate and the once-per-slot push bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use metrics::counter;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::{AppConfig, ReportMode};
use crate::dedup::semantic::{ChatCompletionsClient, SemanticClient, SemanticDeduplicator, UsageSink};
use crate::dedup::Deduplicator;
use crate::fetch::FeedClient;
use crate::holiday::HolidayGate;
use crate::keywords;
use crate::notify::{DingTalk, Feishu, NotifierMux, Telegram, WeCom};
use crate::process;
use crate::report;
use crate::storage::{FileKv, KvStore, MemoryKv, ReportSnapshot, Storage};
use crate::translate::{TranslationCache, Translator};
use crate::types::{ReportInfo, ScoredItem};

static METRICS_DESCRIBED: OnceCell<()> = OnceCell::new();

pub fn ensure_metrics_described() {
    METRICS_DESCRIBED.get_or_init(|| {
        metrics::describe_counter!(
            "cycle_runs_total",
            "Pipeline cycles started, by trigger."
        );
        metrics::describe_counter!(
            "cycle_skipped_total",
            "Pipeline cycles skipped before crawling."
        );
        metrics::describe_counter!("cycle_pushed_total", "Reports delivered to any channel.");
        metrics::describe_counter!("cycle_errors_total", "Scheduled cycles that returned an error.");
        metrics::describe_counter!(
            "dedup_exact_removed_total",
            "Items dropped by the exact-signature pass."
        );
        metrics::describe_counter!(
            "dedup_algo_survivors_total",
            "Items surviving the algorithmic pass."
        );
        metrics::describe_counter!(
            "dedup_semantic_runs_total",
            "Semantic classifier passes completed."
        );
        metrics::describe_counter!(
            "dedup_semantic_failures_total",
            "Semantic classifier passes that fell back."
        );
    });
}

pub struct AppContext {
    pub cfg: AppConfig,
    pub storage: Arc<Storage>,
    pub feed: FeedClient,
    pub dedup: Deduplicator,
    pub translator: Option<Translator>,
    pub holiday: HolidayGate,
    pub notifiers: NotifierMux,
}

impl AppContext {
    pub fn from_config(cfg: AppConfig) -> Result<Self> {
        let kv: Arc<dyn KvStore> = if cfg.ephemeral {
            Arc::new(MemoryKv::default())
        } else {
            Arc::new(FileKv::new(&cfg.data_dir)?)
        };
        Ok(Self::with_kv(cfg, kv))
    }

    /// Build against an explicit store. Tests pass a `MemoryKv` here.
    pub fn with_kv(cfg: AppConfig, kv: Arc<dyn KvStore>) -> Self {
        let storage = Arc::new(Storage::new(kv.clone()));
        let ledger: Arc<dyn UsageSink> = storage.clone();

        let chat_client: Option<Arc<dyn SemanticClient>> = cfg.llm.api_key.as_ref().map(|key| {
            Arc::new(ChatCompletionsClient::new(
                &cfg.llm.endpoint,
                key,
                &cfg.llm.model,
            )) as Arc<dyn SemanticClient>
        });

        let mut dedup = Deduplicator::new(cfg.dedup.clone());
        if let Some(client) = &chat_client {
            dedup = dedup.with_semantic(
                SemanticDeduplicator::new(client.clone()).with_ledger(ledger.clone()),
            );
        }

        let translator = chat_client
            .map(|client| Translator::new(client, kv.clone()).with_ledger(ledger));

        let holiday = HolidayGate::new(
            kv,
            cfg.holiday_api_key.clone(),
            cfg.holiday_push_hours.clone(),
        );

        let mut notifiers = NotifierMux::default();
        if let Some(url) = &cfg.channels.feishu_webhook_url {
            notifiers.push(Box::new(Feishu::new(url.clone())));
        }
        if let Some(url) = &cfg.channels.dingtalk_webhook_url {
            notifiers.push(Box::new(DingTalk::new(url.clone())));
        }
        if let Some(url) = &cfg.channels.wework_webhook_url {
            notifiers.push(Box::new(WeCom::new(url.clone(), cfg.channels.wework_markdown)));
        }
        if let (Some(token), Some(chat)) = (
            &cfg.channels.telegram_bot_token,
            &cfg.channels.telegram_chat_id,
        ) {
            notifiers.push(Box::new(Telegram::new(token.clone(), chat.clone())));
        }

        let feed = FeedClient::new(&cfg.feed_base_url, cfg.request_gap());

        Self {
            cfg,
            storage,
            feed,
            dedup,
            translator,
            holiday,
            notifiers,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CycleOutcome {
    /// Present when the cycle stopped before crawling.
    pub skipped: Option<String>,
    pub total_titles: usize,
    pub matched: usize,
    pub after_dedup: usize,
    pub reported: usize,
    pub channels_delivered: usize,
    pub failed_platforms: Vec<String>,
    pub report_mode: String,
}

/// The whole cycle: gate, crawl, score, dedup, render, push, persist.
/// Intermediate failures degrade (a platform down, a channel down); the
/// only hard errors are storage writes for the final snapshot.
pub async fn run_cycle(ctx: &AppContext, force: bool) -> Result<CycleOutcome> {
    ensure_metrics_described();
    counter!("cycle_runs_total", "trigger" => if force { "manual" } else { "scheduled" })
        .increment(1);

    let mut outcome = CycleOutcome {
        report_mode: ctx.cfg.report_mode.as_str().to_string(),
        ..CycleOutcome::default()
    };

    if !force && !ctx.cfg.enable_crawler {
        outcome.skipped = Some("crawler disabled".to_string());
        counter!("cycle_skipped_total", "reason" => "disabled").increment(1);
        return Ok(outcome);
    }
    if !force && !ctx.holiday.allows_push_now().await {
        outcome.skipped = Some("rest day, outside push hours".to_string());
        counter!("cycle_skipped_total", "reason" => "rest_day").increment(1);
        return Ok(outcome);
    }

    // Crawl.
    let crawl = ctx.feed.crawl(&ctx.cfg.platforms).await;
    outcome.failed_platforms = crawl.failed.clone();
    outcome.total_titles = crawl.results.values().map(|m| m.len()).sum();
    if crawl.results.is_empty() {
        outcome.skipped = Some("every platform failed".to_string());
        counter!("cycle_skipped_total", "reason" => "crawl_failed").increment(1);
        return Ok(outcome);
    }

    // Score and group.
    let kw = keywords::parse(&ctx.storage.get_keywords().await);
    let groups = process::process(
        &crawl.results,
        &crawl.id_to_name,
        &kw,
        &ctx.cfg.weights,
        &ctx.cfg.process,
    );
    let flat = report::flatten(&groups);
    outcome.matched = flat.len();

    // Dedup against the rolling window, excluding today so repeated
    // cycles within a day stay self-consistent.
    let now_ms = clock::now_millis();
    let today = clock::today_key();
    let window = ctx.storage.get_history().await;
    let dedup_history: Vec<String> = window
        .merged_titles(now_ms, ctx.cfg.history_window_days, Some(&today))
        .into_iter()
        .collect();
    let mut deduped = ctx.dedup.deduplicate(flat, &dedup_history).await;
    deduped.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    outcome.after_dedup = deduped.len();

    // Report-mode shaping.
    let full_history: HashSet<String> =
        window.merged_titles(now_ms, ctx.cfg.history_window_days, None);
    let (report_items, current_titles) = match ctx.cfg.report_mode {
        ReportMode::Incremental => {
            let inc = report::filter_by_history(deduped, &full_history);
            (inc.fresh, inc.current_titles)
        }
        ReportMode::Current => {
            let titles = deduped.iter().map(|i| i.title.clone()).collect();
            (deduped, titles)
        }
        ReportMode::Daily => {
            let titles: Vec<String> = deduped.iter().map(|i| i.title.clone()).collect();
            (merge_with_snapshot(ctx, deduped).await, titles)
        }
    };
    outcome.reported = report_items.len();

    let now = clock::report_now();
    let info = ReportInfo {
        report_mode: ctx.cfg.report_mode.as_str().to_string(),
        total_news: outcome.total_titles,
        hot_news: report_items.len(),
        generated_date: now.format("%Y-%m-%d").to_string(),
        generated_time: now.format("%H:%M").to_string(),
    };

    // Push.
    if ctx.cfg.enable_notification && !ctx.notifiers.is_empty() && !report_items.is_empty() {
        let translations = match &ctx.translator {
            Some(translator) => {
                let titles: Vec<String> =
                    report_items.iter().map(|i| i.title.clone()).collect();
                translator.prewarm(&titles).await
            }
            None => TranslationCache::new(),
        };
        let text = report::render_text(&report_items, &info, &translations);
        let delivered = ctx.notifiers.broadcast(&text).await;
        outcome.channels_delivered = delivered;
        if delivered > 0 {
            counter!("cycle_pushed_total").increment(1);
            if let Err(e) = ctx.storage.save_push_record(info.report_mode.as_str()).await {
                warn!(target: "pipeline", error = ?e, "push record write failed");
            }
        }
    }

    // Persist: history first (the next cycle's dedup context), then the
    // day's snapshot. Write failures are logged, not escalated; the push
    // decision already stands.
    if let Err(e) = ctx
        .storage
        .save_history_titles(current_titles, ctx.cfg.history_window_days)
        .await
    {
        warn!(target: "pipeline", error = ?e, "history write failed");
    }
    let snapshot = ReportSnapshot {
        matched: groups,
        info,
    };
    if let Err(e) = ctx.storage.save_today_report(&snapshot).await {
        warn!(target: "pipeline", error = ?e, "snapshot write failed");
    }

    info!(
        target: "pipeline",
        total = outcome.total_titles,
        matched = outcome.matched,
        after_dedup = outcome.after_dedup,
        reported = outcome.reported,
        delivered = outcome.channels_delivered,
        "cycle finished"
    );
    Ok(outcome)
}

/// Daily mode reports the union of today's cycles: current items merged
/// with the stored snapshot, keyed by title, heaviest weight wins.
async fn merge_with_snapshot(ctx: &AppContext, current: Vec<ScoredItem>) -> Vec<ScoredItem> {
    let mut merged: Vec<ScoredItem> = current;
    let mut seen: HashSet<String> = merged.iter().map(|i| i.title.clone()).collect();
    if let Some(snapshot) = ctx.storage.get_today_report().await {
        for item in snapshot.matched.into_values().flatten() {
            if seen.insert(item.title.clone()) {
                merged.push(item);
            }
        }
    }
    merged.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    merged
}
