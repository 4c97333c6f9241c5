// src/fetch.rs
//! Crawls the upstream aggregator feeds. Each platform is one JSON
//! endpoint returning a ranked list of headlines; we retry transient
//! failures with a linear backoff and pace requests so the upstream
//! never sees a burst.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::RawItem;

const MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_millis(3000);
const RETRY_STEP: Duration = Duration::from_millis(2000);

/// One upstream feed. `name` is the display name used in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    status: String,
    #[serde(default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default, rename = "mobileUrl")]
    mobile_url: String,
}

/// Everything one crawl round produced: per-platform title maps, the
/// id-to-display-name table, and the platforms that failed outright.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub results: HashMap<String, HashMap<String, RawItem>>,
    pub id_to_name: HashMap<String, String>,
    pub failed: Vec<String>,
}

pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    request_gap: Duration,
}

impl FeedClient {
    pub fn new(base_url: &str, request_gap: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("trend-digest/0.1 (+github.com/trend-digest/trend-digest)")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_gap,
        }
    }

    /// Fetch every platform sequentially. Partial failure is normal; a
    /// platform that exhausts its retries lands in `failed` and the run
    /// continues.
    pub async fn crawl(&self, platforms: &[Platform]) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        for (i, platform) in platforms.iter().enumerate() {
            if i > 0 && !self.request_gap.is_zero() {
                tokio::time::sleep(self.request_gap).await;
            }
            outcome
                .id_to_name
                .insert(platform.id.clone(), platform.name.clone());
            match self.fetch_platform(&platform.id).await {
                Ok(items) => {
                    debug!(
                        target: "fetch",
                        platform = %platform.id,
                        titles = items.len(),
                        "platform fetched"
                    );
                    outcome.results.insert(platform.id.clone(), items);
                }
                Err(e) => {
                    warn!(target: "fetch", platform = %platform.id, error = ?e, "platform failed");
                    outcome.failed.push(platform.id.clone());
                }
            }
        }
        info!(
            target: "fetch",
            ok = outcome.results.len(),
            failed = outcome.failed.len(),
            "crawl round finished"
        );
        outcome
    }

    async fn fetch_platform(&self, id: &str) -> Result<HashMap<String, RawItem>> {
        let url = format!("{}?id={id}&latest", self.base_url);
        let mut last_err = None;
        for retry in 0..=MAX_RETRIES {
            if retry > 0 {
                tokio::time::sleep(RETRY_BASE + RETRY_STEP * (retry - 1)).await;
            }
            match self.fetch_once(&url).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    debug!(target: "fetch", platform = %id, retry, error = ?e, "attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempt made")))
    }

    async fn fetch_once(&self, url: &str) -> Result<HashMap<String, RawItem>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("feed request failed")?;
        if !resp.status().is_success() {
            bail!("feed returned HTTP {}", resp.status());
        }
        let body: FeedResponse = resp.json().await.context("feed body was not valid JSON")?;
        // "cache" means the upstream served a stored snapshot, which is
        // just as usable as a live one.
        if body.status != "success" && body.status != "cache" {
            bail!("feed status {:?}", body.status);
        }
        Ok(collect_items(body.items))
    }
}

/// Deduplicate by trimmed title, accumulating every rank a title held.
/// Titles arrive HTML-escaped from some feeds; decode before keying.
fn collect_items(items: Vec<FeedItem>) -> HashMap<String, RawItem> {
    let mut out: HashMap<String, RawItem> = HashMap::new();
    for (index, item) in items.into_iter().enumerate() {
        let title = html_escape::decode_html_entities(item.title.trim()).into_owned();
        if title.is_empty() {
            continue;
        }
        let rank = (index + 1) as u32;
        let entry = out.entry(title.clone()).or_insert_with(|| RawItem {
            title,
            url: item.url.clone(),
            mobile_url: item.mobile_url.clone(),
            ranks: Vec::new(),
        });
        entry.ranks.push(rank);
        if entry.url.is_empty() && !item.url.is_empty() {
            entry.url = item.url;
        }
        if entry.mobile_url.is_empty() && !item.mobile_url.is_empty() {
            entry.mobile_url = item.mobile_url;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, url: &str) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            url: url.to_string(),
            mobile_url: String::new(),
        }
    }

    #[test]
    fn collect_accumulates_ranks_per_title() {
        let items = vec![
            item("A", "https://a"),
            item("B", "https://b"),
            item(" A ", ""),
        ];
        let out = collect_items(items);
        assert_eq!(out.len(), 2);
        assert_eq!(out["A"].ranks, vec![1, 3]);
        assert_eq!(out["A"].url, "https://a");
        assert_eq!(out["B"].ranks, vec![2]);
    }

    #[test]
    fn collect_decodes_entities_and_drops_blank_titles() {
        let items = vec![item("Tom &amp; Jerry", ""), item("   ", "")];
        let out = collect_items(items);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("Tom & Jerry"));
    }

    #[test]
    fn feed_response_accepts_cache_status() {
        let raw = r#"{"status":"cache","items":[{"title":"x","url":"u","mobileUrl":"m"}]}"#;
        let body: FeedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, "cache");
        assert_eq!(body.items[0].mobile_url, "m");
    }
}
