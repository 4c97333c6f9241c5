// src/translate.rs
//! Headline translation. Chinese titles read fine as-is; English ones
//! get a one-line Chinese rendering from the chat provider so mixed
//! reports stay scannable. Results are cached in the KV store by
//! content hash, and lookups within one pipeline run go through an
//! in-memory map so the same title is only translated once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::dedup::semantic::{SemanticClient, UsageSink};
use crate::storage::KvStore;

const CACHE_TTL: Duration = Duration::from_secs(86_400 * 30);

static HAS_CJK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{4e00}-\x{9fa5}]").expect("cjk regex"));
static HAS_LATIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").expect("latin regex"));

/// True for titles worth translating: no CJK characters and at least
/// one ASCII letter. Pure numbers and symbols stay untouched.
pub fn is_english(title: &str) -> bool {
    !HAS_CJK.is_match(title) && HAS_LATIN.is_match(title)
}

fn cache_key(title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    format!("trans:{:x}", hasher.finalize())
}

/// Translations resolved during the current run, keyed by original
/// title. Built by [`Translator::prewarm`], consumed by the renderer.
pub type TranslationCache = HashMap<String, String>;

#[derive(Clone)]
pub struct Translator {
    client: Arc<dyn SemanticClient>,
    kv: Arc<dyn KvStore>,
    ledger: Option<Arc<dyn UsageSink>>,
}

impl Translator {
    pub fn new(client: Arc<dyn SemanticClient>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            client,
            kv,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn UsageSink>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Translate every English title in `titles` concurrently, returning
    /// a map from original to translation. Failures degrade to the
    /// original title, so the report never blocks on the provider.
    pub async fn prewarm(&self, titles: &[String]) -> TranslationCache {
        let mut cache = TranslationCache::new();
        let mut set = JoinSet::new();
        for title in titles {
            if !is_english(title) || cache.contains_key(title) {
                continue;
            }
            cache.insert(title.clone(), title.clone());
            let this = self.clone();
            let title = title.clone();
            set.spawn(async move {
                let out = this.translate(&title).await;
                (title, out)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((title, Ok(translated))) => {
                    cache.insert(title, translated);
                }
                Ok((title, Err(e))) => {
                    warn!(target: "translate", %title, error = ?e, "translation failed");
                }
                Err(e) => warn!(target: "translate", error = ?e, "translation task panicked"),
            }
        }
        cache
    }

    /// Single-title translation with a KV read-through cache.
    pub async fn translate(&self, title: &str) -> Result<String> {
        let key = cache_key(title);
        if let Ok(Some(cached)) = self.kv.get(&key).await {
            debug!(target: "translate", %title, "cache hit");
            return Ok(cached);
        }

        let system = "You are a professional news translator. Translate the given \
                      English news headline into concise natural Chinese. Reply with \
                      the translation only, no quotes, no explanations.";
        let outcome = self.client.chat(system, title).await?;

        if let (Some(ledger), Some(usage)) = (&self.ledger, &outcome.usage) {
            if let Err(e) = ledger
                .record_usage(
                    "translator",
                    &outcome.model,
                    usage,
                    serde_json::json!({ "title_len": title.chars().count() }),
                )
                .await
            {
                warn!(target: "translate", error = ?e, "usage ledger write failed");
            }
        }

        let translated = strip_quotes(outcome.content.trim()).to_string();
        if translated.is_empty() {
            return Ok(title.to_string());
        }
        if let Err(e) = self.kv.put(&key, &translated, Some(CACHE_TTL)).await {
            warn!(target: "translate", error = ?e, "translation cache write failed");
        }
        Ok(translated)
    }
}

/// Providers occasionally wrap the reply in quotation marks.
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('「', '」')] {
        if s.len() >= 2 && s.starts_with(open) && s.ends_with(close) {
            return &s[open.len_utf8()..s.len() - close.len_utf8()];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::semantic::MockSemantic;
    use crate::storage::MemoryKv;

    #[test]
    fn english_detection() {
        assert!(is_english("Apple unveils new chip"));
        assert!(!is_english("苹果发布新芯片"));
        assert!(!is_english("Apple 发布新芯片"));
        assert!(!is_english("2024"));
    }

    #[test]
    fn quote_stripping() {
        assert_eq!(strip_quotes("\"译文\""), "译文");
        assert_eq!(strip_quotes("“译文”"), "译文");
        assert_eq!(strip_quotes("译文"), "译文");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[tokio::test]
    async fn translate_hits_cache_second_time() {
        let client = Arc::new(MockSemantic::replying("苹果发布新芯片"));
        let kv = Arc::new(MemoryKv::default());
        let translator = Translator::new(client.clone(), kv);

        let first = translator.translate("Apple unveils new chip").await.unwrap();
        assert_eq!(first, "苹果发布新芯片");
        let second = translator.translate("Apple unveils new chip").await.unwrap();
        assert_eq!(second, "苹果发布新芯片");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn prewarm_falls_back_to_original_on_failure() {
        let client = Arc::new(MockSemantic::failing("provider down"));
        let kv = Arc::new(MemoryKv::default());
        let translator = Translator::new(client, kv);

        let cache = translator
            .prewarm(&["Tesla halts production".to_string(), "国产大模型".to_string()])
            .await;
        assert_eq!(
            cache.get("Tesla halts production").map(String::as_str),
            Some("Tesla halts production")
        );
        assert!(!cache.contains_key("国产大模型"));
    }
}
