// src/storage.rs
//! Key-value persistence. The trait mirrors the narrow store the service
//! was built against (`get`/`put` with TTL); `MemoryKv` backs tests and
//! local runs, `FileKv` is the JSON-on-disk production default. `Storage`
//! wraps a store with the application's document conventions: today's
//! report snapshot, the rolling history window, push records, keyword
//! text, and the token-usage ledger.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock;
use crate::dedup::semantic::{ChatUsage, UsageSink};
use crate::history::{HistoryWindow, HISTORY_KEY};
use crate::types::{ReportInfo, ScoredItem};

const TTL_7D: Duration = Duration::from_secs(86_400 * 7);
const TTL_30D: Duration = Duration::from_secs(86_400 * 30);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
}

/// In-memory store with real TTL expiry. Used by tests and `--ephemeral`
/// local runs.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.inner.lock().expect("memory kv poisoned");
        match map.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                map.remove(key);
                Ok(None)
            }
            Some((v, _)) => Ok(Some(v.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expiry = ttl.map(|d| Instant::now() + d);
        self.inner
            .lock()
            .expect("memory kv poisoned")
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }
}

/// One JSON file per key under a data directory, with expiry metadata.
/// Writes go through a tmp file + rename so readers never see a torn
/// document.
pub struct FileKv {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct FileEntry {
    value: String,
    /// Epoch millis; absent means no expiry.
    expires_at: Option<i64>,
}

impl FileKv {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating kv dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys contain ':' and '-'; keep them readable but filesystem-safe.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let entry: FileEntry = serde_json::from_str(&raw)
            .with_context(|| format!("parsing kv entry {}", path.display()))?;
        if let Some(expiry) = entry.expires_at {
            if expiry <= Utc::now().timestamp_millis() {
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        }
        Ok(Some(entry.value))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = FileEntry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Utc::now().timestamp_millis() + d.as_millis() as i64),
        };
        let path = self.path_for(key);
        write_atomic(&path, &serde_json::to_string(&entry)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// Today's persisted report: grouped items plus generation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub matched: BTreeMap<String, Vec<ScoredItem>>,
    pub info: ReportInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRecord {
    pub pushed: bool,
    pub push_time: String,
    pub report_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: String,
    pub module: String,
    pub model: String,
    pub tokens: ChatUsage,
    #[serde(default)]
    pub extra: serde_json::Value,
}

pub struct Storage {
    kv: Arc<dyn KvStore>,
}

impl Storage {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        self.kv.clone()
    }

    // --- today's report snapshot ---

    pub async fn save_today_report(&self, snapshot: &ReportSnapshot) -> Result<()> {
        let key = format!("news:{}", clock::today_key());
        self.kv
            .put(&key, &serde_json::to_string(snapshot)?, Some(TTL_7D))
            .await
    }

    pub async fn get_today_report(&self) -> Option<ReportSnapshot> {
        let key = format!("news:{}", clock::today_key());
        match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(target: "storage", error = ?e, "report snapshot read failed");
                None
            }
        }
    }

    // --- rolling history window ---

    /// A failed read degrades to an empty window: nothing is a priori a
    /// duplicate, which only risks re-pushing, never dropping news.
    pub async fn get_history(&self) -> HistoryWindow {
        match self.kv.get(HISTORY_KEY).await {
            Ok(Some(raw)) => HistoryWindow::from_json(&raw),
            Ok(None) => {
                debug!(target: "storage", "no history yet");
                HistoryWindow::default()
            }
            Err(e) => {
                warn!(target: "storage", error = ?e, "history read failed, treating as empty");
                HistoryWindow::default()
            }
        }
    }

    /// Read-prune-append-write. Stored with a 30-day TTL while the
    /// application itself prunes to `window_days`.
    pub async fn save_history_titles(
        &self,
        titles: Vec<String>,
        window_days: i64,
    ) -> Result<()> {
        let now = clock::now_millis();
        let mut window = self.get_history().await;
        window.prune(now, window_days);
        let added = titles.len();
        window.append(now, titles);
        self.kv
            .put(HISTORY_KEY, &window.to_json(), Some(TTL_30D))
            .await?;
        debug!(
            target: "storage",
            added,
            entries = window.entry_count(),
            "history window saved"
        );
        Ok(())
    }

    // --- push records ---

    pub async fn save_push_record(&self, report_type: &str) -> Result<()> {
        let key = format!("push:{}", clock::today_key());
        let record = PushRecord {
            pushed: true,
            push_time: Utc::now().to_rfc3339(),
            report_type: report_type.to_string(),
        };
        self.kv
            .put(&key, &serde_json::to_string(&record)?, Some(TTL_7D))
            .await
    }

    pub async fn has_pushed_today(&self) -> bool {
        let key = format!("push:{}", clock::today_key());
        match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<PushRecord>(&raw)
                .map(|r| r.pushed)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Push records for the last `days` days, newest first, paired with
    /// their `YYYYMMDD` key.
    pub async fn push_records(&self, days: i64) -> Vec<(String, PushRecord)> {
        let mut out = Vec::new();
        let now = clock::report_now();
        for i in 0..days {
            let day = now - chrono::Duration::days(i);
            let date = clock::date_key(&day);
            if let Ok(Some(raw)) = self.kv.get(&format!("push:{date}")).await {
                if let Ok(record) = serde_json::from_str::<PushRecord>(&raw) {
                    out.push((date, record));
                }
            }
        }
        out
    }

    // --- keyword configuration ---

    pub async fn get_keywords(&self) -> String {
        match self.kv.get("keywords").await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            _ => DEFAULT_KEYWORDS.to_string(),
        }
    }

    pub async fn save_keywords(&self, text: &str) -> Result<()> {
        self.kv.put("keywords", text, None).await
    }

    // --- token-usage ledger ---

    pub async fn log_token_usage(
        &self,
        module: &str,
        model: &str,
        usage: &ChatUsage,
        extra: serde_json::Value,
    ) -> Result<()> {
        let key = format!("token_usage:{}", clock::today_key());
        let mut logs: Vec<UsageRecord> = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        };
        logs.push(UsageRecord {
            timestamp: Utc::now().to_rfc3339(),
            module: module.to_string(),
            model: model.to_string(),
            tokens: usage.clone(),
            extra,
        });
        self.kv
            .put(&key, &serde_json::to_string(&logs)?, Some(TTL_30D))
            .await
    }

    /// Per-day usage summaries for the last `days` days.
    pub async fn usage_logs(&self, days: i64) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        let now = clock::report_now();
        for i in 0..days {
            let date = clock::date_key(&(now - chrono::Duration::days(i)));
            let Ok(Some(raw)) = self.kv.get(&format!("token_usage:{date}")).await else {
                continue;
            };
            let Ok(records) = serde_json::from_str::<Vec<UsageRecord>>(&raw) else {
                continue;
            };
            let total: u64 = records.iter().map(|r| r.tokens.total_tokens as u64).sum();
            out.push(serde_json::json!({
                "date": date,
                "total_tokens": total,
                "count": records.len(),
                "records": records,
            }));
        }
        out
    }
}

#[async_trait]
impl UsageSink for Storage {
    async fn record_usage(
        &self,
        module: &str,
        model: &str,
        usage: &ChatUsage,
        extra: serde_json::Value,
    ) -> Result<()> {
        self.log_token_usage(module, model, usage, extra).await
    }
}

/// Default keyword text shipped with a fresh deployment; editable at
/// runtime through `/api/keywords`.
pub const DEFAULT_KEYWORDS: &str = "\
AI
人工智能
大模型
LLM
ChatGPT
OpenAI
Claude
Gemini
DeepSeek
@20

NVIDIA
英伟达
微软
谷歌
苹果
特斯拉
马斯克
@15

芯片
半导体
台积电
中芯国际
@12

机器人
人形机器人
自动驾驶
@12

+新能源
电动车
动力电池
比亚迪
@12

航空航天
火箭
SpaceX
星舰
!娱乐
!明星
@12
";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_kv_expires_values() {
        let kv = MemoryKv::default();
        kv.put("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);

        kv.put("forever", "v", None).await.unwrap();
        assert!(kv.get("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_kv_roundtrip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKv::new(dir.path()).unwrap();
        kv.put("news:20240101", "{\"x\":1}", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(
            kv.get("news:20240101").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );

        kv.put("gone", "v", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(kv.get("gone").await.unwrap(), None);
        assert_eq!(kv.get("never-written").await.unwrap(), None);
    }

    #[tokio::test]
    async fn history_save_appends_and_prunes() {
        let storage = Storage::new(Arc::new(MemoryKv::default()));
        storage
            .save_history_titles(vec!["one".into()], 7)
            .await
            .unwrap();
        storage
            .save_history_titles(vec!["two".into()], 7)
            .await
            .unwrap();

        let window = storage.get_history().await;
        let merged = window.merged_titles(clock::now_millis() + 1, 7, None);
        assert!(merged.contains("one"));
        assert!(merged.contains("two"));
    }

    #[tokio::test]
    async fn usage_ledger_appends_per_day() {
        let storage = Storage::new(Arc::new(MemoryKv::default()));
        let usage = ChatUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        };
        storage
            .log_token_usage("deduplicator", "m", &usage, serde_json::json!({}))
            .await
            .unwrap();
        storage
            .log_token_usage("translator", "m", &usage, serde_json::json!({}))
            .await
            .unwrap();

        let logs = storage.usage_logs(1).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["count"], 2);
        assert_eq!(logs[0]["total_tokens"], 240);
    }

    #[tokio::test]
    async fn keywords_default_until_saved() {
        let storage = Storage::new(Arc::new(MemoryKv::default()));
        assert!(storage.get_keywords().await.contains("人工智能"));
        storage.save_keywords("custom\n").await.unwrap();
        assert_eq!(storage.get_keywords().await, "custom\n");
    }
}
