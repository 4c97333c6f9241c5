// src/config.rs
//! Runtime configuration. A `config/digest.toml` file (optional) sets
//! the durable knobs; environment variables carry the secrets and
//! deployment-specific overrides on top.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dedup::DedupConfig;
use crate::fetch::Platform;
use crate::process::{ProcessOptions, WeightConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Everything matched today.
    Daily,
    /// This cycle's matches only.
    Current,
    /// This cycle's matches minus what the history window already saw.
    Incremental,
}

impl ReportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportMode::Daily => "daily",
            ReportMode::Current => "current",
            ReportMode::Incremental => "incremental",
        }
    }
}

fn default_report_mode() -> ReportMode {
    ReportMode::Daily
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_feed_base_url() -> String {
    "https://newsnow.busiyi.world/api/s".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_platforms() -> Vec<Platform> {
    [
        ("toutiao", "今日头条"),
        ("baidu", "百度热搜"),
        ("wallstreetcn-hot", "华尔街见闻"),
        ("thepaper", "澎湃新闻"),
        ("cls-hot", "财联社热门"),
        ("ithome", "IT之家"),
        ("zhihu", "知乎"),
    ]
    .into_iter()
    .map(|(id, name)| Platform {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_crawl_interval_minutes() -> u64 {
    30
}

fn default_request_gap_ms() -> u64 {
    1000
}

fn default_holiday_push_hours() -> Vec<u32> {
    vec![10, 12, 16, 20]
}

fn default_llm_endpoint() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

fn default_window_days() -> i64 {
    crate::history::DEFAULT_WINDOW_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    /// Secret; only ever read from the environment.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    #[serde(skip_serializing)]
    pub feishu_webhook_url: Option<String>,
    #[serde(skip_serializing)]
    pub dingtalk_webhook_url: Option<String>,
    #[serde(skip_serializing)]
    pub wework_webhook_url: Option<String>,
    pub wework_markdown: bool,
    #[serde(skip_serializing)]
    pub telegram_bot_token: Option<String>,
    #[serde(skip_serializing)]
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub report_mode: ReportMode,
    pub bind_addr: String,
    pub feed_base_url: String,
    pub data_dir: String,
    /// In-memory KV instead of the data dir; state is lost on restart.
    pub ephemeral: bool,
    pub platforms: Vec<Platform>,
    pub enable_crawler: bool,
    pub enable_notification: bool,
    pub crawl_interval_minutes: u64,
    pub request_gap_ms: u64,
    pub history_window_days: i64,
    pub holiday_push_hours: Vec<u32>,
    #[serde(skip_serializing, default)]
    pub holiday_api_key: Option<String>,
    pub llm: LlmConfig,
    pub channels: ChannelConfig,
    pub dedup: DedupConfig,
    pub weights: WeightConfig,
    pub process: ProcessOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            report_mode: default_report_mode(),
            bind_addr: default_bind_addr(),
            feed_base_url: default_feed_base_url(),
            data_dir: default_data_dir(),
            ephemeral: false,
            platforms: default_platforms(),
            enable_crawler: default_true(),
            enable_notification: default_true(),
            crawl_interval_minutes: default_crawl_interval_minutes(),
            request_gap_ms: default_request_gap_ms(),
            history_window_days: default_window_days(),
            holiday_push_hours: default_holiday_push_hours(),
            holiday_api_key: None,
            llm: LlmConfig::default(),
            channels: ChannelConfig::default(),
            dedup: DedupConfig::default(),
            weights: WeightConfig::default(),
            process: ProcessOptions::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file if present, then the environment.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::fs::read_to_string(Path::new("config/digest.toml")) {
            Ok(raw) => {
                let cfg: AppConfig =
                    toml::from_str(&raw).context("parsing config/digest.toml")?;
                info!(target: "config", "loaded config/digest.toml");
                cfg
            }
            Err(_) => {
                debug!(target: "config", "no config file, using defaults");
                AppConfig::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(mode) = std::env::var("REPORT_MODE") {
            match mode.to_lowercase().as_str() {
                "daily" => self.report_mode = ReportMode::Daily,
                "current" => self.report_mode = ReportMode::Current,
                "incremental" => self.report_mode = ReportMode::Incremental,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("FEED_BASE_URL") {
            self.feed_base_url = v;
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = std::env::var("ENABLE_CRAWLER") {
            self.enable_crawler = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("ENABLE_NOTIFICATION") {
            self.enable_notification = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            if !v.trim().is_empty() {
                self.llm.api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("HOLIDAY_API_KEY") {
            if !v.trim().is_empty() {
                self.holiday_api_key = Some(v);
            }
        }
        for (var, slot) in [
            ("FEISHU_WEBHOOK_URL", &mut self.channels.feishu_webhook_url),
            ("DINGTALK_WEBHOOK_URL", &mut self.channels.dingtalk_webhook_url),
            ("WEWORK_WEBHOOK_URL", &mut self.channels.wework_webhook_url),
            ("TELEGRAM_BOT_TOKEN", &mut self.channels.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &mut self.channels.telegram_chat_id),
        ] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    *slot = Some(v);
                }
            }
        }
    }

    pub fn request_gap(&self) -> Duration {
        Duration::from_millis(self.request_gap_ms)
    }

    pub fn semantic_enabled(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Redacted view for the config API: secrets are serde-skipped, and
    /// we surface which ones are present as booleans.
    pub fn safe_view(&self) -> serde_json::Value {
        let mut view = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = view.as_object_mut() {
            obj.insert(
                "llm_configured".to_string(),
                serde_json::Value::Bool(self.semantic_enabled()),
            );
            obj.insert(
                "holiday_api_configured".to_string(),
                serde_json::Value::Bool(self.holiday_api_key.is_some()),
            );
            let channels = serde_json::json!({
                "feishu": self.channels.feishu_webhook_url.is_some(),
                "dingtalk": self.channels.dingtalk_webhook_url.is_some(),
                "wework": self.channels.wework_webhook_url.is_some(),
                "telegram": self.channels.telegram_bot_token.is_some()
                    && self.channels.telegram_chat_id.is_some(),
            });
            obj.insert("channels_configured".to_string(), channels);
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sound() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.report_mode, ReportMode::Daily);
        assert!(!cfg.platforms.is_empty());
        assert!(!cfg.semantic_enabled());
        assert_eq!(cfg.history_window_days, 7);
    }

    #[test]
    fn toml_overlay_parses_partial_files() {
        let raw = r#"
            report_mode = "incremental"
            crawl_interval_minutes = 15

            [dedup]
            strict_threshold = 0.85
        "#;
        let cfg: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.report_mode, ReportMode::Incremental);
        assert_eq!(cfg.crawl_interval_minutes, 15);
        assert!((cfg.dedup.strict_threshold - 0.85).abs() < 1e-9);
        // untouched fields keep their defaults
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn safe_view_never_leaks_secrets() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key = Some("sk-secret".to_string());
        cfg.channels.telegram_bot_token = Some("123:abc".to_string());
        let view = cfg.safe_view();
        let text = view.to_string();
        assert!(!text.contains("sk-secret"));
        assert!(!text.contains("123:abc"));
        assert_eq!(view["llm_configured"], true);
    }
}
