// src/notify.rs
//! Push channels. Every channel takes a rendered text report, splits it
//! into chunks its API will accept, and posts the chunks with a short
//! pause in between. `NotifierMux` fans one report out to every
//! configured channel and logs failures instead of propagating them.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

const CHUNK_INTERVAL: Duration = Duration::from_secs(3);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &'static str;
    /// Largest message body this channel accepts, in bytes.
    fn max_bytes(&self) -> usize;
    async fn send_chunk(&self, text: &str) -> Result<()>;
}

/// Split on line boundaries so no chunk exceeds `max_bytes`. A single
/// oversized line is sent alone rather than truncated.
pub fn split_message(text: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let needed = line.len() + if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current.len() + needed > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

async fn send_all(notifier: &dyn Notifier, text: &str) -> Result<()> {
    let chunks = split_message(text, notifier.max_bytes());
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(CHUNK_INTERVAL).await;
        }
        let body = if total > 1 {
            format!("{chunk}\n\n({}/{})", i + 1, total)
        } else {
            chunk.clone()
        };
        notifier.send_chunk(&body).await?;
    }
    info!(target: "notify", channel = notifier.name(), chunks = total, "report delivered");
    Ok(())
}

fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("trend-digest/0.1 (+github.com/trend-digest/trend-digest)")
        .timeout(Duration::from_secs(15))
        .build()
        .expect("reqwest client")
}

async fn post_json(
    http: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
    channel: &str,
) -> Result<()> {
    let resp = http
        .post(url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("{channel} webhook request failed"))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        bail!("{channel} webhook returned {status}: {text}");
    }
    Ok(())
}

pub struct Feishu {
    http: reqwest::Client,
    webhook_url: String,
}

impl Feishu {
    pub fn new(webhook_url: String) -> Self {
        Self {
            http: webhook_client(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for Feishu {
    fn name(&self) -> &'static str {
        "feishu"
    }

    fn max_bytes(&self) -> usize {
        30_000
    }

    async fn send_chunk(&self, text: &str) -> Result<()> {
        let body = json!({ "msg_type": "text", "content": { "text": text } });
        post_json(&self.http, &self.webhook_url, body, "feishu").await
    }
}

pub struct DingTalk {
    http: reqwest::Client,
    webhook_url: String,
}

impl DingTalk {
    pub fn new(webhook_url: String) -> Self {
        Self {
            http: webhook_client(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for DingTalk {
    fn name(&self) -> &'static str {
        "dingtalk"
    }

    fn max_bytes(&self) -> usize {
        20_000
    }

    async fn send_chunk(&self, text: &str) -> Result<()> {
        let body = json!({ "msgtype": "text", "text": { "content": text } });
        post_json(&self.http, &self.webhook_url, body, "dingtalk").await
    }
}

pub struct WeCom {
    http: reqwest::Client,
    webhook_url: String,
    markdown: bool,
}

impl WeCom {
    pub fn new(webhook_url: String, markdown: bool) -> Self {
        Self {
            http: webhook_client(),
            webhook_url,
            markdown,
        }
    }
}

#[async_trait]
impl Notifier for WeCom {
    fn name(&self) -> &'static str {
        "wecom"
    }

    fn max_bytes(&self) -> usize {
        4_000
    }

    async fn send_chunk(&self, text: &str) -> Result<()> {
        let body = if self.markdown {
            json!({ "msgtype": "markdown", "markdown": { "content": text } })
        } else {
            json!({ "msgtype": "text", "text": { "content": text } })
        };
        post_json(&self.http, &self.webhook_url, body, "wecom").await
    }
}

pub struct Telegram {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Telegram {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: webhook_client(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for Telegram {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_bytes(&self) -> usize {
        4_000
    }

    async fn send_chunk(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        post_json(&self.http, &url, body, "telegram").await
    }
}

/// Fan-out over every configured channel. One channel failing never
/// blocks the rest; the mux reports how many deliveries succeeded.
#[derive(Default)]
pub struct NotifierMux {
    channels: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn push(&mut self, notifier: Box<dyn Notifier>) {
        self.channels.push(notifier);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub async fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match send_all(channel.as_ref(), text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(target: "notify", channel = channel.name(), error = ?e, "delivery failed");
                }
            }
        }
        delivered
    }
}
