// src/dedup/semantic.rs
//! Final reduce-to-unique pass delegated to an LLM classifier. The request
//! carries two numbered manifests (candidates + history context) and the
//! response contract is a JSON object with a `remove_ids` array. Anything
//! that does not satisfy that contract is a hard failure of this stage;
//! the pipeline falls back to the algorithmic output, never to a silently
//! partial removal set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ScoredItem;

/// Token counts as reported by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One completed chat round trip.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model: String,
    pub usage: Option<ChatUsage>,
}

/// Chat-style provider seam. Production uses [`ChatCompletionsClient`];
/// tests swap in [`MockSemantic`].
#[async_trait]
pub trait SemanticClient: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutcome>;
    fn name(&self) -> &'static str;
}

/// Cost/usage ledger seam. Writing a record must never fail the dedup
/// operation; implementors get best-effort semantics.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_usage(
        &self,
        module: &str,
        model: &str,
        usage: &ChatUsage,
        extra: serde_json::Value,
    ) -> Result<()>;
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("trend-digest/0.1 (+github.com/trend-digest/trend-digest)")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SemanticClient for ChatCompletionsClient {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutcome> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            stream: bool,
            response_format: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            model: String,
            #[serde(default)]
            usage: Option<ChatUsage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.1,
            stream: false,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("classifier request")?
            .error_for_status()
            .context("classifier non-2xx")?;

        let body: Resp = resp.json().await.context("classifier response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            bail!("classifier returned no content");
        }
        let model = if body.model.is_empty() {
            self.model.clone()
        } else {
            body.model
        };
        Ok(ChatOutcome {
            content,
            model,
            usage: body.usage,
        })
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

/// Deterministic stand-in for tests and local runs: replies with a fixed
/// body and counts invocations.
pub struct MockSemantic {
    pub reply: std::sync::Mutex<Result<String, String>>,
    pub calls: std::sync::atomic::AtomicUsize,
}

impl MockSemantic {
    pub fn replying(body: &str) -> Self {
        Self {
            reply: std::sync::Mutex::new(Ok(body.to_string())),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: std::sync::Mutex::new(Err(message.to_string())),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticClient for MockSemantic {
    async fn chat(&self, _system: &str, _user: &str) -> Result<ChatOutcome> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &*self.reply.lock().expect("mock reply lock") {
            Ok(body) => Ok(ChatOutcome {
                content: body.clone(),
                model: "mock".to_string(),
                usage: Some(ChatUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            }),
            Err(msg) => bail!("{msg}"),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

const SYSTEM_PROMPT: &str = "You are a news deduplication assistant that outputs JSON only. \
You judge how stories evolve, how specific each report is, and whether a candidate is \
redundant against history, keeping the news stream unique and high quality.";

/// Runs the classifier over flagged candidates and removes the ids it
/// names. Output is the input minus removed ids, in input order.
pub struct SemanticDeduplicator {
    client: Arc<dyn SemanticClient>,
    ledger: Option<Arc<dyn UsageSink>>,
}

impl SemanticDeduplicator {
    pub fn new(client: Arc<dyn SemanticClient>) -> Self {
        Self {
            client,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn UsageSink>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.name()
    }

    pub async fn resolve(
        &self,
        items: Vec<ScoredItem>,
        history_titles: &[String],
    ) -> Result<Vec<ScoredItem>> {
        #[derive(Serialize)]
        struct Candidate<'a> {
            id: usize,
            title: &'a str,
            source: &'a str,
        }
        #[derive(Serialize)]
        struct HistoryRef {
            id: String,
            title: String,
        }

        let candidates: Vec<Candidate> = items
            .iter()
            .enumerate()
            .map(|(id, it)| Candidate {
                id,
                title: &it.title,
                source: &it.source,
            })
            .collect();
        let context: Vec<HistoryRef> = history_titles
            .iter()
            .enumerate()
            .map(|(i, t)| HistoryRef {
                id: format!("h_{i}"),
                title: t.clone(),
            })
            .collect();

        let prompt = format!(
            r#"### Task
You are a news data-cleaning expert. Analyze the CANDIDATE LIST and, using the
HISTORY LIST as reference, identify entries that are duplicated, redundant, or stale.

### Removal criteria
1. Full semantic duplication: same event, same subject, same time, even across
   paraphrase or translation.
2. Subsumption: when two entries describe one event, keep the one with more
   detail (numbers, named actors, direct causality) and remove the vaguer one.
3. History redundancy: a candidate already covered by the HISTORY LIST is
   redundant, unless it reports a materially new development of that story
   (e.g. "rocket launched" vs "rocket landed successfully" are distinct).
4. Roundup vs single item: when a digest entry and its constituent single
   stories both appear, keep whichever is more important.

### Output format
Return pure JSON only:
{{
  "remove_ids": [id1, id2, ...],
  "analysis": "brief reasoning (optional)"
}}

### Input
HISTORY LIST (reference only, never remove from here):
{history}

CANDIDATE LIST (remove ids from here):
{targets}
"#,
            history = serde_json::to_string(&context)?,
            targets = serde_json::to_string(&candidates)?,
        );

        debug!(
            target: "dedup",
            provider = self.client.name(),
            candidates = items.len(),
            history = history_titles.len(),
            prompt_chars = prompt.len(),
            "issuing semantic dedup request"
        );

        let outcome = self.client.chat(SYSTEM_PROMPT, &prompt).await?;

        if let (Some(ledger), Some(usage)) = (&self.ledger, &outcome.usage) {
            let extra = serde_json::json!({
                "item_count": items.len(),
                "history_count": history_titles.len(),
            });
            if let Err(e) = ledger
                .record_usage("deduplicator", &outcome.model, usage, extra)
                .await
            {
                warn!(target: "dedup", error = ?e, "token usage ledger write failed");
            }
        }

        let remove: HashSet<usize> = parse_remove_ids(&outcome.content)?;
        debug!(target: "dedup", remove = ?remove, "classifier removals");

        Ok(items
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !remove.contains(i))
            .map(|(_, it)| it)
            .collect())
    }
}

/// Strict contract parse. Accepts `{"remove_ids": [..]}` or a bare JSON
/// array; anything else (including a non-array `remove_ids`) is an error,
/// logged distinctly because it usually means prompt/contract drift.
fn parse_remove_ids(content: &str) -> Result<HashSet<usize>> {
    let value: serde_json::Value = serde_json::from_str(content).map_err(|e| {
        warn!(target: "dedup", body = content, "classifier reply is not JSON");
        anyhow::anyhow!("classifier reply parse error: {e}")
    })?;

    let ids = match &value {
        serde_json::Value::Array(arr) => arr,
        serde_json::Value::Object(obj) => match obj.get("remove_ids") {
            Some(serde_json::Value::Array(arr)) => arr,
            _ => {
                warn!(target: "dedup", body = content, "classifier reply violates remove_ids contract");
                bail!("classifier reply lacks a remove_ids array");
            }
        },
        _ => {
            warn!(target: "dedup", body = content, "classifier reply violates remove_ids contract");
            bail!("classifier reply is neither object nor array");
        }
    };

    Ok(ids
        .iter()
        .filter_map(|v| v.as_u64().map(|n| n as usize))
        .collect())
}
