// src/holiday.rs
//! Rest-day detection. Weekday pushes always go out; weekend and
//! statutory-holiday mornings are restricted to a few fixed hours so
//! the channels stay quiet. The calendar API answer is cached for a
//! day, and any failure falls back to the plain weekend check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Datelike;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clock;
use crate::storage::KvStore;

const CACHE_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    error_code: i64,
    #[serde(default)]
    result: Option<CalendarResult>,
}

#[derive(Debug, Deserialize)]
struct CalendarResult {
    /// "1" rest day, "2" statutory holiday, anything else a workday.
    status: Option<String>,
}

pub struct HolidayGate {
    http: reqwest::Client,
    kv: Arc<dyn KvStore>,
    api_key: Option<String>,
    push_hours: Vec<u32>,
}

impl HolidayGate {
    pub fn new(kv: Arc<dyn KvStore>, api_key: Option<String>, push_hours: Vec<u32>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("trend-digest/0.1 (+github.com/trend-digest/trend-digest)")
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            kv,
            api_key,
            push_hours,
        }
    }

    /// Whether a scheduled (non-forced) push may go out right now.
    pub async fn allows_push_now(&self) -> bool {
        let now = clock::report_now();
        if !self.is_rest_day(&now).await {
            return true;
        }
        let hour = chrono::Timelike::hour(&now);
        let allowed = self.push_hours.contains(&hour);
        debug!(target: "holiday", hour, allowed, "rest day push gate");
        allowed
    }

    async fn is_rest_day(&self, now: &chrono::DateTime<chrono::FixedOffset>) -> bool {
        let date = now.format("%Y-%m-%d").to_string();
        let weekend = matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);

        let Some(key) = &self.api_key else {
            return weekend;
        };

        let cache_key = format!("holiday:{date}");
        if let Ok(Some(cached)) = self.kv.get(&cache_key).await {
            return cached == "1";
        }

        match self.query_calendar(&date, key).await {
            Ok(rest) => {
                let stored = if rest { "1" } else { "0" };
                if let Err(e) = self.kv.put(&cache_key, stored, Some(CACHE_TTL)).await {
                    warn!(target: "holiday", error = ?e, "calendar cache write failed");
                }
                rest
            }
            Err(e) => {
                warn!(target: "holiday", error = ?e, "calendar lookup failed, using weekday fallback");
                weekend
            }
        }
    }

    async fn query_calendar(&self, date: &str, api_key: &str) -> Result<bool> {
        let url = format!(
            "http://v.juhe.cn/calendar/day?date={date}&key={api_key}"
        );
        let body: CalendarResponse = self
            .http
            .get(&url)
            .send()
            .await
            .context("calendar request failed")?
            .json()
            .await
            .context("calendar body was not valid JSON")?;
        if body.error_code != 0 {
            bail!("calendar API error_code {}", body.error_code);
        }
        let status = body
            .result
            .and_then(|r| r.status)
            .unwrap_or_default();
        Ok(status == "1" || status == "2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    #[test]
    fn calendar_response_parses_rest_status() {
        let raw = r#"{"error_code":0,"result":{"status":"2"}}"#;
        let body: CalendarResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.error_code, 0);
        assert_eq!(body.result.unwrap().status.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn cached_verdict_short_circuits_the_api() {
        let kv = Arc::new(MemoryKv::default());
        let now = clock::report_now();
        let date = now.format("%Y-%m-%d").to_string();
        kv.put(&format!("holiday:{date}"), "1", None).await.unwrap();

        // Rest day with an empty allowed-hours list means no push at any hour.
        let gate = HolidayGate::new(kv, Some("key".into()), vec![]);
        assert!(!gate.allows_push_now().await);
    }

    #[tokio::test]
    async fn no_api_key_falls_back_to_weekday_check() {
        let kv = Arc::new(MemoryKv::default());
        let gate = HolidayGate::new(kv, None, vec![10, 12, 16, 20]);
        let now = clock::report_now();
        let weekend = matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
        let rest = gate.is_rest_day(&now).await;
        assert_eq!(rest, weekend);
    }
}
