// src/api.rs
//! HTTP surface: manual triggers, keyword management, config and usage
//! introspection, Prometheus metrics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::pipeline::{run_cycle, AppContext};
use crate::report;
use crate::translate::TranslationCache;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<AppContext>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/crawl", get(crawl).post(crawl))
        .route("/api/push", post(push_today))
        .route("/api/keywords", get(get_keywords).post(set_keywords))
        .route("/api/config", get(get_config))
        .route("/api/logs", get(get_logs))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn index(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "trend-digest",
        "version": env!("CARGO_PKG_VERSION"),
        "report_mode": state.ctx.cfg.report_mode.as_str(),
        "semantic_dedup": state.ctx.dedup.semantic_enabled(),
        "channels": state.ctx.notifiers.channel_names(),
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CrawlParams {
    #[serde(default)]
    force: Option<String>,
}

async fn crawl(
    State(state): State<ApiState>,
    Query(params): Query<CrawlParams>,
) -> impl IntoResponse {
    let force = matches!(params.force.as_deref(), Some("1") | Some("true"));
    match run_cycle(&state.ctx, force).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            warn!(target: "api", error = ?e, "manual crawl failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Re-deliver today's stored report without re-crawling.
async fn push_today(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(snapshot) = state.ctx.storage.get_today_report().await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no report generated today" })),
        );
    };
    if state.ctx.notifiers.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no push channel configured" })),
        );
    }
    let items = report::flatten(&snapshot.matched);
    let text = report::render_text(&items, &snapshot.info, &TranslationCache::new());
    let delivered = state.ctx.notifiers.broadcast(&text).await;
    (
        StatusCode::OK,
        Json(json!({ "items": items.len(), "channels_delivered": delivered })),
    )
}

async fn get_keywords(State(state): State<ApiState>) -> impl IntoResponse {
    let text = state.ctx.storage.get_keywords().await;
    ([("content-type", "text/plain; charset=utf-8")], text)
}

async fn set_keywords(State(state): State<ApiState>, body: String) -> impl IntoResponse {
    let group_count = crate::keywords::parse(&body).groups.len();
    match state.ctx.storage.save_keywords(&body).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "groups": group_count }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn get_config(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(state.ctx.cfg.safe_view())
}

#[derive(Deserialize)]
struct LogParams {
    #[serde(default = "default_log_days")]
    days: i64,
}

fn default_log_days() -> i64 {
    7
}

async fn get_logs(
    State(state): State<ApiState>,
    Query(params): Query<LogParams>,
) -> Json<serde_json::Value> {
    let days = params.days.clamp(1, 30);
    let usage = state.ctx.storage.usage_logs(days).await;
    let pushes = state.ctx.storage.push_records(days).await;
    Json(json!({
        "days": days,
        "token_usage": usage,
        "pushes": pushes
            .into_iter()
            .map(|(date, record)| json!({ "date": date, "record": record }))
            .collect::<Vec<_>>(),
    }))
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::from("metrics disabled\n")),
    }
}
