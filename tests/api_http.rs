// tests/api_http.rs
//! Router-level tests using an in-memory store and no live scheduler.

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use tower::util::ServiceExt;

use trend_digest::api::{router, ApiState};
use trend_digest::pipeline::AppContext;
use trend_digest::storage::MemoryKv;
use trend_digest::AppConfig;

fn test_state() -> ApiState {
    let mut cfg = AppConfig::default();
    cfg.enable_crawler = false;
    cfg.enable_notification = false;
    let ctx = AppContext::with_kv(cfg, Arc::new(MemoryKv::default()));
    ApiState {
        ctx: Arc::new(ctx),
        metrics: None,
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn index_reports_service_shape() {
    let app = router(test_state());
    let resp = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["service"], "trend-digest");
    assert_eq!(json["semantic_dedup"], false);
}

#[tokio::test]
async fn healthz_is_plain_ok() {
    let app = router(test_state());
    let resp = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn keywords_roundtrip_through_the_api() {
    let state = test_state();

    let resp = router(state.clone())
        .oneshot(
            Request::post("/api/keywords")
                .body(Body::from("AI\n大模型\n@5\n\n芯片\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["groups"], 2);

    let resp = router(state)
        .oneshot(Request::get("/api/keywords").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("大模型"));
}

#[tokio::test]
async fn config_view_is_redacted() {
    let resp = router(test_state())
        .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["llm_configured"], false);
    assert!(json.get("llm").map(|l| l.get("api_key").is_none()).unwrap_or(true));
}

#[tokio::test]
async fn push_without_a_report_is_not_found() {
    let resp = router(test_state())
        .oneshot(Request::post("/api/push").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_reports_absence() {
    let resp = router(test_state())
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logs_endpoint_returns_empty_ledgers() {
    let resp = router(test_state())
        .oneshot(Request::get("/api/logs?days=3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["days"], 3);
    assert_eq!(json["token_usage"].as_array().unwrap().len(), 0);
}
