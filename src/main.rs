// src/main.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trend_digest::api::{self, ApiState};
use trend_digest::pipeline::{ensure_metrics_described, AppContext};
use trend_digest::{scheduler, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trend_digest=info,warn")),
        )
        .init();

    let cfg = AppConfig::load()?;
    let bind_addr = cfg.bind_addr.clone();

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    ensure_metrics_described();

    let ctx = Arc::new(AppContext::from_config(cfg)?);
    info!(
        target: "main",
        report_mode = ctx.cfg.report_mode.as_str(),
        semantic = ctx.dedup.semantic_enabled(),
        channels = ?ctx.notifiers.channel_names(),
        "trend-digest starting"
    );

    if ctx.cfg.enable_crawler {
        scheduler::spawn(ctx.clone());
    }

    let app = api::router(ApiState {
        ctx,
        metrics: Some(metrics_handle),
    });
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(target: "main", %bind_addr, "listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
