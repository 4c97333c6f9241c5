// src/scheduler.rs
//! Fixed-interval driver for the pipeline. One task, one interval; a
//! cycle that errors is logged and the loop keeps its cadence.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::{run_cycle, AppContext};

pub fn spawn(ctx: Arc<AppContext>) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.cfg.crawl_interval_minutes * 60);
    info!(
        target: "scheduler",
        interval_minutes = ctx.cfg.crawl_interval_minutes,
        "scheduler started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_cycle(&ctx, false).await {
                Ok(outcome) => {
                    if let Some(reason) = &outcome.skipped {
                        info!(target: "scheduler", %reason, "scheduled cycle skipped");
                    }
                }
                Err(e) => {
                    counter!("cycle_errors_total").increment(1);
                    error!(target: "scheduler", error = ?e, "scheduled cycle failed");
                }
            }
        }
    })
}
