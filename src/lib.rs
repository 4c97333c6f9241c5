// src/lib.rs
//! trend-digest: crawls ranked news feeds, scores and groups headlines
//! by keyword, removes duplicates with a layered algorithmic-plus-LLM
//! pipeline, and pushes a digest to chat channels.

pub mod api;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod history;
pub mod holiday;
pub mod keywords;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod translate;
pub mod types;

pub use config::{AppConfig, ReportMode};
pub use dedup::{DedupConfig, Deduplicator};
pub use pipeline::{run_cycle, AppContext, CycleOutcome};
pub use types::{RawItem, ReportInfo, ScoredItem};
