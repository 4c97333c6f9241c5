// src/types.rs
use serde::{Deserialize, Serialize};

/// One title as observed on a single source within one crawl cycle.
/// `ranks` accumulates every 1-based list position the title appeared at;
/// the struct is immutable once the cycle's aggregation is done.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub mobile_url: String,
    pub ranks: Vec<u32>,
}

/// A scored, push-ready news item. `weight` is a derived snapshot computed
/// once by the scoring stage and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
    pub title: String,
    /// Display name of the source, e.g. "Hacker News".
    pub source: String,
    pub source_id: String,
    pub ranks: Vec<u32>,
    pub url: String,
    #[serde(default)]
    pub mobile_url: String,
    pub weight: f64,
    pub first_rank: u32,
    pub count: usize,
}

impl ScoredItem {
    /// Minimal constructor used by tests and ad-hoc callers: everything
    /// derived from a bare title, with an explicit weight.
    pub fn from_title(title: &str, weight: f64) -> Self {
        Self {
            title: title.to_string(),
            source: String::new(),
            source_id: String::new(),
            ranks: vec![1],
            url: String::new(),
            mobile_url: String::new(),
            weight,
            first_rank: 1,
            count: 1,
        }
    }
}

/// Metadata attached to one generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInfo {
    pub report_mode: String,
    pub total_news: usize,
    pub hot_news: usize,
    pub generated_date: String,
    pub generated_time: String,
}
