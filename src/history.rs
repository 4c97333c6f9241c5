// src/history.rs
//! Rolling window of already-delivered titles. Each save appends a new
//! timestamp-keyed entry and prunes expired ones; entries are never
//! mutated, and reads union every entry inside the window. Stored as one
//! JSON document (epoch-millis string → title list), matching the
//! key-value layout the worker fleet already uses.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock;

pub const HISTORY_KEY: &str = "history_titles_7days";
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryWindow {
    /// Epoch millis (stringified, JSON object keys) → titles saved then.
    entries: BTreeMap<String, Vec<String>>,
}

impl HistoryWindow {
    /// Parse the stored document; malformed data degrades to an empty
    /// window (nothing is a priori duplicate).
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(w) => w,
            Err(e) => {
                warn!(target: "history", error = %e, "history document unparseable, starting empty");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop entries older than `window_days` before `now_ms`.
    pub fn prune(&mut self, now_ms: i64, window_days: i64) {
        let cutoff = now_ms - window_days * DAY_MS;
        self.entries
            .retain(|ts, _| ts.parse::<i64>().map(|t| t > cutoff).unwrap_or(false));
    }

    /// Append one save keyed by `now_ms`. Two saves landing on the same
    /// millisecond merge rather than overwrite.
    pub fn append(&mut self, now_ms: i64, titles: Vec<String>) {
        self.entries
            .entry(now_ms.to_string())
            .or_default()
            .extend(titles);
    }

    /// Union of all titles within the window. `exclude_day` skips entries
    /// whose report-timezone date key matches (used to ignore "today"
    /// when re-rendering the current day).
    pub fn merged_titles(
        &self,
        now_ms: i64,
        window_days: i64,
        exclude_day: Option<&str>,
    ) -> HashSet<String> {
        let cutoff = now_ms - window_days * DAY_MS;
        let mut all = HashSet::new();

        for (ts, titles) in &self.entries {
            let Ok(t) = ts.parse::<i64>() else { continue };
            if t <= cutoff {
                continue;
            }
            if let Some(day) = exclude_day {
                if clock::date_key_of_millis(t).as_deref() == Some(day) {
                    continue;
                }
            }
            for title in titles {
                all.insert(title.clone());
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_across_entries_not_replacement() {
        let mut w = HistoryWindow::default();
        let now = 10 * DAY_MS;
        w.append(now - DAY_MS, vec!["a".into(), "b".into()]);
        w.append(now, vec!["b".into(), "c".into()]);

        let merged = w.merged_titles(now, DEFAULT_WINDOW_DAYS, None);
        assert_eq!(merged.len(), 3);
        assert!(merged.contains("a") && merged.contains("b") && merged.contains("c"));
    }

    #[test]
    fn prune_and_read_honor_the_window() {
        let mut w = HistoryWindow::default();
        let now = 100 * DAY_MS;
        w.append(now - 8 * DAY_MS, vec!["old".into()]);
        w.append(now - 1, vec!["fresh".into()]);

        let merged = w.merged_titles(now, 7, None);
        assert!(!merged.contains("old"));
        assert!(merged.contains("fresh"));

        w.prune(now, 7);
        assert_eq!(w.entry_count(), 1);
    }

    #[test]
    fn roundtrips_through_json() {
        let mut w = HistoryWindow::default();
        w.append(123, vec!["标题".into()]);
        let back = HistoryWindow::from_json(&w.to_json());
        assert_eq!(back.entry_count(), 1);
        assert!(back.merged_titles(124, 7, None).contains("标题"));
    }

    #[test]
    fn malformed_json_degrades_to_empty() {
        let w = HistoryWindow::from_json("not json at all");
        assert_eq!(w.entry_count(), 0);
    }
}
