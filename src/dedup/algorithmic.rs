// src/dedup/algorithmic.rs
//! Pairwise dedup pass over the prepared batch. History matches reject a
//! batch item outright (already-delivered content is never replaced);
//! intra-batch matches keep whichever duplicate carries the higher weight,
//! in the slot of the first-accepted one.

use tracing::debug;

use super::text::PreparedTitle;
use super::{similarity, PreparedItem};

/// Reduce `batch` against `history` and against itself at `threshold`.
/// Output preserves first-seen batch order; a duplicate pair occupies one
/// output slot regardless of which member survives.
pub fn reduce(
    batch: Vec<PreparedItem>,
    history: &[PreparedTitle],
    threshold: f64,
) -> Vec<PreparedItem> {
    // Accepted items double as the "seen" list: replacement is an O(1)
    // in-place write at the matched index.
    let mut accepted: Vec<PreparedItem> = Vec::with_capacity(batch.len());

    'next_item: for candidate in batch {
        for hist in history {
            if similarity::length_gap_too_large(&candidate.text, hist) {
                continue;
            }
            let sim = similarity::hybrid(&candidate.text, hist, Some(threshold));
            if sim > threshold {
                debug!(
                    target: "dedup",
                    sim = format!("{sim:.2}"),
                    title = %candidate.text.title,
                    matched = %hist.title,
                    "dropped: near-duplicate of history"
                );
                continue 'next_item;
            }
        }

        for i in 0..accepted.len() {
            if similarity::length_gap_too_large(&candidate.text, &accepted[i].text) {
                continue;
            }
            let sim = similarity::hybrid(&candidate.text, &accepted[i].text, Some(threshold));
            if sim > threshold {
                if candidate.item.weight > accepted[i].item.weight {
                    debug!(
                        target: "dedup",
                        sim = format!("{sim:.2}"),
                        kept = %candidate.text.title,
                        replaced = %accepted[i].text.title,
                        "replaced lighter duplicate"
                    );
                    accepted[i] = candidate;
                } else {
                    debug!(
                        target: "dedup",
                        sim = format!("{sim:.2}"),
                        dropped = %candidate.text.title,
                        kept = %accepted[i].text.title,
                        "dropped lighter duplicate"
                    );
                }
                continue 'next_item;
            }
        }

        accepted.push(candidate);
    }

    accepted
}
