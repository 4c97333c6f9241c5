// src/dedup/similarity.rs
//! Hybrid title similarity: 0.6 · Jaccard + 0.4 · edit-distance similarity,
//! with a provable upper-bound shortcut that skips the quadratic edit
//! distance whenever the combined score cannot reach the caller's threshold.

use std::collections::HashSet;

use super::text::PreparedTitle;

pub const JACCARD_WEIGHT: f64 = 0.6;
pub const EDIT_WEIGHT: f64 = 0.4;

/// Titles whose normalized lengths differ by more than this share of the
/// longer one cannot be near-duplicates under the hybrid metric; callers
/// skip the scorer entirely for such pairs.
pub const LENGTH_GAP_RATIO: f64 = 0.6;

/// Jaccard similarity of two token sets. 0 if either set is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (smaller, larger) = if a.len() < b.len() { (a, b) } else { (b, a) };
    let intersection = smaller.iter().filter(|t| larger.contains(*t)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Classical Levenshtein distance (insert/delete/substitute, unit cost)
/// with two rolling rows instead of the full matrix.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    // Roll over the shorter string to keep the rows small.
    if a.len() > b.len() {
        return levenshtein(b, a);
    }
    let (short, long) = (a, b);

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut cur: Vec<usize> = vec![0; short.len() + 1];

    for (j, &bc) in long.iter().enumerate() {
        cur[0] = j + 1;
        for (i, &ac) in short.iter().enumerate() {
            cur[i + 1] = if ac == bc {
                prev[i]
            } else {
                prev[i + 1].min(cur[i]).min(prev[i]) + 1
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[short.len()]
}

/// Cheap pre-check applied before [`hybrid`]: true when the length gap
/// alone rules the pair out.
pub fn length_gap_too_large(a: &PreparedTitle, b: &PreparedTitle) -> bool {
    let max_len = a.len().max(b.len());
    let gap = a.len().abs_diff(b.len());
    gap as f64 > max_len as f64 * LENGTH_GAP_RATIO
}

/// Combined similarity in [0, 1].
///
/// With a `threshold`, the scorer may return early after the Jaccard step:
/// `0.6·J + 0.4` bounds the combined score from above even if the edit
/// similarity were perfect, so when that bound is below the threshold the
/// (expensive) edit distance is provably irrelevant and the bound itself
/// is returned.
pub fn hybrid(a: &PreparedTitle, b: &PreparedTitle, threshold: Option<f64>) -> f64 {
    if a.normalized == b.normalized {
        return 1.0;
    }

    let j = jaccard(&a.tokens, &b.tokens);

    let upper = JACCARD_WEIGHT * j + EDIT_WEIGHT;
    if let Some(t) = threshold {
        if upper < t {
            return upper;
        }
    }

    let max_len = a.len().max(b.len());
    let edit_sim = if max_len == 0 {
        // Both empty normalizes to equal strings, handled by the fast path;
        // kept as a guard so the function stays total.
        0.0
    } else {
        1.0 - levenshtein(&a.chars, &b.chars) as f64 / max_len as f64
    };

    JACCARD_WEIGHT * j + EDIT_WEIGHT * edit_sim
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prep(s: &str) -> PreparedTitle {
        PreparedTitle::new(s)
    }

    #[test]
    fn identical_normalized_scores_one() {
        let a = prep("苹果发布iPhone16");
        let b = prep("苹果 发布 iPhone-16!");
        assert_eq!(hybrid(&a, &b, None), 1.0);
        assert_eq!(hybrid(&a, &b, Some(0.99)), 1.0);
    }

    #[test]
    fn hybrid_is_symmetric_and_bounded() {
        let pairs = [
            ("苹果发布iPhone16", "特斯拉涨停"),
            ("openai releases gpt5", "openai gpt5 is out"),
            ("a", ""),
        ];
        for (x, y) in pairs {
            let (a, b) = (prep(x), prep(y));
            let s1 = hybrid(&a, &b, None);
            let s2 = hybrid(&b, &a, None);
            assert!((s1 - s2).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&s1), "score {s1} out of range");
        }
    }

    #[test]
    fn levenshtein_basics() {
        let c = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(levenshtein(&c("kitten"), &c("sitting")), 3);
        assert_eq!(levenshtein(&c(""), &c("abc")), 3);
        assert_eq!(levenshtein(&c("同一个标题"), &c("同一个标题")), 0);
    }

    #[test]
    fn pruning_shortcut_never_hides_a_passing_score() {
        // Disjoint token sets: J = 0, upper bound 0.4 < 0.8 triggers the
        // shortcut; the fully computed score must also stay below 0.8.
        let a = prep("量子计算新突破");
        let b = prep("楼市成交回暖");
        let pruned = hybrid(&a, &b, Some(0.8));
        let full = hybrid(&a, &b, None);
        assert!(pruned < 0.8);
        assert!(full < 0.8);
        // And the shortcut returned the upper bound, which dominates the
        // true score.
        assert!(pruned >= full);
    }

    #[test]
    fn length_gap_prefilter() {
        let a = prep("短标题");
        let b = prep("这是一条长得多得多得多得多得多得多的标题啊");
        assert!(length_gap_too_large(&a, &b));
        let c = prep("这也是一条差不多长的标题");
        let d = prep("这同样是条差不多长的标题");
        assert!(!length_gap_too_large(&c, &d));
    }
}
