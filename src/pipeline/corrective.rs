//! Word-level Jaccard similarity, used to decide whether a final-STT result
//! diverges enough from the committed partial to warrant a corrective LLM
//! restart (spec §4.7, §8 "Round-trip / idempotence").

use std::collections::HashSet;

/// Word-level Jaccard similarity between two strings: `|A ∩ B| / |A ∪ B|`
/// over lowercased whitespace-split tokens. Two empty strings are
/// considered identical (`1.0`); one empty and one non-empty are
/// completely dissimilar (`0.0`).
#[must_use]
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Spec §4.7: restart the LLM turn when the final-STT result diverges
/// from the committed partial by word-Jaccard below this threshold.
pub const CORRECTIVE_RESTART_THRESHOLD: f64 = 0.7;
