//! Partial transcript merge (spec §4.1).
//!
//! The whole audio buffer is resent on every partial-STT call, so successive
//! results largely overlap. `merge` stitches them into one running
//! transcript instead of naively concatenating duplicated words.

/// Maximum number of trailing/leading words considered when looking for an
/// overlap between the previous and the fresh transcript.
const MAX_OVERLAP_WORDS: usize = 5;

/// Merge a fresh partial-STT result into the running transcript.
///
/// Finds the longest suffix of `old` (up to [`MAX_OVERLAP_WORDS`] words)
/// that is a prefix of `new`; if found, returns `old` followed by whatever
/// of `new` comes after that overlap. Otherwise returns `old` and `new`
/// joined with a single space.
#[must_use]
pub fn merge(old: &str, new: &str) -> String {
    let old_trimmed = old.trim();
    let new_trimmed = new.trim();

    if new_trimmed.is_empty() {
        return old_trimmed.to_owned();
    }
    if old_trimmed.is_empty() {
        return new_trimmed.to_owned();
    }
    if old_trimmed == new_trimmed {
        return old_trimmed.to_owned();
    }

    let old_words: Vec<&str> = old_trimmed.split_whitespace().collect();
    let new_words: Vec<&str> = new_trimmed.split_whitespace().collect();

    let max_k = MAX_OVERLAP_WORDS.min(old_words.len()).min(new_words.len());
    for k in (1..=max_k).rev() {
        let old_suffix = &old_words[old_words.len() - k..];
        let new_prefix = &new_words[..k];
        if old_suffix == new_prefix {
            let remainder = new_words[k..].join(" ");
            if remainder.is_empty() {
                return old_trimmed.to_owned();
            }
            return format!("{old_trimmed} {remainder}");
        }
    }

    format!("{old_trimmed} {new_trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_with_empty_new_keeps_old() {
        assert_eq!(merge("bir kola lütfen", ""), "bir kola lütfen");
        assert_eq!(merge("bir kola lütfen", "   "), "bir kola lütfen");
    }

    #[test]
    fn merge_with_empty_old_takes_new() {
        assert_eq!(merge("", "iki pizza"), "iki pizza");
    }

    #[test]
    fn merge_identical_strings_is_idempotent() {
        assert_eq!(merge("iki pizza lütfen", "iki pizza lütfen"), "iki pizza lütfen");
    }

    #[test]
    fn merge_extends_with_overlap() {
        // "iki pizza" resent plus newly spoken "lütfen".
        let merged = merge("iki pizza", "pizza lütfen");
        assert_eq!(merged, "iki pizza lütfen");
    }

    #[test]
    fn merge_without_overlap_concatenates_with_space() {
        let merged = merge("iki pizza", "bir kola");
        assert_eq!(merged, "iki pizza bir kola");
    }

    #[test]
    fn merge_overlap_capped_at_five_words() {
        let old = "bir iki üç dört beş altı";
        let new = "iki üç dört beş altı yedi";
        // Only the last 5 words of `old` are considered for overlap.
        let merged = merge(old, new);
        assert_eq!(merged, "bir iki üç dört beş altı yedi");
    }

    #[test]
    fn merge_full_new_overlap_returns_old_unchanged() {
        let merged = merge("iki pizza lütfen", "lütfen");
        assert_eq!(merged, "iki pizza lütfen");
    }
}
