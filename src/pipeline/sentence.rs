//! Sentence-boundary detection over accumulating LLM output (spec §4.8
//! step 3, GLOSSARY "Sentence boundary").

use std::sync::OnceLock;

fn boundary_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"[.!?](\s|$)").expect("static regex is valid")
    })
}

/// Find the first sentence boundary in `text`: the first occurrence of
/// `.`, `!`, or `?` followed by whitespace or end-of-string. Returns the
/// byte offset of the character *after* the punctuation (i.e. a valid
/// slice end for "everything up to and including the boundary").
#[must_use]
pub fn first_sentence_boundary(text: &str) -> Option<usize> {
    let m = boundary_regex().find(text)?;
    // The match includes the trailing whitespace/end-of-string group; the
    // boundary itself is the punctuation character at the match's start.
    Some(m.start() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_boundary_followed_by_space() {
        // İ is 2 bytes in UTF-8, so the boundary byte offset trails the
        // visual character count.
        assert_eq!(first_sentence_boundary("İki pizza. Bir de"), Some(11));
        assert_eq!(&"İki pizza. Bir de"[..11], "İki pizza.");
    }

    #[test]
    fn finds_boundary_at_end_of_string() {
        assert_eq!(first_sentence_boundary("Merhaba!"), Some(8));
    }

    #[test]
    fn returns_none_without_punctuation() {
        assert_eq!(first_sentence_boundary("henüz bitmedi"), None);
    }

    #[test]
    fn ignores_mid_word_punctuation_like_decimals() {
        // "3.5" has no whitespace/end after the dot, so no boundary yet.
        assert_eq!(first_sentence_boundary("Fiyat 3.5 lira"), None);
    }

    #[test]
    fn finds_first_of_several_boundaries() {
        let text = "Merhaba! Nasılsın? İyi.";
        assert_eq!(first_sentence_boundary(text), Some(8));
    }
}
