//! Early-trigger predicate (spec §4.7).
//!
//! Pure decision logic over the current partial transcript and silence
//! duration, kept separate from [`crate::session::Session`] for the same
//! testability reason as [`crate::session::scheduler`].

use std::time::Duration;

/// Minimum word count for the silence-based trigger leg (spec §4.7).
pub const MIN_WORDS: usize = 3;

/// Decide whether the engine should commit to LLM generation now (spec
/// §4.7). Fires when, after trimming, the partial transcript ends in `.`,
/// `!`, or `?`, **or** it has at least [`MIN_WORDS`] words and the client
/// has been silent for at least `silence_threshold`.
///
/// Does not model the explicit `audio_end` override (spec §4.7, §6.1) —
/// the driver forces a trigger on that control message regardless of this
/// predicate's answer.
#[must_use]
pub fn should_trigger_llm(
    partial_transcript: &str,
    since_last_chunk: Duration,
    silence_threshold: Duration,
) -> bool {
    let trimmed = partial_transcript.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.ends_with(['.', '!', '?']) {
        return true;
    }
    let word_count = trimmed.split_whitespace().count();
    word_count >= MIN_WORDS && since_last_chunk >= silence_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    const SILENCE: Duration = Duration::from_millis(400);

    #[test]
    fn fires_on_sentence_ending_punctuation() {
        assert!(should_trigger_llm("hi.", Duration::ZERO, SILENCE));
        assert!(should_trigger_llm("nasılsın?", Duration::ZERO, SILENCE));
        assert!(should_trigger_llm("harika!", Duration::ZERO, SILENCE));
    }

    #[test]
    fn does_not_fire_below_silence_threshold_with_enough_words() {
        assert!(!should_trigger_llm(
            "bir iki üç",
            Duration::from_millis(399),
            SILENCE
        ));
    }

    #[test]
    fn fires_at_exact_silence_threshold_with_enough_words() {
        assert!(should_trigger_llm(
            "bir iki üç",
            Duration::from_millis(400),
            SILENCE
        ));
    }

    #[test]
    fn does_not_fire_with_too_few_words_regardless_of_silence() {
        assert!(!should_trigger_llm(
            "bir iki",
            Duration::from_secs(10),
            SILENCE
        ));
    }

    #[test]
    fn empty_transcript_never_fires() {
        assert!(!should_trigger_llm("   ", Duration::from_secs(10), SILENCE));
    }
}
