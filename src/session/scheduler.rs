//! Partial-STT scheduler predicate (spec §4.6).
//!
//! Pure decision logic over buffer size and elapsed time, kept separate
//! from [`crate::session::Session`] so it can be unit-tested against
//! literal byte counts and durations without spinning up a session.

use std::time::Duration;

/// Raw PCM16/16kHz/mono throughput, used to translate configured duration
/// thresholds into byte counts (§9 "Audio sample rate of inbound chunks" —
/// the engine treats bytes as opaque, but this conversion must stay
/// consistent with what the STT client expects).
pub const BYTES_PER_SECOND: u64 = 32_000;

/// Convert a duration into the equivalent byte count at
/// [`BYTES_PER_SECOND`].
#[must_use]
pub fn duration_to_bytes(duration: Duration) -> u64 {
    (duration.as_secs_f64() * BYTES_PER_SECOND as f64) as u64
}

/// Decide whether the partial-STT scheduler should fire right now (spec
/// §4.6). Fires when the buffer holds at least `min_duration` worth of
/// audio *and* at least `min_gap` has elapsed since the last STT call,
/// *and* no STT call is currently in flight (the tie-break: a call in
/// flight always skips, since the per-session STT mutex would otherwise
/// serialize and build latency).
#[must_use]
pub fn can_process_partial_stt(
    buffer_len: usize,
    since_last_stt: Duration,
    min_gap: Duration,
    min_duration: Duration,
    stt_call_in_flight: bool,
) -> bool {
    if stt_call_in_flight {
        return false;
    }
    let min_bytes = duration_to_bytes(min_duration);
    if (buffer_len as u64) < min_bytes {
        return false;
    }
    since_last_stt >= min_gap && since_last_stt >= min_duration
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_GAP: Duration = Duration::from_millis(500);
    const MIN_DURATION: Duration = Duration::from_millis(1200);

    #[test]
    fn fires_when_both_preconditions_hold() {
        let buffer_len = duration_to_bytes(MIN_DURATION) as usize;
        assert!(can_process_partial_stt(
            buffer_len,
            MIN_DURATION,
            MIN_GAP,
            MIN_DURATION,
            false
        ));
    }

    #[test]
    fn never_fires_while_a_call_is_in_flight() {
        let buffer_len = duration_to_bytes(MIN_DURATION) as usize;
        assert!(!can_process_partial_stt(
            buffer_len,
            MIN_DURATION,
            MIN_GAP,
            MIN_DURATION,
            true
        ));
    }

    #[test]
    fn does_not_fire_when_buffer_too_small() {
        assert!(!can_process_partial_stt(
            1_000,
            MIN_DURATION,
            MIN_GAP,
            MIN_DURATION,
            false
        ));
    }

    #[test]
    fn does_not_fire_when_gap_too_short() {
        let buffer_len = duration_to_bytes(MIN_DURATION) as usize;
        assert!(!can_process_partial_stt(
            buffer_len,
            Duration::from_millis(100),
            MIN_GAP,
            MIN_DURATION,
            false
        ));
    }

    #[test]
    fn min_duration_threshold_matches_spec_figure() {
        // 1.2s at 16kHz mono 16-bit ≈ 38.4 KB (spec §4.6).
        assert_eq!(duration_to_bytes(MIN_DURATION), 38_400);
    }
}
