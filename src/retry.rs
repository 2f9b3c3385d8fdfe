//! Retry/backoff policy object (spec §9 "Retries and backoff").
//!
//! A small policy object rather than hand-rolled sleeps scattered across
//! callers. Used by the STT client (spec §4.1 rule 4); the LLM/TTS clients
//! do not retry — a mid-stream failure fails the task (§7).

use std::time::Duration;

/// Classification of an upstream failure, decided by the caller from the
/// HTTP status code or transport error it observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 5xx, 429, connection reset, or other transient I/O failure.
    Transient,
    /// 4xx other than 429 — retrying would not help.
    Permanent,
}

/// Outcome of asking the policy what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for this long, then retry.
    RetryAfter(Duration),
    /// Give up; the caller should surface a terminal error.
    GiveUp,
}

/// Exponential backoff policy: a fixed number of attempts with a doubling
/// delay starting at `base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry (doubles thereafter).
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Spec §4.1 rule 4: up to 3 total attempts, backoff 2s / 4s / 8s.
    #[must_use]
    pub const fn stt_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }

    /// Decide what to do after the attempt numbered `attempt_number`
    /// (1-indexed) failed with `kind`.
    #[must_use]
    pub fn decide(&self, attempt_number: u32, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Permanent {
            return RetryDecision::GiveUp;
        }
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        // attempt_number=1 failing -> wait base_delay before attempt 2.
        // attempt_number=2 failing -> wait 2*base_delay before attempt 3.
        let factor = 2u32.saturating_pow(attempt_number - 1);
        RetryDecision::RetryAfter(self.base_delay * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_transient_failures_retry_with_doubling_backoff() {
        let policy = RetryPolicy::stt_default();
        assert_eq!(
            policy.decide(1, FailureKind::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(2, FailureKind::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
    }

    #[test]
    fn third_failure_exhausts_attempts() {
        let policy = RetryPolicy::stt_default();
        assert_eq!(policy.decide(3, FailureKind::Transient), RetryDecision::GiveUp);
    }

    #[test]
    fn permanent_failure_gives_up_immediately() {
        let policy = RetryPolicy::stt_default();
        assert_eq!(policy.decide(1, FailureKind::Permanent), RetryDecision::GiveUp);
    }
}
