//! Remote speech-to-text client (spec §4.1).

use crate::config::SttConfig;
use crate::error::{EngineError, Result};
use crate::retry::{FailureKind, RetryDecision, RetryPolicy};
use crate::upstream::Upstream;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Below this size the input is treated as near-silent and skipped without
/// contacting the upstream (spec §4.1 rule 2).
const MIN_AUDIO_BYTES: usize = 1024;

/// Hard per-call timeout (spec §5 "Timeouts").
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A completed transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    /// Transcribed text.
    pub text: String,
    /// Whether the upstream considers this final (echoes the request flag).
    pub is_final: bool,
    /// Upstream-reported confidence, 0.0..1.0.
    pub confidence: f32,
    /// Upstream-reported processing time.
    pub processing_time: Duration,
}

/// Outcome of a `transcribe_partial` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscribeOutcome {
    /// The input was below [`MIN_AUDIO_BYTES`]; no upstream call was made.
    Skipped,
    /// The upstream returned a transcript.
    Transcribed(TranscriptResult),
}

/// Per-session gate enforcing the minimum inter-call gap (spec §4.1 rule 1)
/// and, by holding the lock across the upstream call, serializing STT calls
/// for one session to at most one in flight (spec §4.1 rule 5, §5 ordering).
pub struct SttSessionGate {
    last_call: Mutex<Instant>,
    min_gap: Duration,
}

impl SttSessionGate {
    /// Create a gate whose first call never waits.
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        Self {
            last_call: Mutex::new(Instant::now() - min_gap),
            min_gap,
        }
    }
}

/// Client for the remote STT provider.
#[derive(Clone)]
pub struct RemoteSttClient {
    upstream: Upstream,
    config: SttConfig,
}

#[derive(Debug, Deserialize)]
struct UpstreamTranscribeResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    processing_time_ms: u64,
}

impl RemoteSttClient {
    /// Construct a client bound to the shared upstream resources.
    #[must_use]
    pub fn new(upstream: Upstream, config: SttConfig) -> Self {
        Self { upstream, config }
    }

    /// Submit the entire current audio buffer for transcription (spec
    /// §4.1). `gate` must be the calling session's [`SttSessionGate`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransientUpstream`] after exhausting retries
    /// on 5xx/429/transport failures, or
    /// [`EngineError::UpstreamRejected`] immediately on other 4xx
    /// responses.
    pub async fn transcribe_partial(
        &self,
        gate: &SttSessionGate,
        audio: &[u8],
        is_final: bool,
    ) -> Result<TranscribeOutcome> {
        if audio.len() < MIN_AUDIO_BYTES {
            debug!(bytes = audio.len(), "STT input below minimum, skipping upstream call");
            return Ok(TranscribeOutcome::Skipped);
        }

        let mut last_call = gate.last_call.lock().await;
        let elapsed = last_call.elapsed();
        if elapsed < gate.min_gap {
            tokio::time::sleep(gate.min_gap - elapsed).await;
        }

        let result = self.call_with_retry(audio, is_final).await;
        *last_call = Instant::now();
        drop(last_call);
        result.map(TranscribeOutcome::Transcribed)
    }

    async fn call_with_retry(&self, audio: &[u8], is_final: bool) -> Result<TranscriptResult> {
        let policy = RetryPolicy::stt_default();
        let mut attempt: u32 = 1;
        loop {
            let _permit = self
                .upstream
                .concurrency
                .acquire()
                .await
                .expect("semaphore is never closed");

            match self.call_once(audio, is_final).await {
                Ok(result) => return Ok(result),
                Err(kind_and_message) => {
                    let (kind, message) = kind_and_message;
                    match policy.decide(attempt, kind) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = message.as_str(),
                                "STT call failed transiently, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => {
                            return Err(match kind {
                                FailureKind::Transient => EngineError::TransientUpstream {
                                    provider: "stt",
                                    message,
                                },
                                FailureKind::Permanent => EngineError::UpstreamRejected {
                                    provider: "stt",
                                    message,
                                },
                            });
                        }
                    }
                }
            }
        }
    }

    /// One upstream attempt. Returns `Err((kind, message))` for the retry
    /// loop to classify rather than raising `EngineError` directly, so the
    /// loop owns all retry/give-up decisions.
    async fn call_once(
        &self,
        audio: &[u8],
        is_final: bool,
    ) -> std::result::Result<TranscriptResult, (FailureKind, String)> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("segment.audio")
            .mime_str("application/octet-stream")
            .expect("static mime string is valid");
        let form = reqwest::multipart::Form::new()
            .text("language", self.config.language)
            .text("task", "transcribe")
            .text("is_final", is_final.to_string())
            .part("audio", part);

        let response = self
            .upstream
            .http
            .post(format!("{}/transcribe", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .timeout(CALL_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| (FailureKind::Transient, format!("transport error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let parsed: UpstreamTranscribeResponse = response
                .json()
                .await
                .map_err(|e| (FailureKind::Permanent, format!("malformed response: {e}")))?;
            return Ok(TranscriptResult {
                text: parsed.text,
                is_final,
                confidence: parsed.confidence,
                processing_time: Duration::from_millis(parsed.processing_time_ms),
            });
        }

        if status.as_u16() == 429 || status.is_server_error() {
            return Err((FailureKind::Transient, format!("HTTP {status}")));
        }
        Err((FailureKind::Permanent, format!("HTTP {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> SttConfig {
        SttConfig {
            api_key: "test-key".into(),
            base_url,
            min_gap: Duration::from_millis(0),
            language: "tr",
        }
    }

    #[tokio::test]
    async fn tiny_input_is_skipped_without_upstream_call() {
        let server = MockServer::start().await;
        let client = RemoteSttClient::new(Upstream::new(10), test_config(server.uri()));
        let gate = SttSessionGate::new(Duration::from_millis(0));

        let outcome = client
            .transcribe_partial(&gate, &[0u8; 10], false)
            .await
            .unwrap();
        assert_eq!(outcome, TranscribeOutcome::Skipped);
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn successful_call_returns_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "iki pizza lütfen",
                "confidence": 0.92,
                "processing_time_ms": 120,
            })))
            .mount(&server)
            .await;

        let client = RemoteSttClient::new(Upstream::new(10), test_config(server.uri()));
        let gate = SttSessionGate::new(Duration::from_millis(0));

        let outcome = client
            .transcribe_partial(&gate, &vec![0u8; 2048], false)
            .await
            .unwrap();
        match outcome {
            TranscribeOutcome::Transcribed(result) => {
                assert_eq!(result.text, "iki pizza lütfen");
                assert!((result.confidence - 0.92).abs() < f32::EPSILON);
            }
            TranscribeOutcome::Skipped => panic!("expected a transcript"),
        }
    }

    #[tokio::test]
    async fn non_retriable_4xx_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = RemoteSttClient::new(Upstream::new(10), test_config(server.uri()));
        let gate = SttSessionGate::new(Duration::from_millis(0));

        let result = client.transcribe_partial(&gate, &vec![0u8; 2048], false).await;
        assert!(matches!(result, Err(EngineError::UpstreamRejected { .. })));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_5xx_retries_then_fails_transiently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = RemoteSttClient::new(Upstream::new(10), test_config(server.uri()));
        let gate = SttSessionGate::new(Duration::from_millis(0));

        let result = client.transcribe_partial(&gate, &vec![0u8; 2048], false).await;
        assert!(matches!(result, Err(EngineError::TransientUpstream { .. })));
        // 3 total attempts: initial + 2 retries.
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn min_gap_delays_the_second_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "test",
                "confidence": 1.0,
                "processing_time_ms": 0,
            })))
            .mount(&server)
            .await;

        let mut config = test_config(server.uri());
        config.min_gap = Duration::from_millis(500);
        let client = RemoteSttClient::new(Upstream::new(10), config);
        let gate = SttSessionGate::new(Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        client
            .transcribe_partial(&gate, &vec![0u8; 2048], false)
            .await
            .unwrap();
        client
            .transcribe_partial(&gate, &vec![0u8; 2048], false)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
