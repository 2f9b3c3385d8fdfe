//! Remote TTS client (spec §4.3).

use crate::config::TtsConfig;
use crate::error::EngineError;
use crate::sse::SseLineParser;
use crate::upstream::Upstream;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// No audio chunk for this long ⇒ fail the task (spec §5 "Timeouts").
const CHUNK_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Channel depth between the SSE-reading task and the caller relaying
/// frames onto the duplex channel.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// One event surfaced from a TTS run.
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// A decoded raw PCM16/16kHz/mono frame, ready to relay verbatim.
    Frame(Bytes),
    /// The stream completed normally; all frames have been emitted.
    Done,
    /// The stream failed or was cancelled.
    Failed(TtsStreamFailure),
}

/// Terminal outcome of a stream that did not complete normally.
#[derive(Debug, Clone)]
pub enum TtsStreamFailure {
    /// The caller's [`CancellationToken`] fired.
    Cancelled,
    /// A transient or terminal upstream condition.
    Upstream(String),
    /// No audio chunk arrived within [`CHUNK_IDLE_TIMEOUT`].
    IdleTimeout,
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
    speaking_rate: f32,
    stream: bool,
}

#[derive(serde::Deserialize)]
struct SpeakChunk {
    #[serde(default)]
    audio: String,
}

/// Client for the remote TTS provider.
#[derive(Clone)]
pub struct RemoteTtsClient {
    upstream: Upstream,
    config: TtsConfig,
}

impl RemoteTtsClient {
    /// Construct a client bound to the shared upstream resources.
    #[must_use]
    pub fn new(upstream: Upstream, config: TtsConfig) -> Self {
        Self { upstream, config }
    }

    /// Start a cancellable audio stream for `text` (spec §4.3). Each event
    /// carries a base64-encoded PCM16/16kHz/mono chunk; frames are decoded
    /// before being handed to the caller.
    pub fn speak_stream(&self, cancel: CancellationToken, text: String) -> mpsc::Receiver<TtsEvent> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move {
            client.drive_stream(cancel, text, tx).await;
        });
        rx
    }

    async fn drive_stream(&self, cancel: CancellationToken, text: String, tx: mpsc::Sender<TtsEvent>) {
        let body = SpeakRequest {
            text: &text,
            voice: &self.config.voice,
            language: self.config.language,
            speaking_rate: self.config.speaking_rate,
            stream: true,
        };

        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.send(TtsEvent::Failed(TtsStreamFailure::Cancelled)).await;
                return;
            }
            permit = self.upstream.concurrency.acquire() => permit.expect("semaphore is never closed"),
        };

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.send(TtsEvent::Failed(TtsStreamFailure::Cancelled)).await;
                return;
            }
            result = self
                .upstream
                .http
                .post(format!("{}/speak", self.config.base_url))
                .bearer_auth(&self.config.api_key)
                .header("accept", "text/event-stream")
                .json(&body)
                .send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let _ = tx
                    .send(TtsEvent::Failed(TtsStreamFailure::Upstream(format!(
                        "transport error: {error}"
                    ))))
                    .await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let _ = tx
                .send(TtsEvent::Failed(TtsStreamFailure::Upstream(format!(
                    "HTTP {status}"
                ))))
                .await;
            return;
        }

        let mut byte_stream = response.bytes_stream();
        let mut parser = SseLineParser::new();

        loop {
            let next_chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = tx.send(TtsEvent::Failed(TtsStreamFailure::Cancelled)).await;
                    return;
                }
                chunk = tokio::time::timeout(CHUNK_IDLE_TIMEOUT, byte_stream.next()) => chunk,
            };

            let chunk = match next_chunk {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(error))) => {
                    let _ = tx
                        .send(TtsEvent::Failed(TtsStreamFailure::Upstream(format!(
                            "stream read error: {error}"
                        ))))
                        .await;
                    return;
                }
                Ok(None) => {
                    let _ = tx.send(TtsEvent::Done).await;
                    return;
                }
                Err(_) => {
                    warn!("TTS chunk stream idle for {CHUNK_IDLE_TIMEOUT:?}");
                    let _ = tx.send(TtsEvent::Failed(TtsStreamFailure::IdleTimeout)).await;
                    return;
                }
            };

            for event in parser.push(&chunk) {
                if event.is_done() {
                    let _ = tx.send(TtsEvent::Done).await;
                    return;
                }
                let Ok(parsed) = serde_json::from_str::<SpeakChunk>(&event.data) else {
                    continue;
                };
                if parsed.audio.is_empty() {
                    continue;
                }
                let Ok(pcm) = base64::engine::general_purpose::STANDARD.decode(&parsed.audio)
                else {
                    continue;
                };
                if tx.send(TtsEvent::Frame(Bytes::from(pcm))).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl From<TtsStreamFailure> for EngineError {
    fn from(failure: TtsStreamFailure) -> Self {
        match failure {
            TtsStreamFailure::Cancelled => EngineError::Channel("tts stream cancelled".into()),
            TtsStreamFailure::Upstream(message) => EngineError::TransientUpstream {
                provider: "tts",
                message,
            },
            TtsStreamFailure::IdleTimeout => EngineError::TransientUpstream {
                provider: "tts",
                message: "chunk idle timeout".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> TtsConfig {
        TtsConfig {
            api_key: "k".into(),
            base_url,
            voice: "default".into(),
            speaking_rate: 1.15,
            language: "tr",
        }
    }

    #[tokio::test]
    async fn cancelled_before_send_yields_cancelled_event() {
        let client = RemoteTtsClient::new(Upstream::new(1), test_config("http://127.0.0.1:0".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rx = client.speak_stream(cancel, "merhaba".into());
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TtsEvent::Failed(TtsStreamFailure::Cancelled)));
    }

    #[tokio::test]
    async fn decodes_base64_pcm_frames_from_sse() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let pcm = vec![1u8, 2, 3, 4];
        let b64 = base64::engine::general_purpose::STANDARD.encode(&pcm);
        let body = format!("data: {{\"audio\":\"{b64}\"}}\n\ndata: [DONE]\n\n");
        Mock::given(method("POST"))
            .and(path("/speak"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = RemoteTtsClient::new(Upstream::new(1), test_config(server.uri()));
        let mut rx = client.speak_stream(CancellationToken::new(), "merhaba".into());

        let first = rx.recv().await.unwrap();
        match first {
            TtsEvent::Frame(bytes) => assert_eq!(bytes.as_ref(), &pcm[..]),
            other => panic!("expected a frame, got {other:?}"),
        }
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, TtsEvent::Done));
    }
}
