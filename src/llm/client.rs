//! Remote LLM client (spec §4.2).

use crate::config::LlmConfig;
use crate::error::EngineError;
use crate::sse::SseLineParser;
use crate::upstream::Upstream;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// No token for this long ⇒ fail the turn (spec §5 "Timeouts").
const TOKEN_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel depth between the SSE-reading task and its caller. Small and
/// bounded: the bridge drains tokens about as fast as they arrive, and a
/// bound here caps memory if it momentarily falls behind.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One event surfaced from the token stream.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// A newly decoded token plus the full accumulated text so far.
    Token { token: String, full_text: String },
    /// The stream completed normally.
    Done { full_text: String },
    /// The stream failed or was cancelled.
    Failed(LlmStreamFailure),
}

/// Terminal outcome of a stream that did not complete normally.
#[derive(Debug, Clone)]
pub enum LlmStreamFailure {
    /// The caller's [`CancellationToken`] fired (spec "Cancellation" is not
    /// an error; propagated silently).
    Cancelled,
    /// A transient or terminal upstream condition.
    Upstream(String),
    /// No token arrived within [`TOKEN_IDLE_TIMEOUT`].
    IdleTimeout,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Client for the remote LLM provider.
#[derive(Clone)]
pub struct RemoteLlmClient {
    upstream: Upstream,
    config: LlmConfig,
}

impl RemoteLlmClient {
    /// Construct a client bound to the shared upstream resources.
    #[must_use]
    pub fn new(upstream: Upstream, config: LlmConfig) -> Self {
        Self { upstream, config }
    }

    /// Build the compact system prompt (spec §4.2): a brief restaurant
    /// assistant, ≤ ~10-word spoken replies, single-JSON-object output.
    fn system_prompt(menu_context: &str) -> String {
        format!(
            "You are a concise restaurant table-side voice assistant. \
             Reply only with a single JSON object: \
             {{\"spoken_response\": string (max 10 words), \
             \"intent\": one of \"add\"|\"info\"|\"greet\"|\"check\"|\"recommend\"|\"other\", \
             \"product_name\": string or null, \"quantity\": integer or null}}. \
             Do not include any text outside the JSON object. \
             Menu: {menu_context}"
        )
    }

    /// Start a cancellable token stream for `user_message` (spec §4.2).
    ///
    /// Returns a receiver of [`LlmEvent`]s; the stream is driven by a
    /// spawned task that tears down the underlying upstream connection
    /// promptly when `cancel` fires (spec §5 "Cancellation semantics").
    pub fn generate_stream(
        &self,
        cancel: CancellationToken,
        user_message: String,
        menu_context: String,
    ) -> mpsc::Receiver<LlmEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move {
            client.drive_stream(cancel, user_message, menu_context, tx).await;
        });
        rx
    }

    async fn drive_stream(
        &self,
        cancel: CancellationToken,
        user_message: String,
        menu_context: String,
        tx: mpsc::Sender<LlmEvent>,
    ) {
        let system_prompt = Self::system_prompt(&menu_context);
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: true,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
        };

        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.send(LlmEvent::Failed(LlmStreamFailure::Cancelled)).await;
                return;
            }
            permit = self.upstream.concurrency.acquire() => permit.expect("semaphore is never closed"),
        };

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.send(LlmEvent::Failed(LlmStreamFailure::Cancelled)).await;
                return;
            }
            result = self
                .upstream
                .http
                .post(format!("{}/chat/completions", self.config.base_url))
                .bearer_auth(&self.config.api_key)
                .header("accept", "text/event-stream")
                .json(&body)
                .send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let _ = tx
                    .send(LlmEvent::Failed(LlmStreamFailure::Upstream(format!(
                        "transport error: {error}"
                    ))))
                    .await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let _ = tx
                .send(LlmEvent::Failed(LlmStreamFailure::Upstream(format!(
                    "HTTP {status}"
                ))))
                .await;
            return;
        }

        let mut byte_stream = response.bytes_stream();
        let mut parser = SseLineParser::new();
        let mut full_text = String::new();

        loop {
            let next_chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("LLM stream cancelled");
                    let _ = tx.send(LlmEvent::Failed(LlmStreamFailure::Cancelled)).await;
                    return;
                }
                chunk = tokio::time::timeout(TOKEN_IDLE_TIMEOUT, byte_stream.next()) => chunk,
            };

            let chunk = match next_chunk {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(error))) => {
                    let _ = tx
                        .send(LlmEvent::Failed(LlmStreamFailure::Upstream(format!(
                            "stream read error: {error}"
                        ))))
                        .await;
                    return;
                }
                Ok(None) => {
                    let _ = tx.send(LlmEvent::Done { full_text }).await;
                    return;
                }
                Err(_) => {
                    warn!("LLM token stream idle for {TOKEN_IDLE_TIMEOUT:?}");
                    let _ = tx
                        .send(LlmEvent::Failed(LlmStreamFailure::IdleTimeout))
                        .await;
                    return;
                }
            };

            for event in parser.push(&chunk) {
                if event.is_done() {
                    let _ = tx.send(LlmEvent::Done { full_text: full_text.clone() }).await;
                    return;
                }
                let Some(token) = extract_delta_token(&event.data) else {
                    continue;
                };
                if token.is_empty() {
                    continue;
                }
                full_text.push_str(&token);
                if tx
                    .send(LlmEvent::Token {
                        token,
                        full_text: full_text.clone(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

/// Extract the incremental token text out of one SSE `data:` payload.
/// Supports the common OpenAI-compatible chat-completions delta shape;
/// upstream payloads that don't match it are skipped rather than failing
/// the whole stream (a provider quirk shouldn't crash a live turn).
fn extract_delta_token(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_owned)
}

impl From<LlmStreamFailure> for EngineError {
    fn from(failure: LlmStreamFailure) -> Self {
        match failure {
            LlmStreamFailure::Cancelled => EngineError::Channel("llm stream cancelled".into()),
            LlmStreamFailure::Upstream(message) => EngineError::TransientUpstream {
                provider: "llm",
                message,
            },
            LlmStreamFailure::IdleTimeout => EngineError::TransientUpstream {
                provider: "llm",
                message: "token idle timeout".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_delta_token_reads_openai_shape() {
        let data = r#"{"choices":[{"delta":{"content":"iki"}}]}"#;
        assert_eq!(extract_delta_token(data).as_deref(), Some("iki"));
    }

    #[test]
    fn extract_delta_token_none_on_unrelated_payload() {
        assert_eq!(extract_delta_token(r#"{"other":1}"#), None);
    }

    #[tokio::test]
    async fn cancelled_before_send_yields_cancelled_event() {
        let upstream = Upstream::new(1);
        let config = LlmConfig {
            api_key: "k".into(),
            base_url: "http://127.0.0.1:0".into(),
            model: "m".into(),
            temperature: 0.7,
            max_tokens: 100,
        };
        let client = RemoteLlmClient::new(upstream, config);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rx = client.generate_stream(cancel, "hi".into(), "{}".into());
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, LlmEvent::Failed(LlmStreamFailure::Cancelled)));
    }
}
