//! Streaming bridge (spec §4.8): drives the LLM token stream, spawns the
//! first-sentence TTS task, and relays both onto the session's outbound
//! channel in order.

use crate::llm::{intent, LlmEvent, LlmStreamFailure, RemoteLlmClient};
use crate::persistence::{MenuAndOrderStore, OrderItem, PersistenceError};
use crate::pipeline::sentence::first_sentence_boundary;
use crate::protocol::{IntentKind, OutboundControl, OutboundFrame, StructuredIntent};
use crate::session::{Session, SessionState, TaskKey};
use crate::tts::{RemoteTtsClient, TtsEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Terminal result of one LLM/TTS turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The turn ran to completion; the client received `ai_complete`.
    Completed(StructuredIntent),
    /// The turn was cancelled (barge-in or a corrective restart) before
    /// completion; no `ai_complete` was sent.
    Cancelled,
    /// A terminal upstream error ended the turn; the client received an
    /// `error` control message.
    Failed,
}

/// Drives the LLM/TTS streaming bridge (spec §4.8). Stateless beyond its
/// two remote clients; everything turn-specific lives in the
/// [`Session`] and the outbound channel passed to [`Bridge::run_turn`].
#[derive(Clone)]
pub struct Bridge {
    llm: RemoteLlmClient,
    tts: RemoteTtsClient,
}

impl Bridge {
    /// Construct a bridge bound to the shared remote clients.
    #[must_use]
    pub fn new(llm: RemoteLlmClient, tts: RemoteTtsClient) -> Self {
        Self { llm, tts }
    }

    /// Run one full turn for `transcript`: stream LLM tokens to
    /// `outbound`, spawn TTS on the first sentence boundary, and on
    /// completion hand an `add`-intent to `persistence`. Cancel `cancel`
    /// to tear down the LLM stream promptly (spec §5 "Cancellation
    /// semantics"); this does not independently cancel an already-spawned
    /// TTS task — callers doing a corrective restart must also cancel
    /// [`TaskKey::Tts`] on the session's registry (spec §4.8 "State
    /// coupling").
    pub async fn run_turn(
        &self,
        session: &Arc<Session>,
        outbound: &mpsc::Sender<OutboundFrame>,
        persistence: &Arc<dyn MenuAndOrderStore>,
        cancel: CancellationToken,
        transcript: String,
    ) -> TurnOutcome {
        session.set_state(SessionState::GeneratingLlm).await;
        let _ = outbound
            .send(OutboundFrame::Control(OutboundControl::Status { message: "thinking" }))
            .await;
        let menu_context = session.menu_prompt_context().await;
        let mut llm_rx = self.llm.generate_stream(cancel.clone(), transcript, menu_context);

        let mut full_text = String::new();
        let mut boundary_found = false;

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return TurnOutcome::Cancelled,
                event = llm_rx.recv() => event,
            };

            let Some(event) = event else {
                warn!("LLM event channel closed without a terminal event");
                let _ = send_error(outbound, "llm stream ended unexpectedly").await;
                session.set_state(SessionState::Idle).await;
                return TurnOutcome::Failed;
            };

            match event {
                LlmEvent::Token { token, full_text: accumulated } => {
                    full_text = accumulated;
                    let _ = outbound
                        .send(OutboundFrame::Control(OutboundControl::AiToken {
                            token,
                            full_text: full_text.clone(),
                        }))
                        .await;

                    if !boundary_found {
                        if let Some(end) = first_sentence_boundary(&full_text) {
                            boundary_found = true;
                            let spoken = intent::extract_spoken_response(&full_text[..end])
                                .unwrap_or_else(|| full_text[..end].trim().to_owned());
                            session.set_state(SessionState::StreamingTts).await;
                            self.spawn_tts(session, outbound, spoken).await;
                        }
                    }
                }
                LlmEvent::Done { full_text: finished } => {
                    let parsed = intent::parse_final_intent(&finished);
                    if !boundary_found {
                        session.set_state(SessionState::StreamingTts).await;
                        self.spawn_tts(session, outbound, parsed.spoken_response.clone())
                            .await;
                    }
                    let _ = outbound
                        .send(OutboundFrame::Control(OutboundControl::AiComplete {
                            data: parsed.clone(),
                        }))
                        .await;
                    self.emit_recommendation_if_any(session, outbound, &parsed).await;
                    let _ = outbound
                        .send(OutboundFrame::Control(OutboundControl::Status { message: "processing" }))
                        .await;
                    self.hand_off_to_persistence(session, outbound, persistence, &parsed)
                        .await;
                    session.set_state(SessionState::Idle).await;
                    return TurnOutcome::Completed(parsed);
                }
                LlmEvent::Failed(failure) => {
                    if matches!(failure, LlmStreamFailure::Cancelled) {
                        return TurnOutcome::Cancelled;
                    }
                    warn!(?failure, "LLM turn failed");
                    let _ = send_error(outbound, "assistant is unavailable right now").await;
                    session.set_state(SessionState::Idle).await;
                    return TurnOutcome::Failed;
                }
            }
        }
    }

    /// Register and drive a TTS run for `text` under [`TaskKey::Tts`]
    /// (spec §4.8 step 4). Fire-and-forget: the caller's turn continues
    /// streaming LLM tokens while this relays frames independently.
    async fn spawn_tts(&self, session: &Arc<Session>, outbound: &mpsc::Sender<OutboundFrame>, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let tts_cancel = CancellationToken::new();
        let mut rx = self.tts.speak_stream(tts_cancel.clone(), text);
        let outbound = outbound.clone();
        let handle = tokio::spawn(async move {
            let _ = outbound
                .send(OutboundFrame::Control(OutboundControl::TtsStart))
                .await;
            loop {
                match rx.recv().await {
                    Some(TtsEvent::Frame(bytes)) => {
                        if outbound.send(OutboundFrame::Binary(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Some(TtsEvent::Done) => break,
                    Some(TtsEvent::Failed(failure)) => {
                        warn!(?failure, "TTS stream failed");
                        break;
                    }
                    None => break,
                }
            }
            let _ = outbound
                .send(OutboundFrame::Control(OutboundControl::TtsComplete))
                .await;
        });
        session.registry.insert(TaskKey::Tts, tts_cancel, handle).await;
    }

    async fn emit_recommendation_if_any(
        &self,
        session: &Arc<Session>,
        outbound: &mpsc::Sender<OutboundFrame>,
        intent: &StructuredIntent,
    ) {
        if intent.intent != IntentKind::Recommend {
            return;
        }
        let Some(name) = &intent.product_name else {
            return;
        };
        let menu = session.menu().await;
        if let Some(product) = menu.products.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
            let _ = outbound
                .send(OutboundFrame::Control(OutboundControl::Recommendation {
                    product: serde_json::to_value(product).unwrap_or(serde_json::Value::Null),
                }))
                .await;
        }
    }

    /// Spec §4.8 step 6: hand the structured intent to the persistence
    /// collaborator and await acknowledgement before the turn is
    /// considered complete. Never blocks `ai_complete` (already sent);
    /// only surfaces a secondary `error` if the collaborator rejects the
    /// write.
    async fn hand_off_to_persistence(
        &self,
        session: &Arc<Session>,
        outbound: &mpsc::Sender<OutboundFrame>,
        persistence: &Arc<dyn MenuAndOrderStore>,
        intent: &StructuredIntent,
    ) {
        match intent.intent {
            IntentKind::Add => {
                let Some(product_name) = intent.product_name.clone() else {
                    return;
                };
                let quantity = intent.quantity.unwrap_or(1).max(1);
                let result = persistence
                    .place_order(
                        &session.table_id,
                        vec![OrderItem { product_name, quantity }],
                    )
                    .await;
                if let Err(error) = result {
                    warn!(%error, "order placement failed");
                    let _ = send_error(outbound, &persistence_error_message(&error)).await;
                }
            }
            IntentKind::Check => {
                if let Err(error) = persistence.request_check(&session.table_id).await {
                    warn!(%error, "check request failed");
                    let _ = send_error(outbound, &persistence_error_message(&error)).await;
                }
            }
            _ => {}
        }
    }
}

fn persistence_error_message(error: &PersistenceError) -> String {
    format!("order could not be completed: {error}")
}

async fn send_error(outbound: &mpsc::Sender<OutboundFrame>, message: &str) -> Result<(), ()> {
    outbound
        .send(OutboundFrame::Control(OutboundControl::Error {
            message: message.to_owned(),
        }))
        .await
        .map_err(|_| ())
}

/// Emit the session-open greeting: a short spoken welcome, also voiced via
/// TTS (spec §4.9 "Duplex session driver" lifecycle, §8 S1 "happy path").
pub async fn emit_greeting(
    tts: &RemoteTtsClient,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    text: String,
) {
    info!(table = %session.table_id, "emitting session greeting");
    let _ = outbound
        .send(OutboundFrame::Control(OutboundControl::Greeting {
            text: text.clone(),
        }))
        .await;
    let tts_cancel = CancellationToken::new();
    let mut rx = tts.speak_stream(tts_cancel.clone(), text);
    let outbound = outbound.clone();
    let handle = tokio::spawn(async move {
        let _ = outbound
            .send(OutboundFrame::Control(OutboundControl::TtsStart))
            .await;
        while let Some(event) = rx.recv().await {
            match event {
                TtsEvent::Frame(bytes) => {
                    if outbound.send(OutboundFrame::Binary(bytes)).await.is_err() {
                        return;
                    }
                }
                TtsEvent::Done | TtsEvent::Failed(_) => break,
            }
        }
        let _ = outbound
            .send(OutboundFrame::Control(OutboundControl::TtsComplete))
            .await;
    });
    session.registry.insert(TaskKey::Tts, tts_cancel, handle).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, TtsConfig};
    use crate::persistence::{InMemoryStore, MenuContext};
    use crate::upstream::Upstream;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_session() -> Arc<Session> {
        Arc::new(Session::new(
            "T1".into(),
            MenuContext {
                restaurant: "Sofra".into(),
                table: "1".into(),
                products: vec![crate::persistence::MenuItem {
                    name: "Pizza".into(),
                    price: 150,
                }],
                allergens: vec![],
            },
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_millis(400),
        ))
    }

    fn test_bridge(base_url: String) -> Bridge {
        let upstream = Upstream::new(4);
        let llm = RemoteLlmClient::new(
            upstream.clone(),
            LlmConfig {
                api_key: "k".into(),
                base_url: base_url.clone(),
                model: "m".into(),
                temperature: 0.7,
                max_tokens: 100,
            },
        );
        let tts = RemoteTtsClient::new(
            upstream,
            TtsConfig {
                api_key: "k".into(),
                base_url,
                voice: "default".into(),
                speaking_rate: 1.15,
                language: "tr",
            },
        );
        Bridge::new(llm, tts)
    }

    #[tokio::test]
    async fn cancelled_turn_returns_cancelled_without_ai_complete() {
        let bridge = test_bridge("http://127.0.0.1:0".into());
        let session = test_session();
        let (tx, mut rx) = mpsc::channel(16);
        let store: Arc<dyn MenuAndOrderStore> = Arc::new(InMemoryStore::new(HashMap::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = bridge
            .run_turn(&session, &tx, &store, cancel, "iki pizza".into())
            .await;
        assert!(matches!(outcome, TurnOutcome::Cancelled));
        drop(tx);
        while let Some(frame) = rx.recv().await {
            assert!(
                !matches!(frame, OutboundFrame::Control(OutboundControl::AiComplete { .. })),
                "cancelled turn must not emit ai_complete"
            );
        }
    }
}
