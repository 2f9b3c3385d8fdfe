//! Duplex channel JSON control-message schemas (spec §6.1).
//!
//! Binary frames are handled separately by the driver (raw opaque audio
//! inbound, raw PCM16 mono 16kHz outbound); this module only covers the
//! JSON control messages multiplexed alongside them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One item enqueued onto a session's outbound channel: either a JSON
/// control message or an opaque binary audio frame (spec §5 "Ordering
/// guarantees" — both share a single queue so send order is preserved).
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A JSON control message (serialized as a WebSocket text frame).
    Control(OutboundControl),
    /// A raw PCM16/16kHz/mono audio frame (sent as a WebSocket binary
    /// frame, verbatim).
    Binary(Bytes),
    /// Close the channel with the given WebSocket close code (spec §6.1
    /// close codes). Terminates the writer after this frame is sent.
    Close {
        /// WebSocket close code (see [`close_code`]).
        code: u16,
        /// Human-readable reason sent in the close frame.
        reason: String,
    },
}

/// Inbound control messages from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundControl {
    /// The user has finished speaking this turn.
    AudioEnd,
    /// Barge-in: stop everything in flight and return to listening.
    Interrupt,
    /// Liveness probe; answered with `pong`.
    Ping,
    /// The client finished rendering previously sent audio. Bookkeeping
    /// only; no state transition required.
    PlaybackComplete,
}

/// A menu item as surfaced in a `recommendation` message. Deliberately
/// loose — the full record shape is owned by the persistence collaborator
/// (spec §6.2); the gateway treats it as an opaque, forward-compatible
/// payload.
pub type MenuItemRecord = serde_json::Value;

/// The LLM's structured turn result (spec §3 "Structured intent").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredIntent {
    /// What the TTS should speak.
    pub spoken_response: String,
    /// The tagged intent kind.
    pub intent: IntentKind,
    /// Product named by the user, if any.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Quantity named by the user, if any.
    #[serde(default)]
    pub quantity: Option<u32>,
}

/// Tagged union over the turn's intent kind (spec §3, §9 "Duck-typed
/// intents"). Unknown tags from the upstream fall into [`Self::Other`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Add an item to the cart.
    Add,
    /// An informational question, no cart effect.
    Info,
    /// A greeting turn (e.g. session open).
    Greet,
    /// Request the check.
    Check,
    /// Ask for a recommendation.
    Recommend,
    /// Anything that doesn't fit the above; logged.
    #[serde(other)]
    Other,
}

/// Outbound control messages to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundControl {
    /// Sent once per channel-open with a short spoken welcome.
    Greeting {
        /// Welcome text, also voiced via TTS.
        text: String,
    },
    /// Coarse progress indicator for UI feedback.
    Status {
        /// One of "receiving" | "transcribing" | "thinking" | "processing".
        message: &'static str,
    },
    /// A running best-guess transcript while the user is still speaking.
    PartialTranscript {
        /// Current merged partial text.
        text: String,
        /// Upstream-reported confidence, 0.0..1.0.
        confidence: f32,
        /// Always `false` for this variant; kept for wire-shape parity
        /// with [`Self::Transcript`].
        is_final: bool,
    },
    /// The committed final transcript for this turn.
    Transcript {
        /// Final text.
        text: String,
        /// Always `true`.
        is_final: bool,
    },
    /// One streamed LLM token.
    AiToken {
        /// The decoded token fragment.
        token: String,
        /// Accumulated text so far this turn.
        full_text: String,
    },
    /// The turn's final structured result.
    AiComplete {
        /// The parsed structured intent.
        data: StructuredIntent,
    },
    /// A recommended menu item, surfaced alongside a `recommend` intent.
    Recommendation {
        /// Opaque menu-item record from the persistence collaborator.
        product: MenuItemRecord,
    },
    /// Emitted just before the first audio frame of a TTS run.
    TtsStart,
    /// Emitted after the last audio frame of a TTS run has drained.
    TtsComplete,
    /// Acknowledges an `interrupt` control message.
    InterruptAck,
    /// A terminal, user-visible failure for the current turn.
    Error {
        /// Human-readable detail.
        message: String,
    },
    /// Reply to `ping`.
    Pong,
}

/// WebSocket close codes used by the driver (spec §6.1).
pub mod close_code {
    /// QR token did not resolve to a known table.
    pub const UNKNOWN_TABLE: u16 = 4004;
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Internal error.
    pub const INTERNAL_ERROR: u16 = 1011;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_audio_end_round_trips_from_json() {
        let msg: InboundControl = serde_json::from_str(r#"{"type":"audio_end"}"#).unwrap();
        assert!(matches!(msg, InboundControl::AudioEnd));
    }

    #[test]
    fn outbound_ai_token_serializes_with_tag() {
        let msg = OutboundControl::AiToken {
            token: "iki".into(),
            full_text: "iki".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ai_token");
        assert_eq!(json["token"], "iki");
    }

    #[test]
    fn unknown_intent_tag_falls_back_to_other() {
        let value: StructuredIntent = serde_json::from_value(serde_json::json!({
            "spoken_response": "ok",
            "intent": "something_new",
        }))
        .unwrap();
        assert_eq!(value.intent, IntentKind::Other);
    }

    #[test]
    fn structured_intent_round_trips() {
        let original = StructuredIntent {
            spoken_response: "İki pizza geliyor.".into(),
            intent: IntentKind::Add,
            product_name: Some("Pizza".into()),
            quantity: Some(2),
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed: StructuredIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
