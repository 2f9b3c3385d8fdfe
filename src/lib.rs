//! Sofra: real-time voice ordering gateway.
//!
//! A table-side duplex voice channel is bridged to three remote inference
//! services — speech-to-text, an LLM, and text-to-speech — and to an
//! out-of-scope persistence collaborator that owns the menu/order data.
//!
//! # Architecture
//!
//! One [`session::Session`] per open WebSocket channel, driven by
//! [`ws::driver`]:
//! - **Inbound audio** accumulates in the session's rolling buffer; a
//!   scheduler (`session::scheduler`) rate-limits partial transcription
//!   calls against `stt::RemoteSttClient`.
//! - An early-trigger predicate (`session::trigger`) decides when enough of
//!   the utterance has arrived to start a turn.
//! - `pipeline::Bridge` drives the LLM token stream, hands the first
//!   sentence to `tts::RemoteTtsClient` as soon as it's available, and
//!   relays both onto the session's outbound channel in order.
//! - `warmkeeper::WarmKeeper` keeps the STT/TTS upstreams warm between
//!   turns.

pub mod config;
pub mod error;
pub mod llm;
pub mod persistence;
pub mod pipeline;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod sse;
pub mod stt;
pub mod tts;
pub mod upstream;
pub mod warmkeeper;
pub mod ws;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use pipeline::{Bridge, TurnOutcome};
pub use session::{Session, SessionState};
pub use ws::GatewayState;
