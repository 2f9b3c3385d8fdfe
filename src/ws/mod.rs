//! Duplex WebSocket endpoint: shared gateway state, the channel-open
//! handler, and the per-session driver (spec §4.9, §6.1).

pub mod driver;

use crate::config::EngineConfig;
use crate::llm::RemoteLlmClient;
use crate::persistence::MenuAndOrderStore;
use crate::pipeline::Bridge;
use crate::stt::RemoteSttClient;
use crate::tts::RemoteTtsClient;
use crate::upstream::Upstream;
use std::sync::Arc;

/// Everything a connection handler needs, shared read-only across every
/// session (spec §5 "Shared resources").
#[derive(Clone)]
pub struct GatewayState {
    /// Resolved process configuration.
    pub config: Arc<EngineConfig>,
    /// Remote STT client, used directly by the driver for partial/final
    /// transcription calls.
    pub stt: RemoteSttClient,
    /// Remote TTS client, used directly by the driver to voice the
    /// session-open greeting.
    pub tts: RemoteTtsClient,
    /// LLM/TTS streaming bridge, shared across sessions.
    pub bridge: Bridge,
    /// Out-of-scope persistence collaborator (spec §6.2).
    pub persistence: Arc<dyn MenuAndOrderStore>,
}

impl GatewayState {
    /// Assemble gateway state from configuration and a persistence
    /// collaborator. Builds the shared [`Upstream`] and the three remote
    /// clients once.
    #[must_use]
    pub fn new(config: EngineConfig, persistence: Arc<dyn MenuAndOrderStore>) -> Self {
        let upstream = Upstream::new(config.concurrency.max_in_flight);
        let stt = RemoteSttClient::new(upstream.clone(), config.stt.clone());
        let llm = RemoteLlmClient::new(upstream.clone(), config.llm.clone());
        let tts = RemoteTtsClient::new(upstream, config.tts.clone());
        Self {
            config: Arc::new(config),
            stt,
            tts: tts.clone(),
            bridge: Bridge::new(llm, tts),
            persistence,
        }
    }
}
