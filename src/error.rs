//! Error taxonomy for the voice ordering gateway.
//!
//! Kinds mirror the propagation policy of spec §7: transient upstream
//! failures are retried where the client owns retries (STT), and otherwise
//! surface as a terminal error the bridge converts into an outbound `error`
//! control message.

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A retriable upstream condition (5xx, 429, connection reset, idle-gap
    /// timeout) that exhausted its retry budget.
    #[error("transient upstream failure ({provider}): {message}")]
    TransientUpstream {
        /// Which upstream ("stt", "llm", "tts").
        provider: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// A non-retriable upstream condition (4xx other than 429, malformed
    /// response).
    #[error("upstream rejected request ({provider}): {message}")]
    UpstreamRejected {
        /// Which upstream ("stt", "llm", "tts").
        provider: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Unreadable audio, unparseable control JSON, or an oversized frame.
    /// Logged and dropped; never fatal to the session.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown message type or a state-incompatible control message
    /// (e.g. `audio_end` while Idle). Logged and ignored.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// QR token does not resolve to a known table.
    #[error("unknown table for token")]
    TableUnknown,

    /// Missing or invalid configuration at startup. The engine refuses to
    /// start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The persistence collaborator rejected or failed an operation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A channel between internal stages closed unexpectedly.
    #[error("channel error: {0}")]
    Channel(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error kind should be reported to the client as a
    /// terminal turn failure (`{"type":"error"}`) rather than silently
    /// dropped (§7 propagation policy).
    #[must_use]
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            Self::TransientUpstream { .. } | Self::UpstreamRejected { .. } | Self::Persistence(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
