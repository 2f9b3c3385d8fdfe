//! Process configuration for the voice ordering gateway (spec §6.3).
//!
//! Loaded entirely from the process environment — no config file. Required
//! keys missing at startup produce [`EngineError::Configuration`] and the
//! binary refuses to start (§7 `ConfigurationFailure`).

use crate::error::{EngineError, Result};
use std::time::Duration;

/// Top-level engine configuration, assembled once at startup and shared
/// (read-only) across all sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP bind address for the axum server (e.g. `0.0.0.0:8088`).
    pub bind_addr: String,
    /// Remote STT provider settings.
    pub stt: SttConfig,
    /// Remote LLM provider settings.
    pub llm: LlmConfig,
    /// Remote TTS provider settings.
    pub tts: TtsConfig,
    /// Warm-keeper cadence.
    pub warm_keeper: WarmKeeperConfig,
    /// Process-wide upstream concurrency limit.
    pub concurrency: ConcurrencyConfig,
    /// Partial-STT scheduler thresholds.
    pub partial_stt: PartialSttConfig,
    /// Early-trigger predicate thresholds.
    pub early_trigger: EarlyTriggerConfig,
    /// Per-session lifecycle settings.
    pub session: SessionConfig,
}

/// Remote speech-to-text provider settings (spec §4.1).
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// API key for the upstream STT provider.
    pub api_key: String,
    /// Base URL for the upstream STT provider.
    pub base_url: String,
    /// Minimum gap between consecutive STT calls per session.
    pub min_gap: Duration,
    /// Language fed to the upstream (spec fixes Turkish).
    pub language: &'static str,
}

/// Remote LLM provider settings (spec §4.2).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key for the upstream LLM provider.
    pub api_key: String,
    /// Base URL for the upstream LLM provider.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum output tokens per turn.
    pub max_tokens: u32,
}

/// Remote TTS provider settings (spec §4.3).
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// API key for the upstream TTS provider.
    pub api_key: String,
    /// Base URL for the upstream TTS provider.
    pub base_url: String,
    /// Voice identifier.
    pub voice: String,
    /// Speaking rate multiplier (spec fixes ~1.15x).
    pub speaking_rate: f32,
    /// Language fed to the upstream (spec fixes Turkish).
    pub language: &'static str,
}

/// Warm-keeper cadence (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct WarmKeeperConfig {
    /// Interval between warm-keeper ticks.
    pub interval: Duration,
}

/// Process-wide concurrency limiter (spec §5 "Shared resources").
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyConfig {
    /// Max in-flight upstream calls across all sessions.
    pub max_in_flight: usize,
}

/// Partial-STT scheduler thresholds (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct PartialSttConfig {
    /// Minimum gap between consecutive partial-STT submissions.
    pub min_gap: Duration,
    /// Minimum buffered audio duration before a partial-STT call fires.
    pub min_duration: Duration,
}

/// Early-trigger predicate thresholds (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct EarlyTriggerConfig {
    /// Silence duration (since last inbound chunk) required alongside a
    /// ≥3-word partial transcript.
    pub silence_threshold: Duration,
    /// Minimum word count for the silence-based trigger leg.
    pub min_words: usize,
}

/// Per-session lifecycle settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long an idle session (no inbound frames, no active turn) may
    /// live before the driver closes its channel.
    pub idle_timeout: Duration,
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if a required key is missing
    /// or a numeric key fails to parse.
    pub fn from_env() -> Result<Self> {
        let stt = SttConfig {
            api_key: require_env("SOFRA_STT_API_KEY")?,
            base_url: env_or("SOFRA_STT_BASE_URL", "https://api.sofra-stt.example/v1"),
            min_gap: Duration::from_millis(env_parse_or("SOFRA_STT_MIN_GAP_MS", 500)?),
            language: "tr",
        };

        let llm = LlmConfig {
            api_key: require_env("SOFRA_LLM_API_KEY")?,
            base_url: env_or("SOFRA_LLM_BASE_URL", "https://api.sofra-llm.example/v1"),
            model: env_or("SOFRA_LLM_MODEL", "default"),
            temperature: env_parse_or("SOFRA_LLM_TEMPERATURE", 0.7)?,
            max_tokens: env_parse_or("SOFRA_LLM_MAX_TOKENS", 100)?,
        };

        let tts = TtsConfig {
            api_key: require_env("SOFRA_TTS_API_KEY")?,
            base_url: env_or("SOFRA_TTS_BASE_URL", "https://api.sofra-tts.example/v1"),
            voice: env_or("SOFRA_TTS_VOICE", "default"),
            speaking_rate: env_parse_or("SOFRA_TTS_SPEAKING_RATE", 1.15)?,
            language: "tr",
        };

        let warm_keeper_secs: u64 = env_parse_or("SOFRA_WARM_KEEPER_INTERVAL_SECS", 30)?;
        let warm_keeper = WarmKeeperConfig {
            interval: Duration::from_secs(warm_keeper_secs.clamp(10, 120)),
        };

        let concurrency = ConcurrencyConfig {
            max_in_flight: env_parse_or("SOFRA_MAX_UPSTREAM_CONCURRENCY", 10)?,
        };

        let partial_stt = PartialSttConfig {
            min_gap: Duration::from_millis(env_parse_or("SOFRA_STT_MIN_GAP_MS", 500)?),
            min_duration: Duration::from_millis(env_parse_or("SOFRA_STT_MIN_DURATION_MS", 1200)?),
        };

        let early_trigger = EarlyTriggerConfig {
            silence_threshold: Duration::from_millis(env_parse_or(
                "SOFRA_EARLY_TRIGGER_SILENCE_MS",
                400,
            )?),
            min_words: 3,
        };

        let session = SessionConfig {
            idle_timeout: Duration::from_secs(env_parse_or(
                "SOFRA_SESSION_IDLE_TIMEOUT_SECS",
                300,
            )?),
        };

        Ok(Self {
            bind_addr: env_or("SOFRA_BIND_ADDR", "0.0.0.0:8088"),
            stt,
            llm,
            tts,
            warm_keeper,
            concurrency,
            partial_stt,
            early_trigger,
            session,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Configuration(format!("missing required env var {key}")))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| EngineError::Configuration(format!("invalid value for {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
