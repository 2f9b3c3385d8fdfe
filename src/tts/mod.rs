//! Remote TTS client (spec §4.3): streamed PCM16 synthesis.

mod client;

pub use client::{RemoteTtsClient, TtsEvent, TtsStreamFailure};
