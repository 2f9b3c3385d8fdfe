//! Process-wide warm-keeper (spec §4.4, §9 "Process-wide warm-keeper").
//!
//! A single background task, started at engine init and stopped at engine
//! shutdown, that issues trivial STT and TTS calls on a fixed interval to
//! defeat upstream cold starts. Modeled as an engine-scoped service with a
//! clear start/stop rather than a module-level singleton — no global
//! mutable state beyond its own task handle.

use crate::stt::{RemoteSttClient, SttSessionGate};
use crate::tts::{RemoteTtsClient, TtsEvent};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Trivial payload for the STT warm-call: small but above the
/// [`crate::stt::RemoteSttClient`] minimum-size skip threshold.
const WARM_AUDIO_BYTES: usize = 2048;

/// Trivial payload for the TTS warm-call.
const WARM_TEXT: &str = "merhaba";

/// Background task that periodically pings STT and TTS to keep their
/// serverless containers warm. `start`/`stop` are idempotent: calling
/// `start` while already running is a no-op that returns the existing
/// handle's cancellation token; `stop` on a never-started keeper is a no-op.
pub struct WarmKeeper {
    stt: RemoteSttClient,
    tts: RemoteTtsClient,
    interval: Duration,
    handle: Option<(JoinHandle<()>, CancellationToken)>,
}

impl WarmKeeper {
    /// Construct a stopped warm-keeper bound to the shared remote clients.
    #[must_use]
    pub fn new(stt: RemoteSttClient, tts: RemoteTtsClient, interval: Duration) -> Self {
        Self {
            stt,
            tts,
            interval,
            handle: None,
        }
    }

    /// Start the background loop. Idempotent.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let stt = self.stt.clone();
        let tts = self.tts.clone();
        let interval = self.interval;
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_loop(stt, tts, interval, task_cancel).await;
        });
        self.handle = Some((handle, cancel));
    }

    /// Stop the background loop and wait for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        let Some((handle, cancel)) = self.handle.take() else {
            return;
        };
        cancel.cancel();
        let _ = handle.await;
    }
}

async fn run_loop(
    stt: RemoteSttClient,
    tts: RemoteTtsClient,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                tokio::join!(warm_stt(&stt), warm_tts(&tts));
            }
        }
    }
}

async fn warm_stt(stt: &RemoteSttClient) {
    let gate = SttSessionGate::new(Duration::ZERO);
    let payload = vec![0u8; WARM_AUDIO_BYTES];
    if let Err(error) = stt.transcribe_partial(&gate, &payload, false).await {
        debug!(%error, "warm-keeper STT call failed, ignoring");
    }
}

async fn warm_tts(tts: &RemoteTtsClient) {
    let cancel = CancellationToken::new();
    let mut rx = tts.speak_stream(cancel, WARM_TEXT.to_owned());
    while let Some(event) = rx.recv().await {
        if let TtsEvent::Failed(failure) = event {
            warn!(?failure, "warm-keeper TTS call failed, ignoring");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SttConfig, TtsConfig};
    use crate::upstream::Upstream;

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins_cleanly() {
        let upstream = Upstream::new(4);
        let stt = RemoteSttClient::new(
            upstream.clone(),
            SttConfig {
                api_key: "k".into(),
                base_url: "http://127.0.0.1:0".into(),
                min_gap: Duration::ZERO,
                language: "tr",
            },
        );
        let tts = RemoteTtsClient::new(
            upstream,
            TtsConfig {
                api_key: "k".into(),
                base_url: "http://127.0.0.1:0".into(),
                voice: "default".into(),
                speaking_rate: 1.15,
                language: "tr",
            },
        );
        let mut keeper = WarmKeeper::new(stt, tts, Duration::from_millis(20));
        keeper.start();
        keeper.start();
        assert!(keeper.handle.is_some());
        keeper.stop().await;
        assert!(keeper.handle.is_none());
        keeper.stop().await;
    }
}
