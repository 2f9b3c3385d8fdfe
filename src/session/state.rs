//! Session state machine (spec §3 "Session", "Session state", §4.5).

use crate::persistence::MenuContext;
use crate::session::registry::TaskRegistry;
use crate::session::{scheduler, trigger};
use crate::stt::SttSessionGate;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Hard upper bound on the rolling audio buffer (spec §3 "Audio buffer").
const MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Suffix length kept on overrun truncation (spec §8 boundary behaviour).
const TRUNCATE_TO_BYTES: usize = 512 * 1024;

/// Acoustic overlap tail retained across a turn boundary (spec §3: "≈500ms
/// at 16kHz mono, 16-bit — about 8 KB").
const OVERLAP_TAIL_BYTES: usize = 8 * 1024;

/// One of the states in spec §3 "Session state". `Generating-LLM` and
/// `Streaming-TTS` may coexist in practice (spec note); this field tracks
/// the dominant outbound activity rather than a strict partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, no capture in flight.
    Idle,
    /// Inbound audio frames accepted; partial-STT may fire.
    Listening,
    /// An STT call is in flight.
    ProcessingStt,
    /// An LLM token stream is active.
    GeneratingLlm,
    /// TTS audio frames are being emitted to the client.
    StreamingTts,
    /// Transient: all in-flight tasks are being cancelled.
    Interrupted,
}

/// Rolling raw-audio buffer plus its timing marks (spec §3 "Audio
/// buffer").
struct AudioBuffer {
    bytes: Vec<u8>,
    last_chunk_time: Instant,
    last_stt_time: Instant,
}

impl AudioBuffer {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            bytes: Vec::new(),
            last_chunk_time: now,
            last_stt_time: now,
        }
    }

    fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        self.last_chunk_time = Instant::now();
        if self.bytes.len() > MAX_BUFFER_BYTES {
            let start = self.bytes.len() - TRUNCATE_TO_BYTES;
            self.bytes.drain(..start);
        }
    }

    fn clear(&mut self, keep_overlap: bool) {
        if keep_overlap && self.bytes.len() > OVERLAP_TAIL_BYTES {
            let start = self.bytes.len() - OVERLAP_TAIL_BYTES;
            self.bytes.drain(..start);
        } else if !keep_overlap {
            self.bytes.clear();
        }
    }
}

/// Running best-guess transcript for the current turn (spec §3 "Partial
/// transcript").
struct PartialTranscript {
    text: String,
    last_update: Instant,
}

impl PartialTranscript {
    fn new() -> Self {
        Self {
            text: String::new(),
            last_update: Instant::now(),
        }
    }

    fn clear(&mut self) {
        self.text.clear();
        self.last_update = Instant::now();
    }
}

struct Inner {
    state: SessionState,
    buffer: AudioBuffer,
    transcript: PartialTranscript,
    session_start: Instant,
    /// Wall-clock open time, surfaced in structured logs/telemetry
    /// alongside the monotonic [`Self::session_start`] used for scheduling
    /// (spec §9 ambient stack: chrono for wall-clock, `Instant` for
    /// monotonic timing).
    opened_at: DateTime<Utc>,
    menu: MenuContext,
}

/// Per-table, per-channel voice session (spec §3). Owns its buffer,
/// transcript, and task registry exclusively; all three are destroyed when
/// the channel closes. State mutations are serialized by `inner`'s lock;
/// the STT mutex (`stt_gate`) is a separate lock purely to serialize
/// upstream STT calls, never held across unrelated state mutation (spec
/// §5 "Locking discipline").
pub struct Session {
    /// Table identifier resolved from the QR token at channel-open.
    pub table_id: String,
    inner: Mutex<Inner>,
    /// Cancellable task slots for this session's STT/LLM/TTS work (spec
    /// §3 "Task registry").
    pub registry: TaskRegistry,
    /// Serializes STT calls for this session (spec §4.1 rule 5).
    pub stt_gate: SttSessionGate,
    partial_stt_min_gap: Duration,
    partial_stt_min_duration: Duration,
    early_trigger_silence: Duration,
}

impl Session {
    /// Construct a new session in `Idle` state for `table_id`.
    #[must_use]
    pub fn new(
        table_id: String,
        menu: MenuContext,
        stt_min_gap: Duration,
        partial_stt_min_gap: Duration,
        partial_stt_min_duration: Duration,
        early_trigger_silence: Duration,
    ) -> Self {
        Self {
            table_id,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                buffer: AudioBuffer::new(),
                transcript: PartialTranscript::new(),
                session_start: Instant::now(),
                opened_at: Utc::now(),
                menu,
            }),
            registry: TaskRegistry::new(),
            stt_gate: SttSessionGate::new(stt_min_gap),
            partial_stt_min_gap,
            partial_stt_min_duration,
            early_trigger_silence,
        }
    }

    /// Current state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Force a state transition. Internal transitions beyond simple
    /// bookkeeping (e.g. Idle→Listening on first inbound frame) are
    /// expressed as direct calls to this from the driver/bridge, which own
    /// §3's transition table.
    pub async fn set_state(&self, state: SessionState) {
        self.inner.lock().await.state = state;
    }

    /// The cached menu context sent to the LLM (spec §4.2: "only re-sent
    /// when the menu changes" — cached once per session at open), rendered
    /// as compact prompt text.
    pub async fn menu_prompt_context(&self) -> String {
        self.inner.lock().await.menu.to_prompt_context()
    }

    /// The full cached menu, for looking up a recommended product record
    /// (spec §6.1 `recommendation` message).
    pub async fn menu(&self) -> MenuContext {
        self.inner.lock().await.menu.clone()
    }

    /// Append an inbound audio chunk to the buffer, transitioning
    /// Idle→Listening if this is the first chunk of a turn (spec §4.5
    /// `add_audio_chunk`, §6.1 inbound demultiplexer).
    pub async fn add_audio_chunk(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Idle {
            inner.state = SessionState::Listening;
        }
        inner.buffer.append(chunk);
    }

    /// Current buffer contents, cloned out so the caller can submit it to
    /// STT without holding the session lock across the upstream call
    /// (spec §5 "Locking discipline").
    pub async fn buffer_snapshot(&self) -> Vec<u8> {
        self.inner.lock().await.buffer.bytes.clone()
    }

    /// Spec §4.5/§4.6: whether the partial-STT scheduler should fire now.
    pub async fn can_process_partial_stt(&self) -> bool {
        let inner = self.inner.lock().await;
        let stt_in_flight = self.registry.contains(crate::session::TaskKey::Stt).await;
        scheduler::can_process_partial_stt(
            inner.buffer.bytes.len(),
            inner.buffer.last_stt_time.elapsed(),
            self.partial_stt_min_gap,
            self.partial_stt_min_duration,
            stt_in_flight,
        )
    }

    /// Mark that an STT call was just issued, resetting the rate-limit
    /// clock.
    pub async fn mark_stt_issued(&self) {
        self.inner.lock().await.buffer.last_stt_time = Instant::now();
    }

    /// Merge a fresh partial-STT result into the running transcript (spec
    /// §4.1 `merge`), returning the merged text.
    pub async fn merge_partial(&self, fresh: &str) -> String {
        let mut inner = self.inner.lock().await;
        let merged = crate::stt::merge::merge(&inner.transcript.text, fresh);
        inner.transcript.text = merged.clone();
        inner.transcript.last_update = Instant::now();
        merged
    }

    /// Current merged partial transcript.
    pub async fn partial_transcript(&self) -> String {
        self.inner.lock().await.transcript.text.clone()
    }

    /// Spec §4.5/§4.7: whether the early-trigger predicate fires now.
    pub async fn should_trigger_llm(&self) -> bool {
        let inner = self.inner.lock().await;
        trigger::should_trigger_llm(
            &inner.transcript.text,
            inner.buffer.last_chunk_time.elapsed(),
            self.early_trigger_silence,
        )
    }

    /// Cancel every in-flight task for this session (spec §4.5
    /// `cancel_active_streams`). Used on barge-in and channel-close.
    pub async fn cancel_active_streams(&self, drain_timeout: Duration) {
        self.set_state(SessionState::Interrupted).await;
        self.registry.cancel_all(drain_timeout).await;
    }

    /// Drop the processed audio buffer, optionally retaining a small
    /// acoustic overlap tail into the next turn (spec §4.5
    /// `clear_processed_audio`).
    pub async fn clear_processed_audio(&self, keep_overlap: bool) {
        self.inner.lock().await.buffer.clear(keep_overlap);
    }

    /// Clear the partial transcript (turn boundary or barge-in).
    pub async fn clear_transcript(&self) {
        self.inner.lock().await.transcript.clear();
    }

    /// How long this session has been alive.
    pub async fn age(&self) -> Duration {
        self.inner.lock().await.session_start.elapsed()
    }

    /// Wall-clock time the session was opened, for structured logging.
    pub async fn opened_at(&self) -> DateTime<Utc> {
        self.inner.lock().await.opened_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        Session::new(
            "T1".into(),
            MenuContext {
                restaurant: "Sofra".into(),
                table: "1".into(),
                products: vec![],
                allergens: vec![],
            },
            Duration::from_millis(0),
            Duration::from_millis(0),
            Duration::from_millis(0),
            Duration::from_millis(400),
        )
    }

    #[tokio::test]
    async fn opened_at_is_recorded_at_construction() {
        let before = Utc::now();
        let session = test_session();
        let opened_at = session.opened_at().await;
        assert!(opened_at >= before);
        assert!(opened_at <= Utc::now());
    }

    #[tokio::test]
    async fn first_chunk_transitions_idle_to_listening() {
        let session = test_session();
        assert_eq!(session.state().await, SessionState::Idle);
        session.add_audio_chunk(&[0u8; 16]).await;
        assert_eq!(session.state().await, SessionState::Listening);
    }

    #[tokio::test]
    async fn buffer_truncates_past_one_megabyte() {
        let session = test_session();
        session.add_audio_chunk(&vec![1u8; MAX_BUFFER_BYTES]).await;
        session.add_audio_chunk(&vec![2u8; 1]).await;
        let snapshot = session.buffer_snapshot().await;
        assert_eq!(snapshot.len(), TRUNCATE_TO_BYTES + 1);
    }

    #[tokio::test]
    async fn clear_with_overlap_retains_tail() {
        let session = test_session();
        session.add_audio_chunk(&vec![7u8; OVERLAP_TAIL_BYTES * 2]).await;
        session.clear_processed_audio(true).await;
        let snapshot = session.buffer_snapshot().await;
        assert_eq!(snapshot.len(), OVERLAP_TAIL_BYTES);
    }

    #[tokio::test]
    async fn clear_without_overlap_empties_buffer() {
        let session = test_session();
        session.add_audio_chunk(&vec![7u8; 4096]).await;
        session.clear_processed_audio(false).await;
        assert!(session.buffer_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn merge_updates_running_transcript() {
        let session = test_session();
        assert_eq!(session.merge_partial("iki pizza").await, "iki pizza");
        assert_eq!(
            session.merge_partial("pizza lütfen").await,
            "iki pizza lütfen"
        );
    }
}
