//! Per-session duplex driver (spec §4.9, §6.1): channel-open lifecycle,
//! the inbound demultiplexer, the partial-STT scheduler tick, and the
//! outbound writer task.

use crate::persistence::MenuContext;
use crate::pipeline::corrective::{word_jaccard, CORRECTIVE_RESTART_THRESHOLD};
use crate::protocol::{close_code, InboundControl, OutboundControl, OutboundFrame};
use crate::session::{Session, SessionState, TaskKey};
use crate::ws::GatewayState;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `cancel_active_streams`/channel-close waits for in-flight tasks
/// to drain before abandoning them (spec §5 "on channel-close").
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cadence of the partial-STT scheduler tick (spec §4.6 is expressed in
/// terms of elapsed time, not a fixed tick; polling this often is well
/// under the smallest configured `min_gap`/`min_duration`).
const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Outbound channel depth: JSON control messages plus binary audio frames
/// share this one queue (spec §5 "Ordering guarantees").
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Session-open greeting, spoken once per channel-open (spec §4.9, §8 S1).
const GREETING_TEXT: &str = "Hoş geldiniz! Sipariş vermek için buyurun.";

/// Axum handler for `GET /voice/{qr_token}`: upgrades to a WebSocket and
/// hands the connection to [`run_session`].
pub async fn voice_handler(
    ws: WebSocketUpgrade,
    Path(qr_token): Path<String>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, qr_token, state))
}

async fn run_session(socket: WebSocket, qr_token: String, state: GatewayState) {
    let menu = match state.persistence.get_menu(&qr_token).await {
        Ok(menu) => menu,
        Err(error) => {
            warn!(%qr_token, %error, "channel-open resolved to an unknown table");
            close_with_code(socket, close_code::UNKNOWN_TABLE, "unknown table").await;
            return;
        }
    };

    let session = Arc::new(new_session(&state, qr_token, menu));
    info!(table = %session.table_id, opened_at = %session.opened_at().await, "voice session opened");

    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(run_writer(sink, outbound_rx));

    crate::pipeline::bridge::emit_greeting(&state.tts, &session, &outbound_tx, GREETING_TEXT.into())
        .await;

    run_inbound_loop(&state, &session, &outbound_tx, stream).await;

    session.cancel_active_streams(DRAIN_TIMEOUT).await;
    drop(outbound_tx);
    let _ = writer.await;
    info!(table = %session.table_id, age = ?session.age().await, "voice session closed");
}

fn new_session(state: &GatewayState, qr_token: String, menu: MenuContext) -> Session {
    Session::new(
        qr_token,
        menu,
        state.config.partial_stt.min_gap,
        state.config.partial_stt.min_gap,
        state.config.partial_stt.min_duration,
        state.config.early_trigger.silence_threshold,
    )
}

/// Drains the outbound channel onto the real socket, translating each
/// [`OutboundFrame`] into a WebSocket text or binary message. Runs until
/// the channel closes (session end) or the socket write fails.
async fn run_writer(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            OutboundFrame::Control(control) => match serde_json::to_string(&control) {
                Ok(json) => Message::Text(Utf8Bytes::from(json)),
                Err(error) => {
                    warn!(%error, "failed to serialize outbound control message");
                    continue;
                }
            },
            OutboundFrame::Binary(bytes) => Message::Binary(bytes),
            OutboundFrame::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: Utf8Bytes::from(reason),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        };
        if sink.send(message).await.is_err() {
            return;
        }
    }
}

/// State tracked across the inbound loop for one in-flight turn, used to
/// decide whether a late final-STT result should trigger a corrective
/// restart (spec §4.7). Cancellation itself is owned by the session's task
/// registry under [`TaskKey::Llm`]; this just remembers what transcript the
/// running turn was started with.
struct InFlightTurn {
    committed_transcript: String,
}

/// Terminal outcome of a partial-STT call spawned off the inbound loop by
/// [`tick_partial_stt`], delivered back to [`run_inbound_loop`] over a
/// channel so the merge/trigger decision still runs on the single task
/// that owns `in_flight`, without the call itself blocking that loop.
struct PartialSttDone {
    outcome: crate::error::Result<crate::stt::TranscribeOutcome>,
}

/// Depth of the partial-STT result channel: at most one call is ever in
/// flight per session (gated by `TaskKey::Stt`), so this only needs to
/// absorb the result landing before the loop gets back around to it.
const STT_DONE_CHANNEL_CAPACITY: usize = 2;

async fn run_inbound_loop(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    mut stream: futures_util::stream::SplitStream<WebSocket>,
) {
    let mut ticker = tokio::time::interval(SCHEDULER_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut in_flight: Option<InFlightTurn> = None;
    let idle_timeout = state.config.session.idle_timeout;
    let idle_deadline = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_deadline);
    let (stt_done_tx, mut stt_done_rx) =
        mpsc::channel::<PartialSttDone>(STT_DONE_CHANNEL_CAPACITY);

    loop {
        tokio::select! {
            biased;
            message = stream.next() => {
                let Some(message) = message else { return };
                idle_deadline.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                match message {
                    Ok(message) => {
                        if !handle_inbound_message(state, session, outbound, &mut in_flight, message).await {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "WebSocket read error, closing session");
                        let _ = outbound
                            .send(OutboundFrame::Close {
                                code: close_code::INTERNAL_ERROR,
                                reason: "internal error".into(),
                            })
                            .await;
                        return;
                    }
                }
            }
            done = stt_done_rx.recv() => {
                if let Some(done) = done {
                    handle_partial_stt_done(state, session, outbound, &mut in_flight, done).await;
                }
            }
            _ = ticker.tick() => {
                tick_partial_stt(state, session, outbound, &mut in_flight, &stt_done_tx).await;
            }
            () = &mut idle_deadline => {
                info!(table = %session.table_id, ?idle_timeout, "session idle timeout, closing channel");
                let _ = outbound
                    .send(OutboundFrame::Close {
                        code: close_code::NORMAL,
                        reason: "idle timeout".into(),
                    })
                    .await;
                return;
            }
        }
    }
}

/// Returns `false` when the connection should be torn down.
async fn handle_inbound_message(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
    message: Message,
) -> bool {
    match message {
        Message::Binary(bytes) => {
            session.add_audio_chunk(&bytes).await;
            true
        }
        Message::Text(text) => {
            match serde_json::from_str::<InboundControl>(&text) {
                Ok(InboundControl::AudioEnd) => {
                    finalize_turn(state, session, outbound, in_flight).await;
                    true
                }
                Ok(InboundControl::Interrupt) => {
                    session.cancel_active_streams(DRAIN_TIMEOUT).await;
                    *in_flight = None;
                    session.clear_transcript().await;
                    session.clear_processed_audio(false).await;
                    session.set_state(SessionState::Listening).await;
                    let _ = outbound
                        .send(OutboundFrame::Control(OutboundControl::InterruptAck))
                        .await;
                    true
                }
                Ok(InboundControl::Ping) => {
                    let _ = outbound.send(OutboundFrame::Control(OutboundControl::Pong)).await;
                    true
                }
                Ok(InboundControl::PlaybackComplete) => true,
                Err(error) => {
                    warn!(%error, "ignoring unparseable control message");
                    true
                }
            }
        }
        Message::Close(_) => false,
        Message::Ping(_) | Message::Pong(_) => true,
    }
}

/// Spec §4.6/§4.7: on each scheduler tick, check whether the gating
/// predicate allows a partial-STT call and, if so, spawn it as a task
/// registered under [`TaskKey::Stt`] rather than awaiting it here — the
/// call (per-session gate wait plus up to the 60s HTTP timeout and its
/// retry backoffs) must never block this loop from reading an inbound
/// `interrupt`. The merge/trigger decision that used to follow the await
/// inline now happens in [`handle_partial_stt_done`] once the result
/// lands back on `stt_done_tx`.
async fn tick_partial_stt(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
    stt_done_tx: &mpsc::Sender<PartialSttDone>,
) {
    reap_finished_turn(session, in_flight).await;

    if !session.can_process_partial_stt().await {
        return;
    }
    let audio = session.buffer_snapshot().await;
    session.mark_stt_issued().await;

    let _ = outbound
        .send(OutboundFrame::Control(OutboundControl::Status { message: "transcribing" }))
        .await;

    spawn_partial_stt_task(state, session, audio, stt_done_tx.clone()).await;
}

/// Spawns the partial-STT upstream call under [`TaskKey::Stt`], so
/// `can_process_partial_stt`'s `stt_call_in_flight` check reflects a real
/// in-flight call and the inbound loop stays responsive while it runs.
async fn spawn_partial_stt_task(
    state: &GatewayState,
    session: &Arc<Session>,
    audio: Vec<u8>,
    stt_done_tx: mpsc::Sender<PartialSttDone>,
) {
    let cancel = CancellationToken::new();
    let stt = state.stt.clone();
    let session_clone = session.clone();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            () = task_cancel.cancelled() => return,
            outcome = stt.transcribe_partial(&session_clone.stt_gate, &audio, false) => outcome,
        };
        let _ = stt_done_tx.send(PartialSttDone { outcome }).await;
    });
    session.registry.insert(TaskKey::Stt, cancel, handle).await;
}

/// Handles a completed partial-STT call reported back by
/// [`spawn_partial_stt_task`]: merges the result into the running
/// transcript, checks for a corrective restart, and triggers an LLM turn
/// once the early-trigger predicate fires. Runs on the same task that
/// owns `in_flight`, so this is where the inline logic `tick_partial_stt`
/// used to run synchronously now lives.
async fn handle_partial_stt_done(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
    done: PartialSttDone,
) {
    if !session.registry.contains(TaskKey::Stt).await {
        // Superseded by an interrupt/cancel_all since the call finished.
        return;
    }
    session.registry.cancel(TaskKey::Stt).await;

    let text = match done.outcome {
        Ok(crate::stt::TranscribeOutcome::Transcribed(result)) => result,
        Ok(crate::stt::TranscribeOutcome::Skipped) => return,
        Err(error) => {
            warn!(%error, "partial STT call failed");
            return;
        }
    };

    let merged = session.merge_partial(&text.text).await;
    let _ = outbound
        .send(OutboundFrame::Control(OutboundControl::PartialTranscript {
            text: merged,
            confidence: text.confidence,
            is_final: false,
        }))
        .await;

    maybe_corrective_restart(state, session, outbound, in_flight).await;

    if in_flight.is_none() && session.should_trigger_llm().await {
        start_turn(state, session, outbound, in_flight).await;
    }
}

/// Spec §6.1 `audio_end`: force the transcript final, voice the last word
/// in, and start (or corrective-restart) the turn immediately rather than
/// waiting for the silence-based trigger.
async fn finalize_turn(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
) {
    let audio = session.buffer_snapshot().await;
    if !audio.is_empty() {
        let _ = outbound
            .send(OutboundFrame::Control(OutboundControl::Status { message: "transcribing" }))
            .await;
        match state.stt.transcribe_partial(&session.stt_gate, &audio, true).await {
            Ok(crate::stt::TranscribeOutcome::Transcribed(result)) => {
                session.merge_partial(&result.text).await;
            }
            Ok(crate::stt::TranscribeOutcome::Skipped) => {}
            Err(error) => warn!(%error, "final STT call failed"),
        }
    }

    let transcript = session.partial_transcript().await;
    let _ = outbound
        .send(OutboundFrame::Control(OutboundControl::Transcript {
            text: transcript.clone(),
            is_final: true,
        }))
        .await;

    // §4.9 `audio_end` clears the buffer (keeping the acoustic overlap
    // tail) unconditionally, independent of whether a turn actually
    // starts or restarts below.
    session.clear_processed_audio(true).await;

    if transcript.trim().is_empty() {
        return;
    }

    reap_finished_turn(session, in_flight).await;
    if in_flight.is_some() {
        maybe_corrective_restart(state, session, outbound, in_flight).await;
    } else {
        start_turn(state, session, outbound, in_flight).await;
    }
}

/// Spec §4.7: compare the freshly merged transcript against the one the
/// in-flight turn was started with; below [`CORRECTIVE_RESTART_THRESHOLD`]
/// word-Jaccard similarity, cancel it and restart with the new text.
async fn maybe_corrective_restart(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
) {
    let Some(turn) = in_flight.as_ref() else { return };
    let current = session.partial_transcript().await;
    let similarity = word_jaccard(&turn.committed_transcript, &current);
    if similarity >= CORRECTIVE_RESTART_THRESHOLD {
        return;
    }
    info!(similarity, "corrective restart: STT diverged from committed partial");
    session.registry.cancel(TaskKey::Llm).await;
    session.registry.cancel(TaskKey::Tts).await;
    *in_flight = None;
    start_turn(state, session, outbound, in_flight).await;
}

/// Clear `in_flight` once its registered task has finished on its own
/// (normal completion, not a barge-in/corrective cancellation, both of
/// which clear it inline).
async fn reap_finished_turn(session: &Arc<Session>, in_flight: &mut Option<InFlightTurn>) {
    if in_flight.is_some() && !session.registry.contains(TaskKey::Llm).await {
        *in_flight = None;
    }
}

async fn start_turn(
    state: &GatewayState,
    session: &Arc<Session>,
    outbound: &mpsc::Sender<OutboundFrame>,
    in_flight: &mut Option<InFlightTurn>,
) {
    let transcript = session.partial_transcript().await;
    if transcript.trim().is_empty() {
        return;
    }
    session.clear_transcript().await;
    session.clear_processed_audio(true).await;

    let cancel = CancellationToken::new();
    let bridge = state.bridge.clone();
    let persistence = state.persistence.clone();
    let session_clone = session.clone();
    let outbound_clone = outbound.clone();
    let turn_cancel = cancel.clone();
    let transcript_for_task = transcript.clone();
    let handle = tokio::spawn(async move {
        let _ = bridge
            .run_turn(
                &session_clone,
                &outbound_clone,
                &persistence,
                turn_cancel,
                transcript_for_task,
            )
            .await;
    });
    session.registry.insert(TaskKey::Llm, cancel, handle).await;
    *in_flight = Some(InFlightTurn {
        committed_transcript: transcript,
    });
}

async fn close_with_code(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from(reason.to_owned()),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
