//! Per-call turn-taking controller.
//!
//! One [`TurnController`] per session drives the whole pipeline: frames go
//! through the VAD, a speech-start opens a turn and a transcription stream,
//! the final transcript picks a reply, and synthesis streams the reply frames
//! outward while the latency record fills in. A speech-start while a reply is
//! in flight cancels it (barge-in) and supersedes the turn.
//!
//! State machine: Idle → Listening → Deciding → Responding → Idle, with any
//! speech-start jumping back to Listening. At most one turn is active (and at
//! most one mutable `LatencyTurn` exists) per session at any time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use voiceloop_core::audio::AudioFrame;
use voiceloop_core::config::AgentConfig;
use voiceloop_core::latency::{LatencyTurn, MetricsEvent};

use crate::backend::SpeechBackend;
use crate::metrics_sink::MetricsSink;
use crate::reply::ReplyPolicy;
use crate::stt::TranscriptionStream;
use crate::tts::SpeechSynthesis;
use crate::vad::VoiceActivityDetector;

/// Observable phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No active turn.
    Idle,
    /// Speech-start observed, transcription in progress.
    Listening,
    /// Final transcript received, reply being computed.
    Deciding,
    /// Synthesis active, reply frames going out.
    Responding,
}

/// The one active turn. Superseding it (barge-in) simply replaces this value;
/// the old turn's tasks notice via the generation id and stand down.
struct ActiveTurn {
    id: u64,
    state: TurnState,
    latency: LatencyTurn,
    stt: Option<Arc<dyn TranscriptionStream>>,
    synthesis: Option<Arc<dyn SpeechSynthesis>>,
}

struct Shared {
    turn_seq: u64,
    turn: Option<ActiveTurn>,
    reply: ReplyPolicy,
}

/// Everything a detached turn task needs.
struct TurnCtx {
    room: String,
    identity: String,
    stt_timeout: Duration,
    backend: Arc<dyn SpeechBackend>,
    sink: MetricsSink,
    audio_out: mpsc::UnboundedSender<AudioFrame>,
    shared: Arc<Mutex<Shared>>,
}

/// Session controller, identified by `(room, identity)`. Owns the VAD and the
/// active turn; must be driven by a single frame loop in arrival order.
pub struct TurnController {
    config: AgentConfig,
    vad: VoiceActivityDetector,
    ctx: Arc<TurnCtx>,
}

impl TurnController {
    pub fn new(
        room: String,
        identity: String,
        config: AgentConfig,
        backend: Arc<dyn SpeechBackend>,
        sink: MetricsSink,
        audio_out: mpsc::UnboundedSender<AudioFrame>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            turn_seq: 0,
            turn: None,
            reply: ReplyPolicy::from_config(&config),
        }));
        let vad = VoiceActivityDetector::new(config.vad_aggressiveness);
        let ctx = Arc::new(TurnCtx {
            room,
            identity,
            stt_timeout: Duration::from_secs(config.stt_timeout_secs),
            backend,
            sink,
            audio_out,
            shared,
        });
        Self { config, vad, ctx }
    }

    pub fn room(&self) -> &str {
        &self.ctx.room
    }

    pub fn identity(&self) -> &str {
        &self.ctx.identity
    }

    /// Ingest one raw PCM frame from the transport. A misshapen frame is a
    /// caller contract violation: it is dropped and the session continues.
    pub async fn handle_frame(&mut self, bytes: &[u8]) {
        let frame = match AudioFrame::from_le_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return;
            }
        };
        self.handle_audio(frame, Utc::now()).await;
    }

    /// Ingest one decoded frame with an explicit timestamp.
    pub async fn handle_audio(&mut self, frame: AudioFrame, ts: DateTime<Utc>) {
        if let Some(speech_start) = self.vad.classify(&frame, ts) {
            debug!("speech start detected");
            self.begin_turn(speech_start).await;
        }

        // While listening, turn audio is forwarded to the transcription stream.
        let stt = {
            let shared = self.ctx.shared.lock().await;
            shared
                .turn
                .as_ref()
                .filter(|t| t.state == TurnState::Listening)
                .and_then(|t| t.stt.clone())
        };
        if let Some(stt) = stt {
            stt.feed_audio(frame).await;
        }
    }

    /// Current phase, for observability and tests.
    pub async fn state(&self) -> TurnState {
        let shared = self.ctx.shared.lock().await;
        shared.turn.as_ref().map_or(TurnState::Idle, |t| t.state)
    }

    /// Open a new turn for a detected speech segment, superseding any active
    /// one. Barge-in cancels in-flight synthesis; the superseded turn's
    /// latency record is discarded unemitted.
    async fn begin_turn(&mut self, speech_start: DateTime<Utc>) {
        let stt = self.ctx.backend.transcription();
        let id = {
            let mut shared = self.ctx.shared.lock().await;

            if let Some(prev) = shared.turn.take() {
                if self.config.barge_in {
                    if let Some(synth) = &prev.synthesis {
                        info!(turn = prev.id, "barge-in: cancelling synthesis");
                        synth.cancel();
                    }
                }
                debug!(turn = prev.id, "turn superseded");
            }

            shared.turn_seq += 1;
            let id = shared.turn_seq;
            shared.turn = Some(ActiveTurn {
                id,
                state: TurnState::Listening,
                latency: LatencyTurn::new(speech_start),
                stt: Some(stt.clone()),
                synthesis: None,
            });
            id
        };

        tokio::spawn(run_turn(self.ctx.clone(), id, stt));
    }
}

/// Drive one turn from transcription to reply playback. Runs detached; every
/// touch of session state re-checks that this turn is still the current one,
/// so a stale task (superseded by barge-in) quietly stands down.
async fn run_turn(ctx: Arc<TurnCtx>, id: u64, stt: Arc<dyn TranscriptionStream>) {
    let Some(transcript) = stt.await_final(ctx.stt_timeout).await else {
        // Abandoned turn: no reply, no metrics emission.
        let mut shared = ctx.shared.lock().await;
        if shared.turn.as_ref().is_some_and(|t| t.id == id) {
            shared.turn = None;
            debug!(turn = id, "no final transcript in time, turn abandoned");
        }
        return;
    };

    let (synth, reply_text) = {
        let mut shared = ctx.shared.lock().await;
        let shared = &mut *shared;
        let Some(turn) = shared.turn.as_mut().filter(|t| t.id == id) else {
            debug!(turn = id, "late final transcript for superseded turn, ignoring");
            return;
        };
        if let Some(ts) = stt.first_partial_at() {
            turn.latency.mark_first_partial(ts);
        }
        turn.latency.mark_stt_final(Utc::now());
        turn.state = TurnState::Deciding;
        turn.stt = None;

        let reply_text = shared.reply.next_reply(&transcript);
        turn.latency.mark_agent_decision(Utc::now());

        let synth = ctx.backend.synthesis();
        turn.state = TurnState::Responding;
        turn.synthesis = Some(synth.clone());
        info!(turn = id, transcript = %transcript, reply = %reply_text, "reply computed");
        (synth, reply_text)
    };

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let producer = {
        let synth = synth.clone();
        tokio::spawn(async move {
            synth.synthesize(&reply_text, frame_tx).await;
        })
    };

    let mut first = true;
    while let Some(frame) = frame_rx.recv().await {
        if first {
            first = false;
            // First audible frame closes the latency record; the turn is
            // emitted exactly once, here.
            let ts = synth.first_frame_at().unwrap_or_else(Utc::now);
            let mut shared = ctx.shared.lock().await;
            if let Some(turn) = shared.turn.as_mut().filter(|t| t.id == id) {
                turn.latency.mark_first_audio(ts);
                let event =
                    MetricsEvent::latency_turn(&ctx.room, &ctx.identity, turn.latency.snapshot());
                ctx.sink.emit(event);
            }
        }
        let _ = ctx.audio_out.send(frame);
    }
    let _ = producer.await;

    // Natural completion returns the session to idle. A superseded turn was
    // already replaced and leaves the new one alone.
    let mut shared = ctx.shared.lock().await;
    if shared.turn.as_ref().is_some_and(|t| t.id == id) {
        shared.turn = None;
        debug!(turn = id, "reply stream exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use voiceloop_core::audio::FRAME_SAMPLES;
    use voiceloop_core::config::ReplyMode;
    use voiceloop_core::latency::MetricsEvent;

    use crate::backend::SimulatedBackend;
    use crate::tts::SimulatedSynthesis;

    fn speech_frame() -> AudioFrame {
        AudioFrame::from_samples(vec![5000i16; FRAME_SAMPLES]).unwrap()
    }

    /// Backend that remembers every synthesis stream it hands out.
    struct RecordingBackend {
        inner: SimulatedBackend,
        synths: StdMutex<Vec<Arc<SimulatedSynthesis>>>,
    }

    impl RecordingBackend {
        fn new(inner: SimulatedBackend) -> Self {
            Self {
                inner,
                synths: StdMutex::new(Vec::new()),
            }
        }
    }

    impl SpeechBackend for RecordingBackend {
        fn transcription(&self) -> Arc<dyn TranscriptionStream> {
            self.inner.transcription()
        }

        fn synthesis(&self) -> Arc<dyn SpeechSynthesis> {
            let synth = Arc::new(SimulatedSynthesis::new());
            self.synths.lock().unwrap().push(synth.clone());
            synth
        }
    }

    fn test_config(scripted_line: &str) -> AgentConfig {
        AgentConfig {
            reply_mode: ReplyMode::Scripted,
            scripted_lines: vec![scripted_line.to_string()],
            barge_in: true,
            stt_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn fast_backend() -> SimulatedBackend {
        SimulatedBackend {
            partial_delay: Duration::from_millis(5),
            final_delay: Duration::from_millis(30),
            ..Default::default()
        }
    }

    struct Harness {
        controller: TurnController,
        events: mpsc::UnboundedReceiver<MetricsEvent>,
        audio_out: mpsc::UnboundedReceiver<AudioFrame>,
        backend: Arc<RecordingBackend>,
    }

    fn harness(config: AgentConfig, backend: SimulatedBackend) -> Harness {
        let backend = Arc::new(RecordingBackend::new(backend));
        let (sink, events) = MetricsSink::channel();
        let (audio_tx, audio_out) = mpsc::unbounded_channel();
        let controller = TurnController::new(
            "call-test".into(),
            "agent-test".into(),
            config,
            backend.clone(),
            sink,
            audio_tx,
        );
        Harness {
            controller,
            events,
            audio_out,
            backend,
        }
    }

    async fn recv_event(rx: &mut mpsc::UnboundedReceiver<MetricsEvent>) -> MetricsEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for metrics event")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn test_full_turn_emits_one_event() {
        // "Hi" -> 120 ms of reply audio
        let mut h = harness(test_config("Hi"), fast_backend());

        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        assert_eq!(h.controller.state().await, TurnState::Listening);

        let event = recv_event(&mut h.events).await;
        assert_eq!(event.kind, "latency_turn");
        assert_eq!(event.room, "call-test");
        assert_eq!(event.identity, "agent-test");

        // All six milestones present and monotonic
        let snap = &event.turn;
        assert_eq!(snap.present_milestones().len(), 6);
        assert!(snap.present_milestones().windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            snap.round_trip_ms,
            Some(snap.playback_start_ms.unwrap() - snap.speech_start_ms.unwrap())
        );

        // Reply audio made it to the transport sink
        assert!(h.audio_out.recv().await.is_some());

        // Exactly one event, then back to idle
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.controller.state().await, TurnState::Idle);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_abandons_turn_silently() {
        let backend = SimulatedBackend {
            final_delay: Duration::from_secs(30),
            ..fast_backend()
        };
        let mut h = harness(test_config("Hi"), backend);

        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        assert_eq!(h.controller.state().await, TurnState::Listening);

        // stt_timeout_secs = 1: wait past it
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(h.controller.state().await, TurnState::Idle);
        assert!(h.events.try_recv().is_err(), "abandoned turn must not emit");
        assert!(h.audio_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_barge_in_cancels_active_synthesis() {
        // Long reply keeps synthesis busy while the caller barges in
        let mut h = harness(
            test_config("This is a fairly long scripted reply line for the caller"),
            fast_backend(),
        );

        h.controller.handle_audio(speech_frame(), Utc::now()).await;

        // First reply frame means we are Responding
        let first_event = recv_event(&mut h.events).await;
        assert_eq!(h.controller.state().await, TurnState::Responding);

        // Silence resets the VAD edge, then speech again -> barge-in
        h.controller
            .handle_audio(AudioFrame::silence(), Utc::now())
            .await;
        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        assert_eq!(h.controller.state().await, TurnState::Listening);

        let first_synth = h.backend.synths.lock().unwrap()[0].clone();
        assert!(first_synth.is_cancelled(), "barge-in must cancel synthesis");

        // The new turn runs to completion and emits its own event
        let second_event = recv_event(&mut h.events).await;
        assert!(second_event.turn.speech_start_ms >= first_event.turn.speech_start_ms);
    }

    #[tokio::test]
    async fn test_barge_in_before_reply_discards_turn_unemitted() {
        let mut h = harness(test_config("Hi"), fast_backend());

        // First speech segment; supersede it while still Listening
        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        h.controller
            .handle_audio(AudioFrame::silence(), Utc::now())
            .await;
        h.controller.handle_audio(speech_frame(), Utc::now()).await;

        // Only the second turn emits; the first one's late transcript is
        // ignored by generation id.
        let _event = recv_event(&mut h.events).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(h.events.try_recv().is_err(), "superseded turn must not emit");

        // Only one synthesis was ever started
        assert_eq!(h.backend.synths.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_active_turn() {
        let mut h = harness(test_config("Hi"), fast_backend());

        // Hammer speech-start edges; the controller must never hold more
        // than one mutable turn (turn is an Option by construction, so the
        // observable invariant is a single coherent state).
        for _ in 0..5 {
            h.controller.handle_audio(speech_frame(), Utc::now()).await;
            h.controller
                .handle_audio(AudioFrame::silence(), Utc::now())
                .await;
        }
        let state = h.controller.state().await;
        assert!(state == TurnState::Listening || state == TurnState::Idle);

        // Let everything settle: exactly one reply (the last turn) completes
        let _event = recv_event(&mut h.events).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.controller.state().await, TurnState::Idle);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_session_continues() {
        let mut h = harness(test_config("Hi"), fast_backend());

        h.controller.handle_frame(&[0u8; 100]).await;
        assert_eq!(h.controller.state().await, TurnState::Idle);

        // A well-formed speech frame still opens a turn
        h.controller
            .handle_frame(&speech_frame().to_le_bytes())
            .await;
        assert_eq!(h.controller.state().await, TurnState::Listening);
    }

    #[tokio::test]
    async fn test_listening_audio_is_fed_to_transcription() {
        let mut h = harness(test_config("Hi"), fast_backend());

        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        h.controller.handle_audio(speech_frame(), Utc::now()).await;
        h.controller.handle_audio(speech_frame(), Utc::now()).await;

        // Frames during Listening reach the stream (delivery is verified via
        // the turn completing normally; the simulated stream just counts).
        let event = recv_event(&mut h.events).await;
        assert!(event.turn.stt_final_ms.is_some());
    }
}
