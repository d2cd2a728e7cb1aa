//! Per-turn transcription stream abstraction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use voiceloop_core::audio::AudioFrame;

/// One transcription stream per turn: consumes the turn's audio and settles
/// into exactly one of two terminal states — a final transcript, or a timeout.
///
/// Implementations are the pluggability point for recognizer backends; the
/// controller only sees this contract.
#[async_trait]
pub trait TranscriptionStream: Send + Sync {
    /// Accept one frame of turn audio, in arrival order.
    async fn feed_audio(&self, frame: AudioFrame);

    /// Suspend until a final transcript is available or `timeout` elapses.
    /// A timeout is a normal outcome (abandoned turn), not an error.
    /// Must be called at most once; later calls resolve to `None`.
    async fn await_final(&self, timeout: Duration) -> Option<String>;

    /// Timestamp of the first partial result, set exactly once when observed.
    fn first_partial_at(&self) -> Option<DateTime<Utc>>;
}

/// Offline recognizer used in development and tests: emits a partial marker
/// after `partial_delay` and finalizes the configured phrase after
/// `final_delay`, both measured from stream creation. Fed audio is counted
/// but otherwise discarded.
pub struct SimulatedTranscription {
    first_partial: Mutex<Option<DateTime<Utc>>>,
    final_rx: tokio::sync::Mutex<Option<oneshot::Receiver<String>>>,
    frames_fed: AtomicUsize,
}

impl SimulatedTranscription {
    pub fn start(transcript: String, partial_delay: Duration, final_delay: Duration) -> Arc<Self> {
        let (final_tx, final_rx) = oneshot::channel();
        let stream = Arc::new(Self {
            first_partial: Mutex::new(None),
            final_rx: tokio::sync::Mutex::new(Some(final_rx)),
            frames_fed: AtomicUsize::new(0),
        });

        let timeline = stream.clone();
        tokio::spawn(async move {
            tokio::time::sleep(partial_delay).await;
            if let Ok(mut guard) = timeline.first_partial.lock() {
                guard.get_or_insert(Utc::now());
            }
            tokio::time::sleep(final_delay.saturating_sub(partial_delay)).await;
            let _ = final_tx.send(transcript);
        });

        stream
    }

    /// Number of frames fed so far.
    pub fn frames_fed(&self) -> usize {
        self.frames_fed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TranscriptionStream for SimulatedTranscription {
    async fn feed_audio(&self, _frame: AudioFrame) {
        self.frames_fed.fetch_add(1, Ordering::Relaxed);
    }

    async fn await_final(&self, timeout: Duration) -> Option<String> {
        let rx = self.final_rx.lock().await.take()?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(text)) => Some(text),
            _ => None,
        }
    }

    fn first_partial_at(&self) -> Option<DateTime<Utc>> {
        self.first_partial.lock().ok().and_then(|g| *g)
    }
}
