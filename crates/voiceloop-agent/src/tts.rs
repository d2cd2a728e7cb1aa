//! Per-turn speech synthesis stream abstraction.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use voiceloop_core::audio::{frame_duration, AudioFrame, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE};

/// One synthesis stream per turn: turns reply text into a lazy, finite,
/// cancellable sequence of audio frames at the 20 ms cadence.
///
/// Cancellation is cooperative — the flag is checked once per frame boundary,
/// so at most one more frame is produced after `cancel()` is observed. A
/// frame already in flight is never truncated.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Produce frames into `frames` until the text is exhausted or the
    /// stream is cancelled. Empty text terminates with zero frames.
    async fn synthesize(&self, text: &str, frames: mpsc::UnboundedSender<AudioFrame>);

    /// Request cooperative cancellation. Idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    /// Timestamp of the first yielded frame, set exactly once.
    fn first_frame_at(&self) -> Option<DateTime<Utc>>;
}

/// Number of frames synthesized for a reply: 60 ms of audio per character,
/// capped at 2.5 s.
pub fn frames_for_text(text: &str) -> usize {
    let duration_ms = ((text.len() as u64) * 60).min(2_500);
    (duration_ms / FRAME_MS) as usize
}

/// Offline synthesizer used in development and tests: a 440 Hz tone, paced
/// by sleeping one frame duration per frame to simulate playback time.
pub struct SimulatedSynthesis {
    token: CancellationToken,
    first_frame: Mutex<Option<DateTime<Utc>>>,
}

impl SimulatedSynthesis {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            first_frame: Mutex::new(None),
        }
    }
}

impl Default for SimulatedSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

fn tone_frame(index: usize) -> AudioFrame {
    let mut samples = Vec::with_capacity(FRAME_SAMPLES);
    for k in 0..FRAME_SAMPLES {
        let n = index * FRAME_SAMPLES + k;
        let t = n as f64 / SAMPLE_RATE as f64;
        let v = (0.1 * (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 32767.0) as i16;
        samples.push(v);
    }
    AudioFrame::from_samples(samples).expect("tone frame is fixed-size")
}

#[async_trait]
impl SpeechSynthesis for SimulatedSynthesis {
    async fn synthesize(&self, text: &str, frames: mpsc::UnboundedSender<AudioFrame>) {
        let total = frames_for_text(text);
        for i in 0..total {
            if self.token.is_cancelled() {
                debug!(produced = i, "synthesis cancelled");
                break;
            }
            if let Ok(mut guard) = self.first_frame.lock() {
                guard.get_or_insert(Utc::now());
            }
            if frames.send(tone_frame(i)).is_err() {
                debug!("frame receiver dropped, stopping synthesis");
                break;
            }
            tokio::time::sleep(frame_duration()).await;
        }
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn first_frame_at(&self) -> Option<DateTime<Utc>> {
        self.first_frame.lock().ok().and_then(|g| *g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_frames_for_text() {
        assert_eq!(frames_for_text(""), 0);
        // 10 chars -> 600 ms -> 30 frames
        assert_eq!(frames_for_text("0123456789"), 30);
        // Long text caps at 2.5 s -> 125 frames
        assert_eq!(frames_for_text(&"x".repeat(1000)), 125);
    }

    #[tokio::test]
    async fn test_empty_text_terminates_with_zero_frames() {
        let synth = SimulatedSynthesis::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        synth.synthesize("", tx).await;
        assert!(rx.recv().await.is_none());
        assert!(synth.first_frame_at().is_none());
    }

    #[tokio::test]
    async fn test_first_frame_timestamp_set_once() {
        let synth = SimulatedSynthesis::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        synth.synthesize("ab", tx).await;

        let first = synth.first_frame_at().expect("first frame recorded");
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, frames_for_text("ab"));
        assert_eq!(synth.first_frame_at(), Some(first));
    }

    #[tokio::test]
    async fn test_cancel_stops_within_one_frame() {
        let synth = Arc::new(SimulatedSynthesis::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let producer = {
            let synth = synth.clone();
            tokio::spawn(async move {
                synth.synthesize(&"x".repeat(1000), tx).await;
            })
        };

        // Let a couple of frames through, then cancel
        let _ = rx.recv().await;
        let _ = rx.recv().await;
        synth.cancel();
        synth.cancel(); // idempotent

        producer.await.unwrap();

        // At most one frame may have been in flight at cancellation time
        let mut after = 0;
        while rx.recv().await.is_some() {
            after += 1;
        }
        assert!(after <= 1, "expected at most one frame after cancel, got {after}");
        assert!(synth.is_cancelled());
    }

    #[test]
    fn test_tone_frame_is_audible() {
        // Tone energy must clear the strictest VAD threshold comfortably
        assert!(tone_frame(0).rms() > 1200.0);
    }
}
