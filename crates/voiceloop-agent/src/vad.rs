//! Energy-based Voice Activity Detection (VAD).

use chrono::{DateTime, Utc};

use voiceloop_core::audio::AudioFrame;

/// RMS thresholds by aggressiveness level. Higher aggressiveness means a
/// frame must be louder to count as speech.
const THRESHOLDS: [f64; 4] = [150.0, 300.0, 600.0, 1200.0];

/// Voice Activity Detector using an RMS energy threshold on 16-bit PCM.
///
/// Per-frame classification is stateless; the detector only remembers
/// whether it was inside a speech segment so it can report rising edges.
/// The speech-to-silence flip is immediate — there is no hangover, so no
/// end-of-speech event is surfaced.
pub struct VoiceActivityDetector {
    threshold: f64,
    active: bool,
    speech_start: Option<DateTime<Utc>>,
}

impl VoiceActivityDetector {
    /// Create a detector for the given aggressiveness level (0-3).
    /// Out-of-range levels are a programming error.
    pub fn new(aggressiveness: u8) -> Self {
        assert!(aggressiveness <= 3, "VAD aggressiveness must be 0-3");
        Self {
            threshold: THRESHOLDS[aggressiveness as usize],
            active: false,
            speech_start: None,
        }
    }

    /// Classify one frame. Returns the timestamp when this frame is a
    /// silence-to-speech transition, `None` otherwise.
    pub fn classify(&mut self, frame: &AudioFrame, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let is_speech = frame.rms() > self.threshold;
        if is_speech && !self.active {
            self.active = true;
            self.speech_start = Some(ts);
            return Some(ts);
        }
        if !is_speech && self.active {
            self.active = false;
        }
        None
    }

    /// Whether the detector is currently inside a speech segment.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Timestamp of the most recent speech start, if any.
    pub fn speech_start(&self) -> Option<DateTime<Utc>> {
        self.speech_start
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.speech_start = None;
    }
}
