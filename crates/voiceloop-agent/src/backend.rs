//! Speech backend — produces the per-turn transcription and synthesis streams.

use std::sync::Arc;
use std::time::Duration;

use crate::stt::{SimulatedTranscription, TranscriptionStream};
use crate::tts::{SimulatedSynthesis, SpeechSynthesis};

/// Capability seam between the turn controller and the recognizer/synthesizer
/// providers. One backend serves a session; each turn asks it for fresh
/// stream instances.
pub trait SpeechBackend: Send + Sync {
    fn transcription(&self) -> Arc<dyn TranscriptionStream>;
    fn synthesis(&self) -> Arc<dyn SpeechSynthesis>;
}

/// Offline backend wiring [`SimulatedTranscription`] and
/// [`SimulatedSynthesis`] together, with a fixed recognized phrase.
pub struct SimulatedBackend {
    pub phrase: String,
    pub partial_delay: Duration,
    pub final_delay: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            phrase: "testing one two three".to_string(),
            partial_delay: Duration::from_millis(50),
            final_delay: Duration::from_millis(300),
        }
    }
}

impl SpeechBackend for SimulatedBackend {
    fn transcription(&self) -> Arc<dyn TranscriptionStream> {
        SimulatedTranscription::start(self.phrase.clone(), self.partial_delay, self.final_delay)
    }

    fn synthesis(&self) -> Arc<dyn SpeechSynthesis> {
        Arc::new(SimulatedSynthesis::new())
    }
}
