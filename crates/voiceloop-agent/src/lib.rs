//! Turn-taking voice agent — VAD, transcription/synthesis streams,
//! barge-in, and per-turn latency instrumentation.

pub mod backend;
pub mod metrics_sink;
pub mod reply;
pub mod session;
pub mod source;
pub mod stt;
pub mod tts;
pub mod vad;

pub use metrics_sink::MetricsSink;
pub use session::{TurnController, TurnState};
