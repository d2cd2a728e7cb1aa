//! Simulated caller audio source.
//!
//! Development stand-in for the network transport: alternates bursts of
//! full-scale noise ("speech") with silence gaps, paced at the real 20 ms
//! frame cadence, and drives a [`TurnController`] with them.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use voiceloop_core::audio::{frame_duration, AudioFrame, FRAME_MS, FRAME_SAMPLES};

use crate::session::TurnController;

pub struct SimulatedCaller {
    /// Length of each speech burst.
    pub burst: Duration,
    /// Silence gap between bursts.
    pub gap: Duration,
}

impl Default for SimulatedCaller {
    fn default() -> Self {
        Self {
            burst: Duration::from_secs(1),
            gap: Duration::from_secs(2),
        }
    }
}

impl SimulatedCaller {
    /// Feed `bursts` speech bursts (or run forever when `None`) into the
    /// controller at real-time pacing.
    pub async fn run(&self, controller: &mut TurnController, bursts: Option<usize>) {
        let mut sent = 0usize;
        loop {
            if let Some(limit) = bursts {
                if sent >= limit {
                    return;
                }
            }
            debug!(burst = sent, "speech burst");
            for _ in 0..frames_in(self.burst) {
                controller.handle_audio(noise_frame(), Utc::now()).await;
                sleep(frame_duration()).await;
            }
            for _ in 0..frames_in(self.gap) {
                controller
                    .handle_audio(AudioFrame::silence(), Utc::now())
                    .await;
                sleep(frame_duration()).await;
            }
            sent += 1;
        }
    }
}

fn frames_in(duration: Duration) -> u64 {
    duration.as_millis() as u64 / FRAME_MS
}

fn noise_frame() -> AudioFrame {
    let mut rng = rand::rng();
    let samples: Vec<i16> = (0..FRAME_SAMPLES)
        .map(|_| rng.random_range(i16::MIN + 1..=i16::MAX))
        .collect();
    AudioFrame::from_samples(samples).expect("noise frame is fixed-size")
}
