//! Fixed-format audio frames — the atomic unit of streaming audio.
//!
//! The whole pipeline runs on 16 kHz mono 16-bit PCM in 20 ms frames.
//! These are constants of the design, not configuration.

use crate::error::{Result, VoiceloopError};

/// Sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;
/// Frame duration in milliseconds.
pub const FRAME_MS: u64 = 20;
/// Samples per frame (16 kHz × 20 ms).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize) * (FRAME_MS as usize) / 1000;
/// Bytes per frame (16-bit mono).
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Frame duration as a [`std::time::Duration`].
pub fn frame_duration() -> std::time::Duration {
    std::time::Duration::from_millis(FRAME_MS)
}

/// One 20 ms frame of 16-bit mono PCM at 16 kHz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Build a frame from exactly [`FRAME_SAMPLES`] samples.
    pub fn from_samples(samples: Vec<i16>) -> Result<Self> {
        if samples.len() != FRAME_SAMPLES {
            return Err(VoiceloopError::Frame(format!(
                "expected {FRAME_SAMPLES} samples, got {}",
                samples.len()
            )));
        }
        Ok(Self { samples })
    }

    /// Decode a frame from little-endian PCM bytes. The length must be
    /// exactly [`FRAME_BYTES`]; anything else is a caller contract violation.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_BYTES {
            return Err(VoiceloopError::Frame(format!(
                "expected {FRAME_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Ok(Self { samples })
    }

    /// A frame of pure silence.
    pub fn silence() -> Self {
        Self {
            samples: vec![0i16; FRAME_SAMPLES],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Encode back to little-endian PCM bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    /// Root-mean-square energy of the frame.
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum / self.samples.len() as f64).sqrt()
    }
}
