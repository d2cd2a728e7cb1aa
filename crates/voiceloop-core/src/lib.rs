//! Core types, config, errors, and latency model for Voiceloop.

pub mod audio;
pub mod config;
pub mod error;
pub mod latency;
pub mod stats;
