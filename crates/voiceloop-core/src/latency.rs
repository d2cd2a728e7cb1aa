//! Per-turn latency instrumentation.
//!
//! A [`LatencyTurn`] records the six milestone timestamps of one
//! caller-utterance-to-agent-reply cycle. Milestones are first-write-wins and
//! expected (not enforced) to be non-decreasing in declaration order; a
//! violation indicates a pipeline defect upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable milestone record for one conversation turn.
///
/// Owned exclusively by the session controller while the turn is active;
/// frozen into a [`TurnSnapshot`] when emitted.
#[derive(Debug, Clone, Default)]
pub struct LatencyTurn {
    pub speech_start: Option<DateTime<Utc>>,
    pub stt_first_partial: Option<DateTime<Utc>>,
    pub stt_final: Option<DateTime<Utc>>,
    pub agent_decision: Option<DateTime<Utc>>,
    pub tts_first_byte: Option<DateTime<Utc>>,
    pub playback_start: Option<DateTime<Utc>>,
}

impl LatencyTurn {
    pub fn new(speech_start: DateTime<Utc>) -> Self {
        Self {
            speech_start: Some(speech_start),
            ..Self::default()
        }
    }

    /// Record the first partial-transcript timestamp. First write wins.
    pub fn mark_first_partial(&mut self, ts: DateTime<Utc>) {
        self.stt_first_partial.get_or_insert(ts);
    }

    pub fn mark_stt_final(&mut self, ts: DateTime<Utc>) {
        self.stt_final.get_or_insert(ts);
    }

    pub fn mark_agent_decision(&mut self, ts: DateTime<Utc>) {
        self.agent_decision.get_or_insert(ts);
    }

    /// Record first synthesized audio. `tts_first_byte` and `playback_start`
    /// are collapsed to the same instant; distinguishing them would need a
    /// feedback channel from the transport layer.
    pub fn mark_first_audio(&mut self, ts: DateTime<Utc>) {
        self.tts_first_byte.get_or_insert(ts);
        self.playback_start.get_or_insert(ts);
    }

    /// Freeze into millisecond-epoch integers.
    pub fn snapshot(&self) -> TurnSnapshot {
        let ms = |t: &Option<DateTime<Utc>>| t.map(|v| v.timestamp_millis());
        let round_trip_ms = match (self.speech_start, self.playback_start) {
            (Some(a), Some(b)) => Some(b.timestamp_millis() - a.timestamp_millis()),
            _ => None,
        };
        TurnSnapshot {
            speech_start_ms: ms(&self.speech_start),
            stt_first_partial_ms: ms(&self.stt_first_partial),
            stt_final_ms: ms(&self.stt_final),
            agent_decision_ms: ms(&self.agent_decision),
            tts_first_byte_ms: ms(&self.tts_first_byte),
            playback_start_ms: ms(&self.playback_start),
            round_trip_ms,
        }
    }
}

/// Immutable millisecond view of a [`LatencyTurn`]. Absent milestones
/// serialize as JSON null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnSnapshot {
    pub speech_start_ms: Option<i64>,
    pub stt_first_partial_ms: Option<i64>,
    pub stt_final_ms: Option<i64>,
    pub agent_decision_ms: Option<i64>,
    pub tts_first_byte_ms: Option<i64>,
    pub playback_start_ms: Option<i64>,
    pub round_trip_ms: Option<i64>,
}

impl TurnSnapshot {
    /// Milestones in canonical order, skipping absent ones.
    pub fn present_milestones(&self) -> Vec<i64> {
        [
            self.speech_start_ms,
            self.stt_first_partial_ms,
            self.stt_final_ms,
            self.agent_decision_ms,
            self.tts_first_byte_ms,
            self.playback_start_ms,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Wire event posted to the metrics collector for each completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub room: String,
    pub identity: String,
    /// Emission time, ms since epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub turn: TurnSnapshot,
}

impl MetricsEvent {
    pub fn latency_turn(room: &str, identity: &str, turn: TurnSnapshot) -> Self {
        Self {
            kind: "latency_turn".to_string(),
            room: room.to_string(),
            identity: identity.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            turn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_round_trip_present_when_both_ends_set() {
        let mut turn = LatencyTurn::new(ts(1_000));
        turn.mark_first_audio(ts(1_377));
        let snap = turn.snapshot();
        assert_eq!(snap.round_trip_ms, Some(377));
        assert_eq!(snap.tts_first_byte_ms, Some(1_377));
        assert_eq!(snap.playback_start_ms, Some(1_377));
    }

    #[test]
    fn test_round_trip_null_when_incomplete() {
        let turn = LatencyTurn::new(ts(1_000));
        assert_eq!(turn.snapshot().round_trip_ms, None);
    }

    #[test]
    fn test_first_write_wins() {
        let mut turn = LatencyTurn::new(ts(1_000));
        turn.mark_first_partial(ts(1_050));
        turn.mark_first_partial(ts(1_090));
        assert_eq!(turn.snapshot().stt_first_partial_ms, Some(1_050));
    }

    #[test]
    fn test_monotonic_milestones() {
        let mut turn = LatencyTurn::new(ts(1_000));
        turn.mark_first_partial(ts(1_050));
        turn.mark_stt_final(ts(1_300));
        turn.mark_agent_decision(ts(1_305));
        turn.mark_first_audio(ts(1_400));
        let present = turn.snapshot().present_milestones();
        assert!(present.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_event_serialization_shape() {
        let mut turn = LatencyTurn::new(ts(1_000));
        turn.mark_first_audio(ts(1_400));
        let event = MetricsEvent::latency_turn("call-1", "agent-a", turn.snapshot());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "latency_turn");
        assert_eq!(json["room"], "call-1");
        assert_eq!(json["round_trip_ms"], 400);
        // Absent milestones are explicit nulls, not omitted
        assert!(json["stt_final_ms"].is_null());
    }
}
