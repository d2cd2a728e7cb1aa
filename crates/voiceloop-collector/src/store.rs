//! Rolling-window event buffer and aggregation.

use serde::Serialize;
use serde_json::Value;

use voiceloop_core::stats::{percentile, LatencyStats};

/// Maximum number of raw events returned by the events endpoint.
pub const MAX_EVENTS_RETURN: usize = 200;

/// In-memory event buffer with time-window retention. Events older than the
/// window (by `speech_start_ms`, falling back to `timestamp`) are pruned on
/// every ingest and query.
pub struct EventStore {
    window_secs: u64,
    events: Vec<Value>,
}

/// Aggregate view over `round_trip_ms` in the current window.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub window_sec: u64,
    pub count: usize,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl EventStore {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            events: Vec::new(),
        }
    }

    /// Append one raw event and drop everything that fell out of the window.
    pub fn ingest(&mut self, now_ms: i64, event: Value) {
        self.events.push(event);
        self.prune(now_ms);
    }

    pub fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - (self.window_secs as i64) * 1000;
        self.events.retain(|e| event_time(e) >= cutoff);
    }

    /// Most recent events, newest last, capped at `limit`.
    pub fn recent(&self, limit: usize) -> &[Value] {
        let start = self.events.len().saturating_sub(limit);
        &self.events[start..]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Aggregate round-trip stats over the window.
    pub fn summary(&self) -> Summary {
        let mut rtts: Vec<f64> = self
            .events
            .iter()
            .filter_map(|e| e.get("round_trip_ms").and_then(Value::as_f64))
            .collect();
        rtts.sort_by(|a, b| a.total_cmp(b));

        let stats = LatencyStats::from_samples(&rtts);
        Summary {
            window_sec: self.window_secs,
            count: rtts.len(),
            avg_ms: stats.as_ref().map(|s| round2(s.avg)),
            p50_ms: percentile(&rtts, 50.0).map(round2),
            p95_ms: percentile(&rtts, 95.0).map(round2),
            p99_ms: percentile(&rtts, 99.0).map(round2),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Retention timestamp of an event: speech start when present, else the
/// emission timestamp, else 0 (pruned immediately once the window passes).
fn event_time(event: &Value) -> i64 {
    event
        .get("speech_start_ms")
        .and_then(Value::as_i64)
        .or_else(|| event.get("timestamp").and_then(Value::as_i64))
        .unwrap_or(0)
}
