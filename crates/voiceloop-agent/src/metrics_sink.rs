//! Fire-and-forget emission of completed-turn events.
//!
//! The sink decouples the turn-taking state machine from network I/O: `emit`
//! is a plain channel send, and a detached worker does the POSTing. Delivery
//! failures are logged at debug level and dropped — the pipeline never stalls
//! waiting on metrics.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use voiceloop_core::latency::MetricsEvent;

/// Cheap-to-clone handle shared by all sessions of a process.
#[derive(Clone)]
pub struct MetricsSink {
    tx: mpsc::UnboundedSender<MetricsEvent>,
}

impl MetricsSink {
    /// Spawn the delivery worker posting to `endpoint` and return the sink.
    pub fn spawn(endpoint: String) -> Self {
        let (sink, rx) = Self::channel();
        tokio::spawn(deliver(endpoint, rx));
        sink
    }

    /// Sink backed by a bare channel, for tests and custom transports.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MetricsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for delivery. Never blocks, never fails upward.
    pub fn emit(&self, event: MetricsEvent) {
        if self.tx.send(event).is_err() {
            debug!("metrics worker gone, event dropped");
        }
    }
}

async fn deliver(endpoint: String, mut rx: mpsc::UnboundedReceiver<MetricsEvent>) {
    let client = reqwest::Client::new();
    while let Some(event) = rx.recv().await {
        let result = client
            .post(&endpoint)
            .json(&event)
            .timeout(Duration::from_secs(1))
            .send()
            .await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                debug!(status = %resp.status(), "metrics post rejected");
            }
            Err(e) => debug!("metrics post failed: {e}"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceloop_core::latency::{LatencyTurn, MetricsEvent};

    #[tokio::test]
    async fn test_emit_is_non_blocking_and_ordered() {
        let (sink, mut rx) = MetricsSink::channel();
        for i in 0..3 {
            let turn = LatencyTurn::default();
            let event = MetricsEvent::latency_turn(&format!("room-{i}"), "id", turn.snapshot());
            sink.emit(event);
        }
        for i in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.room, format!("room-{i}"));
        }
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = MetricsSink::channel();
        drop(rx);
        // Must not panic or error
        sink.emit(MetricsEvent::latency_turn(
            "room",
            "id",
            LatencyTurn::default().snapshot(),
        ));
    }
}
