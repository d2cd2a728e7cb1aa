//! Concurrent-caller load generator.
//!
//! Each simulated caller fetches a join token from the orchestrator, then
//! produces speech bursts with synthetic round-trip latencies (baseline plus
//! per-caller drift plus jitter) and posts the resulting turn events to the
//! metrics collector. Aggregates are printed locally at the end.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::warn;

use voiceloop_core::stats::LatencyStats;

/// Synthetic baseline mean, in milliseconds.
const BASE_LATENCY_MS: i64 = 420;
/// Per-caller offset range, ± this value.
const DRIFT_MS: i64 = 30;
/// Per-burst jitter range, ± this value.
const JITTER_MS: f64 = 120.0;
/// Floor for any synthetic round trip.
const MIN_LATENCY_MS: f64 = 120.0;

pub struct LoadtestOptions {
    pub orchestrator_url: String,
    pub metrics_endpoint: String,
    pub concurrency: usize,
    pub bursts: usize,
    pub shared_room: bool,
    pub post_metrics: bool,
    pub deterministic: bool,
    pub phrase: String,
}

pub async fn run_loadtest(opts: LoadtestOptions) -> anyhow::Result<()> {
    let run_id = short_hex();
    let room_base = format!("lt-{run_id}");
    println!(
        "[loadtest] run={run_id} base_latency={BASE_LATENCY_MS}ms drift=±{DRIFT_MS}ms \
         jitter=±{JITTER_MS}ms concurrency={} bursts={} shared_room={} phrase={:?}",
        opts.concurrency, opts.bursts, opts.shared_room, opts.phrase
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(opts.concurrency);
    for i in 0..opts.concurrency {
        let room = if opts.shared_room {
            room_base.clone()
        } else {
            format!("{room_base}-{i}")
        };
        let caller = Caller {
            index: i,
            room,
            identity: format!("caller-{i}"),
            bursts: opts.bursts,
            orchestrator_url: opts.orchestrator_url.clone(),
            metrics_endpoint: opts.metrics_endpoint.clone(),
            post_metrics: opts.post_metrics,
            deterministic: opts.deterministic,
            client: client.clone(),
        };
        tasks.push(tokio::spawn(caller.run()));
    }

    let mut results: Vec<f64> = Vec::new();
    for outcome in futures::future::join_all(tasks).await {
        match outcome {
            Ok(samples) => results.extend(samples),
            Err(e) => warn!("caller task panicked: {e}"),
        }
    }
    let elapsed = start.elapsed();

    let Some(stats) = LatencyStats::from_samples(&results) else {
        println!("No results.");
        return Ok(());
    };
    println!(
        "Completed {} turns in {:.2}s (concurrency={}, bursts={})",
        stats.count,
        elapsed.as_secs_f64(),
        opts.concurrency,
        opts.bursts
    );
    println!(
        "avg={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
        stats.avg, stats.p50, stats.p95, stats.p99, stats.max
    );
    Ok(())
}

struct Caller {
    index: usize,
    room: String,
    identity: String,
    bursts: usize,
    orchestrator_url: String,
    metrics_endpoint: String,
    post_metrics: bool,
    deterministic: bool,
    client: reqwest::Client,
}

impl Caller {
    /// Run all bursts for one caller, returning the observed round trips.
    /// A failed token fetch skips the caller entirely.
    async fn run(self) -> Vec<f64> {
        let mut rng = if self.deterministic {
            StdRng::seed_from_u64(self.index as u64)
        } else {
            StdRng::from_os_rng()
        };

        if let Err(e) = self.fetch_token().await {
            warn!(caller = self.index, "token fetch failed: {e}");
            return Vec::new();
        }

        let caller_drift = rng.random_range(-DRIFT_MS..=DRIFT_MS);
        let mut samples = Vec::with_capacity(self.bursts);
        for _ in 0..self.bursts {
            let speech_start_ms = Utc::now().timestamp_millis();
            let jitter = rng.random_range(-JITTER_MS..=JITTER_MS);
            let latency_ms = ((BASE_LATENCY_MS + caller_drift) as f64 + jitter).max(MIN_LATENCY_MS);
            tokio::time::sleep(Duration::from_millis(latency_ms as u64)).await;
            samples.push(latency_ms);

            if self.post_metrics {
                let event = json!({
                    "type": "latency_turn",
                    "room": self.room,
                    "identity": self.identity,
                    "timestamp": Utc::now().timestamp_millis(),
                    "speech_start_ms": speech_start_ms,
                    "round_trip_ms": latency_ms as i64,
                    "synthetic_simulated": true,
                });
                // Best effort: the load result does not depend on ingestion
                let _ = self
                    .client
                    .post(&self.metrics_endpoint)
                    .json(&event)
                    .timeout(Duration::from_secs(1))
                    .send()
                    .await;
            }
        }
        samples
    }

    async fn fetch_token(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/token", self.orchestrator_url))
            .json(&json!({
                "room": self.room,
                "identity": self.identity,
                "publish": true,
                "subscribe": true,
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("token missing from response"))
    }
}

fn short_hex() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
