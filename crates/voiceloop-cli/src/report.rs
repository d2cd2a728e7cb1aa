//! Latency reporting tool.
//!
//! Pulls the rolling summary and the raw events from the collector, recomputes
//! the aggregates offline as a cross-check, and optionally dumps the events to
//! CSV, draws an ASCII sparkline, or re-polls on an interval.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use voiceloop_core::stats::LatencyStats;

const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SPARKLINE_WIDTH: usize = 40;

pub struct ReportOptions {
    pub metrics_url: String,
    pub csv: Option<PathBuf>,
    pub show_events: bool,
    pub sparkline: bool,
    /// Re-poll interval in seconds; one-shot when absent.
    pub watch: Option<u64>,
}

pub async fn run_report(opts: ReportOptions) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;

    loop {
        let summary: Value = client
            .get(format!("{}/summary", opts.metrics_url))
            .send()
            .await?
            .json()
            .await?;
        let events_body: Value = client
            .get(format!("{}/events", opts.metrics_url))
            .send()
            .await?
            .json()
            .await?;
        let events = events_body["events"].as_array().cloned().unwrap_or_default();

        print_report(&summary, &events, opts.show_events, opts.sparkline);
        if let Some(path) = &opts.csv {
            write_csv(path, &events)?;
        }

        let Some(interval) = opts.watch else {
            return Ok(());
        };
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

fn print_report(summary: &Value, events: &[Value], show_events: bool, sparkline: bool) {
    println!("\n=== Latency Report {} ===", Utc::now().to_rfc3339());
    println!("Rolling window summary (/summary):");
    println!("{summary}");

    let rtts = round_trips(events);
    if let Some(stats) = LatencyStats::from_samples(&rtts) {
        println!("Offline recomputed from raw events (/events):");
        println!(
            "count={} avg={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms min={:.2}ms max={:.2}ms",
            stats.count, stats.avg, stats.p50, stats.p95, stats.p99, stats.min, stats.max
        );
        if sparkline {
            println!("Sparkline (most recent): {}", ascii_sparkline(&rtts));
        }
    }

    if show_events {
        println!("\nRecent events:");
        let start = events.len().saturating_sub(10);
        for event in &events[start..] {
            println!("{event}");
        }
    }
}

fn round_trips(events: &[Value]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| e.get("round_trip_ms").and_then(Value::as_f64))
        .collect()
}

/// Scale the tail of `values` onto eight block characters.
fn ascii_sparkline(values: &[f64]) -> String {
    if values.is_empty() {
        return String::new();
    }
    let start = values.len().saturating_sub(SPARKLINE_WIDTH);
    let take = &values[start..];
    let min = take.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = take.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    take.iter()
        .map(|v| {
            let idx = ((v - min) / span * (SPARKLINE_CHARS.len() - 1) as f64) as usize;
            SPARKLINE_CHARS[idx.min(SPARKLINE_CHARS.len() - 1)]
        })
        .collect()
}

/// Dump events to CSV with a union-of-keys header, one row per event.
fn write_csv(path: &PathBuf, events: &[Value]) -> anyhow::Result<()> {
    if events.is_empty() {
        println!("No events to write");
        return Ok(());
    }

    let mut keys: Vec<String> = events
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|o| o.keys().cloned())
        .collect();
    keys.sort();
    keys.dedup();

    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", keys.join(","))?;
    for event in events {
        let row: Vec<String> = keys
            .iter()
            .map(|k| csv_field(event.get(k).unwrap_or(&Value::Null)))
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }
    println!("Wrote {} events to {}", events.len(), path.display());
    Ok(())
}

fn csv_field(value: &Value) -> String {
    let raw = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}
