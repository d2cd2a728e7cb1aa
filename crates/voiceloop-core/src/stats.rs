//! Latency aggregation helpers shared by the collector and load-test client.

/// Linear-interpolation percentile over a pre-sorted slice.
///
/// Returns `None` on an empty slice.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if pct <= 0.0 {
        return Some(sorted[0]);
    }
    if pct >= 100.0 {
        return Some(sorted[sorted.len() - 1]);
    }
    let k = (sorted.len() - 1) as f64 * (pct / 100.0);
    let f = k.floor() as usize;
    let c = k.ceil() as usize;
    if f == c {
        return Some(sorted[f]);
    }
    let d0 = sorted[f] * (c as f64 - k);
    let d1 = sorted[c] * (k - f as f64);
    Some(d0 + d1)
}

/// Aggregate round-trip stats over a set of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyStats {
    /// Compute stats from unsorted samples. Returns `None` when empty.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();
        let avg = sorted.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            avg,
            p50: percentile(&sorted, 50.0)?,
            p95: percentile(&sorted, 95.0)?,
            p99: percentile(&sorted, 99.0)?,
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}
