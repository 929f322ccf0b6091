//! Summary statistics over an endpoint's check history.

use serde::Serialize;
use tdigests::{Centroid, TDigest};

use super::models::{HealthStatus, HistoryEntry};

/// Aggregate view of a run of history entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub avg_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    /// Share of healthy checks, 0..=100.
    pub uptime_percent: f64,
}

impl HistoryStats {
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let mut stats = Self {
            total: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            match entry.status {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Degraded => stats.degraded += 1,
                HealthStatus::Unhealthy => stats.unhealthy += 1,
                HealthStatus::Unknown => stats.unknown += 1,
            }
        }

        let sum: u64 = entries.iter().map(|e| e.latency_ms).sum();
        stats.avg_latency_ms = (sum as f64 / entries.len() as f64).round() as u64;
        stats.uptime_percent = round2(stats.healthy as f64 / stats.total as f64 * 100.0);

        let digest = latency_digest(entries);
        stats.p50_latency_ms = sanitize(digest.estimate_quantile(0.50));
        stats.p95_latency_ms = sanitize(digest.estimate_quantile(0.95));

        stats
    }
}

fn latency_digest(entries: &[HistoryEntry]) -> TDigest {
    let mut values: Vec<f64> = entries.iter().map(|e| e.latency_ms as f64).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let centroids = values.into_iter().map(|v| Centroid::new(v, 1.0)).collect();
    TDigest::from_centroids(centroids)
}

fn sanitize(f: f64) -> u64 {
    if f.is_nan() || f.is_infinite() || f < 0.0 {
        0
    } else {
        f.round() as u64
    }
}

fn round2(f: f64) -> f64 {
    (f * 100.0).round() / 100.0
}
