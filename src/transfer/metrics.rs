/*!
 * Transfer metrics and pattern learning
 *
 * Every finished transfer appends one metric line. Successful metrics are
 * grouped into object-size buckets; per bucket the lowest-duration
 * chunk-size/thread/bandwidth combination is retained as the optimal
 * setting, and `predict_chunk_size` consults it for future objects of
 * similar size (within ±20%) before falling back to the static rule.
 */

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{read_jsonl, JsonlWriter};

/// Static-rule thresholds
const LARGE_OBJECT: u64 = 1024 * 1024 * 1024;
const SMALL_OBJECT: u64 = 500 * 1024 * 1024;

/// One finished transfer, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMetric {
    pub transfer_id: String,
    pub size: u64,
    pub chunk_size: u64,
    pub threads: usize,
    pub duration_ms: u64,
    pub bandwidth_bps: u64,
    pub success: bool,
    pub timestamp: String,
}

/// Best observed settings for one size bucket
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalSetting {
    pub size: u64,
    pub chunk_size: u64,
    pub threads: usize,
    pub bandwidth_bps: u64,
    pub duration_ms: u64,
}

/// Append-only metric log
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, metric: &TransferMetric) -> Result<()> {
        JsonlWriter::append_to(&self.path)?.append(metric)
    }

    pub fn load(&self) -> Result<Vec<TransferMetric>> {
        read_jsonl(&self.path)
    }

    /// Learned optimal settings, one per size bucket
    pub fn optimal_settings(&self) -> Result<Vec<OptimalSetting>> {
        Ok(learn_optimal(&self.load()?))
    }
}

/// Size bucket: objects within the same power of two land together
fn size_bucket(size: u64) -> u32 {
    64 - size.max(1).leading_zeros()
}

/// Per-bucket lowest-duration combination among successful transfers
pub fn learn_optimal(metrics: &[TransferMetric]) -> Vec<OptimalSetting> {
    let mut best: HashMap<u32, &TransferMetric> = HashMap::new();
    for metric in metrics.iter().filter(|m| m.success) {
        let bucket = size_bucket(metric.size);
        match best.get(&bucket) {
            Some(current) if current.duration_ms <= metric.duration_ms => {}
            _ => {
                best.insert(bucket, metric);
            }
        }
    }

    let mut settings: Vec<OptimalSetting> = best
        .into_values()
        .map(|m| OptimalSetting {
            size: m.size,
            chunk_size: m.chunk_size,
            threads: m.threads,
            bandwidth_bps: m.bandwidth_bps,
            duration_ms: m.duration_ms,
        })
        .collect();
    settings.sort_by_key(|s| s.size);
    settings
}

/// Chunk size for an object: learned setting for a similar size when one
/// exists, otherwise the static rule over the configured base
pub fn predict_chunk_size(size: u64, base: u64, learned: &[OptimalSetting]) -> u64 {
    let similar = learned.iter().find(|s| {
        let lower = (s.size as f64 * 0.8) as u64;
        let upper = (s.size as f64 * 1.2) as u64;
        size >= lower && size <= upper
    });
    if let Some(setting) = similar {
        tracing::debug!(
            size,
            learned_chunk = setting.chunk_size,
            "using learned chunk size"
        );
        return setting.chunk_size.max(1);
    }

    let chunk = if size > LARGE_OBJECT {
        base * 2
    } else if size < SMALL_OBJECT {
        base / 2
    } else {
        base
    };
    chunk.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn metric(size: u64, chunk: u64, duration: u64, success: bool) -> TransferMetric {
        TransferMetric {
            transfer_id: "tx-test".to_string(),
            size,
            chunk_size: chunk,
            threads: 4,
            duration_ms: duration,
            bandwidth_bps: if duration > 0 {
                size * 1000 / duration
            } else {
                0
            },
            success,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_static_rule() {
        let base = 10 * MB;
        // Small objects halve the base
        assert_eq!(predict_chunk_size(50 * MB, base, &[]), 5 * MB);
        // Mid-size objects keep it
        assert_eq!(predict_chunk_size(700 * MB, base, &[]), base);
        // Large objects double it
        assert_eq!(predict_chunk_size(2048 * MB, base, &[]), 20 * MB);
    }

    #[test]
    fn test_learned_setting_preferred() {
        let learned = vec![OptimalSetting {
            size: 100 * MB,
            chunk_size: 25 * MB,
            threads: 8,
            bandwidth_bps: 0,
            duration_ms: 900,
        }];
        // Within ±20% of the learned size
        assert_eq!(predict_chunk_size(110 * MB, 10 * MB, &learned), 25 * MB);
        // Outside the window, static rule applies
        assert_eq!(predict_chunk_size(400 * MB, 10 * MB, &learned), 5 * MB);
    }

    #[test]
    fn test_learn_optimal_keeps_fastest() {
        let metrics = vec![
            metric(100 * MB, 10 * MB, 2000, true),
            metric(101 * MB, 25 * MB, 900, true),
            metric(99 * MB, 5 * MB, 3000, true),
            // Failures never become the optimum
            metric(100 * MB, 50 * MB, 1, false),
        ];
        let settings = learn_optimal(&metrics);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].chunk_size, 25 * MB);
        assert_eq!(settings[0].duration_ms, 900);
    }

    #[test]
    fn test_buckets_are_separate() {
        let metrics = vec![
            metric(10 * MB, 1 * MB, 100, true),
            metric(2000 * MB, 40 * MB, 60_000, true),
        ];
        let settings = learn_optimal(&metrics);
        assert_eq!(settings.len(), 2);
    }

    #[test]
    fn test_log_roundtrip() {
        let dir = tempdir().unwrap();
        let log = MetricsLog::new(dir.path().join("metrics.jsonl"));

        log.record(&metric(100 * MB, 10 * MB, 1000, true)).unwrap();
        log.record(&metric(200 * MB, 10 * MB, 2500, false)).unwrap();

        let loaded = log.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].success);
        assert!(!loaded[1].success);

        // Only the success informs learned settings
        let settings = log.optimal_settings().unwrap();
        assert_eq!(settings.len(), 1);
    }
}
