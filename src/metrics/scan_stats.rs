//! Scan cost statistics
//!
//! Per-batch cost, per-database cost and keys scanned per database pass,
//! bucketed by job label (`h:<hot>,b:<big>`).

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// One hour in microseconds; longer samples are clamped
const MAX_COST_US: u64 = 3_600_000_000;
const MAX_KEYS: u64 = 1 << 40;

pub fn job_label(hot: bool, big: bool) -> String {
    format!("h:{},b:{}", hot, big)
}

struct JobStats {
    batch_cost_us: Histogram<u64>,
    db_cost_us: Histogram<u64>,
    keys_scanned: Histogram<u64>,
}

impl JobStats {
    fn new() -> Option<Self> {
        Some(Self {
            batch_cost_us: Histogram::new_with_bounds(1, MAX_COST_US, 3).ok()?,
            db_cost_us: Histogram::new_with_bounds(1, MAX_COST_US, 3).ok()?,
            keys_scanned: Histogram::new_with_bounds(1, MAX_KEYS, 2).ok()?,
        })
    }
}

/// Summary of one job label
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job: String,
    pub batches: u64,
    pub batch_p50_ms: f64,
    pub batch_p99_ms: f64,
    pub db_scans: u64,
    pub db_mean_ms: f64,
    pub db_max_ms: f64,
    pub keys_scanned_max: u64,
}

/// Thread-safe scan statistics shared by the schedulers of a deployment
#[derive(Default)]
pub struct ScanStats {
    jobs: Mutex<BTreeMap<String, JobStats>>,
}

fn as_us(d: Duration) -> u64 {
    (d.as_micros() as u64).clamp(1, MAX_COST_US)
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job(&self, label: &str, f: impl FnOnce(&mut JobStats)) {
        let mut jobs = self.jobs.lock();
        if !jobs.contains_key(label) {
            match JobStats::new() {
                Some(stats) => {
                    jobs.insert(label.to_string(), stats);
                }
                None => {
                    warn!("failed to create scan histograms for {}", label);
                    return;
                }
            }
        }
        if let Some(stats) = jobs.get_mut(label) {
            f(stats);
        }
    }

    pub fn record_batch(&self, label: &str, cost: Duration) {
        self.with_job(label, |s| {
            s.batch_cost_us.saturating_record(as_us(cost));
        });
    }

    pub fn record_db(&self, label: &str, cost: Duration, keys: u64) {
        self.with_job(label, |s| {
            s.db_cost_us.saturating_record(as_us(cost));
            s.keys_scanned.saturating_record(keys.clamp(1, MAX_KEYS));
        });
    }

    pub fn summaries(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.lock();
        jobs.iter()
            .map(|(job, s)| JobSummary {
                job: job.clone(),
                batches: s.batch_cost_us.len(),
                batch_p50_ms: s.batch_cost_us.value_at_quantile(0.5) as f64 / 1000.0,
                batch_p99_ms: s.batch_cost_us.value_at_quantile(0.99) as f64 / 1000.0,
                db_scans: s.db_cost_us.len(),
                db_mean_ms: s.db_cost_us.mean() / 1000.0,
                db_max_ms: s.db_cost_us.max() as f64 / 1000.0,
                keys_scanned_max: s.keys_scanned.max(),
            })
            .collect()
    }

    pub fn log_summary(&self, deployment: &str) {
        for s in self.summaries() {
            info!(
                "deployment {} scan stats [{}]: batches={} p50={:.2}ms p99={:.2}ms dbs={} db_mean={:.2}ms db_max={:.2}ms max_keys={}",
                deployment,
                s.job,
                s.batches,
                s.batch_p50_ms,
                s.batch_p99_ms,
                s.db_scans,
                s.db_mean_ms,
                s.db_max_ms,
                s.keys_scanned_max
            );
        }
    }
}
