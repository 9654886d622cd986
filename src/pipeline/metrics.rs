// src/pipeline/metrics.rs
//
// Session counters. Cheap to clone; exported as a summary in the
// end-of-run log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub skipped_frames: Arc<AtomicU64>,
    pub fail_safe_samples: Arc<AtomicU64>,
    pub confirmed_episodes: Arc<AtomicU64>,
    pub suppressed_episodes: Arc<AtomicU64>,
    pub general_alerts: Arc<AtomicU64>,
    pub evidence_successes: Arc<AtomicU64>,
    pub evidence_failures: Arc<AtomicU64>,
    pub detector_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            skipped_frames: Arc::new(AtomicU64::new(0)),
            fail_safe_samples: Arc::new(AtomicU64::new(0)),
            confirmed_episodes: Arc::new(AtomicU64::new(0)),
            suppressed_episodes: Arc::new(AtomicU64::new(0)),
            general_alerts: Arc::new(AtomicU64::new(0)),
            evidence_successes: Arc::new(AtomicU64::new(0)),
            evidence_failures: Arc::new(AtomicU64::new(0)),
            detector_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            skipped_frames: self.skipped_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            fail_safe_samples: self.fail_safe_samples.load(Ordering::Relaxed),
            confirmed_episodes: self.confirmed_episodes.load(Ordering::Relaxed),
            suppressed_episodes: self.suppressed_episodes.load(Ordering::Relaxed),
            general_alerts: self.general_alerts.load(Ordering::Relaxed),
            evidence_successes: self.evidence_successes.load(Ordering::Relaxed),
            evidence_failures: self.evidence_failures.load(Ordering::Relaxed),
            last_detector_us: self.detector_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub skipped_frames: u64,
    pub fps: f64,
    pub fail_safe_samples: u64,
    pub confirmed_episodes: u64,
    pub suppressed_episodes: u64,
    pub general_alerts: u64,
    pub evidence_successes: u64,
    pub evidence_failures: u64,
    pub last_detector_us: u64,
    pub elapsed_secs: f64,
}
