// src/pipeline/scheduler.rs
//
// Backpressure for the detector. A detector call keeps the detector busy
// until `frame timestamp + measured latency`; frames that arrive before
// then are dropped rather than queued, so at most one detection is ever
// outstanding and the loop never falls behind the stream.

use tracing::debug;

pub struct FrameScheduler {
    busy_until_ms: Option<f64>,
    frames_seen: u64,
    frames_sampled: u64,
    frames_skipped: u64,
    total_latency_ms: f64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            busy_until_ms: None,
            frames_seen: 0,
            frames_sampled: 0,
            frames_skipped: 0,
            total_latency_ms: 0.0,
        }
    }

    /// Decide whether the frame at `timestamp_ms` goes to the detector
    pub fn should_sample(&mut self, timestamp_ms: f64) -> bool {
        self.frames_seen += 1;
        match self.busy_until_ms {
            Some(busy_until) if timestamp_ms < busy_until => {
                self.frames_skipped += 1;
                debug!(
                    "Detector busy until {:.0}ms, skipping frame at {:.0}ms",
                    busy_until, timestamp_ms
                );
                false
            }
            _ => {
                self.frames_sampled += 1;
                true
            }
        }
    }

    /// Record how long the detector took on the frame at `timestamp_ms`
    pub fn record_latency(&mut self, timestamp_ms: f64, latency_ms: f64) {
        let latency_ms = if latency_ms.is_finite() {
            latency_ms.max(0.0)
        } else {
            0.0
        };
        self.total_latency_ms += latency_ms;
        self.busy_until_ms = Some(timestamp_ms + latency_ms);
    }

    pub fn get_stats(&self) -> SchedulerStats {
        SchedulerStats {
            frames_seen: self.frames_seen,
            frames_sampled: self.frames_sampled,
            frames_skipped: self.frames_skipped,
            mean_latency_ms: if self.frames_sampled > 0 {
                self.total_latency_ms / self.frames_sampled as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub frames_seen: u64,
    pub frames_sampled: u64,
    pub frames_skipped: u64,
    pub mean_latency_ms: f64,
}
