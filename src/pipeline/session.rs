// src/pipeline/session.rs
//
// One monitoring session for one candidate.
//
// Per frame: scheduler -> detector adapter -> classifier -> episode tracker.
// A confirmed episode snapshots the frame for evidence first and is counted
// by the escalation policy second. The periodic alert check runs on the
// same sample clock. Everything here is mutated only from the sampling loop.

use crate::classifier::{classify, ViolationKind};
use crate::detection::DetectorAdapter;
use crate::episode_tracker::{EpisodeEvent, EpisodeTracker, TrackerState};
use crate::escalation::{EscalationPolicy, PeriodicAlertCheck, SessionContext, TerminationSignal};
use crate::evidence::{EvidenceOutcome, EvidencePipeline};
use crate::pipeline::event_bus::{EventBus, ProctorEvent};
use crate::pipeline::metrics::SessionMetrics;
use crate::pipeline::scheduler::{FrameScheduler, SchedulerStats};
use crate::types::{Config, Frame};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_PENDING_EVENTS: usize = 256;

/// Diagnostics entry kept for the most recent samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedSample {
    pub timestamp_ms: f64,
    pub kind: ViolationKind,
    pub face_count: usize,
    pub confidence: f32,
}

pub struct ProctoringSession {
    adapter: DetectorAdapter,
    tracker: EpisodeTracker,
    policy: EscalationPolicy,
    context: SessionContext,
    alerts: PeriodicAlertCheck,
    evidence: Option<EvidencePipeline>,
    evidence_outcomes: Option<mpsc::UnboundedReceiver<EvidenceOutcome>>,
    uploads: Vec<JoinHandle<()>>,
    scheduler: FrameScheduler,
    bus: EventBus,
    metrics: SessionMetrics,
    recent: VecDeque<ClassifiedSample>,
    recent_capacity: usize,
    active: bool,
    last_timestamp_ms: f64,
}

impl ProctoringSession {
    pub fn new(config: &Config, adapter: DetectorAdapter) -> Self {
        let context = SessionContext::new(config.subject.id.clone());
        info!(
            "📋 Session {} started for {}",
            context.session_id, context.subject_id
        );

        Self {
            adapter,
            tracker: EpisodeTracker::new(config.episode.cooldown_ms),
            policy: EscalationPolicy::from_config(&config.escalation),
            context,
            alerts: PeriodicAlertCheck::from_config(&config.escalation),
            evidence: None,
            evidence_outcomes: None,
            uploads: Vec::new(),
            scheduler: FrameScheduler::new(),
            bus: EventBus::new(MAX_PENDING_EVENTS),
            metrics: SessionMetrics::new(),
            recent: VecDeque::with_capacity(config.episode.recent_history),
            recent_capacity: config.episode.recent_history,
            active: true,
            last_timestamp_ms: 0.0,
        }
    }

    pub fn with_evidence(
        mut self,
        pipeline: EvidencePipeline,
        outcomes: mpsc::UnboundedReceiver<EvidenceOutcome>,
    ) -> Self {
        self.evidence = Some(pipeline);
        self.evidence_outcomes = Some(outcomes);
        self
    }

    pub fn with_alert_check(mut self, alerts: PeriodicAlertCheck) -> Self {
        self.alerts = alerts;
        self
    }

    // ========================================================================
    // SAMPLING
    // ========================================================================

    /// Run one sampling iteration. Returns the classification, or `None`
    /// when the session is inactive or the detector was still busy.
    pub fn process_frame(&mut self, frame: &Frame) -> Option<ViolationKind> {
        if !self.active {
            return None;
        }
        let now_ms = frame.timestamp_ms;
        self.metrics.inc(&self.metrics.total_frames);

        let kind = if self.scheduler.should_sample(now_ms) {
            Some(self.sample(frame, now_ms))
        } else {
            self.adapter.skip_frame(now_ms);
            self.metrics.inc(&self.metrics.skipped_frames);
            None
        };

        if self.active {
            self.tick_alerts(now_ms);
        }
        self.collect_evidence_outcomes();
        self.last_timestamp_ms = self.last_timestamp_ms.max(now_ms);
        kind
    }

    fn sample(&mut self, frame: &Frame, now_ms: f64) -> ViolationKind {
        let fail_safe_before = self.adapter.fail_safe_samples();
        let started = Instant::now();
        let sample = self.adapter.sample(frame, now_ms);
        let elapsed = started.elapsed();

        self.scheduler
            .record_latency(now_ms, elapsed.as_secs_f64() * 1000.0);
        self.metrics
            .set_timing(&self.metrics.detector_time_us, elapsed.as_micros() as u64);
        if self.adapter.fail_safe_samples() > fail_safe_before {
            self.metrics.inc(&self.metrics.fail_safe_samples);
        }

        let kind = classify(&sample);
        self.remember(ClassifiedSample {
            timestamp_ms: now_ms,
            kind,
            face_count: sample.face_count,
            confidence: sample.confidence,
        });

        match self.tracker.observe(kind, now_ms) {
            Some(EpisodeEvent::Opened(episode)) if episode.confirmed => {
                self.metrics.inc(&self.metrics.confirmed_episodes);
                self.bus.publish(ProctorEvent::EpisodeOpened(episode.clone()));
                self.capture_evidence(frame, episode.kind);

                let signal = self.policy.record_confirmed_episode(&mut self.context);
                self.bus.publish(ProctorEvent::ViolationConfirmed {
                    kind: episode.kind,
                    count: self.context.violation_count(),
                });
                if let Some(signal) = signal {
                    self.terminate(signal, now_ms);
                }
            }
            Some(EpisodeEvent::Opened(episode)) => {
                self.metrics.inc(&self.metrics.suppressed_episodes);
                self.bus.publish(ProctorEvent::EpisodeSuppressed(episode));
            }
            Some(EpisodeEvent::Closed(episode)) => {
                self.bus.publish(ProctorEvent::EpisodeClosed(episode));
            }
            None => {}
        }

        kind
    }

    fn remember(&mut self, entry: ClassifiedSample) {
        if self.recent_capacity == 0 {
            return;
        }
        if self.recent.len() >= self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
    }

    fn capture_evidence(&mut self, frame: &Frame, kind: ViolationKind) {
        let pipeline = match self.evidence.as_ref() {
            Some(pipeline) => pipeline,
            None => return,
        };
        if let Some(handle) = pipeline.capture(frame, kind) {
            self.uploads.push(handle);
        }
        self.uploads.retain(|h| !h.is_finished());
    }

    // ========================================================================
    // ALERTS AND TERMINATION
    // ========================================================================

    /// Advance the periodic alert check to `now_ms`
    pub fn tick_alerts(&mut self, now_ms: f64) {
        if !self.active {
            return;
        }
        let alert = match self.alerts.tick(now_ms) {
            Some(alert) => alert,
            None => return,
        };

        self.metrics.inc(&self.metrics.general_alerts);
        let signal = self.policy.record_alert(&mut self.context);
        warn!(
            "🔔 General alert #{}: {}",
            self.context.alert_count(),
            alert.message
        );
        self.bus.publish(ProctorEvent::GeneralAlert {
            alert,
            count: self.context.alert_count(),
        });
        if let Some(signal) = signal {
            self.terminate(signal, now_ms);
        }
    }

    fn terminate(&mut self, signal: TerminationSignal, now_ms: f64) {
        self.bus.publish(ProctorEvent::AutoSubmit(signal));
        self.deactivate(now_ms);
    }

    /// Stop sampling. Closes any open episode and stops the alert check.
    pub fn deactivate(&mut self, now_ms: f64) {
        if !self.active {
            return;
        }
        self.active = false;
        self.alerts.stop();
        if let Some(EpisodeEvent::Closed(episode)) = self.tracker.end_session(now_ms) {
            self.bus.publish(ProctorEvent::EpisodeClosed(episode));
        }
        debug!(
            "Session {} deactivated at {:.0}ms ({} episodes confirmed, {} suppressed)",
            self.context.session_id,
            now_ms,
            self.tracker.confirmed_episodes(),
            self.tracker.suppressed_episodes()
        );
    }

    // ========================================================================
    // EVIDENCE OUTCOMES
    // ========================================================================

    fn collect_evidence_outcomes(&mut self) {
        let outcomes = match self.evidence_outcomes.as_mut() {
            Some(rx) => rx,
            None => return,
        };
        while let Ok(outcome) = outcomes.try_recv() {
            match outcome {
                EvidenceOutcome::Stored(record) => {
                    self.metrics.inc(&self.metrics.evidence_successes);
                    self.bus.publish(ProctorEvent::EvidenceStored(record));
                }
                EvidenceOutcome::Failed {
                    record_id,
                    kind,
                    error,
                } => {
                    self.metrics.inc(&self.metrics.evidence_failures);
                    self.bus.publish(ProctorEvent::EvidenceFailed {
                        record_id,
                        kind,
                        error,
                    });
                }
            }
        }
    }

    /// Wait for outstanding uploads after the session has ended
    pub async fn flush_evidence(&mut self) {
        for handle in self.uploads.drain(..) {
            if let Err(e) = handle.await {
                warn!("Evidence upload task aborted: {}", e);
            }
        }
        self.collect_evidence_outcomes();
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn drain_events(&mut self) -> Vec<ProctorEvent> {
        self.bus.drain()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    pub fn recent_samples(&self) -> impl Iterator<Item = &ClassifiedSample> {
        self.recent.iter()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.get_stats()
    }

    pub fn last_timestamp_ms(&self) -> f64 {
        self.last_timestamp_ms
    }
}
