// src/pipeline/runner.rs
//
// Sampling loops. Each iteration reads one frame, processes it, hands the
// resulting events to the caller and yields; the next iteration is only
// requested once the current one has finished. Cancellation is checked at
// the top of every iteration.
//
// Verification reads on a blocking task instead, so the gate's deadline
// keeps running while the camera stalls.

use crate::classifier::classify;
use crate::detection::DetectorAdapter;
use crate::escalation::TerminationSignal;
use crate::liveness::{LivenessGate, VerificationOutcome};
use crate::media::{FrameSource, MediaError};
use crate::pipeline::event_bus::ProctorEvent;
use crate::pipeline::metrics::MetricsSummary;
use crate::pipeline::scheduler::SchedulerStats;
use crate::pipeline::session::ProctoringSession;
use crate::types::Frame;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Consecutive read failures tolerated before the stream is given up
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 30;

/// How often the liveness gate is polled between frames
const VERIFICATION_POLL: Duration = Duration::from_millis(100);

/// How long a finished verification waits for a blocked read to return
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StreamEnded,
    Cancelled,
    AutoSubmitted,
    ReadFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    pub violation_count: u32,
    pub alert_count: u32,
    pub termination: Option<TerminationSignal>,
    pub metrics: MetricsSummary,
    pub scheduler: SchedulerStats,
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Read the next frame, retrying transient read errors
fn next_frame(
    source: &mut dyn FrameSource,
    consecutive_errors: &mut u32,
) -> Result<Option<Frame>, MediaError> {
    loop {
        match source.next_frame() {
            Ok(frame) => {
                *consecutive_errors = 0;
                return Ok(frame);
            }
            Err(MediaError::Read(msg)) if *consecutive_errors < MAX_CONSECUTIVE_READ_ERRORS => {
                *consecutive_errors += 1;
                warn!("Frame read failed ({}): {}", consecutive_errors, msg);
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// MONITORING
// ============================================================================

/// Drive `session` from `source` until the stream ends, the caller cancels
/// or the session auto-submits. The open episode is closed before the
/// source is released.
pub async fn run_monitoring<F>(
    session: &mut ProctoringSession,
    source: &mut dyn FrameSource,
    cancel: watch::Receiver<bool>,
    mut on_event: F,
) -> RunReport
where
    F: FnMut(&ProctorEvent),
{
    let mut consecutive_errors = 0;

    let stop_reason = loop {
        if is_cancelled(&cancel) {
            info!("Monitoring cancelled");
            break StopReason::Cancelled;
        }
        if !session.is_active() {
            break StopReason::AutoSubmitted;
        }

        let frame = match next_frame(source, &mut consecutive_errors) {
            Ok(Some(frame)) => frame,
            Ok(None) => break StopReason::StreamEnded,
            Err(e) => {
                error!("Giving up on media stream: {}", e);
                break StopReason::ReadFailure;
            }
        };

        session.process_frame(&frame);
        for event in session.drain_events() {
            on_event(&event);
        }

        tokio::task::yield_now().await;
    };

    // Teardown: episode first, then the camera
    let last_ms = session.last_timestamp_ms();
    session.deactivate(last_ms);
    for event in session.drain_events() {
        on_event(&event);
    }
    source.release();

    session.flush_evidence().await;
    for event in session.drain_events() {
        on_event(&event);
    }

    let context = session.context();
    RunReport {
        stop_reason,
        violation_count: context.violation_count(),
        alert_count: context.alert_count(),
        termination: context.termination().cloned(),
        metrics: session.metrics().summary(),
        scheduler: session.scheduler_stats(),
    }
}

/// Monitoring without a camera: only the periodic alert check runs, on
/// wall-clock time, until the caller cancels or the alerts auto-submit.
pub async fn run_degraded<F>(
    session: &mut ProctoringSession,
    mut cancel: watch::Receiver<bool>,
    tick_every: Duration,
    mut on_event: F,
) -> RunReport
where
    F: FnMut(&ProctorEvent),
{
    warn!("⚠️  Running in degraded mode: no camera, alerts only");
    let started = Instant::now();
    let mut ticker = tokio::time::interval(tick_every);

    let stop_reason = loop {
        if is_cancelled(&cancel) {
            break StopReason::Cancelled;
        }
        if !session.is_active() {
            break StopReason::AutoSubmitted;
        }

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    break StopReason::Cancelled;
                }
            }
            _ = ticker.tick() => {
                session.tick_alerts(started.elapsed().as_secs_f64() * 1000.0);
                for event in session.drain_events() {
                    on_event(&event);
                }
            }
        }
    };

    let now_ms = started.elapsed().as_secs_f64() * 1000.0;
    session.deactivate(now_ms);
    for event in session.drain_events() {
        on_event(&event);
    }

    let context = session.context();
    RunReport {
        stop_reason,
        violation_count: context.violation_count(),
        alert_count: context.alert_count(),
        termination: context.termination().cloned(),
        metrics: session.metrics().summary(),
        scheduler: session.scheduler_stats(),
    }
}

// ============================================================================
// LIVENESS VERIFICATION
// ============================================================================

/// Run one verification attempt. The gate starts on the first frame and
/// is polled on wall-clock time between frames. The stream is released
/// whatever the outcome.
pub async fn run_verification<F>(
    gate: &mut LivenessGate,
    adapter: &mut DetectorAdapter,
    source: Box<dyn FrameSource>,
    mut cancel: watch::Receiver<bool>,
    mut on_event: F,
) -> VerificationOutcome
where
    F: FnMut(&ProctorEvent),
{
    let (frame_tx, mut frames) = mpsc::channel(1);
    let reader = spawn_reader(source, frame_tx);

    let mut ticker = tokio::time::interval(VERIFICATION_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Sample clock of the newest frame and when it arrived
    let mut last_frame: Option<(f64, Instant)> = None;

    loop {
        if is_cancelled(&cancel) {
            gate.cancel();
            break;
        }

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    gate.cancel();
                    break;
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    warn!("Media stream ended before verification finished");
                    gate.cancel();
                    break;
                };

                let now_ms = frame.timestamp_ms;
                if last_frame.is_none() {
                    gate.start(now_ms);
                }
                last_frame = Some((now_ms, Instant::now()));

                let sample = adapter.sample(&frame, now_ms);
                if gate.observe(classify(&sample), now_ms).is_terminal() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some((last_ms, arrived)) = last_frame else {
                    continue;
                };
                let now_ms = last_ms + arrived.elapsed().as_secs_f64() * 1000.0;
                if gate.poll(now_ms).is_terminal() {
                    debug!("Verification settled between frames at {:.0}ms", now_ms);
                    break;
                }
            }
        }
    }

    let outcome = gate.outcome();
    if outcome != VerificationOutcome::Pending {
        on_event(&ProctorEvent::VerificationCompleted(outcome));
    }

    drop(frames);
    match tokio::time::timeout(READER_JOIN_TIMEOUT, reader).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Verification reader panicked: {}", e),
        Err(_) => warn!("Media read still blocked; the stream is released when it returns"),
    }
    outcome
}

/// Pump frames from `source` until it ends, fails or nobody is listening,
/// then release it
fn spawn_reader(mut source: Box<dyn FrameSource>, frames: mpsc::Sender<Frame>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut consecutive_errors = 0;
        loop {
            match next_frame(source.as_mut(), &mut consecutive_errors) {
                Ok(Some(frame)) => {
                    if frames.blocking_send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Verification stream failed: {}", e);
                    break;
                }
            }
        }
        source.release();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{
        FaceLandmarks, LandmarkPoint, ProhibitedObjects, RawDetection, RecordedModel,
    };
    use crate::escalation::{AlertSeverity, AlertSource, GeneralAlert, PeriodicAlertCheck};
    use crate::types::Config;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const FRAME_MS: f64 = 1000.0 / 30.0;

    /// Synthetic 30 fps stream of flat frames
    struct ScriptedSource {
        remaining: usize,
        next_index: usize,
        released: bool,
        release_log: Arc<AtomicBool>,
        /// Block this long before reporting the end of the stream
        stall: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(frames: usize) -> Self {
            Self {
                remaining: frames,
                next_index: 0,
                released: false,
                release_log: Arc::new(AtomicBool::new(false)),
                stall: None,
            }
        }

        fn stalling(frames: usize, stall: Duration) -> Self {
            Self {
                stall: Some(stall),
                ..Self::new(frames)
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
            if self.released {
                return Ok(None);
            }
            if self.remaining == 0 {
                if let Some(stall) = self.stall.take() {
                    std::thread::sleep(stall);
                }
                return Ok(None);
            }
            self.remaining -= 1;
            let ts = self.next_index as f64 * FRAME_MS;
            self.next_index += 1;
            Ok(Some(Frame {
                data: vec![100; 8 * 8 * 3],
                width: 8,
                height: 8,
                timestamp_ms: ts,
            }))
        }

        fn release(&mut self) {
            self.released = true;
            self.release_log.store(true, Ordering::SeqCst);
        }

        fn is_released(&self) -> bool {
            self.released
        }
    }

    struct NeverAlert;

    impl AlertSource for NeverAlert {
        fn poll(&mut self) -> Option<GeneralAlert> {
            None
        }
    }

    struct AlwaysAlert;

    impl AlertSource for AlwaysAlert {
        fn poll(&mut self) -> Option<GeneralAlert> {
            Some(GeneralAlert {
                message: "Unusual background noise detected".to_string(),
                severity: AlertSeverity::Error,
                raised_at: Utc::now(),
            })
        }
    }

    fn centered_face() -> FaceLandmarks {
        let mut points = vec![LandmarkPoint { x: 0.5, y: 0.5 }; 468];
        points[FaceLandmarks::NOSE_TIP] = LandmarkPoint { x: 0.5, y: 0.6 };
        points[FaceLandmarks::LEFT_EYE_CORNER] = LandmarkPoint { x: 0.4, y: 0.5 };
        points[FaceLandmarks::RIGHT_EYE_CORNER] = LandmarkPoint { x: 0.6, y: 0.5 };
        FaceLandmarks { points }
    }

    fn adapter(pattern: Vec<RawDetection>) -> DetectorAdapter {
        DetectorAdapter::with_model(
            Box::new(RecordedModel::from_detections(pattern)),
            ProhibitedObjects::from_config(&Config::default().detector),
        )
    }

    fn normal() -> RawDetection {
        RawDetection {
            faces: vec![centered_face()],
            objects: vec![],
        }
    }

    #[tokio::test]
    async fn test_monitoring_closes_open_episode_and_releases_source() {
        let config = Config::default();
        // Face lost for the whole stream: the episode is still open at the end
        let pattern: Vec<RawDetection> = (0..20).map(|_| RawDetection::default()).collect();
        let mut session = ProctoringSession::new(&config, adapter(pattern))
            .with_alert_check(PeriodicAlertCheck::new(10_000.0, Box::new(NeverAlert)));
        let mut source = ScriptedSource::new(20);
        let (_tx, rx) = watch::channel(false);

        let mut events = Vec::new();
        let report =
            run_monitoring(&mut session, &mut source, rx, |e| events.push(e.clone())).await;

        assert_eq!(report.stop_reason, StopReason::StreamEnded);
        assert_eq!(report.violation_count, 1);
        assert!(source.is_released());
        assert!(matches!(events.last(), Some(ProctorEvent::EpisodeClosed(ep)) if ep.closed_at_ms.is_some()));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let config = Config::default();
        let mut session = ProctoringSession::new(&config, adapter(vec![normal()]))
            .with_alert_check(PeriodicAlertCheck::new(10_000.0, Box::new(NeverAlert)));
        let mut source = ScriptedSource::new(100);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = run_monitoring(&mut session, &mut source, rx, |_| {}).await;
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.metrics.total_frames, 0);
        assert!(source.release_log.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_auto_submit_stops_the_loop() {
        let mut config = Config::default();
        config.escalation.alert_ceiling = 1;
        let pattern: Vec<RawDetection> = (0..600).map(|_| normal()).collect();
        let mut session = ProctoringSession::new(&config, adapter(pattern))
            .with_alert_check(PeriodicAlertCheck::new(10_000.0, Box::new(AlwaysAlert)));
        let mut source = ScriptedSource::new(600);
        let (_tx, rx) = watch::channel(false);

        let report = run_monitoring(&mut session, &mut source, rx, |_| {}).await;
        assert_eq!(report.stop_reason, StopReason::AutoSubmitted);
        assert_eq!(report.alert_count, 1);
        assert!(report.termination.is_some());
        // Stopped right after the first alert at 10s, well before 20s of frames
        assert!(report.metrics.total_frames < 310);
    }

    #[tokio::test]
    async fn test_verification_succeeds_on_stable_face() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        let pattern: Vec<RawDetection> = (0..200).map(|_| normal()).collect();
        let mut adapter = adapter(pattern);
        let source = ScriptedSource::new(200);
        let released = source.release_log.clone();
        let (_tx, rx) = watch::channel(false);

        let mut completed = None;
        let outcome = run_verification(&mut gate, &mut adapter, Box::new(source), rx, |e| {
            if let ProctorEvent::VerificationCompleted(o) = e {
                completed = Some(*o);
            }
        })
        .await;

        assert_eq!(outcome, VerificationOutcome::Success);
        assert_eq!(completed, Some(VerificationOutcome::Success));
        assert!(released.load(Ordering::SeqCst));
        assert!(!gate.has_armed_timers());
    }

    #[tokio::test]
    async fn test_verification_fails_without_face() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        let mut adapter = DetectorAdapter::new(ProhibitedObjects::from_config(
            &Config::default().detector,
        ));
        let source = Box::new(ScriptedSource::new(400));
        let (_tx, rx) = watch::channel(false);

        let outcome = run_verification(&mut gate, &mut adapter, source, rx, |_| {}).await;
        assert_eq!(outcome, VerificationOutcome::Failure);
    }

    #[tokio::test]
    async fn test_verification_times_out_while_stream_stalls() {
        let mut gate = LivenessGate::new(300.0, 1000.0);
        let mut adapter = DetectorAdapter::new(ProhibitedObjects::from_config(
            &Config::default().detector,
        ));
        // Three frames, then the camera hangs for longer than the deadline
        let source = ScriptedSource::stalling(3, Duration::from_millis(1500));
        let released = source.release_log.clone();
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        let mut completed_after = None;
        let outcome = run_verification(&mut gate, &mut adapter, Box::new(source), rx, |e| {
            if let ProctorEvent::VerificationCompleted(_) = e {
                completed_after = Some(started.elapsed());
            }
        })
        .await;

        assert_eq!(outcome, VerificationOutcome::Failure);
        let completed_after = completed_after.unwrap();
        assert!(completed_after >= Duration::from_millis(800));
        assert!(completed_after < Duration::from_millis(1400));
        assert!(!gate.has_armed_timers());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_verification_stream_ending_early_is_pending() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        let pattern: Vec<RawDetection> = (0..10).map(|_| normal()).collect();
        let mut adapter = adapter(pattern);
        let source = Box::new(ScriptedSource::new(10));
        let (_tx, rx) = watch::channel(false);

        let outcome = run_verification(&mut gate, &mut adapter, source, rx, |_| {}).await;
        assert_eq!(outcome, VerificationOutcome::Pending);
        assert!(!gate.has_armed_timers());
    }

    #[tokio::test]
    async fn test_degraded_mode_keeps_alerts_alive() {
        let mut config = Config::default();
        config.escalation.alert_ceiling = 2;
        let mut session = ProctoringSession::new(&config, DetectorAdapter::new(
            ProhibitedObjects::from_config(&config.detector),
        ))
        .with_alert_check(PeriodicAlertCheck::new(10.0, Box::new(AlwaysAlert)));
        let (_tx, rx) = watch::channel(false);

        let report =
            run_degraded(&mut session, rx, Duration::from_millis(5), |_| {}).await;
        assert_eq!(report.stop_reason, StopReason::AutoSubmitted);
        assert_eq!(report.alert_count, 2);
    }
}
