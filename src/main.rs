// src/main.rs

mod classifier;
mod config;
mod detection;
mod episode_tracker;
mod escalation;
mod evidence;
mod liveness;
mod media;
mod pipeline;
mod timer;
mod types;

use anyhow::{Context, Result};
use detection::{DetectorAdapter, FaceModel, ProhibitedObjects, RecordedModel};
use evidence::{
    EvidencePipeline, EvidenceStore, FsEvidenceStore, FsLogStore, HttpEvidenceClient, LogStore,
    MemoryEvidenceStore, MemoryLogStore,
};
use liveness::{LivenessGate, VerificationOutcome};
use media::{FrameSource, ImageSequenceSource, MediaConstraints, MediaError};
use pipeline::{ProctorEvent, ProctoringSession, RunReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{
    Config, DeniedMediaPolicy, DetectorBackend, DetectorConfig, EvidenceBackend, MediaBackend,
    MediaConfig,
};

const DEGRADED_TICK: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::var("PROCTOR_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("exam_proctor={},ort=warn", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🎓 Exam proctoring starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Subject {} | cool-down {:.1}s | ceilings: {} violations / {} alerts",
        config.subject.id,
        config.episode.cooldown_ms / 1000.0,
        config.escalation.violation_ceiling,
        config.escalation.alert_ceiling
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            let _ = cancel_tx.send(true);
        }
    });

    let constraints = MediaConstraints::from_config(&config.media);

    // ========================================================================
    // LIVENESS VERIFICATION
    // ========================================================================

    let mut camera_denied = false;
    if config.verification.enabled {
        match open_source(&config.media, &config.media.verification_frames_dir, constraints) {
            Ok(source) => {
                let mut adapter =
                    init_adapter(&config.detector, &config.detector.verification_detections_path)
                        .await;
                let mut gate = LivenessGate::from_config(&config.verification);
                let outcome = pipeline::run_verification(
                    &mut gate,
                    &mut adapter,
                    source,
                    cancel_rx.clone(),
                    log_event,
                )
                .await;

                if outcome != VerificationOutcome::Success {
                    error!("❌ Liveness verification did not pass ({:?}); exam not started", outcome);
                    return Ok(());
                }
            }
            Err(e) => {
                camera_denied = check_denial(&config.media, e)?;
            }
        }
    }

    if *cancel_rx.borrow() {
        return Ok(());
    }

    // ========================================================================
    // MONITORING
    // ========================================================================

    let (evidence, log_store) = build_evidence(&config)?;
    let adapter = init_adapter(&config.detector, &config.detector.detections_path).await;
    let mut session = ProctoringSession::new(&config, adapter);
    let mut collection = None;
    if let Some((pipeline, outcomes)) = evidence {
        collection = Some(pipeline.collection());
        session = session.with_evidence(pipeline, outcomes);
    }

    let source = if camera_denied {
        None
    } else {
        match open_source(&config.media, &config.media.frames_dir, constraints) {
            Ok(source) => Some(source),
            Err(e) => {
                check_denial(&config.media, e)?;
                None
            }
        }
    };

    let report = match source {
        Some(mut source) => {
            pipeline::run_monitoring(&mut session, source.as_mut(), cancel_rx, log_event).await
        }
        None => pipeline::run_degraded(&mut session, cancel_rx, DEGRADED_TICK, log_event).await,
    };

    print_report(&report);

    if let (Some(logs), Some(collection)) = (log_store, collection) {
        match logs.list(&collection).await {
            Ok(records) => {
                info!("📁 {} evidence records in {}", records.len(), collection);
                if let Some(newest) = records.first() {
                    info!(
                        "  Newest: {} ({}) at {}",
                        newest.kind,
                        newest.status,
                        newest
                            .uploaded_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                }
            }
            Err(e) => warn!("Could not list evidence records: {:#}", e),
        }
    }

    Ok(())
}

// ============================================================================
// SETUP
// ============================================================================

/// Returns true when monitoring should continue without a camera
fn check_denial(media: &MediaConfig, err: MediaError) -> Result<bool> {
    if err.is_denial() && media.on_denied == DeniedMediaPolicy::Degrade {
        warn!("📷 Camera unavailable ({}), continuing degraded", err);
        return Ok(true);
    }
    Err(err).context("Camera is required to start the exam")
}

fn open_source(
    media: &MediaConfig,
    frames_dir: &str,
    constraints: MediaConstraints,
) -> Result<Box<dyn FrameSource>, MediaError> {
    match media.backend {
        MediaBackend::Images => Ok(Box::new(ImageSequenceSource::open(frames_dir, constraints)?)),
        MediaBackend::Camera => open_camera(media, constraints),
    }
}

#[cfg(feature = "camera")]
fn open_camera(
    media: &MediaConfig,
    constraints: MediaConstraints,
) -> Result<Box<dyn FrameSource>, MediaError> {
    Ok(Box::new(media::CameraSource::acquire(
        media.device_index,
        constraints,
    )?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(
    _media: &MediaConfig,
    _constraints: MediaConstraints,
) -> Result<Box<dyn FrameSource>, MediaError> {
    Err(MediaError::DeviceUnavailable(
        "built without the `camera` feature".to_string(),
    ))
}

/// Load the detector off the async thread. A failed load leaves the adapter
/// uninitialized, which makes every sample a no-face sample.
async fn init_adapter(config: &DetectorConfig, recording: &str) -> DetectorAdapter {
    let mut adapter = DetectorAdapter::new(ProhibitedObjects::from_config(config));
    let detector_config = config.clone();
    let recording = recording.to_string();

    let loaded = tokio::task::spawn_blocking(move || load_model(&detector_config, &recording))
        .await
        .context("Detector loader panicked")
        .and_then(|result| result);
    adapter.attach(loaded);
    adapter
}

fn load_model(config: &DetectorConfig, recording: &str) -> Result<Box<dyn FaceModel>> {
    match config.backend {
        DetectorBackend::Recorded => Ok(Box::new(RecordedModel::load(recording)?)),
        DetectorBackend::Onnx => load_onnx(config),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(config: &DetectorConfig) -> Result<Box<dyn FaceModel>> {
    Ok(Box::new(detection::OnnxFaceModel::load(config)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_config: &DetectorConfig) -> Result<Box<dyn FaceModel>> {
    anyhow::bail!("detector.backend is onnx but this build lacks the `onnx` feature")
}

type EvidenceSetup = (
    Option<(
        EvidencePipeline,
        tokio::sync::mpsc::UnboundedReceiver<evidence::EvidenceOutcome>,
    )>,
    Option<Arc<dyn LogStore>>,
);

fn build_evidence(config: &Config) -> Result<EvidenceSetup> {
    if !config.evidence.enabled {
        info!("Evidence capture disabled");
        return Ok((None, None));
    }

    let (images, logs): (Arc<dyn EvidenceStore>, Arc<dyn LogStore>) = match config.evidence.backend
    {
        EvidenceBackend::Local => {
            info!("📁 Evidence stored under {}", config.evidence.local_root);
            (
                Arc::new(FsEvidenceStore::new(&config.evidence.local_root)),
                Arc::new(FsLogStore::new(&config.evidence.local_root)),
            )
        }
        EvidenceBackend::Http => {
            info!("🌐 Evidence API URL: {}", config.evidence.api_url);
            let client = Arc::new(HttpEvidenceClient::new(
                &config.evidence.api_url,
                config.evidence.timeout_secs,
            )?);
            (client.clone(), client)
        }
        EvidenceBackend::Memory => (
            Arc::new(MemoryEvidenceStore::new()),
            Arc::new(MemoryLogStore::new()),
        ),
    };

    let (pipeline, outcomes) =
        EvidencePipeline::new(images, logs.clone(), &config.subject, &config.evidence);
    Ok((Some((pipeline, outcomes)), Some(logs)))
}

// ============================================================================
// OUTPUT
// ============================================================================

fn log_event(event: &ProctorEvent) {
    match event {
        ProctorEvent::EpisodeOpened(ep) => {
            info!("⚠️  {} at {:.1}s", ep.kind.label(), ep.opened_at_ms / 1000.0)
        }
        ProctorEvent::EpisodeSuppressed(ep) => {
            debug!("{} at {:.1}s inside cool-down", ep.kind, ep.opened_at_ms / 1000.0)
        }
        ProctorEvent::EpisodeClosed(ep) => debug!(
            "{} ended after {:.1}s",
            ep.kind,
            ep.duration_ms().unwrap_or(0.0) / 1000.0
        ),
        ProctorEvent::ViolationConfirmed { kind, count } => {
            info!("Violation {} recorded: {}", count, kind)
        }
        ProctorEvent::GeneralAlert { alert, count } => {
            warn!("🔔 Alert {} ({:?}): {}", count, alert.severity, alert.message)
        }
        ProctorEvent::AutoSubmit(signal) => error!(
            "🚨 EXAM AUTO-SUBMITTED: {} (violations={}, alerts={})",
            signal.trigger.as_str(),
            signal.violation_count,
            signal.alert_count
        ),
        ProctorEvent::EvidenceStored(record) => {
            debug!("Evidence {} -> {}", record.id, record.image_url)
        }
        ProctorEvent::EvidenceFailed {
            record_id,
            kind,
            error,
        } => warn!("Evidence {} for {} not stored: {}", record_id, kind, error),
        ProctorEvent::VerificationCompleted(outcome) => {
            info!("Liveness verification finished: {:?}", outcome)
        }
    }
}

fn print_report(report: &RunReport) {
    info!("\n========================================");
    info!("SESSION SUMMARY");
    info!("========================================");
    info!("  Stopped: {:?}", report.stop_reason);
    info!("  Violations: {}", report.violation_count);
    info!("  General alerts: {}", report.alert_count);
    if let Some(signal) = &report.termination {
        info!("  Auto-submitted by {}", signal.trigger.as_str());
    }
    info!(
        "  Frames: {} ({} skipped, {} fail-safe) at {:.1} FPS",
        report.metrics.total_frames,
        report.metrics.skipped_frames,
        report.metrics.fail_safe_samples,
        report.metrics.fps
    );
    info!(
        "  Episodes: {} confirmed, {} suppressed",
        report.metrics.confirmed_episodes, report.metrics.suppressed_episodes
    );
    info!(
        "  Evidence: {} stored, {} failed",
        report.metrics.evidence_successes, report.metrics.evidence_failures
    );
    info!(
        "  Detector: mean {:.2}ms over {} samples",
        report.scheduler.mean_latency_ms, report.scheduler.frames_sampled
    );

    match serde_json::to_string(report) {
        Ok(json) => debug!("Report: {}", json),
        Err(e) => warn!("Could not serialize report: {}", e),
    }
}
