// src/detection/adapter.rs
//
// Wraps the external model and turns a frame into a DetectionSample.
// Never fails: an uninitialized model, a model error or an unreadable
// frame all produce the fail-safe "no face" sample, which the classifier
// treats as a violation instead of silently skipping the frame.

use super::model::FaceModel;
use super::types::{DetectedObject, DetectionSample, Gaze, RawDetection};
use crate::classifier::estimate_head_pose;
use crate::types::{DetectorConfig, Frame};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Which detected objects count as prohibited
#[derive(Debug, Clone)]
pub struct ProhibitedObjects {
    labels: Vec<String>,
    min_confidence: f32,
}

impl ProhibitedObjects {
    pub fn new(labels: Vec<String>, min_confidence: f32) -> Self {
        Self {
            labels: labels.into_iter().map(|l| l.to_lowercase()).collect(),
            min_confidence,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.prohibited_labels.clone(),
            config.min_object_confidence,
        )
    }

    pub fn matches(&self, object: &DetectedObject) -> bool {
        object.confidence >= self.min_confidence
            && self.labels.iter().any(|l| *l == object.label.to_lowercase())
    }
}

pub struct DetectorAdapter {
    model: Option<Box<dyn FaceModel>>,
    prohibited: ProhibitedObjects,
    fail_safe_samples: u64,
}

impl DetectorAdapter {
    /// Adapter without a model yet; every sample is fail-safe until `attach`
    pub fn new(prohibited: ProhibitedObjects) -> Self {
        Self {
            model: None,
            prohibited,
            fail_safe_samples: 0,
        }
    }

    pub fn with_model(model: Box<dyn FaceModel>, prohibited: ProhibitedObjects) -> Self {
        let mut adapter = Self::new(prohibited);
        adapter.model = Some(model);
        adapter
    }

    /// Install the outcome of an asynchronous model initialization.
    /// A failed initialization leaves the adapter in fail-safe mode.
    pub fn attach(&mut self, model: Result<Box<dyn FaceModel>>) -> bool {
        match model {
            Ok(model) => {
                info!("✓ Detector model ready: {}", model.name());
                self.model = Some(model);
                true
            }
            Err(e) => {
                warn!(
                    "Detector model failed to initialize, every frame will count as no-face: {:#}",
                    e
                );
                self.model = None;
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    pub fn sample(&mut self, frame: &Frame, timestamp_ms: f64) -> DetectionSample {
        let Some(model) = self.model.as_mut() else {
            return self.fail_safe(timestamp_ms, "model not initialized");
        };
        if !frame.is_readable() {
            model.skip(timestamp_ms);
            return self.fail_safe(timestamp_ms, "frame unreadable");
        }

        let result = model.detect(frame, timestamp_ms);

        match result {
            Ok(raw) => self.build_sample(raw, timestamp_ms),
            Err(e) => {
                warn!("Detector error at {:.0}ms: {:#}", timestamp_ms, e);
                self.fail_safe(timestamp_ms, "detector error")
            }
        }
    }

    fn build_sample(&self, raw: RawDetection, timestamp_ms: f64) -> DetectionSample {
        let detected_objects: Vec<DetectedObject> = raw
            .objects
            .into_iter()
            .filter(|o| self.prohibited.matches(o))
            .collect();

        let face_count = raw.faces.len();
        let (gaze, confidence) = match face_count {
            0 => (Gaze::Unknown, 0.0),
            1 => {
                let pose = estimate_head_pose(&raw.faces[0]);
                (pose.gaze, pose.confidence)
            }
            _ => (Gaze::Unknown, 1.0),
        };

        DetectionSample {
            timestamp_ms,
            face_count,
            gaze,
            detected_objects,
            confidence,
        }
    }

    fn fail_safe(&mut self, timestamp_ms: f64, reason: &str) -> DetectionSample {
        self.fail_safe_samples += 1;
        debug!("Fail-safe sample at {:.0}ms ({})", timestamp_ms, reason);
        DetectionSample::fail_safe(timestamp_ms)
    }

    /// A frame arrived but will not be sampled. Keeps a frame-ordered
    /// model in step with the frame stream.
    pub fn skip_frame(&mut self, timestamp_ms: f64) {
        if let Some(model) = self.model.as_mut() {
            model.skip(timestamp_ms);
        }
    }

    pub fn fail_safe_samples(&self) -> u64 {
        self.fail_safe_samples
    }
}
