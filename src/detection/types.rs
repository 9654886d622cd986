// src/detection/types.rs

use serde::{Deserialize, Serialize};

/// Coarse gaze direction of a single face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gaze {
    Center,
    Left,
    Right,
    Down,
    Up,
    /// No usable head pose (no single face, or degenerate landmarks)
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Normalized image-space landmark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

/// Landmarks of one face in 468-point face-mesh order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<LandmarkPoint>,
}

impl FaceLandmarks {
    pub const NOSE_TIP: usize = 1;
    pub const LEFT_EYE_CORNER: usize = 33;
    pub const RIGHT_EYE_CORNER: usize = 263;

    pub fn nose_tip(&self) -> Option<LandmarkPoint> {
        self.points.get(Self::NOSE_TIP).copied()
    }

    pub fn left_eye_corner(&self) -> Option<LandmarkPoint> {
        self.points.get(Self::LEFT_EYE_CORNER).copied()
    }

    pub fn right_eye_corner(&self) -> Option<LandmarkPoint> {
        self.points.get(Self::RIGHT_EYE_CORNER).copied()
    }
}

/// What the external model reports for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub faces: Vec<FaceLandmarks>,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
}

/// Per-frame output of the detector adapter. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSample {
    pub timestamp_ms: f64,
    pub face_count: usize,
    pub gaze: Gaze,
    /// Prohibited objects only, in detector order
    pub detected_objects: Vec<DetectedObject>,
    pub confidence: f32,
}

impl DetectionSample {
    /// "No face, zero confidence". Used whenever the detector cannot answer.
    pub fn fail_safe(timestamp_ms: f64) -> Self {
        Self {
            timestamp_ms,
            face_count: 0,
            gaze: Gaze::Unknown,
            detected_objects: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn has_prohibited_objects(&self) -> bool {
        !self.detected_objects.is_empty()
    }
}
