// src/classifier.rs
//
// Resolves one detection sample into exactly one violation kind.
// Precedence is fixed so simultaneous conditions never produce two answers:
//
//   no-face > multiple-faces > looking-down > looking-left > looking-right
//     > prohibited-object > looking-away > normal

use crate::detection::{DetectionSample, FaceLandmarks, Gaze};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// HEAD POSE THRESHOLDS
// ============================================================================
/// |horizontal ratio| above this is a sideways head turn
pub const HORIZONTAL_THRESHOLD: f32 = 0.2;
/// Nose this far below the eye line (in eye distances) is looking down
pub const LOOKING_DOWN_THRESHOLD: f32 = 0.75;
/// Nose above the eye line is looking up
pub const LOOKING_UP_THRESHOLD: f32 = -0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    NoFace,
    MultipleFaces,
    LookingDown,
    LookingLeft,
    LookingRight,
    ProhibitedObject,
    LookingAway,
    Normal,
}

impl ViolationKind {
    /// Highest precedence first
    pub const PRECEDENCE: [ViolationKind; 8] = [
        ViolationKind::NoFace,
        ViolationKind::MultipleFaces,
        ViolationKind::LookingDown,
        ViolationKind::LookingLeft,
        ViolationKind::LookingRight,
        ViolationKind::ProhibitedObject,
        ViolationKind::LookingAway,
        ViolationKind::Normal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFace => "no-face",
            Self::MultipleFaces => "multiple-faces",
            Self::LookingDown => "looking-down",
            Self::LookingLeft => "looking-left",
            Self::LookingRight => "looking-right",
            Self::ProhibitedObject => "prohibited-object",
            Self::LookingAway => "looking-away",
            Self::Normal => "normal",
        }
    }

    /// Human-readable status stored with evidence records
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoFace => "No face detected",
            Self::MultipleFaces => "Multiple people detected",
            Self::LookingDown => "Candidate looking down",
            Self::LookingLeft => "Candidate turned left",
            Self::LookingRight => "Candidate turned right",
            Self::ProhibitedObject => "Prohibited object detected",
            Self::LookingAway => "Candidate looking away",
            Self::Normal => "Normal",
        }
    }

    /// Lower is more severe
    pub fn precedence(&self) -> usize {
        Self::PRECEDENCE
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::PRECEDENCE.len())
    }

    pub fn is_violation(&self) -> bool {
        *self != Self::Normal
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Head pose derived from three face-mesh landmarks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub horizontal_ratio: f32,
    pub vertical_ratio: f32,
    pub gaze: Gaze,
    pub confidence: f32,
}

/// Estimate where a single face is looking.
///
/// Offsets of the nose tip from the eye-corner midpoint are normalized by the
/// inter-eye distance. A zero or non-finite eye distance yields `Gaze::Unknown`.
pub fn estimate_head_pose(face: &FaceLandmarks) -> HeadPose {
    let (nose, left_eye, right_eye) = match (
        face.nose_tip(),
        face.left_eye_corner(),
        face.right_eye_corner(),
    ) {
        (Some(n), Some(l), Some(r)) => (n, l, r),
        _ => {
            return HeadPose {
                horizontal_ratio: 0.0,
                vertical_ratio: 0.0,
                gaze: Gaze::Unknown,
                confidence: 0.0,
            }
        }
    };

    let eye_distance = (left_eye.x - right_eye.x).abs();
    if eye_distance == 0.0 || !eye_distance.is_finite() {
        return HeadPose {
            horizontal_ratio: 0.0,
            vertical_ratio: 0.0,
            gaze: Gaze::Unknown,
            confidence: 0.0,
        };
    }

    let mid_x = (left_eye.x + right_eye.x) / 2.0;
    let mid_y = (left_eye.y + right_eye.y) / 2.0;
    let horizontal_ratio = (nose.x - mid_x) / eye_distance;
    let vertical_ratio = (nose.y - mid_y) / eye_distance;

    if !horizontal_ratio.is_finite() || !vertical_ratio.is_finite() {
        return HeadPose {
            horizontal_ratio: 0.0,
            vertical_ratio: 0.0,
            gaze: Gaze::Unknown,
            confidence: 0.0,
        };
    }

    // Same order as the kind precedence: down, left, right, then up
    let gaze = if vertical_ratio > LOOKING_DOWN_THRESHOLD {
        Gaze::Down
    } else if horizontal_ratio > HORIZONTAL_THRESHOLD {
        Gaze::Left
    } else if horizontal_ratio < -HORIZONTAL_THRESHOLD {
        Gaze::Right
    } else if vertical_ratio < LOOKING_UP_THRESHOLD {
        Gaze::Up
    } else {
        Gaze::Center
    };

    HeadPose {
        horizontal_ratio,
        vertical_ratio,
        gaze,
        confidence: (horizontal_ratio.abs() + vertical_ratio.abs()).min(1.0),
    }
}

pub fn classify(sample: &DetectionSample) -> ViolationKind {
    if sample.face_count == 0 {
        return ViolationKind::NoFace;
    }
    if sample.face_count > 1 {
        return ViolationKind::MultipleFaces;
    }

    match sample.gaze {
        Gaze::Down => return ViolationKind::LookingDown,
        Gaze::Left => return ViolationKind::LookingLeft,
        Gaze::Right => return ViolationKind::LookingRight,
        Gaze::Center | Gaze::Up | Gaze::Unknown => {}
    }

    if sample.has_prohibited_objects() {
        return ViolationKind::ProhibitedObject;
    }

    match sample.gaze {
        Gaze::Up | Gaze::Unknown => ViolationKind::LookingAway,
        _ => ViolationKind::Normal,
    }
}
