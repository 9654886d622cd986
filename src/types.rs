// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub subject: SubjectConfig,
    pub detector: DetectorConfig,
    pub media: MediaConfig,
    pub episode: EpisodeConfig,
    pub escalation: EscalationConfig,
    pub verification: VerificationConfig,
    pub evidence: EvidenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectConfig {
    pub id: String,
    pub name: Option<String>,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            id: "SE123456".to_string(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Replays `RawDetection` JSON lines, one per frame
    Recorded,
    /// ONNX Runtime models (requires the `onnx` feature)
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,
    pub detections_path: String,
    pub verification_detections_path: String,
    pub object_model_path: String,
    pub face_mesh_model_path: Option<String>,
    pub num_threads: usize,
    pub prohibited_labels: Vec<String>,
    pub min_object_confidence: f32,
    pub min_person_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Recorded,
            detections_path: "recordings/exam.jsonl".to_string(),
            verification_detections_path: "recordings/verification.jsonl".to_string(),
            object_model_path: "models/yolov8n.onnx".to_string(),
            face_mesh_model_path: Some("models/face_mesh.onnx".to_string()),
            num_threads: 4,
            prohibited_labels: vec![
                "cell phone".to_string(),
                "book".to_string(),
                "laptop".to_string(),
            ],
            min_object_confidence: 0.5,
            min_person_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    Images,
    Camera,
}

/// What to do when the camera cannot be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeniedMediaPolicy {
    /// Refuse to start the exam
    Block,
    /// Start the exam with periodic alerts only
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub backend: MediaBackend,
    pub frames_dir: String,
    pub verification_frames_dir: String,
    pub device_index: i32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub on_denied: DeniedMediaPolicy,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: MediaBackend::Images,
            frames_dir: "recordings/exam_frames".to_string(),
            verification_frames_dir: "recordings/verification_frames".to_string(),
            device_index: 0,
            width: 640,
            height: 480,
            frame_rate: 30.0,
            on_denied: DeniedMediaPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub cooldown_ms: f64,
    pub recent_history: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 3500.0,
            recent_history: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub violation_ceiling: u32,
    pub alert_ceiling: u32,
    pub alert_interval_ms: f64,
    pub alert_probability: f64,
    pub alert_seed: Option<u64>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            violation_ceiling: 10,
            alert_ceiling: 5,
            alert_interval_ms: 10_000.0,
            alert_probability: 0.3,
            alert_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub success_duration_ms: f64,
    pub timeout_ms: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            success_duration_ms: 3000.0,
            timeout_ms: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceBackend {
    Local,
    Http,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub enabled: bool,
    pub backend: EvidenceBackend,
    pub local_root: String,
    pub api_url: String,
    pub timeout_secs: u64,
    pub jpeg_quality: u8,
    pub path_prefix: String,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: EvidenceBackend::Local,
            local_root: "evidence".to_string(),
            api_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 30,
            jpeg_quality: 80,
            path_prefix: "detection_logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One decoded RGB8 video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    /// A frame is readable when it carries a full RGB buffer for its size
    pub fn is_readable(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.width * self.height * 3
    }
}
