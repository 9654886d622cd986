// src/detection/recorded.rs
//
// Offline model: replays detections captured earlier, one JSON line per
// frame, in frame order. Lets the whole state machine run without a GPU.

use super::model::FaceModel;
use super::types::RawDetection;
use crate::types::Frame;
use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub struct RecordedModel {
    name: String,
    detections: VecDeque<RawDetection>,
}

impl RecordedModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recorded detections {}", path.display()))?;
        let model = Self::from_jsonl(&contents)
            .with_context(|| format!("Invalid recorded detections in {}", path.display()))?;
        info!(
            "✓ Loaded {} recorded detections from {}",
            model.remaining(),
            path.display()
        );
        Ok(Self {
            name: format!("recorded:{}", path.display()),
            ..model
        })
    }

    pub fn from_jsonl(contents: &str) -> Result<Self> {
        let mut detections = VecDeque::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let detection: RawDetection = serde_json::from_str(line)
                .with_context(|| format!("line {}", line_no + 1))?;
            detections.push_back(detection);
        }
        Ok(Self {
            name: "recorded".to_string(),
            detections,
        })
    }

    pub fn from_detections(detections: Vec<RawDetection>) -> Self {
        Self {
            name: "recorded".to_string(),
            detections: detections.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.detections.len()
    }
}

impl FaceModel for RecordedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, _frame: &Frame, timestamp_ms: f64) -> Result<RawDetection> {
        match self.detections.pop_front() {
            Some(detection) => Ok(detection),
            None => bail!("recording exhausted at {:.0}ms", timestamp_ms),
        }
    }

    fn skip(&mut self, timestamp_ms: f64) {
        if self.detections.pop_front().is_some() {
            debug!("Dropped recorded detection for skipped frame at {:.0}ms", timestamp_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame {
            data: vec![0; 3],
            width: 1,
            height: 1,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_replays_in_order_then_fails() {
        let jsonl = r#"{"faces": [], "objects": []}

{"faces": [{"points": []}, {"points": []}]}
"#;
        let mut model = RecordedModel::from_jsonl(jsonl).unwrap();
        assert_eq!(model.remaining(), 2);

        assert_eq!(model.detect(&frame(), 0.0).unwrap().faces.len(), 0);
        assert_eq!(model.detect(&frame(), 33.0).unwrap().faces.len(), 2);
        assert!(model.detect(&frame(), 66.0).is_err());
    }

    #[test]
    fn test_skip_consumes_the_frame_line() {
        let mut model = RecordedModel::from_detections(vec![
            RawDetection::default(),
            RawDetection {
                faces: vec![Default::default()],
                objects: vec![],
            },
        ]);
        model.skip(0.0);
        assert_eq!(model.remaining(), 1);
        assert_eq!(model.detect(&frame(), 33.0).unwrap().faces.len(), 1);
        model.skip(66.0);
        assert_eq!(model.remaining(), 0);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let err = RecordedModel::from_jsonl("{}\nnot json\n").err().unwrap();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
