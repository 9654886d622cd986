// src/detection/model.rs
//
// Seam between the adapter and whatever produces raw face/object
// detections. Implementations may fail freely; the adapter absorbs it.

use super::types::RawDetection;
use crate::types::Frame;
use anyhow::Result;

pub trait FaceModel: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame, timestamp_ms: f64) -> Result<RawDetection>;

    /// The frame at `timestamp_ms` will not be passed to `detect`
    fn skip(&mut self, _timestamp_ms: f64) {}
}
