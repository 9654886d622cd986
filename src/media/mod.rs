// src/media/mod.rs

#[cfg(feature = "camera")]
pub mod camera;
pub mod replay;

use crate::types::{Frame, MediaConfig};
use thiserror::Error;

// Re-export public APIs
#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use replay::ImageSequenceSource;

/// Requested capture parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl MediaConstraints {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
        }
    }

    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.frame_rate
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("camera access denied")]
    PermissionDenied,

    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no frames available: {0}")]
    NoFrames(String),

    #[error("failed to read frame: {0}")]
    Read(String),
}

impl MediaError {
    /// Errors that mean the candidate's camera cannot be used at all
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::DeviceUnavailable(_))
    }
}

/// An acquired media stream. Released exactly once; later calls are no-ops.
pub trait FrameSource: Send {
    /// `Ok(None)` when the stream has ended
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;

    fn release(&mut self);

    fn is_released(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_classification() {
        assert!(MediaError::PermissionDenied.is_denial());
        assert!(MediaError::DeviceUnavailable("/dev/video0".into()).is_denial());
        assert!(!MediaError::NoFrames("empty".into()).is_denial());
        assert!(!MediaError::Read("eof".into()).is_denial());
    }

    #[test]
    fn test_frame_interval() {
        let constraints = MediaConstraints::default();
        assert!((constraints.frame_interval_ms() - 33.333).abs() < 0.01);
    }
}
