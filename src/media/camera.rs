// src/media/camera.rs
//
// Live webcam capture through OpenCV. The device is opened once per
// monitoring session and released on teardown.

use super::{FrameSource, MediaConstraints, MediaError};
use crate::types::Frame;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::time::Instant;
use tracing::{info, warn};

pub struct CameraSource {
    cap: VideoCapture,
    device_index: i32,
    started_at: Instant,
    released: bool,
}

impl CameraSource {
    pub fn acquire(device_index: i32, constraints: MediaConstraints) -> Result<Self, MediaError> {
        check_device_permission(device_index)?;

        let mut cap = VideoCapture::new(device_index, videoio::CAP_ANY)
            .map_err(|e| MediaError::DeviceUnavailable(e.to_string()))?;
        let opened = cap
            .is_opened()
            .map_err(|e| MediaError::DeviceUnavailable(e.to_string()))?;
        if !opened {
            return Err(MediaError::DeviceUnavailable(format!(
                "camera {} could not be opened",
                device_index
            )));
        }

        let requested = [
            (videoio::CAP_PROP_FRAME_WIDTH, constraints.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, constraints.height as f64),
            (videoio::CAP_PROP_FPS, constraints.frame_rate),
        ];
        for (prop, value) in requested {
            if !cap.set(prop, value).unwrap_or(false) {
                warn!("Camera {} ignored property {} = {}", device_index, prop, value);
            }
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        let fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        info!(
            "📷 Camera {} acquired: {}x{} @ {:.1} FPS",
            device_index, width, height, fps
        );

        Ok(Self {
            cap,
            device_index,
            started_at: Instant::now(),
            released: false,
        })
    }
}

#[cfg(target_os = "linux")]
fn check_device_permission(device_index: i32) -> Result<(), MediaError> {
    let path = format!("/dev/video{}", device_index);
    match std::fs::File::open(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(MediaError::PermissionDenied)
        }
        _ => Ok(()),
    }
}

#[cfg(not(target_os = "linux"))]
fn check_device_permission(_device_index: i32) -> Result<(), MediaError> {
    Ok(())
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.released {
            return Ok(None);
        }

        let mut mat = Mat::default();
        let ok = self
            .cap
            .read(&mut mat)
            .map_err(|e| MediaError::Read(e.to_string()))?;
        if !ok || mat.empty() {
            return Ok(None);
        }
        let timestamp_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| MediaError::Read(e.to_string()))?;
        let data = rgb_mat
            .data_bytes()
            .map_err(|e| MediaError::Read(e.to_string()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: rgb_mat.cols() as usize,
            height: rgb_mat.rows() as usize,
            timestamp_ms,
        }))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.cap.release() {
            warn!("Camera {} release failed: {}", self.device_index, e);
        } else {
            info!("📷 Camera {} released", self.device_index);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}
