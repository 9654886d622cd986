// src/media/replay.rs
//
// Replays a directory of still images as a camera stream. Frames are
// decoded lazily in path order and stamped at the requested frame rate.

use super::{FrameSource, MediaConstraints, MediaError};
use crate::types::Frame;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next_index: usize,
    constraints: MediaConstraints,
    released: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, constraints: MediaConstraints) -> Result<Self, MediaError> {
        let dir = dir.as_ref();
        match std::fs::read_dir(dir) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(MediaError::PermissionDenied)
            }
            Err(e) => {
                return Err(MediaError::DeviceUnavailable(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )))
            }
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(MediaError::NoFrames(format!(
                "no images in {}",
                dir.display()
            )));
        }

        info!(
            "🎞️  Replaying {} frames from {} at {:.0} fps",
            paths.len(),
            dir.display(),
            constraints.frame_rate
        );

        Ok(Self {
            paths,
            next_index: 0,
            constraints,
            released: false,
        })
    }

    fn decode(path: &Path, timestamp_ms: f64) -> Frame {
        match image::open(path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                let (width, height) = rgb.dimensions();
                Frame {
                    data: rgb.into_raw(),
                    width: width as usize,
                    height: height as usize,
                    timestamp_ms,
                }
            }
            Err(e) => {
                // Passed on as an unreadable frame so the detector fails safe
                warn!("Could not decode {}: {}", path.display(), e);
                Frame {
                    data: Vec::new(),
                    width: 0,
                    height: 0,
                    timestamp_ms,
                }
            }
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.released {
            return Ok(None);
        }
        let path = match self.paths.get(self.next_index) {
            Some(path) => path,
            None => return Ok(None),
        };
        let timestamp_ms = self.next_index as f64 * self.constraints.frame_interval_ms();
        self.next_index += 1;
        Ok(Some(Self::decode(path, timestamp_ms)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            info!(
                "Image sequence released after {}/{} frames",
                self.next_index,
                self.paths.len()
            );
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_pixel(8, 6, Rgb([i as u8 * 10, 0, 0]));
            img.save(dir.join(format!("frame_{:04}.png", i))).unwrap();
        }
    }

    #[test]
    fn test_replays_in_order_with_synthetic_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), MediaConstraints::default()).unwrap();

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (8, 6));
        assert_eq!(first.timestamp_ms, 0.0);
        assert!(first.is_readable());

        let second = source.next_frame().unwrap().unwrap();
        assert!((second.timestamp_ms - 33.333).abs() < 0.01);
        assert_eq!(second.data[0], 10);

        source.next_frame().unwrap();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_release_is_idempotent_and_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);
        let mut source = ImageSequenceSource::open(dir.path(), MediaConstraints::default()).unwrap();

        source.release();
        source.release();
        assert!(source.is_released());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_image_becomes_unreadable_frame() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.jpg"), b"not a jpeg").unwrap();
        let mut source = ImageSequenceSource::open(dir.path(), MediaConstraints::default()).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert!(!frame.is_readable());
    }

    #[test]
    fn test_missing_or_empty_directory() {
        let err = ImageSequenceSource::open("/definitely/not/here", MediaConstraints::default())
            .err()
            .unwrap();
        assert!(err.is_denial());

        let dir = tempfile::tempdir().unwrap();
        let err = ImageSequenceSource::open(dir.path(), MediaConstraints::default())
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::NoFrames(_)));
    }
}
