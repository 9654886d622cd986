// src/evidence/snapshot.rs

use crate::types::Frame;
use anyhow::{bail, Context, Result};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

/// Encode an RGB frame to JPEG bytes using the `image` crate.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let expected_len = frame.width * frame.height * 3;
    if frame.width == 0 || frame.height == 0 || frame.data.len() < expected_len {
        bail!(
            "frame buffer too small: {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        );
    }

    let img: RgbImage = ImageBuffer::from_raw(
        frame.width as u32,
        frame.height as u32,
        frame.data[..expected_len].to_vec(),
    )
    .context("frame dimensions do not match buffer")?;

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .context("JPEG encoding failed")?;

    Ok(buf.into_inner())
}
