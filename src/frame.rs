//! Frames that move through the pipeline.
//!
//! - `Frame`: a decoded RGB raster owned by exactly one stage at a time.
//!   Ownership moves into a `FrameChannel` on push; there is no shared access.
//! - `EncodedFrame`: a self-contained JPEG, immutable once produced and cheap to
//!   clone (the bytes sit behind an `Arc`).

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// Default JPEG quality for streamed frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// Frame: decoded raster
// ----------------------------------------------------------------------------

/// Decoded RGB frame (height x width x 3).
///
/// `seq` is assigned by the capture stage in arrival order and is the only
/// timestamp the rest of the pipeline relies on.
pub struct Frame {
    pub seq: u64,
    captured_at: Instant,
    image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            image,
        }
    }

    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} RGB buffer", width, height))?;
        Ok(Self::new(seq, image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Time spent since capture.
    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame: JPEG bytes for delivery
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub seq: u64,
    jpeg: Arc<[u8]>,
}

impl EncodedFrame {
    /// Encode an RGB raster as baseline JPEG.
    pub fn encode(seq: u64, image: &RgbImage, quality: u8) -> Result<Self> {
        let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .encode_image(image)
            .context("JPEG encode failed")?;
        Ok(Self::from_jpeg(seq, buffer))
    }

    /// Wrap bytes that are already JPEG encoded.
    pub fn from_jpeg(seq: u64, jpeg: Vec<u8>) -> Self {
        Self {
            seq,
            jpeg: jpeg.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(0, 4, 4, vec![0u8; 47]).is_err());
        let frame = Frame::from_rgb(7, 4, 2, vec![9u8; 24]).unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!((frame.width(), frame.height()), (4, 2));
    }

    #[test]
    fn encode_produces_decodable_jpeg() -> Result<()> {
        let image = RgbImage::from_fn(32, 16, |x, y| image::Rgb([x as u8 * 8, y as u8 * 16, 90]));
        let encoded = EncodedFrame::encode(3, &image, 75)?;
        assert_eq!(encoded.seq, 3);
        assert_eq!(&encoded.bytes()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(encoded.bytes())?;
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 16);
        Ok(())
    }

    #[test]
    fn encoded_clone_shares_bytes() {
        let a = EncodedFrame::from_jpeg(1, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let b = a.clone();
        assert!(std::ptr::eq(a.bytes().as_ptr(), b.bytes().as_ptr()));
    }
}
