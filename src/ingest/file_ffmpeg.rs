//! Local video file decoding through FFmpeg.
//!
//! Frames are scaled to RGB24 (and to the capture hints when given) and
//! released at the stream's average frame rate so a file plays like a camera.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::CaptureHints;

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    width: u32,
    height: u32,
    interval: Option<Duration>,
    next_due: Option<Instant>,
    draining: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path, hints: CaptureHints) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}'", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file '{}' has no video track", path.display()))?;
        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let interval = if rate.numerator() > 0 && rate.denominator() > 0 {
            Some(Duration::from_secs_f64(
                rate.denominator() as f64 / rate.numerator() as f64,
            ))
        } else {
            None
        };
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let (width, height) = scaled_size(decoder.width(), decoder.height(), hints);
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FileSource: opened {} ({}x{} -> {}x{})",
            path.display(),
            decoder.width(),
            decoder.height(),
            width,
            height
        );
        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            width,
            height,
            interval,
            next_due: None,
            draining: false,
        })
    }

    /// Next decoded frame, or `None` at end of file.
    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let image = self.convert(&decoded)?;
                self.pace();
                return Ok(Some(image));
            }
            if self.draining {
                log::info!("FileSource: reached end of {}", self.path.display());
                return Ok(None);
            }
            match self.next_video_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.draining = true;
                }
            }
        }
    }

    fn next_video_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let pixels = frame_to_pixels(&rgb_frame)?;
        RgbImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| anyhow!("scaled frame size mismatch"))
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

/// Output size for the given hints; a single hint keeps the aspect ratio.
fn scaled_size(src_w: u32, src_h: u32, hints: CaptureHints) -> (u32, u32) {
    match (hints.width, hints.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale_dim(src_h, w, src_w)),
        (None, Some(h)) => (scale_dim(src_w, h, src_h), h),
        (None, None) => (src_w, src_h),
    }
}

fn scale_dim(value: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return value.max(1);
    }
    ((value as u64 * num as u64 + den as u64 / 2) / den as u64).max(1) as u32
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok(data[..row_bytes * height].to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}
