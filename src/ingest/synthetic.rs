//! Synthetic `stub://` scene for tests and demos.
//!
//! Renders a gradient background with a bright square bouncing left to right,
//! so the motion detector has something to find. Query parameters:
//! `frames` (stop after N frames), `fps` (pacing, 0 = as fast as possible),
//! `width`, `height`. Capture hints override the query size.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use super::CaptureHints;
use crate::config::{param, split_params};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub max_frames: Option<u64>,
}

impl SyntheticConfig {
    pub fn parse(uri: &str, hints: CaptureHints) -> Result<Self> {
        let (_, params) = split_params(uri);
        let fps: f64 = param(&params, "fps")?.unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps < 0.0 {
            anyhow::bail!("stub fps must be a non-negative number");
        }
        if fps > 0.0 && frame_interval(fps).is_none() {
            anyhow::bail!("stub fps {} is too low to pace", fps);
        }
        let width = hints
            .width
            .or(param(&params, "width")?)
            .unwrap_or(DEFAULT_WIDTH)
            .max(1);
        let height = hints
            .height
            .or(param(&params, "height")?)
            .unwrap_or(DEFAULT_HEIGHT)
            .max(1);
        Ok(Self {
            width,
            height,
            fps,
            max_frames: param(&params, "frames")?,
        })
    }
}

fn frame_interval(fps: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / fps).ok()
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            next_due: None,
        }
    }

    /// Next rendered frame, or `None` once `max_frames` is reached.
    pub fn next_frame(&mut self) -> Option<RgbImage> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return None;
        }
        self.pace();
        self.frame_count += 1;
        Some(self.render())
    }

    fn pace(&mut self) {
        if self.config.fps <= 0.0 {
            return;
        }
        let Some(interval) = frame_interval(self.config.fps) else {
            return;
        };
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }

    fn render(&self) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let side = (w.min(h) / 6).max(1);
        let travel = w.saturating_sub(side).max(1) as u64;
        // Bounce: position runs 0..travel..0 with a 4 px step.
        let step = (self.frame_count * 4) % (travel * 2);
        let left = (if step < travel { step } else { travel * 2 - step }) as u32;
        let top = (h.saturating_sub(side)) / 2;

        RgbImage::from_fn(w, h, |x, y| {
            if x >= left && x < left + side && y >= top && y < top + side {
                Rgb([240, 240, 240])
            } else {
                Rgb([
                    (x * 255 / w.max(1)) as u8 / 3,
                    (y * 255 / h.max(1)) as u8 / 3,
                    60,
                ])
            }
        })
    }
}
