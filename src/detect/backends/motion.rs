use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};

/// Sampling step in pixels for the luma grid.
const GRID_STEP: u32 = 4;

/// CPU motion detector.
///
/// Samples luma on a coarse grid, diffs it against the previous frame and
/// reports the bounding box of the changed cells as a single `motion`
/// detection. Needs no model file, so it is always available.
#[derive(Debug)]
pub struct MotionBackend {
    previous: Option<LumaGrid>,
    threshold: u8,
    min_changed_cells: usize,
}

#[derive(Debug)]
struct LumaGrid {
    cols: u32,
    rows: u32,
    frame_width: u32,
    frame_height: u32,
    luma: Vec<u8>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            previous: None,
            threshold: 25,
            min_changed_cells: 4,
        }
    }

    /// Override the per-cell luma difference that counts as change.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LumaGrid {
    fn sample(frame: &RgbImage) -> Self {
        let cols = frame.width().div_ceil(GRID_STEP);
        let rows = frame.height().div_ceil(GRID_STEP);
        let mut luma = Vec::with_capacity((cols * rows) as usize);
        for gy in 0..rows {
            for gx in 0..cols {
                let p = frame.get_pixel(gx * GRID_STEP, gy * GRID_STEP).0;
                let y = (299 * p[0] as u32 + 587 * p[1] as u32 + 114 * p[2] as u32) / 1000;
                luma.push(y as u8);
            }
        }
        Self {
            cols,
            rows,
            frame_width: frame.width(),
            frame_height: frame.height(),
            luma,
        }
    }

    fn same_shape(&self, other: &LumaGrid) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let current = LumaGrid::sample(frame);
        let result = match &self.previous {
            Some(previous) if previous.same_shape(&current) => self.diff(previous, &current),
            _ => DetectionResult::default(),
        };
        self.previous = Some(current);
        Ok(result)
    }
}

impl MotionBackend {
    fn diff(&self, previous: &LumaGrid, current: &LumaGrid) -> DetectionResult {
        let mut changed = 0usize;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        for (i, (a, b)) in previous.luma.iter().zip(&current.luma).enumerate() {
            if a.abs_diff(*b) <= self.threshold {
                continue;
            }
            let gx = i as u32 % current.cols;
            let gy = i as u32 / current.cols;
            changed += 1;
            min_x = min_x.min(gx);
            min_y = min_y.min(gy);
            max_x = max_x.max(gx);
            max_y = max_y.max(gy);
        }

        if changed < self.min_changed_cells {
            return DetectionResult::default();
        }

        let fw = current.frame_width as f32;
        let fh = current.frame_height as f32;
        let left = (min_x * GRID_STEP) as f32;
        let top = (min_y * GRID_STEP) as f32;
        let right = ((max_x + 1) * GRID_STEP).min(current.frame_width) as f32;
        let bottom = ((max_y + 1) * GRID_STEP).min(current.frame_height) as f32;
        let box_cells = ((max_x - min_x + 1) * (max_y - min_y + 1)) as f32;

        DetectionResult {
            detections: vec![Detection {
                x: left / fw,
                y: top / fh,
                w: (right - left) / fw,
                h: (bottom - top) / fh,
                confidence: (changed as f32 / box_cells).clamp(0.0, 1.0),
                class_id: 0,
                label: "motion",
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scene(square_at: Option<(u32, u32)>) -> RgbImage {
        let mut image = RgbImage::from_pixel(64, 48, Rgb([20, 20, 20]));
        if let Some((sx, sy)) = square_at {
            for y in sy..sy + 16 {
                for x in sx..sx + 16 {
                    image.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        image
    }

    #[test]
    fn motion_backend_reports_changed_region() -> Result<()> {
        let mut backend = MotionBackend::default();

        let r1 = backend.detect(&scene(None))?;
        assert!(r1.is_empty());

        let r2 = backend.detect(&scene(Some((16, 16))))?;
        assert_eq!(r2.detections.len(), 1);
        let det = &r2.detections[0];
        assert_eq!(det.label, "motion");
        assert!((det.x - 16.0 / 64.0).abs() < 1e-6);
        assert!((det.y - 16.0 / 48.0).abs() < 1e-6);
        assert!((det.w - 16.0 / 64.0).abs() < 1e-6);
        assert!((det.h - 16.0 / 48.0).abs() < 1e-6);
        assert_eq!(det.confidence, 1.0);

        let r3 = backend.detect(&scene(Some((16, 16))))?;
        assert!(r3.is_empty());
        Ok(())
    }

    #[test]
    fn resolution_change_resets_baseline() -> Result<()> {
        let mut backend = MotionBackend::default();
        backend.detect(&scene(None))?;
        let result = backend.detect(&RgbImage::from_pixel(32, 32, Rgb([255, 255, 255])))?;
        assert!(result.is_empty());
        Ok(())
    }
}
