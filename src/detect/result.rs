use image::RgbImage;

/// Detections for one frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Render boxes and captions onto `image`.
    pub fn draw(&self, image: &mut RgbImage) {
        crate::overlay::draw_detections(image, self);
    }
}

/// One detected object. Box coordinates are normalized to 0..1.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_id: u16,
    pub label: &'static str,
}

impl Detection {
    /// Intersection over union with `other`.
    pub fn iou(&self, other: &Detection) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.w * self.h + other.w * other.h - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Greedy class-aware non-maximum suppression, highest confidence first.
#[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
pub(crate) fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && k.iou(&cand) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}
