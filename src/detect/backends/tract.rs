#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::tract_ndarray::{ArrayView3, Ix3};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, Detection, DetectionResult};

const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);
const MAX_DETECTIONS: usize = 100;

/// COCO class names in YOLOv8 output order.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLOv8 detector.
///
/// Loads an exported YOLOv8 ONNX model (`[1, 3, S, S]` input,
/// `[1, 4 + classes, anchors]` output), letterboxes each frame to the model
/// input, and decodes boxes with confidence filtering and class-aware NMS.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

/// Mapping from model input coordinates back to the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    new_w: u32,
    new_h: u32,
}

impl Letterbox {
    /// Fit a `width` x `height` frame into a `side` x `side` square, centred.
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, side);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, side);
        Self {
            scale,
            pad_x: (side - new_w) / 2,
            pad_y: (side - new_h) / 2,
            new_w,
            new_h,
        }
    }

    fn to_frame_x(&self, x: f32) -> f32 {
        (x - self.pad_x as f32) / self.scale
    }

    fn to_frame_y(&self, y: f32) -> f32 {
        (y - self.pad_y as f32) / self.scale
    }
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `input_size` square input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be positive"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the NMS overlap threshold.
    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &RgbImage) -> Result<(Tensor, Letterbox)> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let side = self.input_size;
        let letterbox = Letterbox::fit(width, height, side);
        let resized = imageops::resize(
            frame,
            letterbox.new_w,
            letterbox.new_h,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(side, side, LETTERBOX_FILL);
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });

        Ok((input.into_tensor(), letterbox))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<Ix3>()
            .map_err(|_| anyhow!("unexpected YOLO output shape {:?}", output.shape()))?;
        let candidates = decode_predictions(
            view,
            letterbox,
            (width, height),
            self.confidence_threshold,
        )?;
        Ok(select_detections(candidates, self.iou_threshold))
    }
}

fn select_detections(candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut kept = non_max_suppression(candidates, iou_threshold);
    kept.truncate(MAX_DETECTIONS);
    kept
}

/// Decode a `[1, 4 + classes, anchors]` (or transposed) YOLOv8 output into
/// frame-relative detections scoring at least `confidence_threshold`.
fn decode_predictions(
    view: ArrayView3<f32>,
    letterbox: &Letterbox,
    (width, height): (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    let shape = view.shape().to_vec();
    if shape[0] != 1 {
        return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
    }
    // Exports differ on whether anchors or attributes come last.
    let channels_first = shape[1] < shape[2];
    let (attrs, anchors) = if channels_first {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if attrs <= 4 {
        return Err(anyhow!("YOLO output has no class scores ({:?})", shape));
    }
    let at = |attr: usize, anchor: usize| -> f32 {
        if channels_first {
            view[[0, attr, anchor]]
        } else {
            view[[0, anchor, attr]]
        }
    };

    let fw = width as f32;
    let fh = height as f32;
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..attrs)
            .map(|attr| (attr - 4, at(attr, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if score < confidence_threshold {
            continue;
        }
        let cx = at(0, anchor);
        let cy = at(1, anchor);
        let bw = at(2, anchor);
        let bh = at(3, anchor);
        let left = letterbox.to_frame_x(cx - bw / 2.0).clamp(0.0, fw);
        let top = letterbox.to_frame_y(cy - bh / 2.0).clamp(0.0, fh);
        let right = letterbox.to_frame_x(cx + bw / 2.0).clamp(0.0, fw);
        let bottom = letterbox.to_frame_y(cy + bh / 2.0).clamp(0.0, fh);
        if right <= left || bottom <= top {
            continue;
        }
        candidates.push(Detection {
            x: left / fw,
            y: top / fh,
            w: (right - left) / fw,
            h: (bottom - top) / fh,
            confidence: score,
            class_id: class_id as u16,
            label: COCO_LABELS.get(class_id).copied().unwrap_or("object"),
        });
    }
    Ok(candidates)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode(outputs, &letterbox, frame.width(), frame.height())?;
        Ok(DetectionResult { detections })
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::from_pixel(self.input_size, self.input_size, LETTERBOX_FILL);
        self.detect(&blank).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tract_onnx::prelude::tract_ndarray::Array3;

    // Two anchors, two classes: a person centred in the letterboxed input and
    // a low-scoring car.
    const PREDICTIONS: [[f32; 6]; 2] = [
        [320.0, 320.0, 64.0, 32.0, 0.9, 0.1],
        [100.0, 300.0, 40.0, 40.0, 0.05, 0.2],
    ];

    /// Eight anchors, so the layout is told apart by the longer axis.
    fn anchor_rows() -> Vec<[f32; 6]> {
        let mut rows = vec![[0.0f32; 6]; 8];
        rows[..2].copy_from_slice(&PREDICTIONS);
        rows
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-4,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn letterbox_centres_wide_frames() {
        let letterbox = Letterbox::fit(1280, 720, 640);
        assert_close(letterbox.scale, 0.5);
        assert_eq!((letterbox.new_w, letterbox.new_h), (640, 360));
        assert_eq!((letterbox.pad_x, letterbox.pad_y), (0, 140));
        assert_close(letterbox.to_frame_x(320.0), 640.0);
        assert_close(letterbox.to_frame_y(320.0), 360.0);
    }

    #[test]
    fn decodes_channels_first_output() -> Result<()> {
        let rows = anchor_rows();
        let output = Array3::from_shape_fn((1, 6, 8), |(_, attr, anchor)| rows[anchor][attr]);
        let letterbox = Letterbox::fit(1280, 720, 640);
        let detections = decode_predictions(output.view(), &letterbox, (1280, 720), 0.25)?;

        assert_eq!(detections.len(), 1);
        let person = &detections[0];
        assert_eq!((person.class_id, person.label), (0, "person"));
        assert_close(person.confidence, 0.9);
        // 64x32 input pixels at scale 0.5 is 128x64 around the frame centre.
        assert_close(person.x, (640.0 - 64.0) / 1280.0);
        assert_close(person.y, (360.0 - 32.0) / 720.0);
        assert_close(person.w, 128.0 / 1280.0);
        assert_close(person.h, 64.0 / 720.0);
        Ok(())
    }

    #[test]
    fn decodes_channels_last_output() -> Result<()> {
        let rows = anchor_rows();
        let output = Array3::from_shape_fn((1, 8, 6), |(_, anchor, attr)| rows[anchor][attr]);
        let letterbox = Letterbox::fit(640, 640, 640);

        let detections = decode_predictions(output.view(), &letterbox, (640, 640), 0.15)?;
        let labels: Vec<&str> = detections.iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["person", "bicycle"]);
        assert_close(detections[1].x, 80.0 / 640.0);
        Ok(())
    }

    #[test]
    fn rejects_outputs_without_class_scores() {
        let output = Array3::<f32>::zeros((1, 4, 10));
        let letterbox = Letterbox::fit(640, 640, 640);
        assert!(decode_predictions(output.view(), &letterbox, (640, 640), 0.25).is_err());
        let batched = Array3::<f32>::zeros((2, 6, 10));
        assert!(decode_predictions(batched.view(), &letterbox, (640, 640), 0.25).is_err());
    }

    #[test]
    fn selection_caps_detection_count() {
        let candidates = (0..MAX_DETECTIONS + 20)
            .map(|i| Detection {
                x: (i % 20) as f32 * 0.05,
                y: (i / 20) as f32 * 0.1,
                w: 0.01,
                h: 0.01,
                confidence: 0.5,
                class_id: 0,
                label: "person",
            })
            .collect();
        assert_eq!(select_detections(candidates, 0.45).len(), MAX_DETECTIONS);
    }
}
