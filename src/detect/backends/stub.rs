use anyhow::Result;
use image::RgbImage;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};

/// Stub backend for tests and demos.
///
/// Reports one fixed box in the middle of every frame. An optional delay
/// simulates a model that is slower than the capture rate.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    delay: Duration,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` on every `detect` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<DetectionResult> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.frames_seen += 1;
        Ok(DetectionResult {
            detections: vec![Detection {
                x: 0.25,
                y: 0.25,
                w: 0.5,
                h: 0.5,
                confidence: 0.9,
                class_id: 0,
                label: "object",
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stub_reports_centered_box() -> Result<()> {
        let mut backend = StubBackend::new();
        let result = backend.detect(&RgbImage::new(8, 8))?;
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].label, "object");
        assert_eq!(backend.frames_seen(), 1);
        Ok(())
    }

    #[test]
    fn stub_delay_is_applied() -> Result<()> {
        let mut backend = StubBackend::new().with_delay(Duration::from_millis(30));
        let started = Instant::now();
        backend.detect(&RgbImage::new(2, 2))?;
        assert!(started.elapsed() >= Duration::from_millis(30));
        Ok(())
    }
}
