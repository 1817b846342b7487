use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Object detector used by the annotation stage.
///
/// The annotation worker owns its backend exclusively, so `detect` takes
/// `&mut self` and implementations may keep per-stream state (previous frame,
/// scratch buffers). Implementations must not retain the frame past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
