use std::time::Instant;

use crate::channel::{FrameChannel, PushOutcome};
use crate::config::AnnotateSettings;
use crate::detect::{DetectionResult, DetectorBackend};
use crate::fps::FpsCounter;
use crate::frame::{EncodedFrame, Frame};
use crate::lifecycle::Shutdown;
use crate::overlay;
use crate::record::Recorder;

use super::{HEALTH_LOG_INTERVAL, RAW_POP_TIMEOUT};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotateSummary {
    pub frames_annotated: u64,
    pub frames_dropped: u64,
    pub frames_recorded: u64,
    pub detector_errors: u64,
    pub encode_errors: u64,
}

/// Detection, overlay, JPEG encoding and optional recording.
pub struct AnnotateStage {
    detector: Box<dyn DetectorBackend>,
    raw: FrameChannel<Frame>,
    encoded: FrameChannel<EncodedFrame>,
    shutdown: Shutdown,
    settings: AnnotateSettings,
    recorder: Option<Recorder>,
    fps: FpsCounter,
    summary: AnnotateSummary,
}

impl AnnotateStage {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        raw: FrameChannel<Frame>,
        encoded: FrameChannel<EncodedFrame>,
        shutdown: Shutdown,
        settings: AnnotateSettings,
        recorder: Option<Recorder>,
    ) -> Self {
        let fps = FpsCounter::new(settings.fps_alpha);
        Self {
            detector,
            raw,
            encoded,
            shutdown,
            settings,
            recorder,
            fps,
            summary: AnnotateSummary::default(),
        }
    }

    /// Run until shutdown. The raw-channel wait is the only place the stage
    /// blocks.
    pub fn run(mut self) -> AnnotateSummary {
        log::info!("annotate: started with {} detector", self.detector.name());
        let mut last_health = Instant::now();

        while !self.shutdown.is_triggered() {
            let Some(frame) = self.raw.pop_timeout(RAW_POP_TIMEOUT) else {
                continue;
            };
            if let Some(encoded) = self.process(&frame) {
                if self.encoded.try_push(encoded) == PushOutcome::Dropped {
                    self.summary.frames_dropped += 1;
                }
            }
            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health = Instant::now();
            }
        }

        self.release_recorder();
        log::info!(
            "annotate: stopped ({} annotated, {} dropped)",
            self.summary.frames_annotated,
            self.summary.frames_dropped
        );
        self.summary
    }

    /// Annotate one frame. `None` when it could not be encoded.
    fn process(&mut self, frame: &Frame) -> Option<EncodedFrame> {
        let detections = match self.detector.detect(frame.image()) {
            Ok(result) => result,
            Err(err) => {
                self.summary.detector_errors += 1;
                log::warn!("annotate: detection failed on frame {}: {:#}", frame.seq, err);
                DetectionResult::default()
            }
        };

        let mut annotated = frame.image().clone();
        detections.draw(&mut annotated);
        let fps = self.fps.tick();
        if self.settings.show_fps {
            overlay::draw_fps(&mut annotated, fps);
        }

        let encoded =
            match EncodedFrame::encode(frame.seq, &annotated, self.settings.jpeg_quality) {
                Ok(encoded) => encoded,
                Err(err) => {
                    self.summary.encode_errors += 1;
                    log::warn!("annotate: JPEG encode failed on frame {}: {:#}", frame.seq, err);
                    return None;
                }
            };
        self.record(annotated.width(), annotated.height(), &encoded);
        self.summary.frames_annotated += 1;
        Some(encoded)
    }

    fn record(&mut self, width: u32, height: u32, encoded: &EncodedFrame) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        if let Err(err) = recorder.write(width, height, encoded.bytes()) {
            log::error!(
                "annotate: recording to {} failed, disabling it: {:#}",
                recorder.path().display(),
                err
            );
            self.release_recorder();
        }
    }

    fn release_recorder(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        if !recorder.is_open() {
            return;
        }
        match recorder.release() {
            Ok(frames) => self.summary.frames_recorded = frames,
            Err(err) => log::error!("annotate: failed to finalize recording: {:#}", err),
        }
    }

    fn log_health(&self) {
        let raw = self.raw.stats();
        let encoded = self.encoded.stats();
        log::info!(
            "annotate: {:.1} fps, {} annotated, raw {}/{} dropped, encoded {}/{} dropped",
            self.fps.current(),
            self.summary.frames_annotated,
            raw.dropped,
            raw.accepted + raw.dropped,
            encoded.dropped,
            encoded.accepted + encoded.dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use anyhow::{anyhow, Result};
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &RgbImage) -> Result<DetectionResult> {
            Err(anyhow!("model unavailable"))
        }
    }

    fn settings() -> AnnotateSettings {
        AnnotateSettings {
            show_fps: true,
            jpeg_quality: 80,
            fps_alpha: 0.9,
        }
    }

    fn gray_frame(seq: u64) -> Frame {
        Frame::new(seq, RgbImage::from_pixel(160, 120, Rgb([90, 90, 90])))
    }

    fn stage(
        detector: Box<dyn DetectorBackend>,
        recorder: Option<Recorder>,
    ) -> (AnnotateStage, FrameChannel<Frame>, FrameChannel<EncodedFrame>) {
        let raw = FrameChannel::bounded(4);
        let encoded = FrameChannel::bounded(4);
        let stage = AnnotateStage::new(
            detector,
            raw.clone(),
            encoded.clone(),
            Shutdown::new(),
            settings(),
            recorder,
        );
        (stage, raw, encoded)
    }

    #[test]
    fn annotated_frame_carries_detection_box() -> Result<()> {
        let (mut stage, _, _) = stage(Box::new(StubBackend::new()), None);
        let encoded = stage.process(&gray_frame(1)).ok_or_else(|| anyhow!("no output"))?;
        assert_eq!(encoded.seq, 1);
        let decoded = image::load_from_memory(encoded.bytes())?.to_rgb8();
        assert_eq!(decoded.dimensions(), (160, 120));
        // The stub box starts at a quarter of the frame; its edge is not gray.
        let edge = decoded.get_pixel(40, 60);
        assert!(edge.0.iter().any(|c| c.abs_diff(90) > 40));
        Ok(())
    }

    #[test]
    fn detector_failure_still_streams_frame() {
        let (mut stage, _, _) = stage(Box::new(FailingBackend), None);
        assert!(stage.process(&gray_frame(3)).is_some());
        assert_eq!(stage.summary.detector_errors, 1);
        assert_eq!(stage.summary.frames_annotated, 1);
    }

    #[test]
    fn run_drains_until_shutdown_and_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("annotated.avi");
        let (stage, raw, encoded) = stage(
            Box::new(StubBackend::new()),
            Some(Recorder::new(&path, 30)),
        );
        let shutdown = stage.shutdown.clone();
        for seq in 1..=3 {
            raw.try_push(gray_frame(seq));
        }
        let worker = std::thread::spawn(move || stage.run());
        let started = Instant::now();
        while encoded.len() < 3 && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        let summary = worker.join().map_err(|_| anyhow!("annotate panicked"))?;

        assert_eq!(summary.frames_annotated, 3);
        assert_eq!(summary.frames_recorded, 3);
        let seqs: Vec<u64> = std::iter::from_fn(|| encoded.try_pop()).map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn recording_failure_disables_recorder_only() {
        let (mut stage, _, _) = stage(
            Box::new(StubBackend::new()),
            Some(Recorder::new("/nonexistent-dir/out.avi", 30)),
        );
        assert!(stage.process(&gray_frame(1)).is_some());
        assert!(stage.recorder.is_none());
        assert!(stage.process(&gray_frame(2)).is_some());
        assert_eq!(stage.summary.frames_annotated, 2);
    }
}
