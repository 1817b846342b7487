use crate::channel::{FrameChannel, PushOutcome};
use crate::frame::Frame;
use crate::ingest::{CaptureHints, FrameSource};
use crate::lifecycle::Shutdown;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames_read: u64,
    pub frames_dropped: u64,
}

/// Reads frames as fast as the source produces them and offers each to the
/// raw channel without waiting.
pub struct CaptureStage {
    uri: String,
    hints: CaptureHints,
    raw: FrameChannel<Frame>,
    shutdown: Shutdown,
}

impl CaptureStage {
    pub fn new(
        uri: String,
        hints: CaptureHints,
        raw: FrameChannel<Frame>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            uri,
            hints,
            raw,
            shutdown,
        }
    }

    /// Run until shutdown, end of stream or a read error.
    pub fn run(self) -> CaptureSummary {
        let mut summary = CaptureSummary::default();
        let mut source = match FrameSource::open(&self.uri, self.hints) {
            Ok(source) => source,
            Err(err) => {
                log::error!("capture: failed to open source '{}': {:#}", self.uri, err);
                return summary;
            }
        };
        log::info!("capture: started on {}", source.spec());

        while !self.shutdown.is_triggered() {
            match source.read() {
                Ok(Some(frame)) => {
                    if self.raw.try_push(frame) == PushOutcome::Dropped {
                        summary.frames_dropped += 1;
                    }
                }
                Ok(None) => {
                    log::info!("capture: end of stream");
                    break;
                }
                Err(err) => {
                    log::error!("capture: read failed: {:#}", err);
                    break;
                }
            }
            std::thread::yield_now();
        }

        summary.frames_read = source.frames_read();
        source.release();
        log::info!(
            "capture: stopped ({} read, {} dropped)",
            summary.frames_read,
            summary.frames_dropped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_channel_and_drops_overflow() {
        let raw = FrameChannel::bounded(2);
        let stage = CaptureStage::new(
            "stub://capture?frames=5&fps=0&width=16&height=16".to_string(),
            CaptureHints::default(),
            raw.clone(),
            Shutdown::new(),
        );
        let summary = stage.run();
        assert_eq!(summary.frames_read, 5);
        assert_eq!(summary.frames_dropped, 3);
        let seqs: Vec<u64> = std::iter::from_fn(|| raw.try_pop()).map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn open_failure_ends_stage_quietly() {
        let stage = CaptureStage::new(
            "rtsp://camera/stream".to_string(),
            CaptureHints::default(),
            FrameChannel::bounded(1),
            Shutdown::new(),
        );
        assert_eq!(stage.run(), CaptureSummary::default());
    }

    #[test]
    fn stops_on_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let stage = CaptureStage::new(
            "stub://endless?fps=0&width=8&height=8".to_string(),
            CaptureHints::default(),
            FrameChannel::bounded(1),
            shutdown,
        );
        assert_eq!(stage.run().frames_read, 0);
    }
}
