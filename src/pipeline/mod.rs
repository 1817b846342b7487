//! The two in-process stages: capture feeds the raw channel, annotation turns
//! raw frames into JPEG for the delivery stage.

mod annotate;
mod capture;

use std::time::Duration;

pub use annotate::{AnnotateStage, AnnotateSummary};
pub use capture::{CaptureStage, CaptureSummary};

/// Bound on the annotator's wait for a raw frame.
pub const RAW_POP_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between pipeline health log lines.
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
