//! Live object-detection streamer.
//!
//! Frames flow through three stages connected by bounded, drop-when-full
//! channels:
//!
//! 1. **Capture** (`pipeline::CaptureStage`): reads a camera, video file or
//!    synthetic scene as fast as it produces frames.
//! 2. **Annotate** (`pipeline::AnnotateStage`): runs the detector, draws boxes
//!    and the FPS readout, encodes JPEG and optionally records.
//! 3. **Deliver** (`server::StreamServer`): serves the JPEGs to a browser as
//!    `multipart/x-mixed-replace`.
//!
//! A slow stage never stalls the one before it; newer frames are dropped
//! instead. Every wait is bounded, so the shared `lifecycle::Shutdown` token
//! stops all stages within about a second.
//!
//! # Module Structure
//!
//! - `frame`: raw and encoded frames
//! - `channel`: bounded hand-off queue with drop counters
//! - `ingest`: frame sources (V4L2, FFmpeg files, `stub://`)
//! - `detect`: detector trait, backends and model registry
//! - `overlay`, `fps`: annotation drawing and the frame-rate estimate
//! - `record`: Motion-JPEG AVI recording
//! - `server`, `netinfo`: HTTP delivery
//! - `lifecycle`, `config`: wiring, shutdown and configuration

pub mod channel;
pub mod config;
pub mod detect;
pub mod fps;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod netinfo;
pub mod overlay;
pub mod pipeline;
pub mod record;
pub mod server;

pub use channel::{ChannelStats, FrameChannel, PushOutcome};
pub use config::StreamerConfig;
pub use detect::{Detection, DetectionResult, DetectorBackend};
pub use fps::FpsCounter;
pub use frame::{EncodedFrame, Frame};
pub use ingest::{CaptureHints, FrameSource, SourceSpec};
pub use lifecycle::{JoinOutcome, LifecycleState, Shutdown, StopReport, StreamService, Worker};
pub use record::Recorder;
pub use server::StreamServer;
