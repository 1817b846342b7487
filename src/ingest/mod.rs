//! Frame sources for the capture stage.
//!
//! A source is named by a single string:
//! - `0`, `1`, ... : local camera index (`/dev/videoN`, feature `ingest-v4l2`)
//! - `/dev/video*` : camera device path (feature `ingest-v4l2`)
//! - `stub://...` : synthetic moving-object scene (always available)
//! - anything else: local video file (feature `ingest-file-ffmpeg`)
//!
//! Width/height hints are best-effort: cameras may pick another mode, files are
//! scaled, synthetic scenes are generated at the hinted size.

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
#[cfg(any(feature = "ingest-v4l2", test))]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::fmt;
use std::path::PathBuf;

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
use file_ffmpeg::FfmpegFileSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
use v4l2::V4l2Source;

/// Parsed source identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Camera device node.
    Device(String),
    /// `stub://` scene with its query string.
    Synthetic(String),
    /// Local video file.
    File(PathBuf),
}

impl SourceSpec {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if uri.bytes().all(|b| b.is_ascii_digit()) {
            let index: u32 = uri
                .parse()
                .map_err(|_| anyhow!("camera index '{}' out of range", uri))?;
            return Ok(Self::Device(format!("/dev/video{index}")));
        }
        if uri.starts_with("stub://") {
            return Ok(Self::Synthetic(uri.to_string()));
        }
        if uri.starts_with("/dev/video") {
            return Ok(Self::Device(uri.to_string()));
        }
        if uri.contains("://") {
            return Err(anyhow!(
                "network source '{}' is not supported; use a camera index or local file",
                uri
            ));
        }
        Ok(Self::File(PathBuf::from(uri)))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(path) => write!(f, "camera {path}"),
            Self::Synthetic(uri) => write!(f, "{uri}"),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Best-effort capture size request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureHints {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// An opened frame source.
pub struct FrameSource {
    spec: SourceSpec,
    backend: SourceBackend,
    frames_read: u64,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Source),
    #[cfg(feature = "ingest-file-ffmpeg")]
    File(FfmpegFileSource),
}

impl FrameSource {
    /// Open the source named by `uri`.
    pub fn open(uri: &str, hints: CaptureHints) -> Result<Self> {
        let spec = SourceSpec::parse(uri)?;
        let backend = match &spec {
            SourceSpec::Synthetic(uri) => {
                SourceBackend::Synthetic(SyntheticSource::new(SyntheticConfig::parse(uri, hints)?))
            }
            #[cfg(feature = "ingest-v4l2")]
            SourceSpec::Device(path) => SourceBackend::Device(V4l2Source::open(path, hints)?),
            #[cfg(not(feature = "ingest-v4l2"))]
            SourceSpec::Device(path) => {
                return Err(anyhow!(
                    "camera {} requires the ingest-v4l2 feature",
                    path
                ))
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceSpec::File(path) => SourceBackend::File(FfmpegFileSource::open(path, hints)?),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            SourceSpec::File(path) => {
                return Err(anyhow!(
                    "video file {} requires the ingest-file-ffmpeg feature",
                    path.display()
                ))
            }
        };
        log::info!("FrameSource: opened {}", spec);
        Ok(Self {
            spec,
            backend,
            frames_read: 0,
        })
    }

    /// Read the next frame. `Ok(None)` means the stream ended.
    pub fn read(&mut self) -> Result<Option<Frame>> {
        let image: Option<RgbImage> = match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => source.next_frame().map(Some)?,
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::File(source) => source.next_frame()?,
        };
        Ok(image.map(|image| {
            self.frames_read += 1;
            Frame::new(self.frames_read, image)
        }))
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Close the underlying device or file.
    pub fn release(self) {
        log::info!(
            "FrameSource: released {} after {} frames",
            self.spec,
            self.frames_read
        );
        drop(self.backend);
    }
}
