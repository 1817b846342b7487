//! Local camera capture through V4L2.
//!
//! The device is asked for RGB3 at the hinted size; drivers that refuse keep
//! their own format, which is converted per frame.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::CaptureHints;

const BUFFER_COUNT: u32 = 4;

pub(crate) struct V4l2Source {
    path: String,
    state: V4l2State,
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn open(path: &str, hints: CaptureHints) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        if let Some(width) = hints.width {
            requested.width = width;
        }
        if let Some(height) = hints.height {
            requested.height = height;
        }
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let active = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = PixelFormat::from_fourcc(&active.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported pixel format {}",
                path,
                active.fourcc
            )
        })?;
        if hints.width.is_some_and(|w| w != active.width)
            || hints.height.is_some_and(|h| h != active.height)
        {
            log::warn!(
                "V4l2Source: {} chose {}x{} instead of the requested size",
                path,
                active.width,
                active.height
            );
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: streaming {} at {}x{} ({})",
            path,
            active.width,
            active.height,
            active.fourcc
        );
        Ok(Self {
            path: path.to_string(),
            state,
            width: active.width,
            height: active.height,
            format,
        })
    }

    /// Block until the driver hands over the next buffer.
    pub(crate) fn next_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let path = &self.path;
        self.state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .with_context(|| format!("capture v4l2 frame from {}", path))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })
    }
}
