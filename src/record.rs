//! Optional recording of the annotated stream.
//!
//! The annotator already holds each frame as JPEG, so the recording is a
//! Motion-JPEG AVI: the bytes are stored as-is in `00dc` chunks and the file
//! is finalized (frame counts, `idx1` index) on release.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_RECORD_FPS: u32 = 30;

const HEADER_LEN: usize = 224;
/// Offset of the `movi` fourcc; index offsets are relative to it.
const MOVI_FOURCC_AT: u32 = 220;
const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

/// Lazily-opened recording sink.
///
/// Nothing touches the filesystem until the first frame arrives; that frame
/// fixes the video dimensions for the rest of the file.
pub struct Recorder {
    path: PathBuf,
    fps: u32,
    writer: Option<AviWriter>,
    skipped: u64,
}

fn avi_path(path: PathBuf) -> PathBuf {
    let is_avi = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"));
    if is_avi {
        return path;
    }
    let mut name = path.into_os_string();
    name.push(".avi");
    let fixed = PathBuf::from(name);
    log::warn!(
        "Recorder: output is Motion-JPEG AVI, writing to {}",
        fixed.display()
    );
    fixed
}

impl Recorder {
    /// Record to `path`. A path without an `.avi` extension gets one
    /// appended, since the container is always AVI.
    pub fn new(path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            path: avi_path(path.into()),
            fps: fps.max(1),
            writer: None,
            skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn frames_written(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.index.len() as u64)
    }

    /// Append one JPEG frame, opening the file on first use.
    ///
    /// Frames whose size differs from the first one are skipped.
    pub fn write(&mut self, width: u32, height: u32, jpeg: &[u8]) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(AviWriter::create(&self.path, width, height, self.fps)?);
            log::info!(
                "Recorder: writing {}x{} @ {} fps to {}",
                width,
                height,
                self.fps,
                self.path.display()
            );
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if (width, height) != (writer.width, writer.height) {
            self.skipped += 1;
            log::warn!(
                "Recorder: skipping {}x{} frame (recording is {}x{})",
                width,
                height,
                writer.width,
                writer.height
            );
            return Ok(());
        }
        writer.append(jpeg)
    }

    /// Finalize the file. Returns the number of frames recorded.
    pub fn release(self) -> Result<u64> {
        let Some(writer) = self.writer else {
            return Ok(0);
        };
        let frames = writer.finish()?;
        log::info!(
            "Recorder: closed {} ({} frames, {} skipped)",
            self.path.display(),
            frames,
            self.skipped
        );
        Ok(frames)
    }
}

struct AviWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    fps: u32,
    /// (offset from `movi`, payload size) per frame.
    index: Vec<(u32, u32)>,
    movi_len: u32,
    max_chunk: u32,
}

impl AviWriter {
    fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot record a {}x{} frame", width, height));
        }
        let file = File::create(path)
            .with_context(|| format!("create recording file {}", path.display()))?;
        let mut writer = Self {
            out: BufWriter::new(file),
            width,
            height,
            fps,
            index: Vec::new(),
            movi_len: 0,
            max_chunk: 0,
        };
        let header = writer.header(0);
        writer
            .out
            .write_all(&header)
            .context("write AVI header")?;
        Ok(writer)
    }

    fn append(&mut self, jpeg: &[u8]) -> Result<()> {
        let size = u32::try_from(jpeg.len()).map_err(|_| anyhow!("JPEG frame too large"))?;
        let padded = size + (size & 1);
        let offset = 4 + self.movi_len;
        let movi_len = self
            .movi_len
            .checked_add(8 + padded)
            .ok_or_else(|| anyhow!("recording exceeds the AVI size limit"))?;

        self.out.write_all(b"00dc")?;
        self.out.write_all(&size.to_le_bytes())?;
        self.out.write_all(jpeg)?;
        if padded != size {
            self.out.write_all(&[0])?;
        }
        self.index.push((offset, size));
        self.movi_len = movi_len;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        let mut idx1 = Vec::with_capacity(8 + self.index.len() * 16);
        idx1.extend_from_slice(b"idx1");
        idx1.extend_from_slice(&((self.index.len() * 16) as u32).to_le_bytes());
        for (offset, size) in &self.index {
            idx1.extend_from_slice(b"00dc");
            idx1.extend_from_slice(&AVIIF_KEYFRAME.to_le_bytes());
            idx1.extend_from_slice(&offset.to_le_bytes());
            idx1.extend_from_slice(&size.to_le_bytes());
        }
        self.out.write_all(&idx1).context("write AVI index")?;

        let riff_len = (HEADER_LEN as u32 - 8)
            .checked_add(self.movi_len)
            .and_then(|v| v.checked_add(idx1.len() as u32))
            .ok_or_else(|| anyhow!("recording exceeds the AVI size limit"))?;
        let header = self.header(riff_len);
        self.out.seek(SeekFrom::Start(0)).context("rewind recording")?;
        self.out.write_all(&header).context("rewrite AVI header")?;
        self.out.flush().context("flush recording")?;
        Ok(self.index.len() as u64)
    }

    fn header(&self, riff_len: u32) -> Vec<u8> {
        let frames = self.index.len() as u32;
        let image_size = self.width.saturating_mul(self.height).saturating_mul(3);
        let mut out = Vec::with_capacity(HEADER_LEN);

        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&riff_len.to_le_bytes());
        out.extend_from_slice(b"AVI ");

        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&192u32.to_le_bytes());
        out.extend_from_slice(b"hdrl");

        // MainAVIHeader
        out.extend_from_slice(b"avih");
        out.extend_from_slice(&56u32.to_le_bytes());
        for value in [
            1_000_000 / self.fps,
            self.max_chunk.saturating_mul(self.fps),
            0,
            AVIF_HASINDEX,
            frames,
            0,
            1,
            self.max_chunk,
            self.width,
            self.height,
            0,
            0,
            0,
            0,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }

        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&116u32.to_le_bytes());
        out.extend_from_slice(b"strl");

        // AVIStreamHeader
        out.extend_from_slice(b"strh");
        out.extend_from_slice(&56u32.to_le_bytes());
        out.extend_from_slice(b"vids");
        out.extend_from_slice(b"MJPG");
        out.extend_from_slice(&0u32.to_le_bytes()); // flags
        out.extend_from_slice(&0u32.to_le_bytes()); // priority + language
        for value in [0, 1, self.fps, 0, frames, self.max_chunk, u32::MAX, 0] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for value in [0u16, 0, self.width as u16, self.height as u16] {
            out.extend_from_slice(&value.to_le_bytes());
        }

        // BITMAPINFOHEADER
        out.extend_from_slice(b"strf");
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(b"MJPG");
        for value in [image_size, 0, 0, 0, 0] {
            out.extend_from_slice(&value.to_le_bytes());
        }

        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&(4 + self.movi_len).to_le_bytes());
        out.extend_from_slice(b"movi");

        debug_assert_eq!(out.len(), HEADER_LEN);
        debug_assert_eq!(&out[MOVI_FOURCC_AT as usize..], b"movi");
        out
    }
}
