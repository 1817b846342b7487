use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::channel::DEFAULT_CAPACITY;
use crate::fps::DEFAULT_ALPHA;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::record::DEFAULT_RECORD_FPS;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_MODEL: &str = "motion";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamerConfigFile {
    source: Option<SourceConfigFile>,
    model: Option<String>,
    server: Option<ServerConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    record: Option<RecordConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotateConfigFile {
    show_fps: Option<bool>,
    jpeg_quality: Option<u8>,
    fps_alpha: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordConfigFile {
    path: Option<PathBuf>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    channel_capacity: Option<usize>,
}

/// Runtime configuration for the streamer.
///
/// Layering: built-in defaults, then an optional JSON file, then `DETSTREAM_*`
/// environment variables. The binary applies command-line flags last and
/// re-runs `validate`.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub source: SourceSettings,
    pub model: String,
    pub server: ServerSettings,
    pub annotate: AnnotateSettings,
    pub record: RecordSettings,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Device index, `/dev/video*` path, `stub://` scene or video file path.
    pub uri: String,
    /// Requested capture width (best-effort).
    pub width: Option<u32>,
    /// Requested capture height (best-effort).
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AnnotateSettings {
    pub show_fps: bool,
    pub jpeg_quality: u8,
    pub fps_alpha: f64,
}

#[derive(Debug, Clone)]
pub struct RecordSettings {
    pub path: Option<PathBuf>,
    pub fps: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self::from_file(StreamerConfigFile::default())
    }
}

impl StreamerConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => StreamerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let server = file.server.unwrap_or_default();
        let annotate = file.annotate.unwrap_or_default();
        let record = file.record.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        Self {
            source: SourceSettings {
                uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                width: source.width,
                height: source.height,
            },
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            server: ServerSettings {
                host: server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: server.port.unwrap_or(DEFAULT_PORT),
            },
            annotate: AnnotateSettings {
                show_fps: annotate.show_fps.unwrap_or(true),
                jpeg_quality: annotate.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                fps_alpha: annotate.fps_alpha.unwrap_or(DEFAULT_ALPHA),
            },
            record: RecordSettings {
                path: record.path,
                fps: record.fps.unwrap_or(DEFAULT_RECORD_FPS),
            },
            channel_capacity: pipeline.channel_capacity.unwrap_or(DEFAULT_CAPACITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("DETSTREAM_SOURCE") {
            if !source.trim().is_empty() {
                self.source.uri = source;
            }
        }
        if let Ok(model) = std::env::var("DETSTREAM_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(host) = std::env::var("DETSTREAM_HOST") {
            if !host.trim().is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("DETSTREAM_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETSTREAM_PORT must be a port number (0-65535)"))?;
        }
        if let Ok(path) = std::env::var("DETSTREAM_SAVE") {
            if !path.trim().is_empty() {
                self.record.path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.source.width == Some(0) || self.source.height == Some(0) {
            return Err(anyhow!("capture width/height must be greater than zero"));
        }
        if !(1..=100).contains(&self.annotate.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if !(self.annotate.fps_alpha > 0.0 && self.annotate.fps_alpha < 1.0) {
            return Err(anyhow!("fps_alpha must be strictly between 0 and 1"));
        }
        if self.record.fps == 0 {
            return Err(anyhow!("record fps must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(anyhow!("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Listener address in `host:port` form.
    pub fn bind_addr(&self) -> String {
        if self.server.host.contains(':') && !self.server.host.starts_with('[') {
            format!("[{}]:{}", self.server.host, self.server.port)
        } else {
            format!("{}:{}", self.server.host, self.server.port)
        }
    }
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Split `base?k=v&k2=v2` into the base and its key/value pairs.
pub(crate) fn split_params(spec: &str) -> (&str, Vec<(&str, &str)>) {
    let Some((base, query)) = spec.split_once('?') else {
        return (spec, Vec::new());
    };
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    (base, params)
}

/// Parse the last value for `key`, if present.
pub(crate) fn param<T: FromStr>(params: &[(&str, &str)], key: &str) -> Result<Option<T>> {
    match params.iter().rev().find(|(k, _)| *k == key) {
        Some((_, value)) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("invalid value '{}' for '{}'", value, key)),
        None => Ok(None),
    }
}
