use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::{MotionBackend, StubBackend};
use crate::config::{param, split_params};

const DEFAULT_INPUT_SIZE: u32 = 640;

/// Parsed `--model` identifier.
///
/// Accepted forms:
/// - `stub` or `stub?delay_ms=50`
/// - `motion` or `motion?threshold=30`
/// - `path/to/model.onnx?size=640&conf=0.25&iou=0.45` (feature `backend-tract`)
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorSpec {
    Stub {
        delay: Duration,
    },
    Motion {
        threshold: Option<u8>,
    },
    Onnx {
        path: PathBuf,
        input_size: u32,
        confidence: Option<f32>,
        iou: Option<f32>,
    },
}

impl DetectorSpec {
    pub fn parse(model: &str) -> Result<Self> {
        let (base, params) = split_params(model.trim());
        match base {
            "stub" => Ok(Self::Stub {
                delay: Duration::from_millis(param(&params, "delay_ms")?.unwrap_or(0)),
            }),
            "motion" => Ok(Self::Motion {
                threshold: param(&params, "threshold")?,
            }),
            path if path.to_ascii_lowercase().ends_with(".onnx") => {
                let input_size = param(&params, "size")?.unwrap_or(DEFAULT_INPUT_SIZE);
                if input_size == 0 {
                    return Err(anyhow!("model '{}': size must be positive", model));
                }
                Ok(Self::Onnx {
                    path: PathBuf::from(path),
                    input_size,
                    confidence: unit_param(&params, "conf")?,
                    iou: unit_param(&params, "iou")?,
                })
            }
            path if path.ends_with(".pt") => Err(anyhow!(
                "PyTorch checkpoint '{}' is not supported; export it to ONNX first",
                path
            )),
            other => Err(anyhow!(
                "unknown model '{}': expected 'stub', 'motion' or a path to an .onnx file",
                other
            )),
        }
    }
}

fn unit_param(params: &[(&str, &str)], key: &str) -> Result<Option<f32>> {
    let value: Option<f32> = param(params, key)?;
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => {
            Err(anyhow!("model option '{}' must be within 0..=1, got {}", key, v))
        }
        other => Ok(other),
    }
}

/// Load and warm up the detector named by `model`.
pub fn load(model: &str) -> Result<Box<dyn DetectorBackend>> {
    let spec = DetectorSpec::parse(model)?;
    let mut backend: Box<dyn DetectorBackend> = match spec {
        DetectorSpec::Stub { delay } => Box::new(StubBackend::new().with_delay(delay)),
        DetectorSpec::Motion { threshold } => {
            let backend = MotionBackend::new();
            Box::new(match threshold {
                Some(threshold) => backend.with_threshold(threshold),
                None => backend,
            })
        }
        DetectorSpec::Onnx {
            path,
            input_size,
            confidence,
            iou,
        } => load_onnx(path, input_size, confidence, iou)?,
    };
    backend.warm_up()?;
    log::info!("detector '{}' ready ({})", model, backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn load_onnx(
    path: PathBuf,
    input_size: u32,
    confidence: Option<f32>,
    iou: Option<f32>,
) -> Result<Box<dyn DetectorBackend>> {
    let mut backend = super::backends::TractBackend::new(&path, input_size)?;
    if let Some(confidence) = confidence {
        backend = backend.with_threshold(confidence);
    }
    if let Some(iou) = iou {
        backend = backend.with_iou(iou);
    }
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(
    path: PathBuf,
    _input_size: u32,
    _confidence: Option<f32>,
    _iou: Option<f32>,
) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "ONNX model {} requires the backend-tract feature",
        path.display()
    ))
}
