//! ONNX Runtime wrapper and shared preprocessing.

use super::config::{Device, InputSpec};
use super::CaptionError;
use crate::media::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

static ORT_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Load the ONNX Runtime dynamic library. Later calls are no-ops.
pub fn init_ort_runtime(dylib_path: impl AsRef<Path>) -> Result<(), CaptionError> {
    let path = dylib_path.as_ref();

    if ORT_INITIALIZED.get().is_some() {
        return Ok(());
    }

    if !path.exists() {
        return Err(CaptionError::Config(format!(
            "ONNX Runtime library not found at: {}",
            path.display()
        )));
    }

    let path_str = path.to_str().ok_or_else(|| {
        CaptionError::Config("ONNX Runtime path contains invalid UTF-8".to_string())
    })?;

    ort::init_from(path_str).commit().map_err(CaptionError::Ort)?;

    let _ = ORT_INITIALIZED.set(());
    debug!(library = %path.display(), "ONNX Runtime initialised");
    Ok(())
}

/// Session settings shared by the encoder and decoder.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub device: Device,
    pub intra_threads: usize,
}

/// Load an ONNX session from a model file.
pub fn load_session(model_path: &Path, options: SessionOptions) -> Result<Session, CaptionError> {
    if !model_path.exists() {
        return Err(CaptionError::ModelNotFound(model_path.to_path_buf()));
    }

    let model_bytes = std::fs::read(model_path).map_err(|e| {
        CaptionError::Processing(format!(
            "failed to read model file {}: {}",
            model_path.display(),
            e
        ))
    })?;

    let mut builder = Session::builder()
        .map_err(CaptionError::Ort)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(CaptionError::Ort)?
        .with_intra_threads(options.intra_threads.max(1))
        .map_err(CaptionError::Ort)?;

    // ONNX Runtime falls back to CPU when the CUDA provider is unavailable.
    if options.device != Device::Cpu {
        builder = builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(CaptionError::Ort)?;
    }

    builder
        .commit_from_memory(&model_bytes)
        .map_err(CaptionError::Ort)
}

/// Resize and normalise frames into an NCHW batch.
pub fn preprocess_frames(frames: &[Frame], input: &InputSpec) -> Result<Array4<f32>, CaptionError> {
    let width = input.width as usize;
    let height = input.height as usize;
    let mut batch = Array4::<f32>::zeros((frames.len(), 3, height, width));

    for (n, frame) in frames.iter().enumerate() {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| {
                CaptionError::Processing(format!(
                    "frame buffer does not match {}x{}",
                    frame.width, frame.height
                ))
            })?;
        let resized = imageops::resize(&image, input.width, input.height, FilterType::Triangle);

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                batch[[n, c, y as usize, x as usize]] = (value - input.mean[c]) / input.std[c];
            }
        }
    }

    Ok(batch)
}
