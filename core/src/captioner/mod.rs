//! Image captioning with pretrained encoder/decoder ONNX models.
//!
//! A vision encoder turns a frame into hidden states and a text decoder
//! generates the caption token by token. Both run through ONNX Runtime.
//!
//! # Configuration
//!
//! Models are described by a TOML file (`captag.toml`):
//!
//! ```toml
//! models_dir = "models/blip-base"
//! encoder = "vision_model.onnx"
//! decoder = "text_decoder_model.onnx"
//! vocab = "vocab.txt"
//! ```
//!
//! # Runtime Initialization
//!
//! The runtime is loaded dynamically, so [`init_ort_runtime`] must be called
//! once with the path to the ONNX Runtime library before a captioner is built.
//!
//! ```no_run
//! use captag_core::captioner::{init_ort_runtime, CaptionerConfig};
//!
//! let config = CaptionerConfig::default();
//! init_ort_runtime(&config.ort_library)?;
//! # Ok::<(), captag_core::captioner::CaptionError>(())
//! ```

mod config;
mod generation;
mod onnx;
mod runtime;
mod tokenizer;

pub use config::{
    default_ort_dylib_path, CaptionerConfig, Device, GenerationSpec, InputSpec,
    DEFAULT_CONFIG_FILE,
};
pub use generation::{
    apply_repetition_penalty, ban_repeated_ngrams, beam_search, log_softmax, SearchParams,
};
pub use onnx::OnnxCaptioner;
pub use runtime::{init_ort_runtime, load_session, preprocess_frames, SessionOptions};
pub use tokenizer::{Tokenizer, TokenizerKind};

use crate::media::Frame;
use std::path::PathBuf;
use thiserror::Error;

/// Produces a natural-language description of a decoded frame.
pub trait Captioner {
    fn caption(&mut self, frame: &Frame) -> Result<String, CaptionError>;

    /// Caption several frames of the same item, in order.
    fn caption_batch(&mut self, frames: &[Frame]) -> Result<Vec<String>, CaptionError> {
        frames.iter().map(|frame| self.caption(frame)).collect()
    }
}

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("ONNX runtime error: {0}")]
    Ort(ort::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid vocabulary {}: {reason}", path.display())]
    Vocabulary { path: PathBuf, reason: String },
    #[error("caption failed: {0}")]
    Processing(String),
}
