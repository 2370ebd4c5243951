//! Captioning model configuration loaded from TOML.

use super::tokenizer::TokenizerKind;
use super::CaptionError;
use crate::media::FrameSampling;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "captag.toml";

/// Execution device for ONNX Runtime sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CUDA when the runtime provides it, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// Image preprocessing expected by the vision encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            width: 384,
            height: 384,
            mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
            std: [0.268_629_54, 0.261_302_6, 0.275_777_1],
        }
    }
}

/// Caption decoding parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub max_length: usize,
    /// Hypotheses kept per step; 1 decodes greedily.
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    pub start_token_id: i64,
    pub end_token_id: i64,
    /// Token ids never emitted in the decoded caption.
    #[serde(default)]
    pub special_token_ids: Vec<i64>,
    pub repetition_penalty: f32,
    pub no_repeat_ngram_size: usize,
}

impl Default for GenerationSpec {
    fn default() -> Self {
        Self {
            max_length: 50,
            num_beams: default_num_beams(),
            start_token_id: 30522,
            end_token_id: 102,
            special_token_ids: vec![0, 100, 101, 102, 103, 30522],
            repetition_penalty: 1.2,
            no_repeat_ngram_size: 2,
        }
    }
}

fn default_num_beams() -> usize {
    5
}

/// Top-level captioner configuration.
///
/// ```toml
/// models_dir = "models/blip-base"
/// device = "auto"
/// encoder = "vision_model.onnx"
/// decoder = "text_decoder_model.onnx"
/// vocab = "vocab.txt"
/// tokenizer = "wordpiece"
/// frames = "middle"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionerConfig {
    pub models_dir: PathBuf,
    pub ort_library: PathBuf,
    pub device: Device,
    pub intra_threads: usize,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub vocab: PathBuf,
    pub tokenizer: TokenizerKind,
    pub frames: FrameSampling,
    pub input: InputSpec,
    pub generation: GenerationSpec,
}

impl Default for CaptionerConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            ort_library: default_ort_dylib_path(),
            device: Device::Auto,
            intra_threads: 4,
            encoder: PathBuf::from("vision_model.onnx"),
            decoder: PathBuf::from("text_decoder_model.onnx"),
            vocab: PathBuf::from("vocab.txt"),
            tokenizer: TokenizerKind::WordPiece,
            frames: FrameSampling::Middle,
            input: InputSpec::default(),
            generation: GenerationSpec::default(),
        }
    }
}

impl CaptionerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaptionError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CaptionError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptionError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| CaptionError::Config(format!("invalid TOML in {}: {}", path.display(), e)))
    }

    /// Resolve configuration: an explicit path must exist, otherwise the
    /// working directory and then the user config directory are searched
    /// before falling back to defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, CaptionError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        for candidate in default_config_locations() {
            if candidate.exists() {
                return Self::load(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CaptionError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptionError::Config(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CaptionError::Config(format!("failed to write config: {}", e)))
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.resolve(&self.encoder)
    }

    pub fn decoder_path(&self) -> PathBuf {
        self.resolve(&self.decoder)
    }

    pub fn vocab_path(&self) -> PathBuf {
        self.resolve(&self.vocab)
    }

    /// Check that every model artefact exists.
    pub fn validate(&self) -> Result<(), CaptionError> {
        for path in [self.encoder_path(), self.decoder_path(), self.vocab_path()] {
            if !path.exists() {
                return Err(CaptionError::ModelNotFound(path));
            }
        }
        if self.input.width == 0 || self.input.height == 0 {
            return Err(CaptionError::Config(String::from(
                "input width and height must be positive",
            )));
        }
        if self.input.std.iter().any(|value| *value == 0.0) {
            return Err(CaptionError::Config(String::from(
                "input std values must be non-zero",
            )));
        }
        if self.generation.max_length == 0 {
            return Err(CaptionError::Config(String::from(
                "generation.max_length must be positive",
            )));
        }
        if self.generation.num_beams == 0 {
            return Err(CaptionError::Config(String::from(
                "generation.num_beams must be positive",
            )));
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.models_dir.join(path)
        }
    }
}

fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("captag");
        dir.push(DEFAULT_CONFIG_FILE);
        locations.push(dir);
    }
    locations
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|mut dir| {
            dir.push("captag");
            dir.push("models");
            dir
        })
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Default location of the ONNX Runtime dynamic library.
pub fn default_ort_dylib_path() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(".vendor/onnxruntime/lib/onnxruntime.dll")
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from(".vendor/onnxruntime/lib/libonnxruntime.dylib")
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        PathBuf::from(".vendor/onnxruntime/lib/libonnxruntime.so")
    }
}
