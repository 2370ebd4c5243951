//! Encoder/decoder captioning model run through ONNX Runtime.
//!
//! The vision encoder maps `pixel_values` `[N, 3, H, W]` to hidden states
//! `[N, S, D]`. The text decoder is called once per hypothesis and step with
//! the full id sequence and the hidden states of one frame, and returns
//! logits `[1, T, V]`. Captions come from beam search over those logits.
//! Decoder inputs are matched by name so both BLIP and ViT-GPT2 style
//! exports work.

use super::config::{CaptionerConfig, GenerationSpec, InputSpec};
use super::generation::{beam_search, SearchParams};
use super::runtime::{load_session, preprocess_frames, SessionOptions};
use super::tokenizer::Tokenizer;
use super::{CaptionError, Captioner};
use crate::media::Frame;
use ndarray::{s, Array2, Array3, Axis};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::debug;

/// What a decoder input expects, derived from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecoderInput {
    InputIds,
    AttentionMask,
    EncoderHiddenStates,
    EncoderAttentionMask,
}

impl DecoderInput {
    fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("encoder_attention_mask") {
            Some(Self::EncoderAttentionMask)
        } else if name.contains("encoder_hidden_states") || name.contains("encoder_outputs") {
            Some(Self::EncoderHiddenStates)
        } else if name.contains("attention_mask") {
            Some(Self::AttentionMask)
        } else if name.contains("input_ids") {
            Some(Self::InputIds)
        } else {
            None
        }
    }
}

pub struct OnnxCaptioner {
    encoder: Session,
    decoder: Session,
    decoder_inputs: Vec<(String, DecoderInput)>,
    tokenizer: Tokenizer,
    input: InputSpec,
    generation: GenerationSpec,
    batch_frames: bool,
}

impl OnnxCaptioner {
    /// Load encoder, decoder and vocabulary described by `config`.
    ///
    /// `batch_mode` raises the intra-op thread count to the available
    /// parallelism and encodes all frames of a video in one call. Captions
    /// are unaffected.
    pub fn from_config(config: &CaptionerConfig, batch_mode: bool) -> Result<Self, CaptionError> {
        config.validate()?;

        let intra_threads = if batch_mode {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(config.intra_threads)
                .max(config.intra_threads)
        } else {
            config.intra_threads
        };
        let options = SessionOptions {
            device: config.device,
            intra_threads,
        };

        let encoder = load_session(&config.encoder_path(), options)?;
        let decoder = load_session(&config.decoder_path(), options)?;

        let mut decoder_inputs = Vec::with_capacity(decoder.inputs.len());
        for input in &decoder.inputs {
            let role = DecoderInput::from_name(&input.name).ok_or_else(|| {
                CaptionError::Config(format!("unrecognised decoder input '{}'", input.name))
            })?;
            decoder_inputs.push((input.name.clone(), role));
        }
        for required in [DecoderInput::InputIds, DecoderInput::EncoderHiddenStates] {
            if !decoder_inputs.iter().any(|(_, role)| *role == required) {
                return Err(CaptionError::Config(format!(
                    "decoder model has no {:?} input",
                    required
                )));
            }
        }

        let mut special = config.generation.special_token_ids.clone();
        special.push(config.generation.start_token_id);
        special.push(config.generation.end_token_id);
        let tokenizer = Tokenizer::load(&config.vocab_path(), config.tokenizer, &special)?;

        debug!(
            encoder = %config.encoder_path().display(),
            decoder = %config.decoder_path().display(),
            vocab = tokenizer.len(),
            intra_threads,
            "captioning model loaded"
        );

        Ok(Self {
            encoder,
            decoder,
            decoder_inputs,
            tokenizer,
            input: config.input.clone(),
            generation: config.generation.clone(),
            batch_frames: batch_mode,
        })
    }

    fn encode(&mut self, frames: &[Frame]) -> Result<Array3<f32>, CaptionError> {
        let pixels = preprocess_frames(frames, &self.input)?;
        let input_name = self
            .encoder
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "pixel_values".to_string());
        let input_tensor = Tensor::from_array(pixels).map_err(CaptionError::Ort)?;

        let outputs = self
            .encoder
            .run(ort::inputs![input_name => input_tensor])
            .map_err(CaptionError::Ort)?;
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| CaptionError::Processing("encoder produced no output".into()))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(CaptionError::Ort)?;

        if shape.len() != 3 || shape[0] as usize != frames.len() {
            return Err(CaptionError::Processing(format!(
                "unexpected encoder output shape {:?}",
                &shape[..]
            )));
        }
        Array3::from_shape_vec(
            (shape[0] as usize, shape[1] as usize, shape[2] as usize),
            data.to_vec(),
        )
        .map_err(|e| CaptionError::Processing(e.to_string()))
    }

    /// Beam search for a single frame's hidden states `[1, S, D]`.
    fn generate(&mut self, hidden: Array3<f32>) -> Result<String, CaptionError> {
        let params = SearchParams {
            num_beams: self.generation.num_beams,
            max_length: self.generation.max_length,
            start_token_id: self.generation.start_token_id,
            end_token_id: self.generation.end_token_id,
            repetition_penalty: self.generation.repetition_penalty,
            no_repeat_ngram_size: self.generation.no_repeat_ngram_size,
        };
        let decoder = &mut self.decoder;
        let decoder_inputs = &self.decoder_inputs;

        let ids = beam_search(&params, |ids: &[i64]| {
            run_decoder(decoder, decoder_inputs, ids, &hidden)
        })?;
        Ok(self.tokenizer.decode(&ids[1..]))
    }
}

/// One decoder pass, returning the logits for the token after `ids`.
fn run_decoder(
    decoder: &mut Session,
    decoder_inputs: &[(String, DecoderInput)],
    ids: &[i64],
    hidden: &Array3<f32>,
) -> Result<Vec<f32>, CaptionError> {
    let encoder_len = hidden.shape()[1];
    let mut inputs: Vec<(String, DynValue)> = Vec::with_capacity(decoder_inputs.len());
    for (name, role) in decoder_inputs {
        let value = match role {
            DecoderInput::InputIds => {
                let array = Array2::from_shape_vec((1, ids.len()), ids.to_vec())
                    .map_err(|e| CaptionError::Processing(e.to_string()))?;
                Tensor::from_array(array).map_err(CaptionError::Ort)?.into_dyn()
            }
            DecoderInput::AttentionMask => Tensor::from_array(Array2::<i64>::ones((1, ids.len())))
                .map_err(CaptionError::Ort)?
                .into_dyn(),
            DecoderInput::EncoderAttentionMask => {
                Tensor::from_array(Array2::<i64>::ones((1, encoder_len)))
                    .map_err(CaptionError::Ort)?
                    .into_dyn()
            }
            DecoderInput::EncoderHiddenStates => Tensor::from_array(hidden.clone())
                .map_err(CaptionError::Ort)?
                .into_dyn(),
        };
        inputs.push((name.clone(), value));
    }

    let outputs = decoder.run(inputs).map_err(CaptionError::Ort)?;
    let output = outputs
        .values()
        .next()
        .ok_or_else(|| CaptionError::Processing("decoder produced no output".into()))?;
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(CaptionError::Ort)?;
    last_step_logits(&shape[..], data)
}

/// Logits of the final position from a `[1, T, V]` (or `[T, V]`) tensor.
fn last_step_logits(shape: &[i64], data: &[f32]) -> Result<Vec<f32>, CaptionError> {
    let vocab = match shape.last() {
        Some(&size) if size > 0 => size as usize,
        _ => {
            return Err(CaptionError::Processing(format!(
                "unexpected decoder output shape {:?}",
                shape
            )))
        }
    };
    if data.len() < vocab || data.len() % vocab != 0 {
        return Err(CaptionError::Processing(format!(
            "decoder output of {} values does not match shape {:?}",
            data.len(),
            shape
        )));
    }
    Ok(data[data.len() - vocab..].to_vec())
}

impl Captioner for OnnxCaptioner {
    fn caption(&mut self, frame: &Frame) -> Result<String, CaptionError> {
        let hidden = self.encode(std::slice::from_ref(frame))?;
        self.generate(hidden)
    }

    fn caption_batch(&mut self, frames: &[Frame]) -> Result<Vec<String>, CaptionError> {
        if !self.batch_frames || frames.len() < 2 {
            return frames.iter().map(|frame| self.caption(frame)).collect();
        }
        let hidden = self.encode(frames)?;
        let mut captions = Vec::with_capacity(frames.len());
        for index in 0..frames.len() {
            let single = hidden
                .slice(s![index..index + 1, .., ..])
                .to_owned();
            captions.push(self.generate(single)?);
        }
        debug_assert_eq!(hidden.len_of(Axis(0)), captions.len());
        Ok(captions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_inputs_are_matched_by_name() {
        assert_eq!(
            DecoderInput::from_name("input_ids"),
            Some(DecoderInput::InputIds)
        );
        assert_eq!(
            DecoderInput::from_name("attention_mask"),
            Some(DecoderInput::AttentionMask)
        );
        assert_eq!(
            DecoderInput::from_name("encoder_hidden_states"),
            Some(DecoderInput::EncoderHiddenStates)
        );
        assert_eq!(
            DecoderInput::from_name("encoder_attention_mask"),
            Some(DecoderInput::EncoderAttentionMask)
        );
        assert_eq!(DecoderInput::from_name("past_key_values.0.key"), None);
    }

    #[test]
    fn last_step_logits_takes_final_row() {
        let data = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(
            last_step_logits(&[1, 2, 3], &data).unwrap(),
            vec![3.0, 4.0, 5.0]
        );
        assert_eq!(last_step_logits(&[3, 2], &data).unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn last_step_logits_rejects_bad_shapes() {
        assert!(last_step_logits(&[], &[1.0]).is_err());
        assert!(last_step_logits(&[1, 1, 4], &[1.0, 2.0]).is_err());
        assert!(last_step_logits(&[1, 2, 4], &[1.0; 7]).is_err());
    }
}
