//! DiversityModel wrapper for generation with token-level metrics
//!
//! Loads a causal LM and its tokenizer from the HuggingFace Hub and generates
//! completions while recording the entropy of every sampled distribution.

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::forward_olmo::DivOlmo;
use crate::metrics::{MetricsRecorder, SequenceMetrics};
use crate::records::TokenDetail;
use crate::sampling::Sampler;

/// Short names for the models used in the study
pub const MODEL_PRESETS: [(&str, &str); 3] = [
    ("olmo-1b", "allenai/OLMo-1B-0724-hf"),
    ("olmo-2-7b", "allenai/OLMo-2-1124-7B"),
    ("olmo-2-13b", "allenai/OLMo-2-1124-13B"),
];

/// Resolve a preset name to its hub ID; anything else is returned unchanged
pub fn resolve_model_id(name: &str) -> &str {
    MODEL_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map_or(name, |(_, id)| *id)
}

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    /// OLMo (AI2), HF-format checkpoints
    Olmo,
    /// OLMo-2 (AI2)
    Olmo2,
}

impl ModelArchitecture {
    /// Detect architecture from model ID
    pub fn from_model_id(model_id: &str) -> Self {
        let model_lower = model_id.to_lowercase();
        if model_lower.contains("olmo-2") || model_lower.contains("olmo2") {
            ModelArchitecture::Olmo2
        } else if model_lower.contains("olmo") {
            ModelArchitecture::Olmo
        } else {
            info!(
                "Unknown model architecture for '{}', defaulting to OLMo-2",
                model_id
            );
            ModelArchitecture::Olmo2
        }
    }
}

/// Minimal interface a causal LM needs for metric-recording generation.
pub trait CausalBackend {
    fn vocab_size(&self) -> usize;

    /// Run `input_ids` at position `seqlen_offset` and return the logits of
    /// the last position
    fn forward(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Vec<f32>>;

    /// Drop any cached state before starting a new sequence
    fn reset(&mut self) -> Result<()>;
}

/// Autoregressive generation that records every sampling step.
///
/// The prompt is processed in one forward pass, then one token at a time.
/// A sampled stop token is recorded (its distribution was sampled from) and
/// ends generation.
pub fn generate_steps(
    backend: &mut dyn CausalBackend,
    prompt_ids: &[u32],
    max_new_tokens: usize,
    sampler: &mut Sampler,
    stop_tokens: &[u32],
) -> Result<MetricsRecorder> {
    let mut recorder = MetricsRecorder::new();
    if max_new_tokens == 0 {
        return Ok(recorder);
    }

    backend.reset()?;
    let mut logits = backend.forward(prompt_ids, 0)?;
    let mut position = prompt_ids.len();

    loop {
        let step = sampler.sample(&logits);
        let token = step.token_id;
        let metric = recorder.record(step);
        debug!(
            "Token {} | Entropy: {:.4} | Perplexity: {:.4}",
            token, metric.entropy, metric.perplexity
        );

        if stop_tokens.contains(&token) || recorder.len() >= max_new_tokens {
            break;
        }

        logits = backend.forward(&[token], position)?;
        position += 1;
    }

    Ok(recorder)
}

/// Result of one generation with metrics
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Prompt text as given
    pub prompt: String,
    /// Decoded prompt + completion
    pub full_output: String,
    /// Completion text only, trimmed
    pub completion_only: String,
    /// Token IDs from the prompt
    pub prompt_tokens: Vec<u32>,
    /// Token IDs that were generated
    pub generated_tokens: Vec<u32>,
    /// Per-token decoded text, entropy and perplexity
    pub token_details: Vec<TokenDetail>,
    /// Sequence averages
    pub metrics: SequenceMetrics,
}

/// High-level model wrapper for diversity experiments
pub struct DiversityModel {
    backend: Box<dyn CausalBackend>,
    tokenizer: Tokenizer,
    architecture: ModelArchitecture,
    model_id: String,
}

impl DiversityModel {
    /// Load a model from HuggingFace (tries CUDA, falls back to CPU)
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        Self::from_pretrained_with_device(model_id, None)
    }

    /// Load with explicit device choice (None = auto-detect)
    pub fn from_pretrained_with_device(model_id: &str, force_cpu: Option<bool>) -> Result<Self> {
        let model_id = resolve_model_id(model_id);
        let architecture = ModelArchitecture::from_model_id(model_id);

        let (device, dtype) = if force_cpu == Some(true) {
            info!("Forcing CPU mode");
            (Device::Cpu, DType::F32)
        } else {
            match Device::cuda_if_available(0) {
                Ok(dev) if dev.is_cuda() => {
                    info!("Using CUDA device");
                    (dev, DType::BF16)
                }
                _ => {
                    info!("CUDA not available, using CPU");
                    (Device::Cpu, DType::F32)
                }
            }
        };

        info!("Loading model: {}", model_id);
        info!("Architecture: {:?}", architecture);
        info!("Device: {:?}", device);
        info!("Dtype: {:?}", dtype);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;

        let backend = DivOlmo::load(&repo, architecture, &device, dtype)?;

        Ok(Self::from_parts(
            Box::new(backend),
            tokenizer,
            architecture,
            model_id,
        ))
    }

    /// Assemble a model from an already-built backend and tokenizer
    pub fn from_parts(
        backend: Box<dyn CausalBackend>,
        tokenizer: Tokenizer,
        architecture: ModelArchitecture,
        model_id: &str,
    ) -> Self {
        Self {
            backend,
            tokenizer,
            architecture,
            model_id: model_id.to_string(),
        }
    }

    pub fn architecture(&self) -> ModelArchitecture {
        self.architecture
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn vocab_size(&self) -> usize {
        self.backend.vocab_size()
    }

    /// Get the EOS token ID for this model
    pub fn eos_token_id(&self) -> Option<u32> {
        let vocab = self.tokenizer.get_vocab(true);
        ["<|endoftext|>", "<|end_of_text|>", "</s>"]
            .iter()
            .find_map(|t| vocab.get(*t).copied())
    }

    /// Tokenize text, adding the tokenizer's special tokens
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode tokens, skipping special tokens
    pub fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow::anyhow!("Decode error: {e}"))
    }

    /// Decode a single token ID to string
    pub fn decode_token(&self, token_id: u32) -> String {
        self.tokenizer
            .decode(&[token_id], false)
            .unwrap_or_else(|_| format!("<{token_id}>"))
    }

    /// Generate a completion and compute its token-level metrics
    pub fn generate_with_metrics(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        sampler: &mut Sampler,
    ) -> Result<GenerationOutput> {
        let prompt_ids = self.encode(prompt)?;
        let stop_tokens: Vec<u32> = self.eos_token_id().into_iter().collect();

        let recorder = generate_steps(
            self.backend.as_mut(),
            &prompt_ids,
            max_tokens,
            sampler,
            &stop_tokens,
        )?;

        let generated_tokens = recorder.tokens().to_vec();
        let mut all_tokens = prompt_ids.clone();
        all_tokens.extend_from_slice(&generated_tokens);

        let full_output = self.decode(&all_tokens)?;
        let completion_only = match full_output.strip_prefix(prompt) {
            Some(rest) => rest.trim().to_string(),
            None => self.decode(&generated_tokens)?.trim().to_string(),
        };

        let token_details = generated_tokens
            .iter()
            .zip(recorder.metrics())
            .map(|(&id, m)| TokenDetail {
                token: self.decode_token(id),
                entropy: m.entropy,
                perplexity: m.perplexity,
            })
            .collect();

        Ok(GenerationOutput {
            prompt: prompt.to_string(),
            full_output,
            completion_only,
            prompt_tokens: prompt_ids,
            generated_tokens,
            token_details,
            metrics: recorder.finish(),
        })
    }
}
