//! OLMo / OLMo-2 causal LM backend on candle-transformers
//!
//! Weights are loaded onto the device once and kept in a tensor map. The
//! candle model owns its KV-cache, so [`CausalBackend::reset`] rebuilds the
//! model from that map: the new layers hold handles to the same weight
//! storage and only the cache state is fresh.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::{olmo, olmo2};
use hf_hub::api::sync::ApiRepo;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::model::{CausalBackend, ModelArchitecture};

/// Safetensors index for sharded models
#[derive(Debug, serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

enum OlmoConfig {
    Olmo(olmo::Config),
    Olmo2(olmo2::Config),
}

impl OlmoConfig {
    fn parse(config_str: &str, architecture: ModelArchitecture) -> Result<Self> {
        let config = match architecture {
            ModelArchitecture::Olmo => {
                let config: olmo::Config = serde_json::from_str(config_str)?;
                info!(
                    "Model config: {} layers, {} hidden, {} vocab",
                    config.num_hidden_layers, config.hidden_size, config.vocab_size
                );
                OlmoConfig::Olmo(config)
            }
            ModelArchitecture::Olmo2 => {
                let config: olmo2::Config = serde_json::from_str(config_str)?;
                info!(
                    "Model config: {} layers, {} hidden, {} vocab",
                    config.num_hidden_layers, config.hidden_size, config.vocab_size
                );
                OlmoConfig::Olmo2(config)
            }
        };
        Ok(config)
    }

    fn vocab_size(&self) -> usize {
        match self {
            OlmoConfig::Olmo(c) => c.vocab_size,
            OlmoConfig::Olmo2(c) => c.vocab_size,
        }
    }

    fn build(&self, vb: VarBuilder<'static>) -> Result<OlmoModel> {
        Ok(match self {
            OlmoConfig::Olmo(c) => OlmoModel::Olmo(olmo::Model::new(c, vb)?),
            OlmoConfig::Olmo2(c) => OlmoModel::Olmo2(olmo2::Model::new(c, vb)?),
        })
    }
}

enum OlmoModel {
    Olmo(olmo::Model),
    Olmo2(olmo2::Model),
}

/// OLMo family model with KV-cached forward passes
pub struct DivOlmo {
    config: OlmoConfig,
    /// `None` only while `reset` is rebuilding
    model: Option<OlmoModel>,
    vb: VarBuilder<'static>,
    device: Device,
}

impl DivOlmo {
    /// Download config and weights from `repo` and build the model
    pub fn load(
        repo: &ApiRepo,
        architecture: ModelArchitecture,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;

        let weights_paths = download_weights(repo)?;
        info!("Loading weights from {} file(s)...", weights_paths.len());
        let tensors = load_weights(&weights_paths, dtype, device)?;
        let vb = VarBuilder::from_tensors(tensors, dtype, device);

        Self::from_config(&config_str, architecture, vb, device)
    }

    /// Build from a `config.json` string and a weight source
    pub fn from_config(
        config_str: &str,
        architecture: ModelArchitecture,
        vb: VarBuilder<'static>,
        device: &Device,
    ) -> Result<Self> {
        let config = OlmoConfig::parse(config_str, architecture)?;
        let model = config.build(vb.clone())?;
        Ok(Self {
            config,
            model: Some(model),
            vb,
            device: device.clone(),
        })
    }
}

impl CausalBackend for DivOlmo {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size()
    }

    fn forward(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Vec<f32>> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let model = self
            .model
            .as_mut()
            .context("Model was not rebuilt after a failed reset")?;
        let logits = match model {
            OlmoModel::Olmo(m) => m.forward(&input, seqlen_offset)?,
            OlmoModel::Olmo2(m) => m.forward(&input, seqlen_offset)?,
        };

        // Keep only the last position's row
        let vocab = logits.dim(D::Minus1)?;
        let flat = logits.to_dtype(DType::F32)?.flatten_all()?;
        let n = flat.dim(0)?;
        Ok(flat.narrow(0, n - vocab, vocab)?.to_vec1::<f32>()?)
    }

    fn reset(&mut self) -> Result<()> {
        // Drop the old model and its cache before building the new one
        self.model = None;
        self.model = Some(self.config.build(self.vb.clone())?);
        Ok(())
    }
}

/// Load every tensor onto `device` in `dtype`, once
fn load_weights(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    let mut tensors = HashMap::new();
    for path in paths {
        let shard = candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        for (name, tensor) in shard {
            let tensor = if tensor.dtype() == dtype {
                tensor
            } else {
                tensor.to_dtype(dtype)?
            };
            tensors.insert(name, tensor);
        }
    }
    info!("Loaded {} tensors", tensors.len());
    Ok(tensors)
}

/// Fetch either the single safetensors file or every shard in the index
fn download_weights(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(index_path) = repo.get("model.safetensors.index.json") {
        info!("Model is sharded, loading index...");
        let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
        let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

        let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
        shard_names.sort();
        shard_names.dedup();

        info!("Downloading {} shard files...", shard_names.len());
        let mut paths = Vec::with_capacity(shard_names.len());
        for shard_name in &shard_names {
            let path = repo
                .get(shard_name)
                .with_context(|| format!("Failed to download {shard_name}"))?;
            paths.push(path);
        }
        Ok(paths)
    } else {
        let path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        Ok(vec![path])
    }
}
