// engine.rs - Candle Qwen3 embedding engine with last-token pooling.
//
// Qwen3-Embedding is a causal decoder: the sentence vector is the final (normed)
// hidden state at the trailing <|endoftext|> token. Each text runs as its own
// unpadded forward pass on a fresh copy of the model, so no KV cache or padding
// from one text can reach another.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen3::{Config as Qwen3Config, Model as Qwen3Model};
use tokenizers::Tokenizer;

use crate::config;
use crate::embeddings::batch::Encoder;
use crate::embeddings::download::{self, ModelFiles};

/// What to load and how.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model_id: String,
    pub prefer_accelerator: bool,
    pub dims: usize,
    pub half_precision: bool,
    pub max_tokens: usize,
}

impl ModelSpec {
    pub fn from_config() -> Self {
        Self {
            model_id: config::embedding::MODEL_NAME.to_string(),
            prefer_accelerator: config::embedding::PREFER_ACCELERATOR,
            dims: config::embedding::EMBEDDING_DIMS,
            half_precision: config::embedding::HALF_PRECISION,
            max_tokens: config::embedding::MAX_TOKENS,
        }
    }
}

/// Qwen3 decoder that turns token ids into one pooled vector per sequence.
///
/// The wrapped model is never run directly. It stays with an empty KV cache and
/// every forward pass works on a clone (weights are shared, only the cache is new).
#[derive(Clone)]
pub struct LastTokenPooler {
    model: Qwen3Model,
    device: Device,
    hidden_size: usize,
}

impl LastTokenPooler {
    pub fn new(config: &Qwen3Config, vb: VarBuilder) -> anyhow::Result<Self> {
        let device = vb.device().clone();
        let model = Qwen3Model::new(config, vb).context("build Qwen3 model")?;
        Ok(Self {
            model,
            device,
            hidden_size: config.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Hidden state of the last token of `ids`: `[hidden_size]`, in the weight dtype.
    pub fn embed_ids(&self, ids: &[u32]) -> anyhow::Result<Tensor> {
        if ids.is_empty() {
            bail!("cannot embed an empty token sequence");
        }
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;

        // Forward pass -> [1, seq_len, hidden_size], starting at position 0.
        let mut model = self.model.clone();
        let hidden = model.forward(&input, 0)?;

        Ok(hidden.narrow(1, ids.len() - 1, 1)?.squeeze(1)?.squeeze(0)?)
    }

    /// One row per sequence, in input order: `[ids.len(), hidden_size]`.
    pub fn embed_all(&self, ids: &[Vec<u32>]) -> anyhow::Result<Tensor> {
        let rows = ids
            .iter()
            .enumerate()
            .map(|(i, seq)| self.embed_ids(seq).with_context(|| format!("forward pass for text {i}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Tensor::stack(&rows, 0)?)
    }
}

/// The embedding engine holds the loaded model and tokenizer.
pub struct EmbeddingEngine {
    pooler: LastTokenPooler,
    tokenizer: Tokenizer,
    dtype: DType,
    eos_id: u32,
    max_tokens: usize,
}

/// Fetch the model files and load an engine for `spec`.
pub fn load_model(spec: &ModelSpec) -> anyhow::Result<EmbeddingEngine> {
    if spec.max_tokens < 2 {
        bail!("configuration error: max_tokens must leave room for text and end-of-text");
    }
    let device = select_device(spec.prefer_accelerator);
    let dtype = select_dtype(spec.half_precision);
    log::info!("Using device {}", device_label(&device, dtype));

    let files = download::ensure_model_files(&spec.model_id)?;
    let engine = EmbeddingEngine::load(&files, device, dtype, spec.max_tokens)
        .with_context(|| format!("load model {} from {}", spec.model_id, files.dir.display()))?;

    let native = engine.pooler.hidden_size();
    if spec.dims == 0 || spec.dims > native {
        bail!(
            "configuration error: {} does not support {}-dim output (native width {})",
            spec.model_id,
            spec.dims,
            native
        );
    }
    log::info!("Embedding model ready: {} dims, MRL truncated to {}", native, spec.dims);
    Ok(engine)
}

/// CUDA, then Metal, then CPU. A missing accelerator is not an error.
pub fn select_device(prefer_accelerator: bool) -> Device {
    if prefer_accelerator {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(device) => return device,
                Err(e) => log::warn!("CUDA reported available but failed to open: {e}"),
            }
        }
        if candle_core::utils::metal_is_available() {
            match Device::new_metal(0) {
                Ok(device) => return device,
                Err(e) => log::warn!("Metal reported available but failed to open: {e}"),
            }
        }
        log::info!("No accelerator available, falling back to CPU");
    }
    Device::Cpu
}

/// F16 weights when half precision is requested, on every device.
pub fn select_dtype(half_precision: bool) -> DType {
    if half_precision {
        DType::F16
    } else {
        DType::F32
    }
}

/// Short human label such as `cuda:0 (f16)`.
pub fn device_label(device: &Device, dtype: DType) -> String {
    let name = if device.is_cuda() {
        "cuda:0"
    } else if device.is_metal() {
        "metal:0"
    } else {
        "cpu"
    };
    format!("{name} ({})", dtype.as_str())
}

impl EmbeddingEngine {
    pub fn load(files: &ModelFiles, device: Device, dtype: DType, max_tokens: usize) -> anyhow::Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)
            .with_context(|| format!("read {}", files.config.display()))?;
        let config: Qwen3Config = serde_json::from_str(&config_str)
            .with_context(|| format!("parse {}", files.config.display()))?;

        log::info!(
            "Loading embedding model: hidden_size={}, layers={}, heads={}, kv_heads={}",
            config.hidden_size,
            config.num_hidden_layers,
            config.num_attention_heads,
            config.num_key_value_heads,
        );

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)
                .context("mmap safetensors weights")?
        };
        // Embedding checkpoints are saved from the bare decoder and lack the
        // `model.` prefix the candle Qwen3 loader expects.
        let vb = if vb.contains_tensor("model.embed_tokens.weight") {
            vb
        } else {
            vb.rename_f(|name: &str| name.strip_prefix("model.").unwrap_or(name).to_string())
        };
        let pooler = LastTokenPooler::new(&config, vb)?;

        let tokenizer = load_tokenizer(&files.tokenizer)?;
        let eos_id = tokenizer
            .token_to_id(config::embedding::EOS_TOKEN)
            .with_context(|| format!("tokenizer has no {} token", config::embedding::EOS_TOKEN))?;

        log::info!("Embedding model loaded successfully (dims={})", config.hidden_size);

        Ok(Self {
            pooler,
            tokenizer,
            dtype,
            eos_id,
            max_tokens,
        })
    }

    fn token_ids(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        Ok(terminate_ids(encoding.get_ids(), self.eos_id, self.max_tokens))
    }
}

impl Encoder for EmbeddingEngine {
    fn native_dims(&self) -> usize {
        self.pooler.hidden_size()
    }

    fn device_label(&self) -> String {
        device_label(&self.pooler.device, self.dtype)
    }

    fn encode(&mut self, texts: &[String]) -> anyhow::Result<Tensor> {
        let ids = texts
            .iter()
            .map(|t| self.token_ids(t))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.pooler.embed_all(&ids)
    }
}

fn load_tokenizer(path: &Path) -> anyhow::Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
    // Truncation is handled in `terminate_ids` so the end-of-text token survives it.
    tokenizer
        .with_truncation(None)
        .map_err(|e| anyhow::anyhow!("disable tokenizer truncation: {e}"))?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

/// Cap `ids` at `max_tokens` and make sure the sequence ends with `eos_id`.
fn terminate_ids(ids: &[u32], eos_id: u32, max_tokens: usize) -> Vec<u32> {
    let body = match ids.last() {
        Some(&last) if last == eos_id => &ids[..ids.len() - 1],
        _ => ids,
    };
    let keep = body.len().min(max_tokens.saturating_sub(1));
    let mut out = Vec::with_capacity(keep + 1);
    out.extend_from_slice(&body[..keep]);
    out.push(eos_id);
    out
}
