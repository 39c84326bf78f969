use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use localsearch_core::config::{resolve_with_base, EmbeddingSettings, STATE_DIR};
use localsearch_core::error::{Error, Result};
use localsearch_core::traits::TextEmbedder;

use crate::device::select_device;
use crate::lazy::LazyModel;
use crate::models::{known_dimension, passage_input, query_input};
use crate::pool::masked_mean_l2;
use crate::sanitize::TextSanitizer;
use crate::tokenize::tokenize_batch;

/// Texts per forward pass; tensors of one batch are dropped before the next.
const BATCH_SIZE: usize = 16;

enum Encoder {
    Bert(BertModel),
    XlmRoberta(XLMRobertaModel),
}

/// Loaded weights + tokenizer. Immutable once built, so one instance is
/// shared by every concurrent query behind an `Arc`.
pub struct E5Model {
    encoder: Encoder,
    tokenizer: Tokenizer,
    device: Device,
    pad_id: u32,
    hidden_size: usize,
}

impl E5Model {
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let pad_id = tokenizer.token_to_id("<pad>").unwrap_or(1);

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
        let config: serde_json::Value = serde_json::from_str(&raw_config)?;
        let model_type = config.get("model_type").and_then(|v| v.as_str()).unwrap_or("xlm-roberta").to_string();
        let hidden_size = config
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))? as usize;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let encoder = if model_type == "bert" {
            let cfg: BertConfig = serde_json::from_str(&raw_config)?;
            Encoder::Bert(BertModel::load(vb, &cfg)?)
        } else {
            let cfg: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
            let vb = if vb.contains_tensor("roberta.embeddings.word_embeddings.weight") { vb.pp("roberta") } else { vb };
            Encoder::XlmRoberta(XLMRobertaModel::new(&cfg, vb)?)
        };
        tracing::info!(dir = %model_dir.display(), model_type, hidden_size, took_ms = started.elapsed().as_millis() as u64, "embedding model loaded");
        Ok(Self { encoder, tokenizer, device, pad_id, hidden_size })
    }

    pub fn hidden_size(&self) -> usize { self.hidden_size }

    /// Mean-pooled, L2-normalized embeddings, one per input.
    pub fn embed_batch(&self, texts: &[String], max_len: usize) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, batch, max_len, self.pad_id, &self.device)?;
            let token_type_ids = input_ids.zeros_like()?;
            let hidden_states = match &self.encoder {
                Encoder::Bert(model) => model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?,
                Encoder::XlmRoberta(model) => model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?,
            };
            let pooled: Tensor = masked_mean_l2(&hidden_states, &attention_mask)?;
            let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
            out.extend(rows);
        }
        Ok(out)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        let weights = candle_core::pickle::read_all(&pickle)?;
        return Ok(weights.into_iter().collect());
    }
    Err(anyhow!("no model.safetensors or pytorch_model.bin in {}", model_dir.display()))
}

/// Candle-hosted multilingual E5 embedder. Model files are read from disk
/// only; nothing is downloaded.
pub struct E5Embedder {
    model_id: String,
    dim: usize,
    max_length: usize,
    candidates: Vec<PathBuf>,
    sanitizer: TextSanitizer,
    model: LazyModel<E5Model>,
}

impl E5Embedder {
    pub fn new(settings: &EmbeddingSettings, root: &Path) -> Result<Self> {
        let candidates = model_dir_candidates(settings, root);
        let dim = match known_dimension(&settings.model_id) {
            Some(dim) => dim,
            None => candidates
                .iter()
                .find_map(|dir| hidden_size_from_config(dir))
                .ok_or_else(|| Error::Config(format!("unknown embedding dimension for {}", settings.model_id)))?,
        };
        let sanitizer = TextSanitizer::new().map_err(Error::embedder)?;
        Ok(Self {
            model_id: settings.model_id.clone(),
            dim,
            max_length: settings.max_length.max(1),
            candidates,
            sanitizer,
            model: LazyModel::new(),
        })
    }

    pub fn load_count(&self) -> usize { self.model.load_count() }

    fn resolve_model_dir(&self) -> Result<PathBuf> {
        self.candidates
            .iter()
            .find(|dir| dir.join("tokenizer.json").exists() && dir.join("config.json").exists())
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<String> = self.candidates.iter().map(|p| p.display().to_string()).collect();
                Error::embedder(format!("model files for {} not found (tried: {})", self.model_id, tried.join(", ")))
            })
    }

    async fn run(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.get().ok_or_else(|| Error::embedder("embedder is not initialized"))?;
        let max_length = self.max_length;
        tokio::task::spawn_blocking(move || model.embed_batch(&inputs, max_length))
            .await
            .map_err(Error::embedder)?
            .map_err(|e| Error::embedder(format!("{e:#}")))
    }
}

#[async_trait]
impl TextEmbedder for E5Embedder {
    fn model_id(&self) -> &str { &self.model_id }

    fn dim(&self) -> usize { self.dim }

    fn is_ready(&self) -> bool { self.model.is_loaded() }

    async fn initialize(&self) -> Result<()> {
        let expected = self.dim;
        self.model
            .get_or_load(|| async {
                let dir = self.resolve_model_dir().map_err(anyhow::Error::from)?;
                let model = tokio::task::spawn_blocking(move || E5Model::load(&dir)).await??;
                if model.hidden_size() != expected {
                    return Err(anyhow!("model produces {} dimensions, expected {}", model.hidden_size(), expected));
                }
                Ok(model)
            })
            .await
            .map(|_| ())
            .map_err(|e| Error::embedder(format!("{e:#}")))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let cleaned = self.sanitizer.clean(text);
        if cleaned.is_empty() {
            return Err(Error::embedder("cannot embed empty text"));
        }
        let mut vectors = self.run(vec![query_input(&self.model_id, &cleaned)]).await?;
        vectors.pop().ok_or_else(|| Error::embedder("model returned no embedding"))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = texts.iter().map(|t| passage_input(&self.model_id, &self.sanitizer.clean(t))).collect();
        self.run(inputs).await
    }

    async fn close(&self) -> Result<()> {
        if self.model.unload() {
            tracing::info!(model = %self.model_id, "embedding model released");
        }
        Ok(())
    }
}

/// Configured dir, then `APP_MODEL_DIR`, then `<root>/.localsearch/models/<name>`,
/// then the newest snapshot in the Hugging Face cache.
fn model_dir_candidates(settings: &EmbeddingSettings, root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = &settings.model_dir {
        dirs.push(resolve_with_base(root, dir));
    }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        dirs.push(resolve_with_base(root, dir));
    }
    let short_name = settings.model_id.rsplit('/').next().unwrap_or(&settings.model_id);
    dirs.push(root.join(STATE_DIR).join("models").join(short_name));
    if let Some(snapshot) = hf_cache_snapshot(&settings.model_id) {
        dirs.push(snapshot);
    }
    dirs
}

fn hf_cache_snapshot(model_id: &str) -> Option<PathBuf> {
    let hub = match std::env::var("HF_HOME") {
        Ok(home) => PathBuf::from(home).join("hub"),
        Err(_) => localsearch_core::config::expand_path("~/.cache/huggingface/hub"),
    };
    let snapshots = hub.join(format!("models--{}", model_id.replace('/', "--"))).join("snapshots");
    std::fs::read_dir(snapshots)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .max_by_key(|e| e.metadata().and_then(|m| m.modified()).ok())
        .map(|e| e.path())
}

fn hidden_size_from_config(dir: &Path) -> Option<usize> {
    let raw = std::fs::read_to_string(dir.join("config.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("hidden_size")?.as_u64().map(|v| v as usize)
}
