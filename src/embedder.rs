//! # Sentence embeddings
//!
//! Turns ticket text and questions into 384-dimensional vectors with the
//! `sentence-transformers/all-MiniLM-L6-v2` BERT model, run through Candle (pure Rust,
//! no Python). Weights are fetched from the Hugging Face Hub on first use and cached by
//! `hf-hub`.
//!
//! The model is a black box to the rest of the crate: everything downstream goes through
//! the [`Embedder`] trait, so the lifecycle manager can be exercised with a deterministic
//! fake in tests.
//!
//! ## Pipeline
//! 1. Tokenize (the tokenizer truncates at 512 tokens).
//! 2. BERT forward pass.
//! 3. Mean pooling over the attention mask.
//! 4. L2 normalisation, so cosine similarity equals the dot product.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use indicatif::{ParallelProgressIterator, ProgressStyle};
use rayon::prelude::*;
use std::fmt::Display;
use std::fs;
use tokenizers::{Encoding, Tokenizer};
use tracing::info;

use crate::error::{SupportError, SupportResult};

/// Output dimension of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Default Hugging Face model id.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Maps text to a fixed-dimension vector. Must be deterministic for a given model version.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector returned by [`Embedder::encode`].
    fn dimension(&self) -> usize;

    fn encode(&self, text: &str) -> SupportResult<Vec<f32>>;

    /// Embed many texts, preserving input order.
    fn encode_batch(&self, texts: &[&str]) -> SupportResult<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

fn embedding_error(err: impl Display) -> SupportError {
    SupportError::Embedding(err.to_string())
}

/// BERT sentence encoder running on the CPU through Candle.
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load `model_id` from the Hugging Face Hub (downloading into the local cache once).
    pub fn load(model_id: &str) -> SupportResult<Self> {
        info!("Loading embedding model {model_id}...");
        let device = Device::Cpu;

        let api = Api::new().map_err(embedding_error)?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            "main".to_string(),
        ));
        let fetch = |file: &str| repo.get(file).map_err(embedding_error);

        let config: Config = serde_json::from_str(&fs::read_to_string(fetch("config.json")?)?)?;
        let tokenizer = Tokenizer::from_file(fetch("tokenizer.json")?).map_err(embedding_error)?;
        let weights = fetch("model.safetensors")?;

        // SAFETY: the cached weights file is only read while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DTYPE, &device) }
            .map_err(embedding_error)?;
        let model = BertModel::load(vb, &config).map_err(embedding_error)?;

        info!(dim = config.hidden_size, "Embedding model loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.hidden_size,
        })
    }

    /// Forward pass, mean pooling over the attention mask, L2 normalisation.
    fn embed(&self, encoding: &Encoding) -> candle_core::Result<Vec<f32>> {
        let ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;

        // [1, seq_len, hidden]
        let hidden = self.model.forward(&ids, &type_ids, None)?;
        // [1, seq_len, 1]
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let tokens = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let pooled = summed.broadcast_div(&tokens)?.squeeze(0)?;

        let norm = pooled.sqr()?.sum_all()?.sqrt()?;
        pooled.broadcast_div(&norm)?.to_vec1::<f32>()
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> SupportResult<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(embedding_error)?;
        self.embed(&encoding).map_err(embedding_error)
    }

    /// Embeds in parallel across the rayon pool with a progress bar.
    fn encode_batch(&self, texts: &[&str]) -> SupportResult<Vec<Vec<f32>>> {
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")
            .map_err(embedding_error)?;

        texts
            .par_iter()
            .progress_count(texts.len() as u64)
            .with_style(style)
            .with_message("Embedding")
            .map(|text| self.encode(text))
            .collect()
    }
}

/// Cosine similarity of two equal-length vectors; `0.0` when either is all zeros or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
