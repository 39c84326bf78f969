use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use twox_hash::XxHash64;

use localsearch_core::error::{Error, Result};
use localsearch_core::traits::TextEmbedder;

use crate::sanitize::TextSanitizer;

pub const HASH_MODEL_ID: &str = "localsearch/token-hash";

/// Deterministic bag-of-tokens embedder: each lowercased token is hashed into
/// one of `dim` buckets and the vector is L2 normalized. Texts that share
/// words get a positive cosine similarity, which is all tests and offline
/// setups need.
pub struct HashEmbedder {
    dim: usize,
    ready: AtomicBool,
    initializations: AtomicUsize,
    sanitizer: TextSanitizer,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Config("hash embedder dimension must be positive".into()));
        }
        let sanitizer = TextSanitizer::new().map_err(Error::embedder)?;
        Ok(Self { dim, ready: AtomicBool::new(false), initializations: AtomicUsize::new(0), sanitizer })
    }

    /// Number of not-ready to ready transitions so far.
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty());
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() { Ok(()) } else { Err(Error::embedder("embedder is not initialized")) }
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    fn model_id(&self) -> &str { HASH_MODEL_ID }

    fn dim(&self) -> usize { self.dim }

    fn is_ready(&self) -> bool { self.ready.load(Ordering::SeqCst) }

    async fn initialize(&self) -> Result<()> {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.initializations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_ready()?;
        let cleaned = self.sanitizer.clean(text);
        if cleaned.is_empty() {
            return Err(Error::embedder("cannot embed empty text"));
        }
        Ok(self.vectorize(&cleaned))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.ensure_ready()?;
        Ok(texts.iter().map(|t| self.vectorize(&self.sanitizer.clean(t))).collect())
    }

    async fn close(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}
