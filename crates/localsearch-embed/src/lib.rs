//! localsearch-embed
//!
//! `TextEmbedder` implementations: a candle-hosted multilingual E5 model and a
//! deterministic token-hash embedder for tests and offline setups.
use std::path::Path;
use std::sync::Arc;

use localsearch_core::config::{EmbeddingProvider, EmbeddingSettings};
use localsearch_core::error::Result;
use localsearch_core::traits::TextEmbedder;

pub mod device;
pub mod e5;
pub mod hash;
pub mod lazy;
pub mod models;
pub mod pool;
pub mod sanitize;
pub mod tokenize;

pub use e5::{E5Embedder, E5Model};
pub use hash::HashEmbedder;
pub use lazy::LazyModel;
pub use pool::masked_mean_l2;
pub use sanitize::TextSanitizer;

/// Dimension used by the hash embedder when the model id is not a known E5 model.
pub const DEFAULT_HASH_DIM: usize = 384;

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Embedder selected by settings; `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder.
pub fn build_embedder(settings: &EmbeddingSettings, root: &Path) -> Result<Arc<dyn TextEmbedder>> {
    if use_fake_embeddings() || settings.provider == EmbeddingProvider::Hash {
        let dim = models::known_dimension(&settings.model_id).unwrap_or(DEFAULT_HASH_DIM);
        tracing::info!(dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(dim)?));
    }
    Ok(Arc::new(E5Embedder::new(settings, root)?))
}
