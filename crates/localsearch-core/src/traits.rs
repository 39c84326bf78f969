use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{
    ChangeKind, Chunk, Document, IndexQueueItem, QueueItemStatus, QueueStatus, SearchFilters,
    SearchResult, SearchWeights, StorageStats,
};

/// Persistence boundary for documents, chunks, the index queue and the raw
/// keyword/vector search primitives.
///
/// Every method is independently fallible. Implementations must allow
/// concurrent readers while a single writer indexes.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Lexical match ranked by a storage-defined relevance score (higher is better).
    async fn search_keyword(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>>;

    /// Chunks holding a word that starts with the last word of `prefix`, for
    /// completion. Ranking is storage-defined and may be absent.
    async fn search_keyword_prefix(&self, prefix: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>>;

    /// Nearest-neighbour match ranked by similarity (higher is better).
    async fn search_semantic(&self, embedding: &[f32], filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>>;

    /// Optional storage-native fusion. The search engine fuses on its own and
    /// never requires this.
    async fn search_hybrid(
        &self,
        _query: &str,
        _embedding: &[f32],
        _filters: &SearchFilters,
        _limit: usize,
        _weights: SearchWeights,
        _rrf_k: u32,
    ) -> Result<Vec<SearchResult>> {
        Err(Error::storage("native hybrid search is not supported by this storage"))
    }

    /// Insert or replace a document together with all of its chunks.
    async fn upsert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()>;
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>>;
    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>>;
    async fn list_documents(&self) -> Result<Vec<Document>>;
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;
    /// Removes the document and its chunks; `false` if it did not exist.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// Adds a pending item, or updates the change kind of an existing pending
    /// item for the same path.
    async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem>;
    /// Moves up to `limit` pending items to `processing` and returns them.
    async fn claim_queue_items(&self, limit: usize) -> Result<Vec<IndexQueueItem>>;
    /// Fails with `Error::Queue` if the item is not `processing`.
    async fn complete_queue_item(&self, id: &str) -> Result<()>;
    /// Records a failure; the item returns to `pending` until `max_attempts`
    /// is reached, then becomes `failed`. Returns the new status.
    async fn fail_queue_item(&self, id: &str, error: &str, max_attempts: u32) -> Result<QueueItemStatus>;
    /// Hands a claimed item back as `pending` without counting an attempt.
    /// Fails with `Error::Queue` if the item is not `processing`.
    async fn release_queue_item(&self, id: &str) -> Result<()>;
    async fn get_queue_status(&self) -> Result<QueueStatus>;
    async fn list_queue_items(&self, status: Option<QueueItemStatus>) -> Result<Vec<IndexQueueItem>>;
    /// Crash recovery: every `processing` item goes back to `pending`.
    async fn reset_stale_queue_items(&self) -> Result<usize>;
    async fn clear_completed_queue_items(&self) -> Result<usize>;

    async fn get_config_value(&self, key: &str) -> Result<Option<String>>;
    async fn set_config_value(&self, key: &str, value: &str) -> Result<()>;

    async fn stats(&self) -> Result<StorageStats>;
    async fn close(&self) -> Result<()>;
}

/// Produces embedding vectors for queries and chunks.
///
/// `initialize` is idempotent and safe to call concurrently: one caller loads
/// the model, the others wait for that load instead of starting their own.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn is_ready(&self) -> bool;
    async fn initialize(&self) -> Result<()>;
    /// Deterministic for a fixed model. Text that is empty after sanitization
    /// is rejected with `Error::Embedder`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    /// One vector per input, in order. An empty slice yields an empty vector.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Releases model resources; a later `initialize` loads them again.
    async fn close(&self) -> Result<()>;
}

/// The storage + embedder pair a search service runs on.
#[derive(Clone)]
pub struct BundleParts {
    pub storage: Arc<dyn StorageAdapter>,
    pub embedder: Arc<dyn TextEmbedder>,
}

/// Builds the storage + embedder pair for a workspace root. Called once at
/// start and again for every supervisor recycle.
#[async_trait]
pub trait BundleFactory: Send + Sync {
    async fn create(&self, root: &Path) -> Result<BundleParts>;
}
