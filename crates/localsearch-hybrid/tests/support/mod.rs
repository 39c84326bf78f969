#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use localsearch_core::error::{Error, Result};
use localsearch_core::memory::MemoryStorage;
use localsearch_core::traits::{StorageAdapter, TextEmbedder};
use localsearch_core::types::{
    chunk_id_for, document_id_for, file_name_of, ChangeKind, Chunk, Document, IndexQueueItem, MatchType, QueueItemStatus,
    QueueStatus, ResultMetadata, SearchFilters, SearchResult, StorageStats,
};

pub fn result(id: &str, score: f32, match_type: MatchType) -> SearchResult {
    SearchResult {
        document_id: format!("doc-{id}"),
        chunk_id: id.to_string(),
        file_path: format!("notes/{id}.md"),
        file_name: format!("{id}.md"),
        chunk_text: format!("passage {id}"),
        score,
        match_type,
        highlights: Vec::new(),
        metadata: ResultMetadata::default(),
    }
}

/// One document per `(path, text)`, one chunk each, embedded with `embedder`.
pub async fn seed(storage: &dyn StorageAdapter, embedder: &dyn TextEmbedder, docs: &[(&str, &str)]) {
    embedder.initialize().await.unwrap();
    for (path, text) in docs {
        let document = Document {
            document_id: document_id_for(path),
            file_path: path.to_string(),
            file_name: file_name_of(path),
            content_hash: format!("h-{path}"),
            modified_at: Utc::now(),
            tags: Vec::new(),
        };
        let vector = embedder.embed_documents(&[text.to_string()]).await.unwrap().remove(0);
        let chunk = Chunk {
            chunk_id: chunk_id_for(&document.document_id, 0),
            document_id: document.document_id.clone(),
            chunk_index: 0,
            chunk_text: text.to_string(),
            page: None,
            section: None,
            embedding: Some(vector),
        };
        storage.upsert_document(document, vec![chunk]).await.unwrap();
    }
    embedder.close().await.unwrap();
}

/// Storage whose search legs can be scripted or made to fail; everything
/// else goes to an in-memory store.
#[derive(Default)]
pub struct ScriptedStorage {
    pub inner: MemoryStorage,
    pub keyword_results: Mutex<Option<Vec<SearchResult>>>,
    pub semantic_results: Mutex<Option<Vec<SearchResult>>>,
    pub fail_keyword: AtomicBool,
    pub fail_semantic: AtomicBool,
    /// The next `complete_queue_item` call fails once.
    pub fail_next_complete: AtomicBool,
    pub keyword_limits: Mutex<Vec<usize>>,
    pub semantic_limits: Mutex<Vec<usize>>,
}

impl ScriptedStorage {
    pub fn with_keyword(results: Vec<SearchResult>) -> Self {
        let storage = Self::default();
        *storage.keyword_results.lock().unwrap() = Some(results);
        storage
    }

    pub fn with_both(semantic: Vec<SearchResult>, keyword: Vec<SearchResult>) -> Self {
        let storage = Self::with_keyword(keyword);
        *storage.semantic_results.lock().unwrap() = Some(semantic);
        storage
    }
}

#[async_trait]
impl StorageAdapter for ScriptedStorage {
    async fn search_keyword(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.keyword_limits.lock().unwrap().push(limit);
        if self.fail_keyword.load(Ordering::SeqCst) {
            return Err(Error::storage("keyword index unavailable"));
        }
        let scripted = self.keyword_results.lock().unwrap().clone();
        match scripted {
            Some(mut results) => {
                results.truncate(limit);
                Ok(results)
            }
            None => self.inner.search_keyword(query, filters, limit).await,
        }
    }

    async fn search_keyword_prefix(&self, prefix: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.inner.search_keyword_prefix(prefix, filters, limit).await
    }

    async fn search_semantic(&self, embedding: &[f32], filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.semantic_limits.lock().unwrap().push(limit);
        if self.fail_semantic.load(Ordering::SeqCst) {
            return Err(Error::storage("vector index unavailable"));
        }
        let scripted = self.semantic_results.lock().unwrap().clone();
        match scripted {
            Some(mut results) => {
                results.truncate(limit);
                Ok(results)
            }
            None => self.inner.search_semantic(embedding, filters, limit).await,
        }
    }

    async fn upsert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        self.inner.upsert_document(document, chunks).await
    }
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.inner.get_document(document_id).await
    }
    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        self.inner.get_document_by_path(file_path).await
    }
    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.inner.list_documents().await
    }
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.inner.get_chunks(document_id).await
    }
    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.inner.delete_document(document_id).await
    }
    async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem> {
        self.inner.enqueue(file_path, change).await
    }
    async fn claim_queue_items(&self, limit: usize) -> Result<Vec<IndexQueueItem>> {
        self.inner.claim_queue_items(limit).await
    }
    async fn complete_queue_item(&self, id: &str) -> Result<()> {
        if self.fail_next_complete.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("transient write failure"));
        }
        self.inner.complete_queue_item(id).await
    }
    async fn fail_queue_item(&self, id: &str, error: &str, max_attempts: u32) -> Result<QueueItemStatus> {
        self.inner.fail_queue_item(id, error, max_attempts).await
    }
    async fn release_queue_item(&self, id: &str) -> Result<()> {
        self.inner.release_queue_item(id).await
    }
    async fn get_queue_status(&self) -> Result<QueueStatus> {
        self.inner.get_queue_status().await
    }
    async fn list_queue_items(&self, status: Option<QueueItemStatus>) -> Result<Vec<IndexQueueItem>> {
        self.inner.list_queue_items(status).await
    }
    async fn reset_stale_queue_items(&self) -> Result<usize> {
        self.inner.reset_stale_queue_items().await
    }
    async fn clear_completed_queue_items(&self) -> Result<usize> {
        self.inner.clear_completed_queue_items().await
    }
    async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_config_value(key).await
    }
    async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_config_value(key, value).await
    }
    async fn stats(&self) -> Result<StorageStats> {
        self.inner.stats().await
    }
    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Initializes fine but cannot embed.
pub struct BrokenEmbedder;

#[async_trait]
impl TextEmbedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        "broken"
    }
    fn dim(&self) -> usize {
        8
    }
    fn is_ready(&self) -> bool {
        true
    }
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::embedder("inference failed"))
    }
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::embedder("inference failed"))
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
