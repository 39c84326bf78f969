use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use localsearch_core::error::{Error, Result};
use localsearch_core::traits::StorageAdapter;
use localsearch_core::types::{
    ChangeKind, Chunk, Document, IndexQueueItem, QueueItemStatus, QueueStatus, SearchFilters, SearchResult,
    StorageStats,
};
use localsearch_text::TantivyKeywordIndex;
use localsearch_vector::{open_db, Catalog, ChunkVectorStore};

/// On-disk storage: tantivy for keyword search, LanceDB for chunk vectors,
/// the document catalog, the durable queue and persisted settings.
///
/// Writers are serialized by an internal lock; searches never take it.
pub struct LocalStorage {
    data_dir: PathBuf,
    keyword: Arc<TantivyKeywordIndex>,
    vectors: ChunkVectorStore,
    catalog: Catalog,
    write_lock: Mutex<()>,
    queue_lock: Mutex<()>,
    closed: AtomicBool,
}

fn storage_err(err: anyhow::Error) -> Error {
    Error::storage(format!("{err:#}"))
}

impl LocalStorage {
    /// Opens (creating if needed) the indexes under `data_dir`. `dim` is the
    /// embedder's vector size and must match what the directory was built with.
    pub async fn open(data_dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let keyword_dir = data_dir.join("keyword");
        let keyword = tokio::task::spawn_blocking(move || TantivyKeywordIndex::open_or_create(&keyword_dir))
            .await
            .map_err(Error::storage)?
            .map_err(storage_err)?;
        let lance_uri = data_dir.join("lance");
        let db = open_db(&lance_uri.to_string_lossy()).await.map_err(storage_err)?;
        let vectors = ChunkVectorStore::open(&db, dim).await.map_err(storage_err)?;
        let catalog = Catalog::open(&db).await.map_err(storage_err)?;
        tracing::info!(dir = %data_dir.display(), dim, "local storage opened");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            keyword: Arc::new(keyword),
            vectors,
            catalog,
            write_lock: Mutex::new(()),
            queue_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::storage("storage is closed"));
        }
        Ok(())
    }

    async fn processing_item(&self, id: &str, action: &str) -> Result<(i64, IndexQueueItem)> {
        let (seq, item) = self
            .catalog
            .get_queue_item(id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| Error::queue(format!("queue item {id} does not exist")))?;
        if item.status != QueueItemStatus::Processing {
            return Err(Error::queue(format!("queue item {id} is {} and cannot be {action}", item.status.as_str())));
        }
        Ok((seq, item))
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    async fn search_keyword(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        let keyword = Arc::clone(&self.keyword);
        let query = query.to_string();
        let filters = filters.clone();
        tokio::task::spawn_blocking(move || keyword.search(&query, &filters, limit))
            .await
            .map_err(Error::storage)?
            .map_err(storage_err)
    }

    async fn search_keyword_prefix(&self, prefix: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        let keyword = Arc::clone(&self.keyword);
        let prefix = prefix.to_string();
        let filters = filters.clone();
        tokio::task::spawn_blocking(move || keyword.search_prefix(&prefix, &filters, limit))
            .await
            .map_err(Error::storage)?
            .map_err(storage_err)
    }

    async fn search_semantic(&self, embedding: &[f32], filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        self.vectors.search(embedding, filters, limit).await.map_err(storage_err)
    }

    async fn upsert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        self.ensure_open()?;
        if let Some(bad) = chunks.iter().find(|c| c.document_id != document.document_id) {
            return Err(Error::storage(format!("chunk {} does not belong to {}", bad.chunk_id, document.document_id)));
        }
        let _guard = self.write_lock.lock().await;
        self.vectors.replace_document(&document, &chunks).await.map_err(storage_err)?;
        let keyword = Arc::clone(&self.keyword);
        let chunk_count = chunks.len();
        let doc = document.clone();
        tokio::task::spawn_blocking(move || keyword.upsert_document(&doc, &chunks))
            .await
            .map_err(Error::storage)?
            .map_err(storage_err)?;
        self.catalog.upsert_document(&document, chunk_count).await.map_err(storage_err)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.ensure_open()?;
        self.catalog.get_document(document_id).await.map_err(storage_err)
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        self.ensure_open()?;
        self.catalog.get_document_by_path(file_path).await.map_err(storage_err)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.ensure_open()?;
        self.catalog.list_documents().await.map_err(storage_err)
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.ensure_open()?;
        self.vectors.get_chunks(document_id).await.map_err(storage_err)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let existed = self.catalog.delete_document(document_id).await.map_err(storage_err)?;
        self.vectors.delete_document(document_id).await.map_err(storage_err)?;
        let keyword = Arc::clone(&self.keyword);
        let id = document_id.to_string();
        tokio::task::spawn_blocking(move || keyword.delete_document(&id))
            .await
            .map_err(Error::storage)?
            .map_err(storage_err)?;
        Ok(existed)
    }

    async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        self.catalog.enqueue(file_path, change).await.map_err(storage_err)
    }

    async fn claim_queue_items(&self, limit: usize) -> Result<Vec<IndexQueueItem>> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        self.catalog.claim(limit).await.map_err(storage_err)
    }

    async fn complete_queue_item(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        let (seq, mut item) = self.processing_item(id, "completed").await?;
        item.status = QueueItemStatus::Completed;
        item.last_error = None;
        self.catalog.put_queue_item(seq, item).await.map_err(storage_err)
    }

    async fn fail_queue_item(&self, id: &str, error: &str, max_attempts: u32) -> Result<QueueItemStatus> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        let (seq, mut item) = self.processing_item(id, "failed").await?;
        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.started_at = None;
        item.status = if item.attempts >= max_attempts { QueueItemStatus::Failed } else { QueueItemStatus::Pending };
        let status = item.status;
        self.catalog.put_queue_item(seq, item).await.map_err(storage_err)?;
        Ok(status)
    }

    async fn release_queue_item(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        let (seq, mut item) = self.processing_item(id, "released").await?;
        item.status = QueueItemStatus::Pending;
        item.started_at = None;
        self.catalog.put_queue_item(seq, item).await.map_err(storage_err)
    }

    async fn get_queue_status(&self) -> Result<QueueStatus> {
        self.ensure_open()?;
        self.catalog.queue_status().await.map_err(storage_err)
    }

    async fn list_queue_items(&self, status: Option<QueueItemStatus>) -> Result<Vec<IndexQueueItem>> {
        self.ensure_open()?;
        self.catalog.list_queue(status).await.map_err(storage_err)
    }

    async fn reset_stale_queue_items(&self) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        self.catalog.reset_processing().await.map_err(storage_err)
    }

    async fn clear_completed_queue_items(&self) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.queue_lock.lock().await;
        self.catalog.clear_completed().await.map_err(storage_err)
    }

    async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        self.catalog.get_meta(key).await.map_err(storage_err)
    }

    async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.catalog.set_meta(key, value).await.map_err(storage_err)
    }

    async fn stats(&self) -> Result<StorageStats> {
        self.ensure_open()?;
        let documents = self.catalog.count_documents().await.map_err(storage_err)?;
        let chunks = self.vectors.count().await.map_err(storage_err)?;
        Ok(StorageStats { documents, chunks })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(dir = %self.data_dir.display(), "local storage closed");
        }
        Ok(())
    }
}
