//! Discover → chunk → embed → persist.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use localsearch_core::config::IndexingSettings;
use localsearch_core::data_processor::DataProcessor;
use localsearch_core::error::{Error, Result};
use localsearch_core::events::{EventBus, SearchEvent};
use localsearch_core::traits::{StorageAdapter, TextEmbedder};
use localsearch_core::types::{document_id_for, ChangeKind, Chunk, IndexQueueItem, QueueItemStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    /// `(file_path, error)` for every file that failed.
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed
    }
}

/// What indexing one file did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Removed,
}

pub struct Indexer {
    root: PathBuf,
    storage: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn TextEmbedder>,
    events: EventBus,
    processor: DataProcessor,
    embed_batch_size: usize,
    documents_processed: AtomicU64,
}

impl Indexer {
    pub fn new(
        root: &Path,
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn TextEmbedder>,
        events: EventBus,
        settings: &IndexingSettings,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            storage,
            embedder,
            events,
            processor: DataProcessor::from_settings(settings),
            embed_batch_size: settings.embed_batch_size.max(1),
            documents_processed: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Documents written since this indexer was created.
    pub fn documents_processed(&self) -> u64 {
        self.documents_processed.load(Ordering::SeqCst)
    }

    pub fn discover_files(&self) -> Vec<PathBuf> {
        let files = self.processor.discover_files(&self.root);
        tracing::info!(root = %self.root.display(), files = files.len(), "discovery finished");
        files
    }

    /// Indexes `files`, then deletes documents whose files are gone from disk.
    /// Per-file failures are counted and reported, not returned.
    pub async fn index_all(&self, files: &[PathBuf], force: bool) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        let total = files.len();
        for (i, path) in files.iter().enumerate() {
            let file_path = self.display_path(path);
            self.events.publish(SearchEvent::IndexingProgress { current: i + 1, total, file_path: file_path.clone() });
            match self.index_file(path, force).await {
                Ok(FileOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(FileOutcome::Unchanged) => report.unchanged += 1,
                Ok(FileOutcome::Removed) => report.removed += 1,
                Err(err) => {
                    tracing::warn!(path = %file_path, error = %err, "failed to index file");
                    self.events.publish(SearchEvent::IndexingFileFailed { file_path: file_path.clone(), error: err.to_string() });
                    report.failed += 1;
                    report.errors.push((file_path, err.to_string()));
                }
            }
        }
        report.removed += self.remove_vanished().await?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            removed = report.removed,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "index pass finished"
        );
        self.events.publish(SearchEvent::IndexingCompleted {
            indexed: report.indexed,
            failed: report.failed,
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    /// Re-chunks and re-embeds one file. Unless `force`, a file whose content
    /// hash matches the stored document is left alone. A missing file removes
    /// its document.
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<FileOutcome> {
        let path = self.absolute(path);
        let relative = DataProcessor::relative_path(&self.root, &path)
            .ok_or_else(|| Error::validation(format!("{} is outside {}", path.display(), self.root.display())))?;
        if !path.exists() {
            return self.remove_path(&relative).await.map(|_| FileOutcome::Removed);
        }
        if !self.processor.accepts(&path) {
            return Err(Error::validation(format!("{relative} is not an indexable file")));
        }

        let processed = self.processor.process_file(&self.root, &path)?;
        if !force {
            if let Some(existing) = self.storage.get_document(&processed.document.document_id).await? {
                if existing.content_hash == processed.document.content_hash {
                    tracing::debug!(path = %relative, "unchanged, skipping");
                    return Ok(FileOutcome::Unchanged);
                }
            }
        }

        let mut chunks = processed.chunks;
        self.embed_chunks(&mut chunks).await?;
        let count = chunks.len();
        self.storage.upsert_document(processed.document, chunks).await?;
        self.documents_processed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %relative, chunks = count, "indexed");
        Ok(FileOutcome::Indexed { chunks: count })
    }

    /// Deletes the document for a workspace-relative path; `false` if it was
    /// not indexed.
    pub async fn remove_path(&self, relative: &str) -> Result<bool> {
        let removed = self.storage.delete_document(&document_id_for(relative)).await?;
        if removed {
            tracing::debug!(path = %relative, "removed from index");
        }
        Ok(removed)
    }

    pub async fn process_queue_item(&self, item: &IndexQueueItem) -> Result<FileOutcome> {
        match item.change {
            ChangeKind::Deleted => {
                let path = self.absolute(Path::new(&item.file_path));
                let relative = DataProcessor::relative_path(&self.root, &path)
                    .ok_or_else(|| Error::validation(format!("{} is outside {}", item.file_path, self.root.display())))?;
                self.remove_path(&relative).await.map(|_| FileOutcome::Removed)
            }
            ChangeKind::Created | ChangeKind::Modified => self.index_file(Path::new(&item.file_path), false).await,
        }
    }

    /// Claims and processes queue items until the queue is empty or as many
    /// items as were pending at the start have been handled. Failed items go
    /// back to `pending` until `max_attempts`, so a crash never leaves one
    /// marked completed. If the queue itself cannot be updated, the claimed
    /// items not yet settled are released to `pending` before the error is
    /// returned.
    pub async fn drain_queue(&self, batch_size: usize, max_attempts: u32) -> Result<DrainReport> {
        let started = Instant::now();
        let budget = self.storage.get_queue_status().await?.pending;
        let mut report = DrainReport::default();
        while report.processed() < budget {
            let claim = batch_size.max(1).min(budget - report.processed());
            let items = self.storage.claim_queue_items(claim).await?;
            if items.is_empty() {
                break;
            }
            for (at, item) in items.iter().enumerate() {
                if let Err(err) = self.settle_queue_item(item, budget, max_attempts, &mut report).await {
                    self.release_claimed(&items[at..]).await;
                    return Err(err);
                }
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.processed() > 0 {
            self.events.publish(SearchEvent::IndexingCompleted {
                indexed: report.completed,
                failed: report.failed + report.retried,
                duration_ms: report.duration_ms,
            });
        }
        Ok(report)
    }

    /// Processes one claimed item and records the outcome in the queue. An
    /// error here means the queue write failed, not the item.
    async fn settle_queue_item(&self, item: &IndexQueueItem, total: usize, max_attempts: u32, report: &mut DrainReport) -> Result<()> {
        let current = report.processed() + 1;
        self.events.publish(SearchEvent::IndexingProgress { current, total, file_path: item.file_path.clone() });
        match self.process_queue_item(item).await {
            Ok(_) => {
                self.storage.complete_queue_item(&item.id).await?;
                report.completed += 1;
            }
            Err(err) => {
                tracing::warn!(path = %item.file_path, attempts = item.attempts + 1, error = %err, "queue item failed");
                self.events.publish(SearchEvent::IndexingFileFailed { file_path: item.file_path.clone(), error: err.to_string() });
                match self.storage.fail_queue_item(&item.id, &err.to_string(), max_attempts).await? {
                    QueueItemStatus::Failed => report.failed += 1,
                    _ => report.retried += 1,
                }
            }
        }
        Ok(())
    }

    async fn release_claimed(&self, items: &[IndexQueueItem]) {
        for item in items {
            if let Err(err) = self.storage.release_queue_item(&item.id).await {
                tracing::warn!(path = %item.file_path, error = %err, "could not release claimed queue item");
            }
        }
    }

    async fn embed_chunks(&self, chunks: &mut [Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if !self.embedder.is_ready() {
            self.embedder.initialize().await?;
        }
        let mut texts: Vec<String> = Vec::with_capacity(self.embed_batch_size);
        for batch in chunks.chunks_mut(self.embed_batch_size) {
            texts.clear();
            texts.extend(batch.iter().map(|c| c.chunk_text.clone()));
            let vectors = self.embedder.embed_documents(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::embedder(format!("expected {} embeddings, got {}", batch.len(), vectors.len())));
            }
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }
        }
        Ok(())
    }

    async fn remove_vanished(&self) -> Result<usize> {
        let mut removed = 0;
        for document in self.storage.list_documents().await? {
            if !self.root.join(&document.file_path).exists() && self.storage.delete_document(&document.document_id).await? {
                tracing::debug!(path = %document.file_path, "file vanished, removed from index");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) }
    }

    fn display_path(&self, path: &Path) -> String {
        DataProcessor::relative_path(&self.root, path).unwrap_or_else(|| path.display().to_string())
    }
}
