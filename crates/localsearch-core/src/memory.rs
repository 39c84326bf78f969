//! In-process [`StorageAdapter`] for ephemeral workspaces and tests.
//!
//! Keyword relevance is a length-normalised term-frequency score; semantic
//! relevance is cosine similarity against stored chunk embeddings. Path
//! filters follow [`SearchFilters::matches_path`].

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::traits::StorageAdapter;
use crate::types::{
    ChangeKind, Chunk, Document, IndexQueueItem, MatchType, QueueItemStatus, QueueStatus, ResultMetadata,
    SearchFilters, SearchResult, StorageStats,
};

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<String, Document>,
    chunks: HashMap<String, Vec<Chunk>>,
    queue: Vec<IndexQueueItem>,
    config: HashMap<String, String>,
    next_queue_id: u64,
    closed: bool,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-opens a closed store so it can serve a new bundle generation.
    pub fn reopen(&self) {
        self.state.write().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    fn ensure_open(state: &MemoryState) -> Result<()> {
        if state.closed {
            return Err(Error::storage("storage is closed"));
        }
        Ok(())
    }

    fn to_result(doc: &Document, chunk: &Chunk, score: f32, match_type: MatchType) -> SearchResult {
        SearchResult {
            document_id: doc.document_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            file_path: doc.file_path.clone(),
            file_name: doc.file_name.clone(),
            chunk_text: chunk.chunk_text.clone(),
            score,
            match_type,
            highlights: Vec::new(),
            metadata: ResultMetadata { page: chunk.page, section: chunk.section.clone(), tags: doc.tags.clone() },
        }
    }

    /// Candidate chunks in document order, restricted by path filters.
    fn candidates<'a>(state: &'a MemoryState, filters: &SearchFilters) -> Vec<(&'a Document, &'a Chunk)> {
        let mut out = Vec::new();
        for doc in state.documents.values() {
            if !filters.matches_path(&doc.file_path) {
                continue;
            }
            if let Some(chunks) = state.chunks.get(&doc.document_id) {
                out.extend(chunks.iter().map(|c| (doc, c)));
            }
        }
        out
    }

    fn queue_item_mut<'a>(state: &'a mut MemoryState, id: &str) -> Result<&'a mut IndexQueueItem> {
        state
            .queue
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| Error::queue(format!("queue item {id} does not exist")))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na * nb))
}

fn rank(mut scored: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    // stable: equal scores keep document order
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn search_keyword(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored = Vec::new();
        for (doc, chunk) in Self::candidates(&state, filters) {
            let tokens = tokenize(&chunk.chunk_text);
            let hits = tokens.iter().filter(|t| terms.contains(t)).count();
            if hits == 0 {
                continue;
            }
            let score = hits as f32 / (1.0 + (tokens.len() as f32).ln());
            scored.push(Self::to_result(doc, chunk, score, MatchType::Keyword));
        }
        Ok(rank(scored, limit))
    }

    async fn search_keyword_prefix(&self, prefix: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        let Some(word) = tokenize(prefix).pop() else { return Ok(Vec::new()) };
        let hits = Self::candidates(&state, filters)
            .into_iter()
            .filter(|(_, chunk)| tokenize(&chunk.chunk_text).iter().any(|t| t.starts_with(&word)))
            .take(limit)
            .map(|(doc, chunk)| Self::to_result(doc, chunk, 1.0, MatchType::Keyword))
            .collect();
        Ok(hits)
    }

    async fn search_semantic(&self, embedding: &[f32], filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        let mut scored = Vec::new();
        for (doc, chunk) in Self::candidates(&state, filters) {
            let Some(vector) = chunk.embedding.as_deref() else { continue };
            if let Some(similarity) = cosine(embedding, vector) {
                scored.push(Self::to_result(doc, chunk, similarity, MatchType::Semantic));
            }
        }
        Ok(rank(scored, limit))
    }

    async fn upsert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        if let Some(bad) = chunks.iter().find(|c| c.document_id != document.document_id) {
            return Err(Error::storage(format!("chunk {} does not belong to {}", bad.chunk_id, document.document_id)));
        }
        state.chunks.insert(document.document_id.clone(), chunks);
        state.documents.insert(document.document_id.clone(), document);
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.documents.get(document_id).cloned())
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.documents.values().find(|d| d.file_path == file_path).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.documents.values().cloned().collect())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.chunks.get(document_id).cloned().unwrap_or_default())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        state.chunks.remove(document_id);
        Ok(state.documents.remove(document_id).is_some())
    }

    async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        if let Some(existing) = state
            .queue
            .iter_mut()
            .find(|item| item.file_path == file_path && item.status == QueueItemStatus::Pending)
        {
            existing.change = change;
            return Ok(existing.clone());
        }
        state.next_queue_id += 1;
        let item = IndexQueueItem {
            id: format!("q{}", state.next_queue_id),
            file_path: file_path.to_string(),
            change,
            status: QueueItemStatus::Pending,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            last_error: None,
        };
        state.queue.push(item.clone());
        Ok(item)
    }

    async fn claim_queue_items(&self, limit: usize) -> Result<Vec<IndexQueueItem>> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let now = Utc::now();
        let mut claimed = Vec::new();
        for item in state.queue.iter_mut().filter(|i| i.status == QueueItemStatus::Pending).take(limit) {
            item.status = QueueItemStatus::Processing;
            item.started_at = Some(now);
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn complete_queue_item(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let item = Self::queue_item_mut(&mut state, id)?;
        if item.status != QueueItemStatus::Processing {
            return Err(Error::queue(format!("queue item {id} is {} and cannot be completed", item.status.as_str())));
        }
        item.status = QueueItemStatus::Completed;
        item.last_error = None;
        Ok(())
    }

    async fn fail_queue_item(&self, id: &str, error: &str, max_attempts: u32) -> Result<QueueItemStatus> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let item = Self::queue_item_mut(&mut state, id)?;
        if item.status != QueueItemStatus::Processing {
            return Err(Error::queue(format!("queue item {id} is {} and cannot be failed", item.status.as_str())));
        }
        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.started_at = None;
        item.status = if item.attempts >= max_attempts { QueueItemStatus::Failed } else { QueueItemStatus::Pending };
        Ok(item.status)
    }

    async fn release_queue_item(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let item = Self::queue_item_mut(&mut state, id)?;
        if item.status != QueueItemStatus::Processing {
            return Err(Error::queue(format!("queue item {id} is {} and cannot be released", item.status.as_str())));
        }
        item.status = QueueItemStatus::Pending;
        item.started_at = None;
        Ok(())
    }

    async fn get_queue_status(&self) -> Result<QueueStatus> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        let mut status = QueueStatus::default();
        for item in &state.queue {
            match item.status {
                QueueItemStatus::Pending => status.pending += 1,
                QueueItemStatus::Processing => status.processing += 1,
                QueueItemStatus::Completed => status.completed += 1,
                QueueItemStatus::Failed => status.failed += 1,
            }
        }
        Ok(status)
    }

    async fn list_queue_items(&self, status: Option<QueueItemStatus>) -> Result<Vec<IndexQueueItem>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.queue.iter().filter(|i| status.map_or(true, |s| i.status == s)).cloned().collect())
    }

    async fn reset_stale_queue_items(&self) -> Result<usize> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let mut reset = 0;
        for item in state.queue.iter_mut().filter(|i| i.status == QueueItemStatus::Processing) {
            item.status = QueueItemStatus::Pending;
            item.started_at = None;
            reset += 1;
        }
        Ok(reset)
    }

    async fn clear_completed_queue_items(&self) -> Result<usize> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        let before = state.queue.len();
        state.queue.retain(|i| i.status != QueueItemStatus::Completed);
        Ok(before - state.queue.len())
    }

    async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(state.config.get(key).cloned())
    }

    async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.write();
        Self::ensure_open(&state)?;
        state.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let state = self.state.read();
        Self::ensure_open(&state)?;
        Ok(StorageStats { documents: state.documents.len(), chunks: state.chunks.values().map(Vec::len).sum() })
    }

    async fn close(&self) -> Result<()> {
        self.state.write().closed = true;
        Ok(())
    }
}
