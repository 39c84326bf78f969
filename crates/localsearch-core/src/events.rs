//! Advisory lifecycle events.
//!
//! Every event published on an [`EventBus`] is delivered to every subscriber
//! that is alive at publish time, in publish order. There is no ordering
//! between different buses. Dropping an [`EventStream`] unsubscribes it.
//! Each subscriber has a bounded buffer; while it is full, new events for
//! that subscriber are dropped. Nothing in the crate depends on events for
//! correctness.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SearchEvent {
    #[serde(rename = "search:started")]
    SearchStarted { query: String, strategy: String },
    #[serde(rename = "search:embedding")]
    SearchEmbedding { query: String },
    #[serde(rename = "search:keyword")]
    SearchKeyword { count: usize },
    #[serde(rename = "search:semantic")]
    SearchSemantic { count: usize },
    #[serde(rename = "search:fusion")]
    SearchFusion { keyword: usize, semantic: usize, fused: usize },
    #[serde(rename = "search:completed")]
    SearchCompleted { query: String, total: usize, took_ms: u64 },
    #[serde(rename = "search:error")]
    SearchError { query: String, error: String },

    #[serde(rename = "indexing:progress")]
    IndexingProgress { current: usize, total: usize, file_path: String },
    #[serde(rename = "indexing:file_failed")]
    IndexingFileFailed { file_path: String, error: String },
    #[serde(rename = "indexing:completed")]
    IndexingCompleted { indexed: usize, failed: usize, duration_ms: u64 },

    #[serde(rename = "restart:starting")]
    RestartStarting { reason: String, documents_processed: u64, memory_mb: Option<f64> },
    #[serde(rename = "restart:completed")]
    RestartCompleted {
        restart_count: u64,
        duration_ms: u64,
        memory_before_mb: Option<f64>,
        memory_after_mb: Option<f64>,
    },
}

impl SearchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchStarted { .. } => "search:started",
            Self::SearchEmbedding { .. } => "search:embedding",
            Self::SearchKeyword { .. } => "search:keyword",
            Self::SearchSemantic { .. } => "search:semantic",
            Self::SearchFusion { .. } => "search:fusion",
            Self::SearchCompleted { .. } => "search:completed",
            Self::SearchError { .. } => "search:error",
            Self::IndexingProgress { .. } => "indexing:progress",
            Self::IndexingFileFailed { .. } => "indexing:file_failed",
            Self::IndexingCompleted { .. } => "indexing:completed",
            Self::RestartStarting { .. } => "restart:starting",
            Self::RestartCompleted { .. } => "restart:completed",
        }
    }
}

pub type EventStream = mpsc::Receiver<SearchEvent>;

/// Events buffered per subscriber before new ones are dropped.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Cheap to clone; all clones publish to the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<SearchEvent>>>>,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_EVENT_BUFFER)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self { subscribers: Arc::default(), buffer: buffer.max(1) }
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SearchEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::trace!(event = dropped.name(), "subscriber buffer full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
