use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use localsearch_core::config::Settings;
use localsearch_core::error::Result;
use localsearch_core::events::EventBus;
use localsearch_core::traits::{BundleParts, StorageAdapter, TextEmbedder};
use localsearch_hybrid::{Indexer, SearchEngine};

const RELEASE_POLL: Duration = Duration::from_millis(10);

/// One generation of storage, embedder, engine and indexer. Callers hold an
/// `Arc<EngineBundle>` for the length of an operation; a recycle swaps in a
/// new generation and closes this one once those handles are released.
pub struct EngineBundle {
    generation: u64,
    root: PathBuf,
    engine: SearchEngine,
    indexer: Indexer,
}

impl EngineBundle {
    pub(crate) fn new(generation: u64, root: &Path, parts: BundleParts, settings: &Settings, events: &EventBus) -> Self {
        let BundleParts { storage, embedder } = parts;
        let indexer = Indexer::new(root, storage.clone(), embedder.clone(), events.clone(), &settings.indexing);
        let engine = SearchEngine::new(storage, embedder, events.clone(), settings.search.clone());
        Self { generation, root: root.to_path_buf(), engine, indexer }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        self.engine.storage()
    }

    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        self.engine.embedder()
    }

    async fn close(&self) -> Result<()> {
        let embedder = self.embedder().close().await;
        self.storage().close().await?;
        embedder
    }
}

/// Waits up to `timeout` for every other handle to `bundle` to drop, then
/// closes it. Returns whether the wait ran out.
pub(crate) async fn retire(bundle: Arc<EngineBundle>, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    while Arc::strong_count(&bundle) > 1 {
        if Instant::now() >= deadline {
            tracing::warn!(
                generation = bundle.generation,
                holders = Arc::strong_count(&bundle) - 1,
                "closing bundle with handles still held"
            );
            timed_out = true;
            break;
        }
        tokio::time::sleep(RELEASE_POLL).await;
    }
    bundle.close().await?;
    tracing::debug!(generation = bundle.generation, "bundle closed");
    Ok(timed_out)
}
