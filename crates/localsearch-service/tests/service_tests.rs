use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use localsearch_core::config::{EmbeddingProvider, Settings};
use localsearch_core::error::{Error, Result};
use localsearch_core::events::SearchEvent;
use localsearch_core::traits::{BundleFactory, BundleParts, StorageAdapter, TextEmbedder};
use localsearch_core::types::{document_id_for, ChangeKind, QueueItemStatus};
use localsearch_hybrid::{SearchOptions, Strategy};
use localsearch_service::{IndexingPhase, SearchService, ServiceState, StartOptions};
use localsearch_store::{LocalBundleFactory, LocalStorage};

const DIM: usize = 384;

fn settings() -> Settings {
    localsearch_core::logging::init_for_tests();
    let mut settings = Settings::default();
    settings.embedding.provider = EmbeddingProvider::Hash;
    settings.indexing.poll_interval_ms = 25;
    settings.supervisor.drain_timeout_ms = 5_000;
    settings
}

fn workspace() -> TempDir {
    let tmp = TempDir::new().expect("tmp");
    fs::create_dir_all(tmp.path().join("docs")).unwrap();
    fs::create_dir_all(tmp.path().join("notes")).unwrap();
    fs::write(tmp.path().join("docs/guide.md"), "# Guide\n\nInstall the pump before winter.").unwrap();
    fs::write(tmp.path().join("notes/garden.md"), "Tomatoes need full sun and regular watering.").unwrap();
    tmp
}

fn quiet() -> StartOptions {
    StartOptions { skip_initial_sync: true, ..StartOptions::default() }
}

async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Counts bundle creations and can be told to fail.
struct CountingFactory {
    inner: LocalBundleFactory,
    creates: AtomicUsize,
    fail: AtomicBool,
}

impl CountingFactory {
    fn new(settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalBundleFactory::new(settings.clone()),
            creates: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleFactory for CountingFactory {
    async fn create(&self, root: &Path) -> Result<BundleParts> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("disk unavailable"));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(root).await
    }
}

/// Embeds only after a permit is released, so a test can hold a sync open.
struct GatedEmbedder {
    inner: Arc<dyn TextEmbedder>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TextEmbedder for GatedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.gate.acquire().await.map_err(Error::embedder)?.forget();
        self.inner.embed_documents(texts).await
    }
    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

struct GatedFactory {
    inner: LocalBundleFactory,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl BundleFactory for GatedFactory {
    async fn create(&self, root: &Path) -> Result<BundleParts> {
        let parts = self.inner.create(root).await?;
        let embedder = Arc::new(GatedEmbedder { inner: parts.embedder, gate: self.gate.clone() });
        Ok(BundleParts { storage: parts.storage, embedder })
    }
}

#[tokio::test]
async fn start_recovers_items_left_processing_by_a_crash() {
    let root = workspace();
    let settings = settings();
    {
        let storage = LocalStorage::open(&settings.data_dir(root.path()), DIM).await.unwrap();
        storage.enqueue("docs/guide.md", ChangeKind::Modified).await.unwrap();
        let claimed = storage.claim_queue_items(1).await.unwrap();
        assert_eq!(claimed[0].status, QueueItemStatus::Processing);
    }

    let service = SearchService::new(Arc::new(LocalBundleFactory::new(settings.clone())), settings);
    service.start(root.path(), quiet()).await.unwrap();
    let handle = service.handle().await.unwrap();
    assert!(handle.storage().list_queue_items(Some(QueueItemStatus::Processing)).await.unwrap().is_empty());
    let pending = handle.storage().list_queue_items(Some(QueueItemStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_path, "docs/guide.md");
    drop(handle);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn without_auto_index_the_service_is_query_only() {
    let root = workspace();
    let settings = settings();
    let service = SearchService::new(Arc::new(LocalBundleFactory::new(settings.clone())), settings);
    // an initial sync is requested, but without indexing enabled it is not run
    let options = StartOptions { skip_initial_sync: false, start_indexing: false, force_reindex: false };
    service.start(root.path(), options).await.unwrap();
    assert!(!service.indexing_enabled());

    service.enqueue("notes/garden.md", ChangeKind::Created).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = service.status().await.unwrap();
    assert_eq!(status.queue.unwrap().pending, 1, "no queue processor runs");
    assert_eq!(status.stats.unwrap().documents, 0, "no initial sync runs");
    let progress = service.progress();
    assert_eq!(progress.phase, IndexingPhase::Idle);
    assert!(progress.last_completed_at.is_none());
    let empty = service.search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(empty.total, 0);

    let drained = service.drain_queue().await.unwrap().expect("not busy");
    assert_eq!(drained.completed, 1);
    let found = service.search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(found.total, 1);

    service.set_auto_index(true).await.unwrap();
    service.stop().await.unwrap();
    service.start(root.path(), quiet()).await.unwrap();
    assert!(service.indexing_enabled(), "persisted autoIndex turns indexing on");
    service.stop().await.unwrap();
}

#[tokio::test]
async fn background_indexing_syncs_then_drains_the_queue() {
    let root = workspace();
    let settings = settings();
    let service = SearchService::new(Arc::new(LocalBundleFactory::new(settings.clone())), settings);
    let options = StartOptions { start_indexing: true, ..StartOptions::default() };
    service.start(root.path(), options).await.unwrap();
    assert!(service.indexing_enabled());

    eventually("initial sync", || {
        let service = service.clone();
        async move { service.status().await.unwrap().stats.unwrap().documents == 2 }
    })
    .await;

    fs::write(root.path().join("notes/pump.md"), "The pump needs priming after winter.").unwrap();
    service.enqueue("notes/pump.md", ChangeKind::Created).await.unwrap();
    eventually("queue drain", || {
        let service = service.clone();
        async move { service.status().await.unwrap().queue.unwrap().completed == 1 }
    })
    .await;

    let handle = service.handle().await.unwrap();
    assert!(handle.storage().get_document(&document_id_for("notes/pump.md")).await.unwrap().is_some());
    drop(handle);
    let response = service.search(SearchOptions::new("priming pump").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(response.results[0].file_path, "notes/pump.md");
    assert_eq!(service.progress().phase, IndexingPhase::Completed);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn only_one_indexing_pass_runs_at_a_time() {
    let root = workspace();
    let settings = settings();
    let gate = Arc::new(Semaphore::new(0));
    let factory = Arc::new(GatedFactory { inner: LocalBundleFactory::new(settings.clone()), gate: gate.clone() });
    let service = SearchService::new(factory, settings);
    service.start(root.path(), quiet()).await.unwrap();

    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.trigger_sync(false).await })
    };
    eventually("sync to reach indexing", || {
        let phase = service.progress().phase;
        async move { phase == IndexingPhase::Indexing }
    })
    .await;

    assert!(matches!(service.trigger_sync(true).await, Err(Error::Busy(_))));
    assert!(service.drain_queue().await.unwrap().is_none());

    gate.add_permits(1_000);
    let report = running.await.unwrap().unwrap();
    assert_eq!((report.indexed, report.failed), (2, 0));
    let progress = service.progress();
    assert_eq!(progress.phase, IndexingPhase::Completed);
    assert_eq!(progress.indexed, 2);

    let again = service.trigger_sync(false).await.unwrap();
    assert_eq!(again.unchanged, 2);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn recycle_swaps_generations_without_losing_work() {
    let root = workspace();
    let settings = settings();
    let factory = CountingFactory::new(&settings);
    let service = SearchService::new(factory.clone(), settings);
    service.start(root.path(), quiet()).await.unwrap();
    service.trigger_sync(false).await.unwrap();
    service.enqueue("notes/garden.md", ChangeKind::Modified).await.unwrap();
    let mut events = service.subscribe();

    let old = service.handle().await.unwrap();
    assert_eq!(old.generation(), 1);
    let recycling = {
        let service = service.clone();
        tokio::spawn(async move { service.recycle("manual").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!recycling.is_finished(), "waits for the old generation to be released");
    let held = old.engine().search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(held.total, 1);
    drop(old);

    let report = recycling.await.unwrap().unwrap();
    assert_eq!((report.restart_count, report.generation), (1, 2));
    assert_eq!(report.documents_processed, 2);
    assert_eq!(factory.creates(), 2);

    let current = service.handle().await.unwrap();
    assert_eq!(current.generation(), 2);
    assert_eq!(current.storage().get_queue_status().await.unwrap().pending, 1, "queued work survives");
    drop(current);
    let response = service.search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(response.total, 1);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SearchEvent::RestartStarting { documents_processed, .. } = &event {
            assert_eq!(*documents_processed, 2);
        }
        names.push(event.name());
    }
    assert!(names.contains(&"restart:starting") && names.contains(&"restart:completed"), "{names:?}");
    assert_eq!(service.status().await.unwrap().restart_count, 1);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn supervisor_recycles_after_the_document_threshold() {
    let root = workspace();
    let mut settings = settings();
    settings.supervisor.enabled = true;
    settings.supervisor.max_documents = 2;
    let factory = CountingFactory::new(&settings);
    let service = SearchService::new(factory.clone(), settings);
    service.start(root.path(), StartOptions { start_indexing: true, ..StartOptions::default() }).await.unwrap();

    eventually("a supervised recycle", || {
        let service = service.clone();
        async move { service.status().await.unwrap().restart_count >= 1 }
    })
    .await;
    let status = service.status().await.unwrap();
    assert!(status.generation >= 2);
    assert_eq!(status.stats.unwrap().documents, 2);
    assert!(factory.creates() >= 2);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_transitions() {
    let root = workspace();
    let settings = settings();
    let factory = CountingFactory::new(&settings);
    let service = SearchService::new(factory.clone(), settings);

    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(matches!(service.search(SearchOptions::new("x")).await, Err(Error::InvalidState(_))));
    service.stop().await.unwrap();

    service.start(root.path(), quiet()).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    service.start(root.path(), quiet()).await.unwrap();
    assert_eq!(factory.creates(), 1, "start while running is a no-op");

    service.stop().await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(matches!(service.trigger_sync(false).await, Err(Error::InvalidState(_))));

    factory.fail.store(true, Ordering::SeqCst);
    assert!(matches!(service.start(root.path(), quiet()).await, Err(Error::Storage(_))));
    assert_eq!(service.state(), ServiceState::Error);
    factory.fail.store(false, Ordering::SeqCst);
    assert!(matches!(service.start(root.path(), quiet()).await, Err(Error::InvalidState(_))));
    service.stop().await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);

    service.start(root.path(), quiet()).await.unwrap();
    assert_eq!(service.handle().await.unwrap().generation(), 2);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn reindex_file_reports_success() {
    let root = workspace();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("x.md"), "elsewhere").unwrap();
    let settings = settings();
    let service = SearchService::new(Arc::new(LocalBundleFactory::new(settings.clone())), settings);
    service.start(root.path(), quiet()).await.unwrap();

    assert!(service.reindex_file(&root.path().join("docs/guide.md")).await.unwrap());
    assert!(!service.reindex_file(&outside.path().join("x.md")).await.unwrap());
    let status = service.status().await.unwrap();
    assert_eq!(status.stats.unwrap().documents, 1);
    assert_eq!(status.queue.unwrap().total(), 0, "the queue is untouched");
    service.stop().await.unwrap();
}
