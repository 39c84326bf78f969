//! Per-workspace search service: owns the bundle, the queue processor, the
//! initial sync and the supervisor.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use localsearch_core::config::Settings;
use localsearch_core::error::{Error, Result};
use localsearch_core::events::{EventBus, EventStream, SearchEvent};
use localsearch_core::traits::BundleFactory;
use localsearch_core::types::{ChangeKind, IndexQueueItem, QueueStatus, StorageStats};
use localsearch_hybrid::{DrainReport, IndexReport, SearchOptions, SearchRequest, SearchResponse};

use crate::bundle::{retire, EngineBundle};
use crate::progress::{IndexingPhase, IndexingProgress, ServiceState};
use crate::supervisor::{resident_memory_mb, RestartPolicy, RestartReport};

/// Persisted key that turns background indexing on at start.
pub const AUTO_INDEX_KEY: &str = "autoIndex";

const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Re-index every file in the initial sync, ignoring content hashes.
    pub force_reindex: bool,
    pub skip_initial_sync: bool,
    /// Run the queue processor even when `autoIndex` is not set.
    pub start_indexing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub root: Option<PathBuf>,
    pub generation: u64,
    pub restart_count: u64,
    pub indexing_enabled: bool,
    pub progress: IndexingProgress,
    pub queue: Option<QueueStatus>,
    pub stats: Option<StorageStats>,
}

struct Background {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    factory: Arc<dyn BundleFactory>,
    settings: Settings,
    events: EventBus,
    state: Mutex<ServiceState>,
    root: Mutex<Option<PathBuf>>,
    progress: Arc<Mutex<IndexingProgress>>,
    bundle: RwLock<Option<Arc<EngineBundle>>>,
    /// Held for the whole of a sync, drain or recycle.
    indexing: tokio::sync::Mutex<()>,
    background: Mutex<Option<Background>>,
    indexing_enabled: Mutex<bool>,
    generation: AtomicU64,
    restart_count: AtomicU64,
    last_recycle: Mutex<Instant>,
}

/// Cheap to clone; clones share one service.
#[derive(Clone)]
pub struct SearchService {
    inner: Arc<Inner>,
}

impl SearchService {
    pub fn new(factory: Arc<dyn BundleFactory>, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                settings,
                events: EventBus::new(),
                state: Mutex::new(ServiceState::Stopped),
                root: Mutex::new(None),
                progress: Arc::new(Mutex::new(IndexingProgress::default())),
                bundle: RwLock::new(None),
                indexing: tokio::sync::Mutex::new(()),
                background: Mutex::new(None),
                indexing_enabled: Mutex::new(false),
                generation: AtomicU64::new(0),
                restart_count: AtomicU64::new(0),
                last_recycle: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    pub fn progress(&self) -> IndexingProgress {
        self.inner.progress.lock().clone()
    }

    pub fn indexing_enabled(&self) -> bool {
        *self.inner.indexing_enabled.lock()
    }

    /// Search, indexing and restart events from every bundle generation.
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Opens the bundle for `root`, recovers queue items a crash left in
    /// `processing`, and starts background work. A no-op while starting or
    /// running.
    pub async fn start(&self, root: &Path, options: StartOptions) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ServiceState::Starting | ServiceState::Running => {
                    tracing::debug!(state = %*state, "start ignored");
                    return Ok(());
                }
                ServiceState::Stopping => return Err(Error::InvalidState("service is stopping".into())),
                ServiceState::Error => {
                    return Err(Error::InvalidState("service failed; stop it before starting again".into()));
                }
                ServiceState::Stopped => *state = ServiceState::Starting,
            }
        }
        tracing::info!(root = %root.display(), "starting search service");
        if let Err(err) = self.open(root, options).await {
            *self.inner.state.lock() = ServiceState::Error;
            tracing::error!(root = %root.display(), error = %err, "search service failed to start");
            return Err(err);
        }
        Ok(())
    }

    async fn open(&self, root: &Path, options: StartOptions) -> Result<()> {
        let bundle = self.build_bundle(root).await?;
        *self.inner.root.lock() = Some(root.to_path_buf());
        *self.inner.bundle.write().await = Some(bundle.clone());

        let recovered = bundle.storage().reset_stale_queue_items().await?;
        if recovered > 0 {
            tracing::info!(recovered, "reset queue items left in processing");
        }
        let auto_index = bundle.storage().get_config_value(AUTO_INDEX_KEY).await?.as_deref() == Some("true");
        let indexing = options.start_indexing || auto_index;
        *self.inner.indexing_enabled.lock() = indexing;
        *self.inner.last_recycle.lock() = Instant::now();
        drop(bundle);

        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(track_progress(self.inner.events.subscribe(), self.inner.progress.clone(), cancel.clone()))];
        let poll = Duration::from_millis(self.inner.settings.indexing.poll_interval_ms.max(1));
        if indexing {
            tasks.push(self.spawn_periodic(&cancel, poll, |service| async move { service.poll_queue().await }));
            if !options.skip_initial_sync {
                tasks.push(self.spawn_initial_sync(&cancel, options.force_reindex));
            }
        }
        if let Some(policy) = RestartPolicy::from_settings(&self.inner.settings.supervisor) {
            tasks.push(self.spawn_periodic(&cancel, poll, move |service| async move { service.supervise(policy).await }));
        }
        *self.inner.background.lock() = Some(Background { cancel, tasks });
        *self.inner.state.lock() = ServiceState::Running;
        tracing::info!(root = %root.display(), indexing, "search service running");
        Ok(())
    }

    /// Stops background work and closes the bundle. Waits for a concurrent
    /// stop or start to settle first; from `Error` it releases whatever was
    /// opened.
    pub async fn stop(&self) -> Result<()> {
        loop {
            {
                let mut state = self.inner.state.lock();
                match *state {
                    ServiceState::Stopped => return Ok(()),
                    ServiceState::Running | ServiceState::Error => {
                        *state = ServiceState::Stopping;
                        break;
                    }
                    ServiceState::Starting | ServiceState::Stopping => {}
                }
            }
            tokio::time::sleep(STOP_POLL).await;
        }
        tracing::info!("stopping search service");

        let background = self.inner.background.lock().take();
        if let Some(Background { cancel, tasks }) = background {
            cancel.cancel();
            for task in tasks {
                if let Err(err) = task.await {
                    tracing::warn!(error = %err, "background task ended abnormally");
                }
            }
        }
        let bundle = self.inner.bundle.write().await.take();
        *self.inner.indexing_enabled.lock() = false;
        let closed = match bundle {
            Some(bundle) => retire(bundle, self.drain_timeout()).await.map(|_| ()),
            None => Ok(()),
        };
        match closed {
            Ok(()) => {
                *self.inner.state.lock() = ServiceState::Stopped;
                tracing::info!("search service stopped");
                Ok(())
            }
            Err(err) => {
                *self.inner.state.lock() = ServiceState::Error;
                tracing::error!(error = %err, "failed to close search bundle");
                Err(err)
            }
        }
    }

    /// The current bundle generation. Hold the handle only for the length of
    /// an operation so recycles are not delayed.
    pub async fn handle(&self) -> Result<Arc<EngineBundle>> {
        let state = self.state();
        if state != ServiceState::Running {
            return Err(Error::InvalidState(format!("search service is {state}")));
        }
        self.bundle().await
    }

    async fn bundle(&self) -> Result<Arc<EngineBundle>> {
        self.inner.bundle.read().await.clone().ok_or_else(|| Error::InvalidState("no bundle is open".into()))
    }

    pub async fn search(&self, options: SearchOptions) -> Result<SearchResponse> {
        let bundle = self.handle().await?;
        bundle.engine().search(options).await
    }

    pub async fn search_request(&self, request: SearchRequest) -> Result<SearchResponse> {
        let bundle = self.handle().await?;
        bundle.engine().search_request(request).await
    }

    pub async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem> {
        let bundle = self.handle().await?;
        bundle.storage().enqueue(file_path, change).await
    }

    /// Persists the `autoIndex` flag. Takes effect on the next start.
    pub async fn set_auto_index(&self, enabled: bool) -> Result<()> {
        let bundle = self.handle().await?;
        bundle.storage().set_config_value(AUTO_INDEX_KEY, if enabled { "true" } else { "false" }).await
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let bundle = self.handle().await.ok();
        let (queue, stats) = match &bundle {
            Some(b) => (Some(b.storage().get_queue_status().await?), Some(b.storage().stats().await?)),
            None => (None, None),
        };
        Ok(ServiceStatus {
            state: self.state(),
            root: self.inner.root.lock().clone(),
            generation: bundle.as_ref().map_or(0, |b| b.generation()),
            restart_count: self.inner.restart_count.load(Ordering::SeqCst),
            indexing_enabled: self.indexing_enabled(),
            progress: self.progress(),
            queue,
            stats,
        })
    }

    /// Discovers and indexes the workspace, returning when done. Fails with
    /// `Busy` while another sync, drain or recycle holds the indexing lock.
    pub async fn trigger_sync(&self, force: bool) -> Result<IndexReport> {
        let bundle = self.handle().await?;
        self.try_sync(&bundle, force).await
    }

    async fn try_sync(&self, bundle: &EngineBundle, force: bool) -> Result<IndexReport> {
        let Ok(_guard) = self.inner.indexing.try_lock() else {
            return Err(Error::Busy("an indexing pass is already running".into()));
        };
        self.sync(bundle, force).await
    }

    async fn sync(&self, bundle: &EngineBundle, force: bool) -> Result<IndexReport> {
        self.set_phase(IndexingPhase::Syncing);
        self.set_phase(IndexingPhase::Discovering);
        let indexer = bundle.indexer();
        let files = indexer.discover_files();
        self.set_phase(IndexingPhase::Indexing);
        let result = indexer.index_all(&files, force).await;
        let mut progress = self.inner.progress.lock();
        match &result {
            Ok(report) => progress.succeed(report.indexed, report.failed),
            Err(err) => {
                tracing::error!(error = %err, "sync failed");
                progress.fail(err.to_string());
            }
        }
        result
    }

    /// Drains the queue once. `None` when another drain, sync or recycle is
    /// already running.
    pub async fn drain_queue(&self) -> Result<Option<DrainReport>> {
        let bundle = self.handle().await?;
        self.try_drain(&bundle).await
    }

    async fn try_drain(&self, bundle: &EngineBundle) -> Result<Option<DrainReport>> {
        let Ok(_guard) = self.inner.indexing.try_lock() else {
            tracing::debug!("drain skipped, indexing lock held");
            return Ok(None);
        };
        let indexing = &self.inner.settings.indexing;
        self.set_phase(IndexingPhase::Draining);
        let result = bundle.indexer().drain_queue(indexing.batch_size, indexing.max_attempts).await;
        if result.is_err() {
            // only a drain claims items, and this one holds the lock
            match bundle.storage().reset_stale_queue_items().await {
                Ok(0) => {}
                Ok(reset) => tracing::warn!(reset, "returned stranded queue items to pending"),
                Err(err) => tracing::warn!(error = %err, "could not reset stranded queue items"),
            }
        }
        let mut progress = self.inner.progress.lock();
        match &result {
            Ok(report) => progress.succeed(report.completed, report.failed + report.retried),
            Err(err) => {
                tracing::error!(error = %err, "queue drain failed");
                progress.fail(err.to_string());
            }
        }
        result.map(Some)
    }

    /// Re-indexes one file, forcing re-embedding. Waits for any running pass.
    pub async fn reindex_file(&self, path: &Path) -> Result<bool> {
        let _guard = self.inner.indexing.lock().await;
        let bundle = self.handle().await?;
        match bundle.indexer().index_file(path, true).await {
            Ok(outcome) => {
                tracing::debug!(path = %path.display(), ?outcome, "reindexed");
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "reindex failed");
                Ok(false)
            }
        }
    }

    /// Builds a fresh bundle and swaps it in. Indexing is paused for the
    /// duration; queries keep running on whichever generation they hold.
    pub async fn recycle(&self, reason: &str) -> Result<RestartReport> {
        let current = self.handle().await?;
        let root = current.root().to_path_buf();
        let documents_processed = current.indexer().documents_processed();
        drop(current);

        let _guard = self.inner.indexing.lock().await;
        let started = Instant::now();
        let memory_before_mb = resident_memory_mb();
        tracing::info!(reason, documents_processed, memory_mb = ?memory_before_mb, "recycling search bundle");
        self.inner.events.publish(SearchEvent::RestartStarting {
            reason: reason.to_string(),
            documents_processed,
            memory_mb: memory_before_mb,
        });

        let fresh = self.build_bundle(&root).await?;
        let generation = fresh.generation();
        let old = self.inner.bundle.write().await.replace(fresh);
        if let Some(old) = old {
            if let Err(err) = retire(old, self.drain_timeout()).await {
                tracing::warn!(error = %err, "failed to close previous bundle");
            }
        }

        let restart_count = self.inner.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.last_recycle.lock() = Instant::now();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let memory_after_mb = resident_memory_mb();
        self.inner.events.publish(SearchEvent::RestartCompleted {
            restart_count,
            duration_ms,
            memory_before_mb,
            memory_after_mb,
        });
        tracing::info!(restart_count, generation, duration_ms, "search bundle recycled");
        Ok(RestartReport {
            reason: reason.to_string(),
            restart_count,
            generation,
            documents_processed,
            duration_ms,
            memory_before_mb,
            memory_after_mb,
        })
    }

    async fn build_bundle(&self, root: &Path) -> Result<Arc<EngineBundle>> {
        let parts = self.inner.factory.create(root).await?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(EngineBundle::new(generation, root, parts, &self.inner.settings, &self.inner.events)))
    }

    fn set_phase(&self, phase: IndexingPhase) {
        self.inner.progress.lock().begin(phase);
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.settings.supervisor.drain_timeout_ms)
    }

    async fn poll_queue(&self) {
        let Ok(bundle) = self.bundle().await else { return };
        match bundle.storage().get_queue_status().await {
            Ok(status) if status.pending == 0 => {}
            Ok(status) => {
                tracing::debug!(pending = status.pending, "draining index queue");
                // failures are recorded in progress; the next tick retries
                let _ = self.try_drain(&bundle).await;
            }
            Err(err) => tracing::warn!(error = %err, "failed to read queue status"),
        }
    }

    async fn supervise(&self, policy: RestartPolicy) {
        let Ok(bundle) = self.bundle().await else { return };
        let documents = bundle.indexer().documents_processed();
        drop(bundle);
        let since_last = self.inner.last_recycle.lock().elapsed();
        if let Some(reason) = policy.due(documents, resident_memory_mb(), since_last) {
            if let Err(err) = self.recycle(&reason).await {
                tracing::error!(error = %err, "supervised recycle failed");
            }
        }
    }

    fn spawn_initial_sync(&self, cancel: &CancellationToken, force: bool) -> JoinHandle<()> {
        let service = Arc::downgrade(&self.inner);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let Some(inner) = service.upgrade() else { return };
            let service = SearchService { inner };
            let Ok(bundle) = service.bundle().await else { return };
            tokio::select! {
                () = cancel.cancelled() => tracing::debug!("initial sync cancelled"),
                result = service.try_sync(&bundle, force) => {
                    if let Err(err) = result {
                        tracing::error!(error = %err, "initial sync failed");
                    }
                }
            }
        })
    }

    /// Runs `job` every `period`, first after one period, until cancelled or
    /// the service is dropped. A job already running is allowed to finish.
    fn spawn_periodic<F, Fut>(&self, cancel: &CancellationToken, period: Duration, job: F) -> JoinHandle<()>
    where
        F: Fn(SearchService) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let service: Weak<Inner> = Arc::downgrade(&self.inner);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = service.upgrade() else { break };
                job(SearchService { inner }).await;
            }
        })
    }
}

async fn track_progress(mut events: EventStream, progress: Arc<Mutex<IndexingProgress>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => progress.lock().observe(&event),
                None => break,
            },
        }
    }
}
