use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

/// A model handle loaded on first use.
///
/// Concurrent callers of [`LazyModel::get_or_load`] share one load: the first
/// runs the loader while the rest wait on the load lock and then pick up the
/// loaded value. A failed load leaves the slot empty so a later call retries.
pub struct LazyModel<T> {
    slot: RwLock<Option<Arc<T>>>,
    load_lock: tokio::sync::Mutex<()>,
    loads: AtomicUsize,
}

impl<T> Default for LazyModel<T> {
    fn default() -> Self {
        Self { slot: RwLock::new(None), load_lock: tokio::sync::Mutex::new(()), loads: AtomicUsize::new(0) }
    }
}

impl<T> LazyModel<T> {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }

    /// How many times the loader has completed successfully.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(model) = self.get() {
            return Ok(model);
        }
        let _guard = self.load_lock.lock().await;
        if let Some(model) = self.get() {
            return Ok(model);
        }
        let model = Arc::new(load().await?);
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.slot.write() = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drops the cached value. Holders of an `Arc` keep theirs until they
    /// release it. Returns whether anything was loaded.
    pub fn unload(&self) -> bool {
        self.slot.write().take().is_some()
    }
}
