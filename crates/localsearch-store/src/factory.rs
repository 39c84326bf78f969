use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use localsearch_core::config::Settings;
use localsearch_core::error::Result;
use localsearch_core::traits::{BundleFactory, BundleParts};
use localsearch_embed::build_embedder;

use crate::local::LocalStorage;

/// Builds on-disk storage plus the configured embedder for a workspace root.
pub struct LocalBundleFactory {
    settings: Settings,
}

impl LocalBundleFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BundleFactory for LocalBundleFactory {
    async fn create(&self, root: &Path) -> Result<BundleParts> {
        let embedder = build_embedder(&self.settings.embedding, root)?;
        let data_dir = self.settings.data_dir(root);
        let storage = LocalStorage::open(&data_dir, embedder.dim()).await?;
        tracing::debug!(model = embedder.model_id(), dir = %data_dir.display(), "bundle created");
        Ok(BundleParts { storage: Arc::new(storage), embedder })
    }
}
