use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use localsearch_core::config::SearchSettings;
use localsearch_core::error::Result;
use localsearch_core::events::{EventBus, SearchEvent};
use localsearch_core::traits::{StorageAdapter, TextEmbedder};
use localsearch_core::types::{SearchFilters, SearchResult, SearchWeights};

use crate::fusion::reciprocal_rank_fusion;
use crate::highlight::Highlighter;
use crate::request::{SearchOptions, SearchRequest, SearchResponse, Strategy};

const MAX_SNIPPETS: usize = 3;

/// Runs keyword, semantic and hybrid queries against one storage/embedder
/// pair. Cheap to share behind an `Arc`; every call is independent.
pub struct SearchEngine {
    storage: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn TextEmbedder>,
    events: EventBus,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn TextEmbedder>,
        events: EventBus,
        settings: SearchSettings,
    ) -> Self {
        Self { storage, embedder, events, settings }
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        &self.embedder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Options built from this engine's configured defaults.
    pub fn options(&self, query: impl Into<String>) -> SearchOptions {
        SearchOptions::with_settings(query, &self.settings)
    }

    /// Normalizes a loosely typed request, then searches.
    pub async fn search_request(&self, request: SearchRequest) -> Result<SearchResponse> {
        let options = SearchOptions::from_request(request, &self.settings)?;
        self.search(options).await
    }

    /// Any storage or embedder failure fails the whole call; a hybrid search
    /// never falls back to the leg that succeeded.
    pub async fn search(&self, mut options: SearchOptions) -> Result<SearchResponse> {
        options.normalize()?;
        let started = Instant::now();
        self.events.publish(SearchEvent::SearchStarted {
            query: options.query.clone(),
            strategy: options.strategy.to_string(),
        });

        let results = match self.run(&options).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(query = %options.query, strategy = %options.strategy, error = %err, "search failed");
                self.events.publish(SearchEvent::SearchError { query: options.query.clone(), error: err.to_string() });
                return Err(err);
            }
        };

        let took_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(query = %options.query, strategy = %options.strategy, total = results.len(), took_ms, "search completed");
        self.events.publish(SearchEvent::SearchCompleted { query: options.query.clone(), total: results.len(), took_ms });
        Ok(SearchResponse {
            total: results.len(),
            results,
            took_ms,
            query: options.query,
            strategy: options.strategy,
            filters: options.filters,
        })
    }

    async fn run(&self, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let window = options.limit.saturating_add(options.offset);
        let mut results = match options.strategy {
            Strategy::Keyword => self.keyword_leg(&options.query, &options.filters, window).await?,
            Strategy::Semantic => self.semantic_leg(&options.query, &options.filters, window).await?,
            Strategy::Hybrid => {
                let candidates = window.saturating_mul(2);
                let (semantic, keyword) = tokio::try_join!(
                    self.semantic_leg(&options.query, &options.filters, candidates),
                    self.keyword_leg(&options.query, &options.filters, candidates),
                )?;
                let (semantic_count, keyword_count) = (semantic.len(), keyword.len());
                let fused = reciprocal_rank_fusion(semantic, keyword, options.weights, self.settings.rrf_k);
                self.events.publish(SearchEvent::SearchFusion {
                    keyword: keyword_count,
                    semantic: semantic_count,
                    fused: fused.len(),
                });
                fused
            }
        };

        if let Some(min_score) = options.filters.min_score {
            results.retain(|r| r.score >= min_score);
        }
        let mut page: Vec<SearchResult> = results.into_iter().skip(options.offset).take(options.limit).collect();

        if options.highlight {
            if let Some(highlighter) = Highlighter::new(&options.query, &options.highlight_tag) {
                for result in &mut page {
                    result.highlights =
                        highlighter.snippets(&result.chunk_text, self.settings.max_snippet_length, MAX_SNIPPETS);
                    result.chunk_text = highlighter.mark(&result.chunk_text);
                }
            }
        }
        Ok(page)
    }

    async fn keyword_leg(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let results = self.storage.search_keyword(query, filters, limit).await?;
        self.events.publish(SearchEvent::SearchKeyword { count: results.len() });
        Ok(results)
    }

    async fn semantic_leg(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        self.ensure_embedder().await?;
        self.events.publish(SearchEvent::SearchEmbedding { query: query.to_string() });
        let embedding = self.embedder.embed_query(query).await?;
        let results = self.storage.search_semantic(&embedding, filters, limit).await?;
        self.events.publish(SearchEvent::SearchSemantic { count: results.len() });
        Ok(results)
    }

    /// Loads the model on first semantic use. Concurrent callers share one
    /// load through the embedder's own single-flight `initialize`.
    async fn ensure_embedder(&self) -> Result<()> {
        if !self.embedder.is_ready() {
            tracing::info!(model = self.embedder.model_id(), "initializing embedder on first use");
            self.embedder.initialize().await?;
        }
        Ok(())
    }

    pub async fn search_keyword(&self, query: &str, filters: SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let options = self.options(query).strategy(Strategy::Keyword).filters(filters).limit(limit);
        Ok(self.search(options).await?.results)
    }

    pub async fn search_semantic(&self, query: &str, filters: SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let options = self.options(query).strategy(Strategy::Semantic).filters(filters).limit(limit);
        Ok(self.search(options).await?.results)
    }

    pub async fn search_hybrid(
        &self,
        query: &str,
        filters: SearchFilters,
        limit: usize,
        weights: SearchWeights,
    ) -> Result<Vec<SearchResult>> {
        let options = self.options(query).strategy(Strategy::Hybrid).filters(filters).limit(limit).weights(weights);
        Ok(self.search(options).await?.results)
    }

    /// Distinct words completing the last word of `prefix`, in order of first
    /// appearance among prefix-matching chunks. Never touches the embedder.
    pub async fn get_suggestions(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let lowered = prefix.to_lowercase();
        let Some(prefix) = lowered.split_whitespace().last() else { return Ok(Vec::new()) };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let hits = self.storage.search_keyword_prefix(prefix, &SearchFilters::default(), limit.saturating_mul(5)).await?;
        let mut seen = HashSet::new();
        let mut suggestions = Vec::new();
        for hit in &hits {
            for word in hit.chunk_text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')) {
                let word = word.trim_matches('-').to_lowercase();
                if word.len() > prefix.len() && word.starts_with(prefix) && seen.insert(word.clone()) {
                    suggestions.push(word);
                    if suggestions.len() == limit {
                        return Ok(suggestions);
                    }
                }
            }
        }
        Ok(suggestions)
    }
}
