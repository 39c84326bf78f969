mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use localsearch_core::config::SearchSettings;
use localsearch_core::error::Error;
use localsearch_core::events::{EventBus, SearchEvent};
use localsearch_core::memory::MemoryStorage;
use localsearch_core::traits::{StorageAdapter, TextEmbedder};
use localsearch_core::types::{MatchType, SearchFilters, SearchWeights};
use localsearch_embed::HashEmbedder;
use localsearch_hybrid::{SearchEngine, SearchOptions, SearchRequest, Strategy};

use support::{result, seed, BrokenEmbedder, ScriptedStorage};

const DOCS: &[(&str, &str)] = &[
    ("src/db/pool.rs", "The database connection pool hands out connections to workers"),
    ("src/db/migrate.rs", "Schema migrations run before the database pool starts"),
    ("docs/garden.md", "Tomatoes need full sun and regular watering"),
    ("docs/recipes.md", "Slow roasted tomatoes with garlic and olive oil"),
];

fn engine(storage: Arc<dyn StorageAdapter>, embedder: Arc<dyn TextEmbedder>) -> SearchEngine {
    SearchEngine::new(storage, embedder, EventBus::new(), SearchSettings::default())
}

async fn seeded() -> (SearchEngine, Arc<HashEmbedder>) {
    let storage = Arc::new(MemoryStorage::new());
    let embedder = Arc::new(HashEmbedder::new(128).unwrap());
    seed(storage.as_ref(), embedder.as_ref(), DOCS).await;
    (engine(storage, embedder.clone()), embedder)
}

#[tokio::test]
async fn keyword_search_never_loads_the_model() {
    let (engine, embedder) = seeded().await;
    let before = embedder.initializations();
    let response = engine.search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(response.total, 2);
    assert_eq!(response.total, response.results.len());
    assert!(response.results.iter().all(|r| r.match_type == MatchType::Keyword));
    assert_eq!(response.strategy, Strategy::Keyword);
    assert_eq!(response.query, "tomatoes");
    assert!(!embedder.is_ready());
    assert_eq!(embedder.initializations(), before);
}

#[tokio::test]
async fn semantic_search_initializes_the_embedder_lazily() {
    let (engine, embedder) = seeded().await;
    let before = embedder.initializations();
    let results = engine.search_semantic("database pool connections", SearchFilters::default(), 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].file_path.starts_with("src/db/"));
    assert!(results.iter().all(|r| r.match_type == MatchType::Semantic));
    assert!(embedder.is_ready());
    assert_eq!(embedder.initializations(), before + 1);

    engine.search_semantic("tomatoes", SearchFilters::default(), 2).await.unwrap();
    assert_eq!(embedder.initializations(), before + 1, "initialized once");
}

#[tokio::test]
async fn hybrid_marks_chunks_found_by_both_legs() {
    let (engine, _embedder) = seeded().await;
    let response = engine.search(SearchOptions::new("database pool")).await.unwrap();
    assert_eq!(response.strategy, Strategy::Hybrid);
    let top = &response.results[0];
    assert_eq!(top.match_type, MatchType::Hybrid);
    assert!(top.file_path.starts_with("src/db/"));
    assert!(response.results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn hybrid_fetches_twice_the_window_from_each_leg() {
    let storage = Arc::new(ScriptedStorage::with_both(
        vec![result("a", 0.9, MatchType::Semantic), result("b", 0.8, MatchType::Semantic)],
        vec![result("b", 7.0, MatchType::Keyword), result("c", 3.0, MatchType::Keyword)],
    ));
    let engine = engine(storage.clone(), Arc::new(HashEmbedder::new(8).unwrap()));
    let weights = SearchWeights { semantic: 0.6, keyword: 0.4 };
    let response = engine.search(SearchOptions::new("q").limit(3).offset(1).weights(weights)).await.unwrap();

    assert_eq!(*storage.semantic_limits.lock().unwrap(), vec![8]);
    assert_eq!(*storage.keyword_limits.lock().unwrap(), vec![8]);
    // fused order b, a, c; offset 1 skips b
    let ids: Vec<&str> = response.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert!((response.results[0].score - 0.6 / 61.0).abs() < 1e-6);
    assert!((response.results[1].score - 0.4 / 62.0).abs() < 1e-6);
}

#[tokio::test]
async fn single_strategies_fetch_limit_plus_offset() {
    let storage = Arc::new(ScriptedStorage::with_keyword(Vec::new()));
    let engine = engine(storage.clone(), Arc::new(HashEmbedder::new(8).unwrap()));
    engine.search(SearchOptions::new("q").strategy(Strategy::Keyword).limit(4).offset(3)).await.unwrap();
    assert_eq!(*storage.keyword_limits.lock().unwrap(), vec![7]);
}

#[tokio::test]
async fn a_failing_leg_fails_the_hybrid_search() {
    let storage = Arc::new(ScriptedStorage::with_both(
        vec![result("a", 0.9, MatchType::Semantic)],
        vec![result("b", 2.0, MatchType::Keyword)],
    ));
    storage.fail_keyword.store(true, Ordering::SeqCst);
    let engine = engine(storage.clone(), Arc::new(HashEmbedder::new(8).unwrap()));
    let mut events = engine.events().subscribe();
    let err = engine.search(SearchOptions::new("query")).await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SearchEvent::SearchCompleted { .. }));
        saw_error |= matches!(event, SearchEvent::SearchError { .. });
    }
    assert!(saw_error);

    storage.fail_keyword.store(false, Ordering::SeqCst);
    storage.fail_semantic.store(true, Ordering::SeqCst);
    assert!(matches!(engine.search(SearchOptions::new("query")).await, Err(Error::Storage(_))));
}

#[tokio::test]
async fn an_embedder_failure_fails_the_hybrid_search() {
    let storage = Arc::new(ScriptedStorage::with_keyword(vec![result("b", 2.0, MatchType::Keyword)]));
    let engine = engine(storage, Arc::new(BrokenEmbedder));
    assert!(matches!(engine.search(SearchOptions::new("query")).await, Err(Error::Embedder(_))));
    let keyword_only = engine.search(SearchOptions::new("query").strategy(Strategy::Keyword)).await.unwrap();
    assert_eq!(keyword_only.total, 1);
}

#[tokio::test]
async fn min_score_applies_to_final_scores() {
    let scripted = [0.9, 0.85, 0.76, 0.65]
        .iter()
        .enumerate()
        .map(|(i, s)| result(&format!("k{i}"), *s, MatchType::Keyword))
        .collect();
    let engine = engine(Arc::new(ScriptedStorage::with_keyword(scripted)), Arc::new(HashEmbedder::new(8).unwrap()));
    let filters = SearchFilters { min_score: Some(0.85), ..Default::default() };
    let response = engine.search(SearchOptions::new("q").strategy(Strategy::Keyword).filters(filters)).await.unwrap();
    assert_eq!(response.total, 2);

    // per-leg scores are far above the threshold but fused scores are not
    let storage = Arc::new(ScriptedStorage::with_both(
        vec![result("a", 0.99, MatchType::Semantic)],
        vec![result("a", 12.0, MatchType::Keyword)],
    ));
    let engine = engine_with(storage);
    let filters = SearchFilters { min_score: Some(0.5), ..Default::default() };
    assert_eq!(engine.search(SearchOptions::new("q").filters(filters)).await.unwrap().total, 0);
}

fn engine_with(storage: Arc<ScriptedStorage>) -> SearchEngine {
    engine(storage, Arc::new(HashEmbedder::new(8).unwrap()))
}

#[tokio::test]
async fn offset_then_limit() {
    let scripted = (0..10).map(|i| result(&format!("k{i}"), 10.0 - i as f32, MatchType::Keyword)).collect();
    let engine = engine_with(Arc::new(ScriptedStorage::with_keyword(scripted)));
    let response = engine.search(SearchOptions::new("q").strategy(Strategy::Keyword).offset(5).limit(2)).await.unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["k5", "k6"]);

    let past_end = engine.search(SearchOptions::new("q").strategy(Strategy::Keyword).offset(20)).await.unwrap();
    assert!(past_end.results.is_empty());
    let zero = engine.search(SearchOptions::new("q").strategy(Strategy::Keyword).limit(0)).await.unwrap();
    assert!(zero.results.is_empty());
}

#[tokio::test]
async fn highlighting_marks_text_and_collects_snippets() {
    let (engine, _embedder) = seeded().await;
    let response = engine
        .search(SearchOptions::new("Tomatoes").strategy(Strategy::Keyword).highlight("em"))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    for r in &response.results {
        assert!(r.chunk_text.contains("<em>Tomatoes</em>") || r.chunk_text.contains("<em>tomatoes</em>"));
        assert_eq!(r.highlights.len(), 1);
    }

    let plain = engine.search(SearchOptions::new("tomatoes").strategy(Strategy::Keyword)).await.unwrap();
    assert!(plain.results.iter().all(|r| !r.chunk_text.contains('<') && r.highlights.is_empty()));
}

#[tokio::test]
async fn hybrid_events_cover_every_stage() {
    let (engine, _embedder) = seeded().await;
    let mut events = engine.events().subscribe();
    engine.search(SearchOptions::new("database")).await.unwrap();
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names.first(), Some(&"search:started"));
    assert_eq!(names.last(), Some(&"search:completed"));
    for expected in ["search:embedding", "search:semantic", "search:keyword", "search:fusion"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[tokio::test]
async fn loose_requests_are_validated_before_searching() {
    let storage = Arc::new(ScriptedStorage::with_keyword(Vec::new()));
    let engine = engine_with(storage.clone());
    let request: SearchRequest = serde_json::from_str(r#"{"query":"q","limit":-3}"#).unwrap();
    assert!(matches!(engine.search_request(request).await, Err(Error::Validation(_))));
    assert!(matches!(engine.search(SearchOptions::new("  ")).await, Err(Error::Validation(_))));
    assert!(storage.keyword_limits.lock().unwrap().is_empty(), "storage never queried");
}

#[tokio::test]
async fn suggestions_complete_partial_words() {
    let storage = Arc::new(MemoryStorage::new());
    let embedder = Arc::new(HashEmbedder::new(32).unwrap());
    seed(
        storage.as_ref(),
        embedder.as_ref(),
        &[("a.md", "data flows into the database and the datastore"), ("b.md", "unrelated text about data-driven design")],
    )
    .await;
    let engine = engine(storage, embedder.clone());
    let mut suggestions = engine.get_suggestions("Data", 10).await.unwrap();
    suggestions.sort();
    assert_eq!(suggestions, vec!["data-driven".to_string(), "database".to_string(), "datastore".to_string()]);
    assert_eq!(engine.get_suggestions("data", 1).await.unwrap().len(), 1);
    assert_eq!(engine.get_suggestions("datab", 10).await.unwrap(), vec!["database".to_string()]);
    assert_eq!(engine.get_suggestions("into the datas", 10).await.unwrap(), vec!["datastore".to_string()]);
    assert!(engine.get_suggestions("zebr", 10).await.unwrap().is_empty());
    assert!(engine.get_suggestions("  ", 5).await.unwrap().is_empty());
    assert!(!embedder.is_ready(), "suggestions never embed");
}
