use chrono::Utc;
use tempfile::TempDir;

use localsearch_core::types::{chunk_id_for, document_id_for, Chunk, Document, MatchType, SearchFilters};
use localsearch_text::TantivyKeywordIndex;

fn document(path: &str, texts: &[&str]) -> (Document, Vec<Chunk>) {
    let document_id = document_id_for(path);
    let document = Document {
        document_id: document_id.clone(),
        file_path: path.to_string(),
        file_name: path.rsplit('/').next().unwrap().to_string(),
        content_hash: "h".into(),
        modified_at: Utc::now(),
        tags: vec![path.rsplit('.').next().unwrap().to_string()],
    };
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk {
            chunk_id: chunk_id_for(&document_id, i),
            document_id: document_id.clone(),
            chunk_index: i,
            chunk_text: t.to_string(),
            page: None,
            section: Some("Intro".into()),
            embedding: None,
        })
        .collect();
    (document, chunks)
}

fn seeded(index: &TantivyKeywordIndex) {
    let (d, c) = document("src/auth/login.rs", &["fn authenticate user password token", "unrelated helper code"]);
    index.upsert_document(&d, &c).unwrap();
    let (d, c) = document("docs/auth.md", &["Authentication guide: the user logs in with a password"]);
    index.upsert_document(&d, &c).unwrap();
    let (d, c) = document("README.md", &["Project readme mentions password reset"]);
    index.upsert_document(&d, &c).unwrap();
}

#[test]
fn keyword_search_ranks_and_reports_metadata() {
    let index = TantivyKeywordIndex::create_in_ram().unwrap();
    seeded(&index);
    assert_eq!(index.num_chunks(), 4);

    let results = index.search("password", &SearchFilters::default(), 10).unwrap();
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    let hit = results.iter().find(|r| r.file_path == "src/auth/login.rs").unwrap();
    assert_eq!(hit.match_type, MatchType::Keyword);
    assert_eq!(hit.file_name, "login.rs");
    assert_eq!(hit.metadata.section.as_deref(), Some("Intro"));
    assert_eq!(hit.metadata.tags, vec!["rs".to_string()]);
    assert_eq!(hit.chunk_id, chunk_id_for(&document_id_for("src/auth/login.rs"), 0));
}

#[test]
fn filters_are_applied_inside_the_query() {
    let index = TantivyKeywordIndex::create_in_ram().unwrap();
    seeded(&index);

    let md_only = SearchFilters { file_types: vec![".MD".into()], ..Default::default() };
    let results = index.search("password", &md_only, 1).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].file_path.ends_with(".md"));

    let in_src = SearchFilters { folders: vec!["src".into()], ..Default::default() };
    let results = index.search("password", &in_src, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, "src/auth/login.rs");

    let nowhere = SearchFilters { folders: vec!["docs".into()], file_types: vec!["rs".into()], ..Default::default() };
    assert!(index.search("password", &nowhere, 10).unwrap().is_empty());
}

#[test]
fn upsert_replaces_and_delete_removes() {
    let index = TantivyKeywordIndex::create_in_ram().unwrap();
    seeded(&index);

    let (d, c) = document("docs/auth.md", &["Rewritten guide about tokens"]);
    index.upsert_document(&d, &c).unwrap();
    let results = index.search("password", &SearchFilters::default(), 10).unwrap();
    assert!(results.iter().all(|r| r.file_path != "docs/auth.md"));
    assert_eq!(index.search("rewritten", &SearchFilters::default(), 10).unwrap().len(), 1);

    index.delete_document(&document_id_for("README.md")).unwrap();
    let results = index.search("password", &SearchFilters::default(), 10).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn prefix_search_matches_partial_words() {
    let index = TantivyKeywordIndex::create_in_ram().unwrap();
    seeded(&index);

    assert!(index.search("authent", &SearchFilters::default(), 10).unwrap().is_empty(), "plain search needs whole tokens");
    let mut paths: Vec<String> = index
        .search_prefix("Authent", &SearchFilters::default(), 10)
        .unwrap()
        .into_iter()
        .map(|r| r.file_path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["docs/auth.md".to_string(), "src/auth/login.rs".to_string()]);

    let in_docs = SearchFilters { folders: vec!["docs".into()], ..Default::default() };
    let results = index.search_prefix("the user authent", &in_docs, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, "docs/auth.md");

    assert!(index.search_prefix("zebr", &SearchFilters::default(), 10).unwrap().is_empty());
    assert!(index.search_prefix(" - ", &SearchFilters::default(), 10).unwrap().is_empty());
}

#[test]
fn degenerate_queries_return_nothing() {
    let index = TantivyKeywordIndex::create_in_ram().unwrap();
    seeded(&index);
    assert!(index.search("   ", &SearchFilters::default(), 10).unwrap().is_empty());
    assert!(index.search("password", &SearchFilters::default(), 0).unwrap().is_empty());
    // unbalanced syntax is parsed leniently rather than rejected
    assert!(index.search("password AND (", &SearchFilters::default(), 10).is_ok());
}

#[test]
fn index_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("keyword");
    {
        let index = TantivyKeywordIndex::open_or_create(&dir).unwrap();
        seeded(&index);
    }
    let index = TantivyKeywordIndex::open_or_create(&dir).unwrap();
    assert_eq!(index.num_chunks(), 4);
    assert_eq!(index.search("authenticate", &SearchFilters::default(), 5).unwrap().len(), 1);
}
