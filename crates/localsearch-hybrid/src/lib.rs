//! localsearch-hybrid
//!
//! The search engine (keyword, semantic and RRF-fused hybrid retrieval with
//! pagination and highlighting) and the indexer that feeds it.
pub mod engine;
pub mod fusion;
pub mod highlight;
pub mod indexer;
pub mod request;

pub use engine::SearchEngine;
pub use fusion::reciprocal_rank_fusion;
pub use highlight::Highlighter;
pub use indexer::{DrainReport, FileOutcome, IndexReport, Indexer};
pub use request::{SearchOptions, SearchRequest, SearchResponse, Strategy};
