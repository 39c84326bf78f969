//! localsearch-text
//!
//! Tantivy keyword index over chunks: one document per chunk carrying its
//! path, folder facet and extension so filters run inside the query.
pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::TantivyKeywordIndex;
