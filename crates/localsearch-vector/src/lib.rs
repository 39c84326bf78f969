//! localsearch-vector
//!
//! LanceDB tables behind the persistent storage: chunk vectors with cosine
//! search, plus the document catalog, the durable index queue and a small
//! key/value table.
pub mod catalog;
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use catalog::Catalog;
pub use search::filter_predicate;
pub use table::open_db;
pub use writer::ChunkVectorStore;
