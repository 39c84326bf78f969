//! localsearch-store
//!
//! `StorageAdapter` backed by a tantivy keyword index and LanceDB tables
//! under one data directory.
pub mod factory;
pub mod local;

pub use factory::LocalBundleFactory;
pub use local::LocalStorage;
