//! Shared domain model, contracts and ambient plumbing for the local search
//! engine: types, the error taxonomy, `StorageAdapter` / `TextEmbedder`
//! contracts, configuration, events, logging, file processing and an
//! in-memory storage.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod events;
pub mod logging;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
