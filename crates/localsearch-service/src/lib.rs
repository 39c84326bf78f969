//! localsearch-service
//!
//! The per-workspace search service: bundle lifecycle, background queue
//! processing, progress tracking and supervised bundle recycling.
pub mod bundle;
pub mod progress;
pub mod service;
pub mod supervisor;

pub use bundle::EngineBundle;
pub use progress::{IndexingPhase, IndexingProgress, ServiceState};
pub use service::{SearchService, ServiceStatus, StartOptions, AUTO_INDEX_KEY};
pub use supervisor::{resident_memory_mb, RestartPolicy, RestartReport};
