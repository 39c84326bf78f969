use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use localsearch_core::events::SearchEvent;

/// Lifecycle of a [`crate::SearchService`]. `Error` is left only through `stop()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingPhase {
    #[default]
    Idle,
    Syncing,
    Discovering,
    Indexing,
    Draining,
    Completed,
    Failed,
}

impl IndexingPhase {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Syncing | Self::Discovering | Self::Indexing | Self::Draining)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexingProgress {
    pub phase: IndexingPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
    /// Counts from the last finished pass or drain.
    pub indexed: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl IndexingProgress {
    pub(crate) fn begin(&mut self, phase: IndexingPhase) {
        if !self.phase.is_active() {
            self.current = 0;
            self.total = 0;
            self.current_file = None;
        }
        self.phase = phase;
    }

    pub(crate) fn succeed(&mut self, indexed: usize, failed: usize) {
        self.phase = IndexingPhase::Completed;
        self.indexed = indexed;
        self.failed = failed;
        self.current_file = None;
        self.last_completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.phase = IndexingPhase::Failed;
        self.current_file = None;
        self.last_error = Some(error);
    }

    /// Folds an indexing event into the counters. Search events are ignored.
    pub(crate) fn observe(&mut self, event: &SearchEvent) {
        match event {
            SearchEvent::IndexingProgress { current, total, file_path } => {
                self.current = *current;
                self.total = *total;
                self.current_file = Some(file_path.clone());
            }
            SearchEvent::IndexingFileFailed { file_path, error } => {
                self.last_error = Some(format!("{file_path}: {error}"));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_update_counters() {
        let mut progress = IndexingProgress::default();
        progress.begin(IndexingPhase::Indexing);
        progress.observe(&SearchEvent::IndexingProgress { current: 2, total: 5, file_path: "a.md".into() });
        assert_eq!((progress.current, progress.total), (2, 5));
        assert_eq!(progress.current_file.as_deref(), Some("a.md"));

        progress.observe(&SearchEvent::IndexingFileFailed { file_path: "b.md".into(), error: "bad utf-8".into() });
        assert_eq!(progress.last_error.as_deref(), Some("b.md: bad utf-8"));

        progress.succeed(4, 1);
        assert_eq!(progress.phase, IndexingPhase::Completed);
        assert!(progress.current_file.is_none());
        assert!(progress.last_completed_at.is_some());
    }

    #[test]
    fn a_new_pass_resets_position_but_not_history() {
        let mut progress = IndexingProgress { current: 3, total: 3, last_error: Some("old".into()), ..Default::default() };
        progress.phase = IndexingPhase::Failed;
        progress.begin(IndexingPhase::Syncing);
        assert_eq!((progress.current, progress.total), (0, 0));
        progress.current = 1;
        progress.begin(IndexingPhase::Discovering);
        assert_eq!(progress.current, 1, "phase changes within a pass keep the position");
        assert_eq!(progress.last_error.as_deref(), Some("old"));
    }
}
