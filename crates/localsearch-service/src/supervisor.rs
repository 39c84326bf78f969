//! When to recycle the storage + embedder bundle.

use serde::Serialize;
use std::time::Duration;

use localsearch_core::config::SupervisorSettings;

/// Thresholds that trigger a recycle. A zero threshold is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_documents: u64,
    pub max_memory_mb: u64,
    pub interval: Duration,
}

impl RestartPolicy {
    /// `None` when the supervisor is disabled or has no threshold set.
    pub fn from_settings(settings: &SupervisorSettings) -> Option<Self> {
        let policy = Self {
            max_documents: settings.max_documents,
            max_memory_mb: settings.max_memory_mb,
            interval: Duration::from_secs(settings.interval_secs),
        };
        let armed = policy.max_documents > 0 || policy.max_memory_mb > 0 || !policy.interval.is_zero();
        (settings.enabled && armed).then_some(policy)
    }

    /// The first threshold crossed, as a recycle reason.
    pub fn due(&self, documents_processed: u64, memory_mb: Option<f64>, since_last: Duration) -> Option<String> {
        if self.max_documents > 0 && documents_processed >= self.max_documents {
            return Some(format!("processed {documents_processed} documents (limit {})", self.max_documents));
        }
        #[allow(clippy::cast_precision_loss)]
        let memory_limit = self.max_memory_mb as f64;
        if let Some(mb) = memory_mb.filter(|mb| self.max_memory_mb > 0 && *mb >= memory_limit) {
            return Some(format!("resident memory {mb:.1} MiB (limit {} MiB)", self.max_memory_mb));
        }
        if !self.interval.is_zero() && since_last >= self.interval {
            return Some(format!("periodic recycle after {}s", since_last.as_secs()));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestartReport {
    pub reason: String,
    pub restart_count: u64,
    pub generation: u64,
    pub documents_processed: u64,
    pub duration_ms: u64,
    pub memory_before_mb: Option<f64>,
    pub memory_after_mb: Option<f64>,
}

/// Resident set size of this process in MiB; `None` where `/proc` is unavailable.
pub fn resident_memory_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<f64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024.0)
}
