//! Domain types shared by storage, embedding, search and service crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

pub type DocumentId = String;
pub type ChunkId = String;

/// One indexed source file.
///
/// - `document_id`: stable identity derived from the workspace-relative path
/// - `file_path`: workspace-relative path using `/` separators
/// - `content_hash`: blake3 of the file content, used to skip unchanged files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub file_path: String,
    pub file_name: String,
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// A contiguous span of a document's text; the unit that is embedded and matched.
///
/// `chunk_id` is unique within its document (`<document_id>:<chunk_index>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Which retrieval leg produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Hybrid,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub page: Option<u32>,
    pub section: Option<String>,
    pub tags: Vec<String>,
}

/// A scored match. `score` is only comparable within one query's result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub file_path: String,
    pub file_name: String,
    pub chunk_text: String,
    pub score: f32,
    pub match_type: MatchType,
    pub highlights: Vec<String>,
    pub metadata: ResultMetadata,
}

/// Restricts which chunks a search may return.
///
/// `file_types` are extensions without the dot; `folders` are workspace-relative
/// directories matched component-wise. `min_score` is applied by the engine to
/// final (post-fusion) scores, never by storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl SearchFilters {
    /// Lowercased extensions with any leading dot removed, empties dropped.
    pub fn normalized_file_types(&self) -> Vec<String> {
        self.file_types
            .iter()
            .map(|t| t.trim().trim_start_matches('.').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Folders with `\` turned into `/` and surrounding slashes removed.
    /// An empty entry (the root) is dropped since it matches everything.
    pub fn normalized_folders(&self) -> Vec<String> {
        self.folders
            .iter()
            .map(|f| f.trim().replace('\\', "/").trim_matches('/').to_string())
            .filter(|f| !f.is_empty() && f != ".")
            .collect()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.normalized_file_types().is_empty() && self.normalized_folders().is_empty()
    }

    /// Reference semantics for path filters; storage adapters that push
    /// filters down must agree with this.
    pub fn matches_path(&self, file_path: &str) -> bool {
        let types = self.normalized_file_types();
        if !types.is_empty() {
            let ext = file_extension(file_path);
            if !types.iter().any(|t| *t == ext) {
                return false;
            }
        }
        let folders = self.normalized_folders();
        if !folders.is_empty() {
            let path = file_path.trim_start_matches('/');
            let inside = folders.iter().any(|folder| {
                path.strip_prefix(folder.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            });
            if !inside {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self { semantic: 0.5, keyword: 0.5 }
    }
}

/// What happened to a file, as reported by the upstream producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::validation(format!("unknown change kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QueueItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::storage(format!("unknown queue status '{other}'"))),
        }
    }
}

/// Pending indexing work for one file path.
///
/// Never stays `Processing` across a restart: storage resets such items to
/// `Pending` when the service starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQueueItem {
    pub id: String,
    pub file_path: String,
    pub change: ChangeKind,
    pub status: QueueItemStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStatus {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Stable document identity for a workspace-relative path.
pub fn document_id_for(relative_path: &str) -> DocumentId {
    let hash = blake3::hash(relative_path.as_bytes()).to_hex();
    hash.as_str()[..16].to_string()
}

pub fn chunk_id_for(document_id: &str, chunk_index: usize) -> ChunkId {
    format!("{document_id}:{chunk_index}")
}

pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Lowercased extension without the dot, or an empty string.
pub fn file_extension(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Workspace-relative parent directory ("" for files at the root).
pub fn folder_of(file_path: &str) -> String {
    match file_path.trim_start_matches('/').rsplit_once('/') {
        Some((folder, _)) => folder.to_string(),
        None => String::new(),
    }
}

pub fn file_name_of(file_path: &str) -> String {
    file_path.rsplit('/').next().unwrap_or(file_path).to_string()
}
