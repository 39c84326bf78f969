use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory under the workspace root holding config and index data.
pub const STATE_DIR: &str = ".localsearch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub rrf_k: u32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub max_snippet_length: usize,
    pub highlight_tag: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            rrf_k: 60,
            semantic_weight: 0.5,
            keyword_weight: 0.5,
            max_snippet_length: 300,
            highlight_tag: "mark".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub embed_batch_size: usize,
    pub max_attempts: u32,
    pub max_file_bytes: u64,
    pub include_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        let include = [
            "txt", "md", "markdown", "rst", "adoc", "org", "rs", "py", "js", "jsx", "ts", "tsx", "go",
            "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs", "rb", "php", "swift", "scala", "sh",
            "toml", "yaml", "yml", "json", "html", "css", "sql",
        ];
        let exclude = [".git", "target", "node_modules", "dist", "build", ".venv", "__pycache__", STATE_DIR];
        Self {
            poll_interval_ms: 10_000,
            batch_size: 16,
            embed_batch_size: 32,
            max_attempts: 3,
            max_file_bytes: 2 * 1024 * 1024,
            include_extensions: include.iter().map(|s| s.to_string()).collect(),
            exclude_dirs: exclude.iter().map(|s| s.to_string()).collect(),
            max_tokens: 500,
            overlap_percent: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Candle-hosted multilingual E5 model.
    E5,
    /// Deterministic token-hashing embedder; no model files needed.
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model_id: String,
    pub model_dir: Option<String>,
    pub max_length: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::E5,
            model_id: "intfloat/multilingual-e5-small".to_string(),
            model_dir: None,
            max_length: 512,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Defaults to `<root>/.localsearch/index` when unset.
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub enabled: bool,
    /// Recycle after this many processed documents (0 disables the threshold).
    pub max_documents: u64,
    /// Recycle once resident memory reaches this many MiB (0 disables).
    pub max_memory_mb: u64,
    /// Recycle on a fixed period (0 disables).
    pub interval_secs: u64,
    /// How long a recycle waits for in-flight readers of the old bundle.
    pub drain_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self { enabled: false, max_documents: 0, max_memory_mb: 0, interval_secs: 0, drain_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search: SearchSettings,
    pub indexing: IndexingSettings,
    pub embedding: EmbeddingSettings,
    pub storage: StorageSettings,
    pub supervisor: SupervisorSettings,
}

impl Settings {
    /// Merge defaults, `<root>/.localsearch/config.toml`, the `RUST_ENV`
    /// specific file and `APP_*` environment variables (`__` nests sections).
    pub fn load(root: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let state_dir = root.join(STATE_DIR);

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(state_dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(state_dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(state_dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(state_dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.search;
        for (name, w) in [("semantic_weight", s.semantic_weight), ("keyword_weight", s.keyword_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Config(format!("search.{name} must be a non-negative number, got {w}")));
            }
        }
        if s.rrf_k == 0 {
            return Err(Error::Config("search.rrf_k must be positive".into()));
        }
        if s.default_limit == 0 {
            return Err(Error::Config("search.default_limit must be positive".into()));
        }
        if self.indexing.poll_interval_ms == 0 {
            return Err(Error::Config("indexing.poll_interval_ms must be positive".into()));
        }
        if self.indexing.batch_size == 0 || self.indexing.embed_batch_size == 0 {
            return Err(Error::Config("indexing batch sizes must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.indexing.overlap_percent) {
            return Err(Error::Config("indexing.overlap_percent must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Index data directory for a workspace root.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        match &self.storage.data_dir {
            Some(dir) => resolve_with_base(root, dir),
            None => root.join(STATE_DIR).join("index"),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
