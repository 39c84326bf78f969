use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::IndexingSettings;
use crate::error::{Error, Result};
use crate::types::{chunk_id_for, content_hash, document_id_for, file_extension, file_name_of, Chunk, Document};

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_percent: 0.2 }
    }
}

/// A file read from disk and split into chunks that still lack embeddings.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

pub struct DataProcessor {
    chunking_config: ChunkingConfig,
    include_extensions: HashSet<String>,
    exclude_dirs: HashSet<String>,
    max_file_bytes: u64,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::from_settings(&IndexingSettings::default())
    }
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn from_settings(settings: &IndexingSettings) -> Self {
        Self {
            chunking_config: ChunkingConfig {
                max_tokens: settings.max_tokens.max(1),
                overlap_percent: settings.overlap_percent,
            },
            include_extensions: settings.include_extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
            exclude_dirs: settings.exclude_dirs.iter().cloned().collect(),
            max_file_bytes: settings.max_file_bytes,
        }
    }

    /// Indexable files under `root`, sorted. Hidden and excluded directories
    /// are not descended into.
    pub fn discover_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !self.exclude_dirs.contains(name.as_ref())
        });
        let entries = walker.filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable path");
                None
            }
        });
        for entry in entries.filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if self.accepts(path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        files
    }

    /// Extension and size checks applied to single files (queue items too).
    pub fn accepts(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|s| s.to_str()).map(str::to_lowercase).unwrap_or_default();
        if !self.include_extensions.contains(&ext) {
            return false;
        }
        match fs::metadata(path) {
            Ok(meta) => meta.len() <= self.max_file_bytes,
            Err(_) => false,
        }
    }

    /// Workspace-relative path with `/` separators, or `None` if `path` is
    /// outside `root`.
    pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
        if parts.is_empty() { None } else { Some(parts.join("/")) }
    }

    pub fn process_file(&self, root: &Path, path: &Path) -> Result<ProcessedFile> {
        let relative = Self::relative_path(root, path)
            .ok_or_else(|| Error::validation(format!("{} is outside {}", path.display(), root.display())))?;
        let meta = fs::metadata(path)?;
        if meta.len() > self.max_file_bytes {
            return Err(Error::validation(format!("{relative} exceeds {} bytes", self.max_file_bytes)));
        }
        let content = self.read_file_content(path)?;
        let modified_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        let document_id = document_id_for(&relative);
        let ext = file_extension(&relative);
        let document = Document {
            document_id: document_id.clone(),
            file_name: file_name_of(&relative),
            file_path: relative,
            content_hash: content_hash(&content),
            modified_at,
            tags: if ext.is_empty() { Vec::new() } else { vec![ext] },
        };
        let chunks = self.chunk_content(&content, &document_id);
        Ok(ProcessedFile { document, chunks })
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    /// Paragraphs are packed into chunks of at most `max_tokens`; a heading
    /// or page break always starts a new chunk. Oversized paragraphs are split
    /// with overlap.
    pub fn chunk_content(&self, content: &str, document_id: &str) -> Vec<Chunk> {
        let normalized = content.replace("\r\n", "\n");
        let paged = normalized.contains('\x0c');
        let mut builder = ChunkBuilder::new(document_id);
        let mut section: Option<String> = None;

        for (page_index, page_text) in normalized.split('\x0c').enumerate() {
            let page = if paged { u32::try_from(page_index + 1).ok() } else { None };
            builder.flush();
            for paragraph in page_text.split("\n\n") {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() { continue; }
                if let Some(heading) = markdown_heading(paragraph) {
                    builder.flush();
                    section = Some(heading);
                }
                let tokens = self.count_tokens(paragraph);
                if tokens > self.chunking_config.max_tokens {
                    builder.flush();
                    for sub_chunk in self.split_paragraph_with_overlap(paragraph) {
                        builder.push(&sub_chunk, page, section.clone());
                        builder.flush();
                    }
                    continue;
                }
                if builder.tokens + tokens > self.chunking_config.max_tokens {
                    builder.flush();
                }
                builder.push(paragraph, page, section.clone());
                builder.tokens += tokens;
            }
        }
        builder.finish()
    }

    fn count_tokens(&self, text: &str) -> usize { let word_count = text.split_whitespace().count(); (word_count as f32 / 0.75) as usize }

    fn split_paragraph_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        let words_per_chunk = ((self.chunking_config.max_tokens as f32 * 0.75) as usize).max(1);
        let overlap_words = ((words_per_chunk as f32 * self.chunking_config.overlap_percent) as usize).min(words_per_chunk - 1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() { break; }
            start = end - overlap_words;
        }
        chunks
    }
}

struct ChunkBuilder<'a> {
    document_id: &'a str,
    chunks: Vec<Chunk>,
    buffer: Vec<String>,
    page: Option<u32>,
    section: Option<String>,
    tokens: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(document_id: &'a str) -> Self {
        Self { document_id, chunks: Vec::new(), buffer: Vec::new(), page: None, section: None, tokens: 0 }
    }

    fn push(&mut self, text: &str, page: Option<u32>, section: Option<String>) {
        if self.buffer.is_empty() {
            self.page = page;
            self.section = section;
        }
        self.buffer.push(text.to_string());
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() { return; }
        let chunk_index = self.chunks.len();
        self.chunks.push(Chunk {
            chunk_id: chunk_id_for(self.document_id, chunk_index),
            document_id: self.document_id.to_string(),
            chunk_index,
            chunk_text: self.buffer.join("\n\n"),
            page: self.page,
            section: self.section.take(),
            embedding: None,
        });
        self.buffer.clear();
        self.tokens = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

/// Text of a markdown ATX heading (`## Title`), if the paragraph starts with one.
fn markdown_heading(paragraph: &str) -> Option<String> {
    let first_line = paragraph.lines().next()?.trim_end();
    let hashes = first_line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 { return None; }
    let rest = &first_line[hashes..];
    if !rest.starts_with(' ') { return None; }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() { None } else { Some(title.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(max_tokens: usize) -> DataProcessor {
        DataProcessor::from_settings(&IndexingSettings { max_tokens, ..IndexingSettings::default() })
    }

    #[test]
    fn small_paragraphs_pack_into_one_chunk() {
        let chunks = processor(500).chunk_content("Alpha bravo.\n\nCharlie delta.", "doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, "Alpha bravo.\n\nCharlie delta.");
        assert_eq!(chunks[0].chunk_id, "doc:0");
        assert_eq!(chunks[0].page, None);
    }

    #[test]
    fn headings_start_sections() {
        let text = "# Intro\n\nHello there.\n\n## Usage\n\nRun it.";
        let chunks = processor(500).chunk_content(text, "doc");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section.as_deref(), Some("Intro"));
        assert!(chunks[0].chunk_text.contains("Hello there."));
        assert_eq!(chunks[1].section.as_deref(), Some("Usage"));
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn form_feeds_number_pages() {
        let chunks = processor(500).chunk_content("first page\x0csecond page", "doc");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(2));
    }

    #[test]
    fn long_paragraph_splits_with_overlap() {
        let words: Vec<String> = (0..40).map(|i| format!("w{i}")).collect();
        // 8 tokens -> 6 words per chunk, overlap of 1 word
        let chunks = processor(8).chunk_content(&words.join(" "), "doc");
        assert!(chunks.len() > 1);
        let first: Vec<&str> = chunks[0].chunk_text.split_whitespace().collect();
        let second: Vec<&str> = chunks[1].chunk_text.split_whitespace().collect();
        assert_eq!(first.len(), 6);
        assert_eq!(first.last(), second.first(), "consecutive chunks overlap");
        let ids: HashSet<_> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(ids.len(), chunks.len(), "chunk ids unique within document");
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/ws");
        assert_eq!(DataProcessor::relative_path(root, Path::new("/ws/src/lib.rs")).as_deref(), Some("src/lib.rs"));
        assert_eq!(DataProcessor::relative_path(root, Path::new("/elsewhere/x.rs")), None);
    }

    #[test]
    fn heading_detection() {
        assert_eq!(markdown_heading("### Title ###").as_deref(), Some("Title"));
        assert_eq!(markdown_heading("#hashtag"), None);
        assert_eq!(markdown_heading("plain"), None);
    }
}
