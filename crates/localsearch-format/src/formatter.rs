use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::num::NonZeroUsize;

use localsearch_core::types::{MatchType, SearchResult};

use crate::truncate::{smart_truncate, strip_markup};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    /// Identity and score only.
    Minimal,
    #[default]
    Summary,
    /// Untruncated passages.
    Full,
}

/// How many passages a document group may show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "usize", into = "usize")]
pub enum PassageCap {
    #[default]
    Unlimited,
    Capped(NonZeroUsize),
}

impl From<usize> for PassageCap {
    /// `0` means unlimited.
    fn from(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Self::Unlimited, Self::Capped)
    }
}

impl From<PassageCap> for usize {
    fn from(cap: PassageCap) -> Self {
        match cap {
            PassageCap::Unlimited => 0,
            PassageCap::Capped(n) => n.get(),
        }
    }
}

impl PassageCap {
    fn apply<T>(self, items: &mut Vec<T>) {
        if let Self::Capped(n) = self {
            items.truncate(n.get());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormatOptions {
    pub format: OutputFormat,
    pub detail: Detail,
    /// Minimum characters per passage; `0` always shows the full text.
    pub passage_length: usize,
    pub group_by_document: bool,
    pub passages_per_document: PassageCap,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Markdown,
            detail: Detail::Summary,
            passage_length: 500,
            group_by_document: true,
            passages_per_document: PassageCap::Unlimited,
        }
    }
}

/// Where this page sits in the full result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
    pub total_hits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMeta {
    pub query: String,
    pub strategy: &'static str,
    pub took_ms: u64,
    pub total_hits: usize,
    pub returned_hits: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// `llm_content` is the full rendering; `return_display` is a one-line
/// summary for terminals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedResponse {
    pub llm_content: String,
    pub return_display: String,
}

struct Group<'a> {
    document_id: &'a str,
    file_path: &'a str,
    file_name: &'a str,
    best_score: f32,
    match_count: usize,
    passages: Vec<&'a SearchResult>,
}

pub struct SearchResponseFormatter {
    options: FormatOptions,
}

impl SearchResponseFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    pub fn format(&self, results: &[SearchResult], query: &str, took_ms: u64, pagination: Pagination) -> FormattedResponse {
        let meta = build_meta(results, query, took_ms, pagination);
        let header = header_line(&meta);
        tracing::debug!(query, returned = meta.returned_hits, total = meta.total_hits, "formatting search response");

        let unique = dedup(results);
        let llm_content = match (self.options.format, unique.is_empty()) {
            (OutputFormat::Markdown, true) => format!("No results found for \"{query}\"."),
            (OutputFormat::Json, true) => {
                let body = json!({ "meta": meta, "results": [], "grouped": false, "message": "No results found" });
                to_pretty(&body)
            }
            (OutputFormat::Markdown, false) if self.options.group_by_document => {
                self.markdown_grouped(&header, &group(unique, self.options.passages_per_document))
            }
            (OutputFormat::Markdown, false) => self.markdown_flat(&header, &sorted(unique)),
            (OutputFormat::Json, false) if self.options.group_by_document => {
                let groups: Vec<Value> = group(unique, self.options.passages_per_document).iter().map(|g| self.json_group(g)).collect();
                to_pretty(&json!({ "meta": meta, "results": groups, "grouped": true }))
            }
            (OutputFormat::Json, false) => {
                let flat: Vec<Value> = sorted(unique).iter().map(|r| self.json_result(r)).collect();
                to_pretty(&json!({ "meta": meta, "results": flat, "grouped": false }))
            }
        };
        let return_display = if results.is_empty() { format!("No results found for \"{query}\"") } else { header };
        FormattedResponse { llm_content, return_display }
    }

    fn passage_text(&self, result: &SearchResult) -> String {
        match self.options.detail {
            Detail::Full => result.chunk_text.clone(),
            _ => smart_truncate(&result.chunk_text, self.options.passage_length),
        }
    }

    fn json_result(&self, r: &SearchResult) -> Value {
        let mut v = json!({
            "document_id": r.document_id,
            "chunk_id": r.chunk_id,
            "file_path": r.file_path,
            "file_name": r.file_name,
            "score": round2(r.score),
            "match_type": r.match_type,
        });
        if self.options.detail != Detail::Minimal {
            v["text"] = json!(self.passage_text(r));
            if !r.highlights.is_empty() {
                v["highlights"] = json!(r.highlights);
            }
            if let Some(section) = &r.metadata.section {
                v["section"] = json!(section);
            }
        }
        if !r.metadata.tags.is_empty() {
            v["tags"] = json!(r.metadata.tags);
        }
        v
    }

    fn json_group(&self, g: &Group<'_>) -> Value {
        let mut v = json!({
            "document_id": g.document_id,
            "file_path": g.file_path,
            "file_name": g.file_name,
            "best_score": round2(g.best_score),
            "match_count": g.match_count,
        });
        if self.options.detail != Detail::Minimal {
            let passages: Vec<Value> = g
                .passages
                .iter()
                .map(|r| {
                    let mut p = json!({
                        "chunk_id": r.chunk_id,
                        "score": round2(r.score),
                        "text": self.passage_text(r),
                        "highlights": r.highlights,
                    });
                    if let Some(section) = &r.metadata.section {
                        p["section"] = json!(section);
                    }
                    p
                })
                .collect();
            v["passages"] = json!(passages);
        }
        v
    }

    fn markdown_flat(&self, header: &str, results: &[&SearchResult]) -> String {
        let mut out = format!("{header}\n");
        for (i, r) in results.iter().enumerate() {
            let _ = write!(out, "\n### {}. {} [{}]\n", i + 1, r.file_path, r.document_id);
            let _ = writeln!(out, "Score: {:.2} ({})", r.score, r.match_type);
            if self.options.detail != Detail::Minimal {
                self.markdown_passage(&mut out, r);
            }
        }
        out
    }

    fn markdown_grouped(&self, header: &str, groups: &[Group<'_>]) -> String {
        let mut out = format!("{header}\n");
        for (i, g) in groups.iter().enumerate() {
            let _ = write!(out, "\n### {}. {} [{}]\n", i + 1, g.file_path, g.document_id);
            let matches = if g.match_count == 1 { "match" } else { "matches" };
            let _ = writeln!(out, "Best score: {:.2} | {} {matches}", g.best_score, g.match_count);
            if self.options.detail == Detail::Minimal {
                continue;
            }
            for r in &g.passages {
                let _ = writeln!(out, "\n- Passage {} (score {:.2}, {})", r.chunk_id, r.score, r.match_type);
                self.markdown_passage(&mut out, r);
            }
        }
        out
    }

    fn markdown_passage(&self, out: &mut String, r: &SearchResult) {
        if let Some(section) = &r.metadata.section {
            let _ = writeln!(out, "Section: {section}");
        }
        let _ = writeln!(out, "\n{}", self.passage_text(r));
    }
}

impl Default for SearchResponseFormatter {
    fn default() -> Self {
        Self::new(FormatOptions::default())
    }
}

fn build_meta(results: &[SearchResult], query: &str, took_ms: u64, pagination: Pagination) -> ResponseMeta {
    let returned_hits = results.len();
    ResponseMeta {
        query: query.to_string(),
        strategy: infer_strategy(results),
        took_ms,
        total_hits: pagination.total_hits,
        returned_hits,
        offset: pagination.offset,
        limit: pagination.limit,
        has_more: pagination.offset + returned_hits < pagination.total_hits,
    }
}

/// `semantic` or `keyword` when every result came from that leg, else `hybrid`.
pub fn infer_strategy(results: &[SearchResult]) -> &'static str {
    let Some(first) = results.first() else { return MatchType::Hybrid.as_str() };
    if first.match_type != MatchType::Hybrid && results.iter().all(|r| r.match_type == first.match_type) {
        first.match_type.as_str()
    } else {
        MatchType::Hybrid.as_str()
    }
}

fn header_line(meta: &ResponseMeta) -> String {
    let noun = if meta.total_hits == 1 { "result" } else { "results" };
    let mut line = format!("Found {} {noun} for \"{}\" in {}ms", meta.total_hits, meta.query, meta.took_ms);
    if meta.returned_hits > 0 && (meta.offset > 0 || meta.has_more) {
        let _ = write!(line, ", showing {}-{}", meta.offset + 1, meta.offset + meta.returned_hits);
    }
    if meta.has_more {
        line.push_str(", more available");
    }
    line
}

/// First occurrence wins among results whose text matches once markup is stripped.
fn dedup(results: &[SearchResult]) -> Vec<&SearchResult> {
    let mut seen = HashSet::new();
    results.iter().filter(|r| seen.insert(strip_markup(&r.chunk_text))).collect()
}

fn sorted(mut results: Vec<&SearchResult>) -> Vec<&SearchResult> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

fn group(results: Vec<&SearchResult>, cap: PassageCap) -> Vec<Group<'_>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    for r in results {
        let slot = *index.entry(r.document_id.as_str()).or_insert_with(|| {
            groups.push(Group {
                document_id: &r.document_id,
                file_path: &r.file_path,
                file_name: &r.file_name,
                best_score: f32::NEG_INFINITY,
                match_count: 0,
                passages: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].passages.push(r);
    }
    for g in &mut groups {
        g.passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        g.match_count = g.passages.len();
        g.best_score = g.passages.first().map_or(0.0, |r| r.score);
        cap.apply(&mut g.passages);
    }
    groups.sort_by(|a, b| b.best_score.total_cmp(&a.best_score));
    groups
}

fn round2(score: f32) -> f64 {
    (f64::from(score) * 100.0).round() / 100.0
}

fn to_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
