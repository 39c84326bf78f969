//! localsearch-format
//!
//! Renders search results for LLM prompts and terminals as markdown or JSON,
//! grouped by document or flat, with sentence-aware passage truncation.
pub mod formatter;
pub mod truncate;

pub use formatter::{
    infer_strategy, Detail, FormatOptions, FormattedResponse, OutputFormat, Pagination, PassageCap, ResponseMeta,
    SearchResponseFormatter,
};
pub use truncate::smart_truncate;
