//! Search options: the loosely typed request accepted from callers and the
//! validated options the engine runs on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use localsearch_core::config::SearchSettings;
use localsearch_core::error::{Error, Result};
use localsearch_core::types::{SearchFilters, SearchResult, SearchWeights};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::validation(format!("unknown strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestFilters {
    #[serde(alias = "file_types")]
    pub file_types: Vec<String>,
    pub folders: Vec<String>,
    #[serde(alias = "min_score")]
    pub min_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestWeights {
    pub semantic: Option<f64>,
    pub keyword: Option<f64>,
}

/// Search input as it arrives from tool calls and other untyped callers.
/// Every field but `query` is optional; see [`SearchOptions::from_request`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub strategy: Option<String>,
    pub filters: Option<RequestFilters>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub weights: Option<RequestWeights>,
    pub highlight: Option<bool>,
    #[serde(alias = "highlight_tag")]
    pub highlight_tag: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub query: String,
    pub strategy: Strategy,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
    pub weights: SearchWeights,
    pub highlight: bool,
    pub highlight_tag: String,
}

impl SearchOptions {
    /// Hybrid search for `query` with the built-in defaults.
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_settings(query, &SearchSettings::default())
    }

    pub fn with_settings(query: impl Into<String>, settings: &SearchSettings) -> Self {
        Self {
            query: query.into(),
            strategy: Strategy::default(),
            filters: SearchFilters::default(),
            limit: settings.default_limit,
            offset: 0,
            weights: SearchWeights { semantic: settings.semantic_weight, keyword: settings.keyword_weight },
            highlight: false,
            highlight_tag: settings.highlight_tag.clone(),
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn weights(mut self, weights: SearchWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn highlight(mut self, tag: impl Into<String>) -> Self {
        self.highlight = true;
        self.highlight_tag = tag.into();
        self
    }

    /// Applies defaults to a loose request and validates the result.
    pub fn from_request(request: SearchRequest, settings: &SearchSettings) -> Result<Self> {
        let mut options = Self::with_settings(request.query, settings);
        if let Some(strategy) = request.strategy.as_deref() {
            options.strategy = strategy.parse()?;
        }
        if let Some(filters) = request.filters {
            let min_score = match filters.min_score {
                Some(score) if !score.is_finite() => {
                    return Err(Error::validation("filters.minScore must be a finite number"));
                }
                other => other.map(|s| s as f32),
            };
            options.filters = SearchFilters { file_types: filters.file_types, folders: filters.folders, min_score };
        }
        if let Some(limit) = request.limit {
            options.limit = usize::try_from(limit).map_err(|_| Error::validation(format!("limit must not be negative (got {limit})")))?;
        }
        if let Some(offset) = request.offset {
            options.offset =
                usize::try_from(offset).map_err(|_| Error::validation(format!("offset must not be negative (got {offset})")))?;
        }
        if let Some(weights) = request.weights {
            if let Some(semantic) = weights.semantic {
                options.weights.semantic = semantic as f32;
            }
            if let Some(keyword) = weights.keyword {
                options.weights.keyword = keyword as f32;
            }
        }
        if let Some(highlight) = request.highlight {
            options.highlight = highlight;
        }
        if let Some(tag) = request.highlight_tag {
            options.highlight_tag = tag;
        }
        options.normalize()?;
        Ok(options)
    }

    /// Trims the query and rejects values no search could honour.
    pub fn normalize(&mut self) -> Result<()> {
        self.query = self.query.trim().to_string();
        if self.query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        for (name, weight) in [("semantic", self.weights.semantic), ("keyword", self.weights.keyword)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::validation(format!("{name} weight must be a non-negative number")));
            }
        }
        if self.filters.min_score.is_some_and(|s| !s.is_finite()) {
            return Err(Error::validation("filters.minScore must be a finite number"));
        }
        let tag = self.highlight_tag.trim();
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::validation(format!("invalid highlight tag '{}'", self.highlight_tag)));
        }
        self.highlight_tag = tag.to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Number of results in this page.
    pub total: usize,
    pub took_ms: u64,
    pub query: String,
    pub strategy: Strategy,
    pub filters: SearchFilters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_requests_get_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"query":"  rust  "}"#).unwrap();
        let options = SearchOptions::from_request(request, &SearchSettings::default()).unwrap();
        assert_eq!(options.query, "rust");
        assert_eq!(options.strategy, Strategy::Hybrid);
        assert_eq!((options.limit, options.offset), (10, 0));
        assert_eq!(options.weights, SearchWeights { semantic: 0.5, keyword: 0.5 });
        assert!(!options.highlight);
        assert_eq!(options.highlight_tag, "mark");
    }

    #[test]
    fn camel_case_fields_are_recognized() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"query":"q","strategy":"Keyword","filters":{"fileTypes":["rs"],"minScore":0.3},"limit":3,"offset":6,"highlight":true,"highlightTag":"em"}"#,
        )
        .unwrap();
        let options = SearchOptions::from_request(request, &SearchSettings::default()).unwrap();
        assert_eq!(options.strategy, Strategy::Keyword);
        assert_eq!(options.filters.file_types, vec!["rs".to_string()]);
        assert_eq!(options.filters.min_score, Some(0.3));
        assert_eq!((options.limit, options.offset), (3, 6));
        assert!(options.highlight);
        assert_eq!(options.highlight_tag, "em");
    }

    #[test]
    fn invalid_requests_are_validation_errors() {
        let settings = SearchSettings::default();
        let bad = [
            SearchRequest { limit: Some(-1), ..SearchRequest::new("q") },
            SearchRequest { offset: Some(-5), ..SearchRequest::new("q") },
            SearchRequest { strategy: Some("fuzzy".into()), ..SearchRequest::new("q") },
            SearchRequest { weights: Some(RequestWeights { semantic: Some(-0.1), keyword: None }), ..SearchRequest::new("q") },
            SearchRequest { weights: Some(RequestWeights { semantic: Some(f64::NAN), keyword: None }), ..SearchRequest::new("q") },
            SearchRequest {
                filters: Some(RequestFilters { min_score: Some(f64::NAN), ..Default::default() }),
                ..SearchRequest::new("q")
            },
            SearchRequest { highlight_tag: Some("b onload=x".into()), ..SearchRequest::new("q") },
            SearchRequest::new("   "),
        ];
        for request in bad {
            assert!(matches!(SearchOptions::from_request(request, &settings), Err(Error::Validation(_))));
        }
    }
}
