use regex::{Captures, Regex, RegexBuilder};

/// Marks query terms in result text and cuts snippets around them.
///
/// Only terms longer than two characters count; they are matched literally
/// and case-insensitively.
pub struct Highlighter {
    pattern: Regex,
    tag: String,
}

impl Highlighter {
    /// `None` when the query has no term long enough to highlight.
    pub fn new(query: &str, tag: &str) -> Option<Self> {
        let mut terms: Vec<String> = Vec::new();
        for word in query.split_whitespace() {
            let term = word.trim_matches(|c: char| c == '"' || c == '\'');
            if term.chars().count() > 2 && !terms.iter().any(|t| t.eq_ignore_ascii_case(term)) {
                terms.push(term.to_string());
            }
        }
        if terms.is_empty() {
            return None;
        }
        // longer alternatives first so "database" wins over "data"
        terms.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
        let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
        let pattern = RegexBuilder::new(&alternation).case_insensitive(true).build().ok()?;
        Some(Self { pattern, tag: tag.to_string() })
    }

    pub fn mark(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures| format!("<{tag}>{}</{tag}>", &caps[0], tag = self.tag))
            .into_owned()
    }

    /// Up to `max_count` marked excerpts of at most `max_len` characters
    /// (before markup and ellipses) around distinct matches. A match within
    /// half a snippet of an already chosen one is skipped.
    pub fn snippets(&self, text: &str, max_len: usize, max_count: usize) -> Vec<String> {
        if max_len == 0 || max_count == 0 {
            return Vec::new();
        }
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let total = chars.len();
        let char_at = |byte: usize| chars.partition_point(|(b, _)| *b < byte);
        let byte_at = |idx: usize| chars.get(idx).map_or(text.len(), |(b, _)| *b);

        let min_distance = max_len / 2;
        let mut chosen: Vec<usize> = Vec::new();
        let mut snippets = Vec::new();
        for m in self.pattern.find_iter(text) {
            if snippets.len() >= max_count {
                break;
            }
            let position = char_at(m.start());
            if chosen.iter().any(|&c| position.abs_diff(c) < min_distance) {
                continue;
            }
            chosen.push(position);

            let mut start = position.saturating_sub(max_len / 3);
            let end = (start + max_len).min(total);
            if end - start < max_len {
                start = end.saturating_sub(max_len);
            }
            let mut snippet = String::new();
            if start > 0 {
                snippet.push_str("...");
            }
            snippet.push_str(&self.mark(&text[byte_at(start)..byte_at(end)]));
            if end < total {
                snippet.push_str("...");
            }
            snippets.push(snippet);
        }
        snippets
    }
}
