use anyhow::Result;
use regex::Regex;

/// Strips characters that tokenizers mangle before text is embedded.
///
/// Removed: NUL, U+FFFD, and every control (Cc), format (Cf) or private-use
/// (Co) character except tab, newline and carriage return. Whitespace runs
/// then collapse to a single space and the ends are trimmed.
#[derive(Debug, Clone)]
pub struct TextSanitizer {
    unwanted: Regex,
    whitespace: Regex,
}

impl TextSanitizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            unwanted: Regex::new(r"[\x{FFFD}\p{Cf}\p{Co}[\p{Cc}&&[^\t\n\r]]]")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    pub fn clean(&self, text: &str) -> String {
        let stripped = self.unwanted.replace_all(text, "");
        self.whitespace.replace_all(&stripped, " ").trim().to_string()
    }
}
