//! Sentence-aware passage shortening.
//!
//! `passage_length` is a minimum: whole sentences are kept until the
//! rendered passage reaches it. Sentences that contain highlight markup are
//! preferred, with neighbouring sentences as context; without markup the
//! passage keeps its first and last sentences and grows inward.

use std::collections::BTreeSet;

const MAX_CONTEXT_RADIUS: usize = 3;
const GAP: &str = " [...] ";

/// Sentences of `text`, trimmed. A sentence ends at `.`, `!` or `?` followed
/// by whitespace and an uppercase letter (markup skipped), or by the end of
/// the text. Text without boundaries is a single sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let is_terminal = |c: char| matches!(c, '.' | '!' | '?');
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        if !is_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && is_terminal(chars[j].1) {
            j += 1;
        }
        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        let boundary = k == chars.len() || (k > j && starts_sentence(&text[chars[k].0..]));
        if boundary {
            let end = chars.get(j).map_or(text.len(), |(b, _)| *b);
            push_trimmed(&mut sentences, &text[start..end]);
            start = chars.get(k).map_or(text.len(), |(b, _)| *b);
            i = k;
        } else {
            i = j;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}

fn starts_sentence(rest: &str) -> bool {
    let mut rest = rest;
    while let Some(inner) = rest.strip_prefix('<') {
        match inner.find('>') {
            Some(end) if !inner[..end].contains(char::is_whitespace) => rest = &inner[end + 1..],
            _ => break,
        }
    }
    rest.chars().next().is_some_and(char::is_uppercase)
}

/// Byte length of the tag name in `name>` or `/name>` at the start of `tail`.
fn tag_len(tail: &str) -> Option<usize> {
    let end = tail.find('>')?;
    let name = tail[..end].strip_prefix('/').unwrap_or(&tail[..end]);
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then_some(end)
}

/// Whether `sentence` contains an opening tag such as `<mark>`.
pub fn contains_mark(sentence: &str) -> bool {
    sentence
        .match_indices('<')
        .any(|(at, _)| !sentence[at + 1..].starts_with('/') && tag_len(&sentence[at + 1..]).is_some())
}

/// `text` with every `<tag>` / `</tag>` removed.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('<') {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 1..];
        match tag_len(tail) {
            Some(len) => rest = &tail[len + 1..],
            None => {
                out.push('<');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Shortens `text` to at least `passage_length` characters of whole
/// sentences. `0` or text already within the length returns it unchanged.
pub fn smart_truncate(text: &str, passage_length: usize) -> String {
    if passage_length == 0 || text.chars().count() <= passage_length {
        return text.to_string();
    }
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        let cut: String = text.chars().take(passage_length).collect();
        return format!("{cut}...");
    }
    let marked: Vec<usize> = sentences.iter().enumerate().filter(|(_, s)| contains_mark(s)).map(|(i, _)| i).collect();
    let selection = if marked.is_empty() {
        bookends(&sentences, passage_length)
    } else {
        around_marks(&sentences, &marked, passage_length)
    };
    if selection.len() == sentences.len() {
        return text.to_string();
    }
    render(&sentences, &selection)
}

fn around_marks(sentences: &[&str], marked: &[usize], min_len: usize) -> BTreeSet<usize> {
    let last = sentences.len() - 1;
    let mut selection = BTreeSet::new();
    for radius in 1..=MAX_CONTEXT_RADIUS {
        selection = marked.iter().flat_map(|&m| m.saturating_sub(radius)..=(m + radius).min(last)).collect();
        if selection.len() == sentences.len() || rendered_len(sentences, &selection) >= min_len {
            return selection;
        }
    }
    for i in 0..=last {
        if rendered_len(sentences, &selection) >= min_len {
            break;
        }
        selection.insert(i);
    }
    selection
}

fn bookends(sentences: &[&str], min_len: usize) -> BTreeSet<usize> {
    let last = sentences.len() - 1;
    let mut selection = BTreeSet::from([0, last]);
    let (mut left, mut right) = (1, last - 1);
    let mut from_left = true;
    while left <= right && rendered_len(sentences, &selection) < min_len {
        if from_left {
            selection.insert(left);
            left += 1;
        } else {
            selection.insert(right);
            right -= 1;
        }
        from_left = !from_left;
    }
    selection
}

fn rendered_len(sentences: &[&str], selection: &BTreeSet<usize>) -> usize {
    render(sentences, selection).chars().count()
}

/// Selected sentences in order, `" [...] "` between non-adjacent ones and
/// `"... "` / `" ..."` when the first or last sentence is left out.
fn render(sentences: &[&str], selection: &BTreeSet<usize>) -> String {
    let mut out = String::new();
    let mut previous: Option<usize> = None;
    for &i in selection {
        match previous {
            None if i > 0 => out.push_str("... "),
            None => {}
            Some(p) if i == p + 1 => out.push(' '),
            Some(_) => out.push_str(GAP),
        }
        out.push_str(sentences[i]);
        previous = Some(i);
    }
    if previous.is_some_and(|p| p + 1 < sentences.len()) {
        out.push_str(" ...");
    }
    out
}
