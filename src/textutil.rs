use once_cell::sync::Lazy;
use regex::Regex;

pub static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Splits `text` into sentences. Each returned slice keeps its terminator; a
/// terminator only ends a sentence when followed by whitespace or the end of text.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        if !is_sentence_terminator(ch) {
            continue;
        }
        let end = i + ch.len_utf8();
        if !is_terminator_boundary(text, end) {
            continue;
        }
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = end;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Keeps at most `max` sentences, joined by a single space. `max == 0` keeps everything.
#[must_use]
pub fn take_sentences(text: &str, max: usize) -> String {
    let sentences = split_sentences(text);
    if max == 0 || sentences.len() <= max {
        return sentences.join(" ");
    }
    sentences[..max].join(" ")
}

#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Removes a surrounding code fence and quotes that chat models like to add.
#[must_use]
pub fn strip_model_wrapping(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        if let Some(end) = s.rfind("```") {
            s = &s[..end];
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}

fn is_sentence_terminator(ch: char) -> bool {
    matches!(
        ch,
        '.' | '!' | '?' | '\u{3002}' // 。
            | '\u{FF01}' // ！
            | '\u{FF1F}' // ？
    )
}

fn is_terminator_boundary(text: &str, boundary_end: usize) -> bool {
    match text[boundary_end..].chars().next() {
        None => true,
        Some(next) => next.is_whitespace(),
    }
}
