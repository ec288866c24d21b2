use once_cell::sync::Lazy;
use regex::Regex;

use crate::textutil::{take_sentences, WS_RE};

static MARKDOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|`+|#+\s").expect("md regex"));
static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+").expect("bullet regex"));

// Leading phrases that carry no scene content. Applied repeatedly since they stack.
static FILLER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?:sure|certainly|of course|okay|ok)[,!.]?\s+",
        r"(?i)^(?:here is|here's) (?:a |the )?(?:brief )?description(?: of (?:the|this) (?:image|scene|landscape))?[:.]?\s*",
        r"(?i)^(?:in|from) (?:the|this) (?:image|picture|photo|photograph|scene)[,:]?\s*",
        r"(?i)^(?:the|this) (?:image|picture|photo|photograph|scene) (?:shows|depicts|features|captures|displays|presents|is of)\s+",
        r"(?i)^(?:i can see|i see|we can see|you can see)\s+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("filler regex"))
    .collect()
});

/// Cleans vision-model output: drops markdown and filler openers, then keeps the
/// first `max_sentences` sentences (0 keeps all).
#[must_use]
pub fn clean_english(text: &str, max_sentences: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let text = MARKDOWN_RE.replace_all(text, "");
    let text = BULLET_RE.replace_all(&text, "");
    let mut text = WS_RE.replace_all(&text, " ").trim().to_string();

    loop {
        let before = text.len();
        for re in FILLER_RES.iter() {
            text = re.replace(&text, "").into_owned();
        }
        if text.len() == before {
            break;
        }
    }

    let mut text = take_sentences(&text, max_sentences);
    if text.is_empty() {
        return text;
    }
    text = capitalize_first(&text);
    if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    text
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
