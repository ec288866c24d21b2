use once_cell::sync::Lazy;
use regex::Regex;

use crate::textutil::{take_sentences, WS_RE};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word regex"));
static MULTI_BANG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!{2,}").expect("bang regex"));
static MULTI_DOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("dot regex"));
static LEADING_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[.,\s]+").expect("leading punct regex"));

// Translationese the model tends to prepend ("in the image", "it is", a bare "yes").
static ARTIFACT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"이미지에서\s*",
        r"사진에서\s*",
        r"그것은\s*",
        r"이것은\s*",
        r"^예[,.\s]*",
        r"^네[,.\s]*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("artifact regex"))
    .collect()
});

/// Literal rewrites applied in order: formal endings first, then landscape wording.
pub const REPLACEMENTS: &[(&str, &str)] = &[
    ("입니다.", "이에요."),
    ("있습니다.", "있어요."),
    ("없습니다.", "없어요."),
    ("됩니다.", "돼요."),
    ("합니다.", "해요."),
    ("봅니다.", "봐요."),
    ("습니다.", "어요."),
    ("ㅂ니다.", "요."),
    ("이다.", "이에요."),
    ("있다.", "있어요."),
    ("없다.", "없어요."),
    ("한다.", "해요."),
    ("보인다.", "보여요."),
    ("된다.", "돼요."),
    ("반사", "비치고"),
    ("반영", "비치고"),
    ("위치하고", "있고"),
    ("존재하고", "있고"),
];

/// Turns translated Korean into short colloquial sentences, keeping at most
/// `max_sentences` (0 keeps all).
#[must_use]
pub fn clean_korean(text: &str, max_sentences: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = collapse_repeated_words(text);
    let text = MULTI_BANG_RE.replace_all(&text, "!");
    let text = MULTI_DOT_RE.replace_all(&text, ".");
    let mut text = WS_RE.replace_all(&text, " ").into_owned();

    for re in ARTIFACT_RES.iter() {
        text = re.replace_all(&text, "").into_owned();
    }
    for (from, to) in REPLACEMENTS {
        text = text.replace(from, to);
    }

    let text = LEADING_PUNCT_RE.replace(text.trim(), "");
    let text = WS_RE.replace_all(&text, " ");
    let mut text = take_sentences(text.trim(), max_sentences);

    if let Some(last) = text.chars().last() {
        if !matches!(last, '.' | '!' | '?' | '요') {
            if last == '다' {
                text.pop();
                text.push_str("요.");
            } else {
                text.push_str("요.");
            }
        }
    }
    text.trim().to_string()
}

/// Drops the second word of each adjacent identical pair, scanning left to right
/// without overlap: `"산 산 산"` becomes `"산 산"`.
fn collapse_repeated_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut prev: Option<&str> = None;
    for m in WORD_RE.find_iter(text) {
        let gap = &text[cursor..m.start()];
        let only_ws = !gap.is_empty() && gap.chars().all(char::is_whitespace);
        if only_ws && prev == Some(m.as_str()) {
            cursor = m.end();
            prev = None;
            continue;
        }
        out.push_str(gap);
        out.push_str(m.as_str());
        prev = Some(m.as_str());
        cursor = m.end();
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formal_endings_become_polite_casual() {
        assert_eq!(
            clean_korean("푸른 하늘 아래 산이 있습니다.", 2),
            "푸른 하늘 아래 산이 있어요."
        );
        assert_eq!(clean_korean("아름다운 호수입니다.", 2), "아름다운 호수이에요.");
        assert_eq!(clean_korean("멀리 산이 보인다.", 2), "멀리 산이 보여요.");
    }

    #[test]
    fn removes_translation_artifacts() {
        assert_eq!(
            clean_korean("이미지에서 그것은 바다가 보입니다", 2),
            "바다가 보입니요."
        );
        assert_eq!(clean_korean("네, 하늘이 맑아요.", 2), "하늘이 맑아요.");
    }

    #[test]
    fn leading_answer_word_is_dropped() {
        assert_eq!(clean_korean("예 하늘이 맑아요.", 2), "하늘이 맑아요.");
        assert_eq!(clean_korean("네. 바다가 보여요.", 2), "바다가 보여요.");
        assert_eq!(clean_korean("예! 산이 높아요.", 2), "! 산이 높아요.");
        assert_eq!(clean_korean("예쁜 꽃이 피어 있어요.", 2), "쁜 꽃이 피어 있어요.");
    }

    #[test]
    fn repeated_words_and_punctuation_collapse() {
        assert_eq!(
            clean_korean("나무 나무 숲이 있어요!!  정말..", 2),
            "나무 숲이 있어요! 정말."
        );
    }

    #[test]
    fn landscape_wording_is_rewritten() {
        assert_eq!(
            clean_korean("호수에 산이 반사 되어 있어요.", 2),
            "호수에 산이 비치고 되어 있어요."
        );
        assert_eq!(
            clean_korean("건물이 언덕에 위치하고 있어요.", 2),
            "건물이 언덕에 있고 있어요."
        );
    }

    #[test]
    fn clamps_to_two_sentences() {
        let out = clean_korean("하늘이 파래요. 구름이 있어요. 산이 높아요.", 2);
        assert_eq!(out, "하늘이 파래요. 구름이 있어요.");
    }

    #[test]
    fn repeated_words_collapse_pairwise() {
        assert_eq!(
            clean_korean("나무 나무 나무 숲이 있어요.", 2),
            "나무 나무 숲이 있어요."
        );
        assert_eq!(clean_korean("산 산 산 산 보여요.", 2), "산 산 보여요.");
    }

    #[test]
    fn ending_is_normalized() {
        assert_eq!(clean_korean("노을이 아름답다", 2), "노을이 아름답요.");
        assert_eq!(clean_korean("바다 풍경", 2), "바다 풍경요.");
        assert_eq!(clean_korean("맑은 날이에요", 2), "맑은 날이에요");
    }

    #[test]
    fn strips_leading_punctuation() {
        assert_eq!(clean_korean(". , 들판이 넓어요.", 2), "들판이 넓어요.");
    }

    #[test]
    fn empty_is_empty() {
        assert_eq!(clean_korean("", 2), "");
        assert_eq!(clean_korean("이미지에서 ", 2), "");
    }
}
