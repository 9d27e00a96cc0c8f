//! Literal strings worth searching for on screen, pulled out of a free-text description.
use std::sync::OnceLock;

use regex::Regex;

const STOP_WORDS: &[&str] = &["button", "field", "the", "a", "an"];

fn quoted() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]([^'"]+)['"]"#).ok()).as_ref()
}

fn parenthesized() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]+)\)").ok()).as_ref()
}

fn captures(re: Option<&Regex>, text: &str) -> Vec<String> {
    re.map(|re| {
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    })
    .unwrap_or_default()
}

/// Candidates in preference order: quoted substrings, parenthesised substrings, and only
/// when neither exists, capitalised non-leading words plus the final word.
///
/// Results are trimmed, longer than one character and de-duplicated.
pub fn extract_search_texts(description: &str) -> Vec<String> {
    let mut texts = captures(quoted(), description);
    texts.extend(captures(parenthesized(), description));

    if texts.is_empty() {
        let words: Vec<&str> = description.split_whitespace().collect();
        for word in words.iter().skip(1) {
            if word.chars().next().is_some_and(char::is_uppercase) && word.chars().count() > 1 {
                texts.push(word.to_string());
            }
        }
        if let Some(last) = words.last() {
            let last = last.trim_matches(|c| ".,!?;:".contains(c));
            if last.chars().count() > 2 && !STOP_WORDS.contains(&last.to_lowercase().as_str()) {
                texts.push(last.to_string());
            }
        }
    }

    let mut out: Vec<String> = Vec::new();
    for text in texts {
        let text = text.trim();
        if text.chars().count() > 1 && !out.iter().any(|t| t == text) {
            out.push(text.to_string());
        }
    }
    tracing::debug!(?out, "search texts extracted");
    out
}
