//! TTS-oriented cleanup for translated text
//!
//! Post-translation rewrites for better synthesis: smart punctuation to
//! ASCII, score patterns to "to" phrasing, whitespace collapse.

use once_cell::sync::Lazy;
use regex::Regex;

const SMART_PUNCTUATION: [(char, &str); 6] = [
    ('\u{201c}', "\""), // left double quote
    ('\u{201d}', "\""), // right double quote
    ('\u{2018}', "'"),  // left single quote
    ('\u{2019}', "'"),  // right single quote
    ('\u{2014}', "-"),  // em dash
    ('\u{2013}', "-"),  // en dash
];

static SCORE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)-(\d+)").expect("valid score pattern"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Apply cleanup rules in order: punctuation, scores, whitespace.
pub fn tts_cleanup(text: &str) -> String {
    if text.is_empty() {
        return text.to_string();
    }

    let mut result = text.to_string();

    for (smart, simple) in SMART_PUNCTUATION {
        result = result.replace(smart, simple);
    }

    result = SCORE_PATTERN.replace_all(&result, "$1 to $2").into_owned();

    WHITESPACE.replace_all(result.trim(), " ").into_owned()
}
