//! Pre-translation text normalization
//!
//! Deterministic rewrites that reduce translation variance. Every rule is
//! individually toggleable and the full pass is a fixed point:
//! `normalize(normalize(x)) == normalize(x)`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Toggles for the normalization rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizationPolicy {
    pub enabled: bool,
    pub normalize_time_phrases: bool,
    pub normalize_hyphens: bool,
    pub expand_abbreviations: bool,
    pub normalize_symbols: bool,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            normalize_time_phrases: true,
            normalize_hyphens: true,
            expand_abbreviations: true,
            normalize_symbols: true,
        }
    }
}

static TIME_PHRASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+:\d+)\s+([A-Z]+)").expect("valid time phrase pattern"));

static UPPER_HYPHEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)-([A-Z]+)").expect("valid hyphen pattern"));

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bNFL\b", "N F L"),
        (r"\bNBA\b", "N B A"),
        (r"\bMLB\b", "M L B"),
        (r"\bNHL\b", "N H L"),
        (r"\bvs\.", "versus"),
        (r"\bVS\b", "versus"),
    ]
    .iter()
    .map(|(p, r)| (Regex::new(p).expect("valid abbreviation pattern"), *r))
    .collect()
});

const SYMBOLS: [(&str, &str); 4] = [
    ("&", " and "),
    ("%", " percent "),
    ("$", " dollars "),
    ("@", " at "),
];

/// Applies the normalization rules in a fixed order.
#[derive(Debug, Default, Clone, Copy)]
pub struct TranslationNormalizer;

impl TranslationNormalizer {
    pub fn normalize(&self, text: &str, policy: &NormalizationPolicy) -> String {
        if !policy.enabled || text.is_empty() {
            return text.to_string();
        }

        let mut result = text.to_string();

        if policy.normalize_time_phrases {
            result = normalize_time_phrases(&result);
        }
        if policy.normalize_hyphens {
            result = normalize_hyphens(&result);
        }
        if policy.expand_abbreviations {
            result = expand_abbreviations(&result);
        }
        if policy.normalize_symbols {
            result = normalize_symbols(&result);
        }

        result
    }
}

/// Lowercase words following a time pattern: "1:54 REMAINING" -> "1:54 remaining".
fn normalize_time_phrases(text: &str) -> String {
    TIME_PHRASE
        .replace_all(text, |caps: &regex::Captures| {
            format!("{} {}", &caps[1], caps[2].to_lowercase())
        })
        .into_owned()
}

/// Break hyphens between uppercase words: "TEN-YARD" -> "TEN YARD".
///
/// Digit-hyphen-digit score patterns are left intact.
fn normalize_hyphens(text: &str) -> String {
    UPPER_HYPHEN.replace_all(text, "$1 $2").into_owned()
}

fn expand_abbreviations(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in ABBREVIATIONS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

fn normalize_symbols(text: &str) -> String {
    let mut result = text.to_string();
    for (symbol, replacement) in SYMBOLS {
        result = result.replace(symbol, replacement);
    }
    result
}
