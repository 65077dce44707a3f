//! Speaker label detection
//!
//! Labels like "Alice: Hello" or ">> Bob: Hi" are detected and removed
//! before translation so the label is neither translated nor spoken.

use once_cell::sync::Lazy;
use regex::Regex;

/// Speaker name returned when no label is detected.
pub const DEFAULT_SPEAKER: &str = "default";

/// Common words that match the name patterns but are not speakers.
const FALSE_POSITIVE_WORDS: [&str; 18] = [
    "time", "score", "note", "warning", "error", "info", "debug", "update", "status", "result",
    "total", "final", "date", "type", "name", "title", "url", "link",
];

static DEFAULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^([A-Z][a-z]+): ").expect("valid speaker pattern"),
        Regex::new(r"^>> ([A-Z][a-z]+): ").expect("valid speaker pattern"),
    ]
});

/// Detects and strips speaker labels from text.
pub struct SpeakerLabelDetector {
    patterns: Vec<Regex>,
}

impl Default for SpeakerLabelDetector {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.clone(),
        }
    }
}

impl SpeakerLabelDetector {
    /// Build a detector from custom patterns. Each pattern must have one
    /// capture group for the speaker name; invalid patterns are skipped.
    pub fn with_patterns(patterns: &[String]) -> Self {
        let compiled: Vec<Regex> = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "skipping invalid speaker pattern");
                    None
                }
            })
            .collect();
        if compiled.is_empty() {
            Self::default()
        } else {
            Self { patterns: compiled }
        }
    }

    /// Detect and remove a speaker label.
    ///
    /// Returns `(speaker, cleaned_text)`; without a label the speaker is
    /// [`DEFAULT_SPEAKER`] and the text is unchanged.
    pub fn detect_and_remove(&self, text: &str) -> (String, String) {
        if text.is_empty() {
            return (DEFAULT_SPEAKER.to_string(), text.to_string());
        }

        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(text) {
                let speaker = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                if FALSE_POSITIVE_WORDS.contains(&speaker.to_lowercase().as_str()) {
                    continue;
                }
                let cleaned = pattern.replace(text, "").to_string();
                return (speaker.to_string(), cleaned);
            }
        }

        (DEFAULT_SPEAKER.to_string(), text.to_string())
    }
}
