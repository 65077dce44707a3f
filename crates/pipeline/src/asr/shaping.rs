//! Utterance shaping for ASR output
//!
//! Merges segments that are too short for natural TTS and splits segments
//! that exceed the maximum duration, preferring sentence boundaries.

use serde::{Deserialize, Serialize};

use livedub_core::asset::{TranscriptSegment, WordTiming};

/// Shaping thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UtteranceShapingConfig {
    pub merge_threshold_s: f32,
    pub max_segment_duration_s: f32,
}

impl Default for UtteranceShapingConfig {
    fn default() -> Self {
        Self {
            merge_threshold_s: 1.0,
            max_segment_duration_s: 6.0,
        }
    }
}

/// Apply the complete shaping pipeline: merge short, then split long.
pub fn shape_utterances(
    segments: Vec<TranscriptSegment>,
    config: &UtteranceShapingConfig,
) -> Vec<TranscriptSegment> {
    if segments.is_empty() {
        return segments;
    }
    let merged = merge_short_segments(segments, config.merge_threshold_s);
    split_long_segments(merged, config.max_segment_duration_s)
}

/// Merge segments shorter than the threshold with their neighbor.
pub fn merge_short_segments(
    segments: Vec<TranscriptSegment>,
    merge_threshold_s: f32,
) -> Vec<TranscriptSegment> {
    if segments.len() <= 1 {
        return segments;
    }

    let threshold_ms = (merge_threshold_s * 1000.0) as u64;
    let mut result: Vec<TranscriptSegment> = Vec::with_capacity(segments.len());
    let mut current: Option<TranscriptSegment> = None;

    for segment in segments {
        match current.take() {
            None => current = Some(segment),
            Some(head) => {
                if head.duration_ms() < threshold_ms {
                    current = Some(merge_pair(head, segment));
                } else {
                    result.push(head);
                    current = Some(segment);
                }
            }
        }
    }

    if let Some(head) = current {
        result.push(head);
    }

    result
}

/// Split segments exceeding the maximum duration.
pub fn split_long_segments(
    segments: Vec<TranscriptSegment>,
    max_duration_s: f32,
) -> Vec<TranscriptSegment> {
    let max_duration_ms = (max_duration_s * 1000.0) as u64;
    let mut result = Vec::with_capacity(segments.len());

    for segment in segments {
        if segment.duration_ms() <= max_duration_ms {
            result.push(segment);
        } else if segment.words.is_some() {
            result.extend(split_by_words(segment, max_duration_ms));
        } else {
            result.extend(split_by_text(segment, max_duration_ms));
        }
    }

    result
}

fn merge_pair(first: TranscriptSegment, second: TranscriptSegment) -> TranscriptSegment {
    let words = match (first.words, second.words) {
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };

    TranscriptSegment {
        start_time_ms: first.start_time_ms,
        end_time_ms: second.end_time_ms,
        text: format!("{} {}", first.text, second.text),
        confidence: (first.confidence + second.confidence) / 2.0,
        words,
    }
}

/// Split on word boundaries, biased toward sentence endings once a segment
/// reaches half of the maximum duration.
fn split_by_words(segment: TranscriptSegment, max_duration_ms: u64) -> Vec<TranscriptSegment> {
    let words = match &segment.words {
        Some(words) if !words.is_empty() => words.clone(),
        _ => return vec![segment],
    };

    let mut result = Vec::new();
    let mut current: Vec<WordTiming> = Vec::new();
    let mut current_start: Option<u64> = None;

    for word in words {
        let start = *current_start.get_or_insert(word.start_time_ms);
        let duration = word.end_time_ms.saturating_sub(start);
        let is_sentence_end = word
            .word
            .trim_end()
            .ends_with(['.', '?', '!']);

        if duration >= max_duration_ms || (is_sentence_end && duration >= max_duration_ms / 2) {
            current.push(word);
            result.push(segment_from_words(std::mem::take(&mut current), segment.confidence));
            current_start = None;
        } else {
            current.push(word);
        }
    }

    if !current.is_empty() {
        result.push(segment_from_words(current, segment.confidence));
    }

    if result.is_empty() {
        vec![segment]
    } else {
        result
    }
}

/// Split on sentence terminators, distributing time proportionally to
/// character length.
fn split_by_text(segment: TranscriptSegment, _max_duration_ms: u64) -> Vec<TranscriptSegment> {
    let sentences = split_into_sentences(&segment.text);
    if sentences.len() <= 1 {
        return vec![segment];
    }

    let total_chars: usize = sentences.iter().map(|s| s.len()).sum();
    let total_duration = segment.duration_ms();
    let mut result = Vec::with_capacity(sentences.len());
    let mut current_time = segment.start_time_ms;

    for sentence in sentences {
        let duration = ((sentence.len() as f64 / total_chars as f64) * total_duration as f64) as u64;
        let end_time = current_time + duration;
        result.push(TranscriptSegment {
            start_time_ms: current_time,
            end_time_ms: end_time,
            text: sentence,
            confidence: segment.confidence,
            words: None,
        });
        current_time = end_time;
    }

    result
}

fn segment_from_words(words: Vec<WordTiming>, base_confidence: f32) -> TranscriptSegment {
    let text = words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let word_confidences: Vec<f32> = words.iter().filter_map(|w| w.confidence).collect();
    let confidence = if word_confidences.is_empty() {
        base_confidence
    } else {
        word_confidences.iter().sum::<f32>() / word_confidences.len() as f32
    };

    TranscriptSegment {
        start_time_ms: words.first().map(|w| w.start_time_ms).unwrap_or(0),
        end_time_ms: words.last().map(|w| w.end_time_ms).unwrap_or(0),
        text,
        confidence,
        words: Some(words),
    }
}

/// Split text at sentence-ending punctuation followed by whitespace.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                while chars.peek().is_some_and(|next| next.is_whitespace()) {
                    chars.next();
                }
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start_ms: u64, end_ms: u64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_time_ms: start_ms,
            end_time_ms: end_ms,
            text: text.to_string(),
            confidence: 0.8,
            words: None,
        }
    }

    #[test]
    fn test_split_into_sentences() {
        let sentences = split_into_sentences("First down. Second play! Third? tail");
        assert_eq!(
            sentences,
            vec!["First down.", "Second play!", "Third?", "tail"]
        );
    }

    #[test]
    fn test_split_into_sentences_keeps_decimals() {
        // A period not followed by whitespace is not a boundary.
        let sentences = split_into_sentences("Score is 1.5 points. Done.");
        assert_eq!(sentences, vec!["Score is 1.5 points.", "Done."]);
    }

    #[test]
    fn test_merge_short_segments() {
        let merged = merge_short_segments(
            vec![
                segment(0, 400, "Touch"),
                segment(400, 900, "down"),
                segment(900, 3000, "for the home team."),
            ],
            1.0,
        );
        // 0..400 merges into 0..900, still short, merges again
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Touch down for the home team.");
        assert_eq!(merged[0].start_time_ms, 0);
        assert_eq!(merged[0].end_time_ms, 3000);
    }

    #[test]
    fn test_merge_keeps_long_segments() {
        let segments = vec![segment(0, 2000, "a"), segment(2000, 4000, "b")];
        let merged = merge_short_segments(segments.clone(), 1.0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_split_long_by_text_proportional() {
        let long = segment(0, 12_000, "First sentence here. Second sentence there.");
        let split = split_long_segments(vec![long], 6.0);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].start_time_ms, 0);
        assert!(split[1].end_time_ms <= 12_000);
        // Equal-length sentences get roughly half the time each
        assert!((split[0].duration_ms() as i64 - 6000).abs() < 1000);
    }

    #[test]
    fn test_split_by_words_prefers_sentence_end() {
        let words: Vec<WordTiming> = [
            ("Deep", 0u64, 1000u64),
            ("pass.", 1000, 4000),
            ("Caught", 4000, 5000),
            ("inside", 5000, 7000),
            ("the", 7000, 7500),
            ("ten.", 7500, 9000),
        ]
        .iter()
        .map(|(w, s, e)| WordTiming {
            word: w.to_string(),
            start_time_ms: *s,
            end_time_ms: *e,
            confidence: Some(0.9),
        })
        .collect();

        let mut seg = segment(0, 9000, "Deep pass. Caught inside the ten.");
        seg.words = Some(words);

        let split = split_long_segments(vec![seg], 6.0);
        assert_eq!(split.len(), 2);
        // "pass." ends a sentence past the 50% bias point (3000ms of 6000ms)
        assert_eq!(split[0].text, "Deep pass.");
        assert_eq!(split[1].text, "Caught inside the ten.");
    }

    #[test]
    fn test_shape_empty() {
        assert!(shape_utterances(vec![], &UtteranceShapingConfig::default()).is_empty());
    }
}
