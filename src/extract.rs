//! Heuristic question extraction from interview transcripts.
//!
//! Extraction is rule-based only; no model calls. A sentence counts as
//! a question when it ends with a question mark or opens with an
//! interrogative word, and its length falls in a plausible window for a
//! spoken question. This deliberately over-extracts a little; the
//! deduper downstream cleans up the rest.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Words that typically open a question.
const INTERROGATIVE_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "can", "could", "would", "should",
    "do", "does", "did", "is", "are", "was", "were", "will", "have", "has", "had",
];

/// Minimum words for a plausible question.
const MIN_QUESTION_WORDS: usize = 5;

/// Maximum words for a plausible question.
const MAX_QUESTION_WORDS: usize = 200;

/// One timestamped segment of a transcript, as produced by the
/// transcription boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Seconds from the start of the source.
    pub start: f64,
    pub speaker: Option<String>,
}

/// A question pulled out of a transcript with its position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedQuestion {
    pub text: String,
    /// Seconds into the source where the containing segment starts.
    pub timestamp: f64,
    pub speaker: String,
}

/// Extracts interviewer questions from transcript text.
pub struct QuestionExtractor {
    sentence_re: Regex,
}

impl Default for QuestionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionExtractor {
    #[must_use]
    pub fn new() -> Self {
        // Greedy runs up to and including a sentence terminator; the
        // regex crate has no lookbehind, so sentences keep their
        // punctuation by construction instead of a split.
        Self {
            sentence_re: Regex::new(r"[^.!?]+[.!?]?").expect("sentence pattern is valid"),
        }
    }

    /// Extracts potential questions from free text.
    ///
    /// A sentence qualifies when it ends with `?` or starts with an
    /// interrogative word, and is 5–200 words long. Qualifying sentences
    /// missing their `?` get one appended.
    #[must_use]
    pub fn extract_questions(&self, text: &str) -> Vec<String> {
        let mut questions = Vec::new();

        for sentence in self.sentence_re.find_iter(text) {
            let sentence = sentence.as_str().trim();
            if sentence.is_empty() {
                continue;
            }

            let has_question_mark = sentence.ends_with('?');

            let lowered = sentence.to_lowercase();
            let words: Vec<&str> = lowered.split_whitespace().collect();
            let starts_with_interrogative = words
                .first()
                .is_some_and(|w| INTERROGATIVE_WORDS.contains(w));

            let reasonable_length =
                (MIN_QUESTION_WORDS..=MAX_QUESTION_WORDS).contains(&words.len());

            if reasonable_length && (has_question_mark || starts_with_interrogative) {
                // Transcripts often terminate questions with a period;
                // swap the terminator rather than stacking punctuation
                let mut question = sentence.trim_end_matches(['.', '!']).trim_end().to_string();
                if !question.ends_with('?') {
                    question.push('?');
                }
                questions.push(question);
            }
        }

        debug!("Heuristic extraction: {} potential questions", questions.len());
        questions
    }

    /// Extracts questions from timestamped segments, preserving each
    /// segment's start time for source links.
    ///
    /// With `speaker_aware` set, only segments attributed to the
    /// interviewer (or to nobody) are scanned.
    #[must_use]
    pub fn extract_from_segments(
        &self,
        segments: &[TranscriptSegment],
        speaker_aware: bool,
    ) -> Vec<ExtractedQuestion> {
        let mut questions = Vec::new();

        for segment in segments {
            let speaker = segment.speaker.as_deref().unwrap_or("unknown");
            if speaker_aware && speaker != "interviewer" && speaker != "unknown" {
                continue;
            }

            for text in self.extract_questions(&segment.text) {
                questions.push(ExtractedQuestion {
                    text,
                    timestamp: segment.start,
                    speaker: speaker.to_string(),
                });
            }
        }

        debug!("Extracted {} questions from segments", questions.len());
        questions
    }
}
