//! Sentence segmentation for streamed text
//!
//! Splits an accumulating buffer into complete sentences plus whatever tail
//! has not been terminated yet. Streaming-safe: feeding the remainder back
//! in with more text never loses or duplicates characters.

use std::sync::LazyLock;

use regex::Regex;

/// A sentence is a run of non-terminators followed by a run of terminators
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]*[.!?]+").expect("valid regex"));

/// Result of splitting a buffer into sentences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmented<'a> {
    /// Complete sentences, in order, exactly as they appeared
    pub sentences: Vec<&'a str>,
    /// Unterminated tail to keep buffering
    pub remainder: &'a str,
}

impl Segmented<'_> {
    /// Byte length of the consumed prefix
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.sentences.iter().map(|s| s.len()).sum()
    }
}

/// Split `text` into the maximal prefix of complete sentences and a remainder
///
/// Matches are contiguous: each match ends on a terminator run and the next
/// one starts on the following character, so the prefix is exactly the
/// concatenation of the returned sentences.
#[must_use]
pub fn split_sentences(text: &str) -> Segmented<'_> {
    let mut sentences = Vec::new();
    let mut end = 0;

    for m in SENTENCE.find_iter(text) {
        if m.start() != end {
            break;
        }
        sentences.push(m.as_str());
        end = m.end();
    }

    Segmented {
        sentences,
        remainder: &text[end..],
    }
}
