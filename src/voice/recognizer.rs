//! Speech recognition contract

use crate::Result;

/// Callbacks from a speech recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The microphone is live
    Started,
    /// Candidate transcripts, best last
    Results(Vec<String>),
    /// The user stopped speaking
    Ended,
    /// Recognition failed
    Failed(String),
}

impl RecognitionEvent {
    /// Transcript carried by a results event (its last candidate)
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        match self {
            Self::Results(candidates) => candidates.last().map(String::as_str),
            _ => None,
        }
    }
}

/// Speech-to-text engine driving the microphone
pub trait SpeechRecognizer: Send + Sync {
    /// Start capturing in the given locale
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or engine cannot start
    fn start(&self, locale: &str) -> Result<()>;

    /// Stop capturing
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to stop cleanly
    fn stop(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_uses_last_candidate() {
        let event = RecognitionEvent::Results(vec!["hello".into(), "hello there".into()]);
        assert_eq!(event.transcript(), Some("hello there"));
        assert_eq!(RecognitionEvent::Results(vec![]).transcript(), None);
        assert_eq!(RecognitionEvent::Ended.transcript(), None);
    }
}
