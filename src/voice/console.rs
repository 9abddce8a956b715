//! Terminal-backed speech engines
//!
//! Typed lines stand in for recognized speech and synthesized text is
//! printed. Engine callbacks are delivered on tokio channels so the CLI can
//! feed them back into a [`VoiceSession`](super::VoiceSession).

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::playback::{SpeechSynthesizer, SynthesisEvent, Utterance};
use super::recognizer::{RecognitionEvent, SpeechRecognizer};
use crate::{Error, Result};

/// Recognizer that treats each typed line as one utterance
#[derive(Debug)]
pub struct ConsoleRecognizer {
    active: AtomicBool,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl ConsoleRecognizer {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                active: AtomicBool::new(false),
                events,
            },
            rx,
        )
    }

    /// Whether input is currently being captured
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Deliver a typed line as a finished utterance
    ///
    /// Returns `false` if the recognizer was not listening.
    pub fn hear(&self, line: &str) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _ = self
            .events
            .send(RecognitionEvent::Results(vec![line.to_string()]));
        let _ = self.events.send(RecognitionEvent::Ended);
        true
    }
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn start(&self, locale: &str) -> Result<()> {
        if self.events.is_closed() {
            return Err(Error::Recognition("event receiver dropped".to_string()));
        }
        tracing::debug!(locale, "console recognizer listening");
        self.active.store(true, Ordering::SeqCst);
        let _ = self.events.send(RecognitionEvent::Started);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Synthesizer that prints each utterance and completes it immediately
#[derive(Debug)]
pub struct ConsoleSynthesizer {
    events: mpsc::UnboundedSender<SynthesisEvent>,
}

impl ConsoleSynthesizer {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SynthesisEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn speak(&self, utterance: &Utterance) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "  » {}", utterance.text)?;
        stdout.flush()?;

        self.events
            .send(SynthesisEvent::Done(utterance.id))
            .map_err(|e| Error::Synthesis(e.to_string()))
    }

    fn pause(&self) {
        tracing::trace!("console synthesizer paused");
    }

    fn resume(&self) {
        tracing::trace!("console synthesizer resumed");
    }

    fn stop(&self) {
        tracing::trace!("console synthesizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::SpeechOptions;

    #[test]
    fn recognizer_only_hears_while_listening() {
        let (recognizer, mut rx) = ConsoleRecognizer::new();

        assert!(!recognizer.hear("ignored"));
        assert!(rx.try_recv().is_err());

        recognizer.start("en-US").unwrap();
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::Started);

        assert!(recognizer.hear("what time is it"));
        assert_eq!(
            rx.try_recv().unwrap(),
            RecognitionEvent::Results(vec!["what time is it".into()])
        );
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::Ended);
        assert!(!recognizer.is_active());
    }

    #[test]
    fn stop_discards_input() {
        let (recognizer, mut rx) = ConsoleRecognizer::new();
        recognizer.start("en-US").unwrap();
        let _ = rx.try_recv();

        recognizer.stop().unwrap();
        assert!(!recognizer.hear("too late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn synthesizer_completes_immediately() {
        let (synth, mut rx) = ConsoleSynthesizer::new();
        let utterance = Utterance {
            id: 7,
            text: "Hello.".into(),
            options: SpeechOptions::default(),
        };
        synth.speak(&utterance).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SynthesisEvent::Done(7));
    }
}
