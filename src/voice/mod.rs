//! Voice mode
//!
//! Hands-free conversation loop: listen, send the transcript, speak the
//! streamed answer, listen again. Speech engines are consumed through the
//! [`SpeechRecognizer`] and [`SpeechSynthesizer`] traits.

pub mod console;
mod lock;
mod machine;
mod playback;
mod recognizer;
mod session;

pub use console::{ConsoleRecognizer, ConsoleSynthesizer};
pub use lock::AudioSession;
pub use machine::{VoiceAction, VoiceState, transition};
pub use playback::{
    PlaybackUpdate, SpeechOptions, SpeechPlayer, SpeechSynthesizer, SynthesisEvent, Utterance,
};
pub use recognizer::{RecognitionEvent, SpeechRecognizer};
pub use session::{ChatHost, HostSnapshot, PausedModality, VoiceInput, VoiceSession};
