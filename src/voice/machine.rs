//! Voice-mode conversation state machine
//!
//! Pure transition function; side effects of entering a state are run by
//! [`VoiceSession`](super::VoiceSession).

use std::fmt;

use serde::Serialize;

/// Where the voice conversation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    /// Voice mode not started
    #[default]
    Idle,

    /// Recognizer is being started
    ListeningStart,

    /// Microphone is live
    Listening,

    /// Recognition ended; transcript is being inspected
    ListeningDone,

    /// Transcript handed to the host, waiting for the response to open
    Sending,

    /// Response stream is open
    Receiving,

    /// Playback is being started
    SpeakingStart,

    /// Response chunks are being spoken
    Speaking,

    /// The whole response was spoken
    SpeakingDone,

    /// Recognition or synthesis failed; close and reopen to recover
    Error,
}

impl VoiceState {
    /// States in which the microphone may be live
    #[must_use]
    pub const fn is_listening(self) -> bool {
        matches!(self, Self::ListeningStart | Self::Listening)
    }

    /// States in which speech may be playing
    #[must_use]
    pub const fn is_speaking(self) -> bool {
        matches!(self, Self::SpeakingStart | Self::Speaking)
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::ListeningStart => "listening-start",
            Self::Listening => "listening",
            Self::ListeningDone => "listening-done",
            Self::Sending => "sending",
            Self::Receiving => "receiving",
            Self::SpeakingStart => "speaking-start",
            Self::Speaking => "speaking",
            Self::SpeakingDone => "speaking-done",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Inputs to [`transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAction {
    StartListening,
    RecognitionStarted,
    RecognitionEnded,
    TranscriptReady,
    TranscriptEmpty,
    StreamOpened,
    FirstChunkOrLoading,
    ChunkUpdated,
    PlaybackFinished,
    Error(String),
}

/// Next state for `state` after `action`; unlisted pairs leave it unchanged
#[must_use]
pub fn transition(state: VoiceState, action: &VoiceAction) -> VoiceState {
    use VoiceAction as A;
    use VoiceState as S;

    match (state, action) {
        (_, A::Error(_)) => S::Error,
        (S::Idle | S::SpeakingDone, A::StartListening)
        | (S::ListeningDone, A::TranscriptEmpty) => S::ListeningStart,
        (S::ListeningStart, A::RecognitionStarted) => S::Listening,
        (S::Listening, A::RecognitionEnded) => S::ListeningDone,
        (S::ListeningDone, A::TranscriptReady) => S::Sending,
        (S::Sending, A::StreamOpened) => S::Receiving,
        (S::Receiving, A::FirstChunkOrLoading) => S::SpeakingStart,
        (S::SpeakingStart | S::Speaking, A::ChunkUpdated) => S::Speaking,
        (S::SpeakingStart | S::Speaking, A::PlaybackFinished) => S::SpeakingDone,
        (state, _) => state,
    }
}
