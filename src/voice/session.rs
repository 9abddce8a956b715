//! Voice session driver
//!
//! Owns the live [`VoiceState`] and runs the side effects of entering each
//! state against the recognizer, the playback controller and the chat host.
//! Inputs are processed one at a time; actions raised while entering a
//! state are queued and drained before the next input is accepted.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use super::machine::{VoiceAction, VoiceState, transition};
use super::playback::{PlaybackUpdate, SpeechPlayer, SynthesisEvent};
use super::recognizer::{RecognitionEvent, SpeechRecognizer};
use crate::Result;

/// What the voice session observes of the chat host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostSnapshot {
    /// Chunks of the response being streamed, in order
    pub chunks: Vec<String>,
    /// Whether a response is still streaming
    pub is_loading: bool,
    /// User-facing message of the last failed request
    pub error: Option<String>,
}

/// The host side of voice mode: something that can send a user turn
pub trait ChatHost {
    /// Submit a transcript as the next user message
    ///
    /// # Errors
    ///
    /// Returns error if the message could not be sent
    fn submit(&mut self, text: &str) -> Result<()>;
}

/// Modality that was live when the session was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PausedModality {
    Listening,
    Speaking,
    Waiting,
}

/// One input to [`VoiceSession::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceInput {
    Recognition(RecognitionEvent),
    Synthesis(SynthesisEvent),
    Host(HostSnapshot),
    TogglePause,
}

/// Runs one voice conversation
pub struct VoiceSession {
    state: VoiceState,
    recognizer: Arc<dyn SpeechRecognizer>,
    player: SpeechPlayer,
    locale: String,
    transcript: Option<String>,
    mic_active: bool,
    paused: Option<PausedModality>,
    snapshot: HostSnapshot,
    /// Host reported at least once since the last submit
    host_reported: bool,
    last_error: Option<String>,
    pending: VecDeque<VoiceAction>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("state", &self.state)
            .field("mic_active", &self.mic_active)
            .field("paused", &self.paused)
            .field("player", &self.player)
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        player: SpeechPlayer,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            state: VoiceState::Idle,
            recognizer,
            player,
            locale: locale.into(),
            transcript: None,
            mic_active: false,
            paused: None,
            snapshot: HostSnapshot::default(),
            host_reported: false,
            last_error: None,
            pending: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    /// Last recognized transcript of the current turn
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    /// Message recorded when the session entered [`VoiceState::Error`]
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn paused(&self) -> Option<PausedModality> {
        self.paused
    }

    /// Whether the microphone is live
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.mic_active
    }

    /// Whether speech is audible
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.player.is_speaking()
    }

    /// Begin the conversation loop
    pub fn open(&mut self, host: &mut dyn ChatHost) -> VoiceState {
        tracing::info!(locale = %self.locale, "voice mode opened");
        self.dispatch(VoiceAction::StartListening, host);
        self.state
    }

    /// Stop both modalities and reset to idle
    pub fn close(&mut self) {
        if let Err(e) = self.recognizer.stop() {
            tracing::warn!(error = %e, "recognizer failed to stop on close");
        }
        self.mic_active = false;
        self.player.stop();

        self.state = VoiceState::Idle;
        self.transcript = None;
        self.paused = None;
        self.last_error = None;
        self.snapshot = HostSnapshot::default();
        self.host_reported = false;
        self.pending.clear();
        tracing::info!("voice mode closed");
    }

    /// Process one input and return the resulting state
    pub fn handle(&mut self, input: VoiceInput, host: &mut dyn ChatHost) -> VoiceState {
        match input {
            VoiceInput::Recognition(event) => self.on_recognition(event),
            VoiceInput::Synthesis(event) => {
                if self.state.is_speaking() {
                    let update = self.player.handle_event(&event);
                    self.pending.extend(playback_action(update));
                }
            }
            VoiceInput::Host(snapshot) => {
                self.snapshot = snapshot;
                self.host_reported = true;
                if self.paused.is_none() {
                    let actions = self.snapshot_actions();
                    self.pending.extend(actions);
                }
            }
            VoiceInput::TogglePause => self.toggle_pause(),
        }
        self.drain(host);
        self.state
    }

    fn on_recognition(&mut self, event: RecognitionEvent) {
        if self.paused.is_some() {
            tracing::trace!(?event, "ignoring recognizer event while paused");
            return;
        }
        match event {
            RecognitionEvent::Started => self.pending.push_back(VoiceAction::RecognitionStarted),
            RecognitionEvent::Results(candidates) => {
                if let Some(last) = candidates.into_iter().last() {
                    self.transcript = Some(last);
                }
            }
            RecognitionEvent::Ended => {
                self.mic_active = false;
                self.pending.push_back(VoiceAction::RecognitionEnded);
            }
            RecognitionEvent::Failed(message) => {
                self.mic_active = false;
                self.pending.push_back(VoiceAction::Error(format!(
                    "speech recognition failed: {message}"
                )));
            }
        }
    }

    /// Actions implied by the latest host snapshot in the current state
    fn snapshot_actions(&mut self) -> Vec<VoiceAction> {
        let snapshot = &self.snapshot;
        match self.state {
            VoiceState::Sending | VoiceState::Receiving if snapshot.error.is_some() => {
                vec![VoiceAction::Error(snapshot.error.clone().unwrap_or_default())]
            }
            // A response that finished before any chunk still opens the stream
            VoiceState::Sending if self.host_reported => vec![VoiceAction::StreamOpened],
            VoiceState::Receiving if !snapshot.chunks.is_empty() || !snapshot.is_loading => {
                vec![VoiceAction::FirstChunkOrLoading]
            }
            VoiceState::SpeakingStart | VoiceState::Speaking => {
                let finished = !snapshot.is_loading;
                let chunks = snapshot.chunks.clone();
                let mut actions = vec![VoiceAction::ChunkUpdated];
                actions.extend(playback_action(self.player.update_content(&chunks)));
                if finished {
                    actions.extend(playback_action(self.player.seal()));
                }
                actions
            }
            _ => Vec::new(),
        }
    }

    fn toggle_pause(&mut self) {
        if let Some(modality) = self.paused.take() {
            tracing::debug!(?modality, state = %self.state, "resuming voice mode");
            match modality {
                PausedModality::Listening => match self.start_recognizer() {
                    Ok(()) if self.state == VoiceState::ListeningStart => {
                        self.pending.push_back(VoiceAction::RecognitionStarted);
                    }
                    Ok(()) => {}
                    Err(message) => self.pending.push_back(VoiceAction::Error(message)),
                },
                PausedModality::Speaking => {
                    let update = self.player.resume();
                    self.pending.extend(playback_action(update));
                    let actions = self.snapshot_actions();
                    self.pending.extend(actions);
                }
                PausedModality::Waiting => {
                    let actions = self.snapshot_actions();
                    self.pending.extend(actions);
                }
            }
            return;
        }

        let modality = if self.mic_active {
            self.stop_recognizer();
            PausedModality::Listening
        } else if self.state.is_speaking() {
            self.player.pause();
            PausedModality::Speaking
        } else {
            PausedModality::Waiting
        };
        tracing::debug!(?modality, state = %self.state, "pausing voice mode");
        self.paused = Some(modality);
    }

    fn dispatch(&mut self, action: VoiceAction, host: &mut dyn ChatHost) {
        self.pending.push_back(action);
        self.drain(host);
    }

    /// Apply queued actions in order, running entry effects of each new state
    fn drain(&mut self, host: &mut dyn ChatHost) {
        while let Some(action) = self.pending.pop_front() {
            let previous = self.state;
            let next = transition(previous, &action);
            if next == previous {
                tracing::trace!(state = %previous, ?action, "no transition");
                continue;
            }
            if let VoiceAction::Error(message) = &action {
                tracing::warn!(error = %message, from = %previous, "voice mode error");
                self.last_error = Some(message.clone());
            }
            tracing::debug!(from = %previous, to = %next, ?action, "voice state transition");
            self.state = next;
            self.enter(next, host);
        }
    }

    /// Entry effects; follow-up actions are queued, never dispatched inline
    fn enter(&mut self, state: VoiceState, host: &mut dyn ChatHost) {
        match state {
            VoiceState::ListeningStart => {
                self.player.stop();
                self.transcript = None;
                match self.start_recognizer() {
                    Ok(()) => self.pending.push_back(VoiceAction::RecognitionStarted),
                    Err(message) => self.pending.push_back(VoiceAction::Error(message)),
                }
            }
            VoiceState::ListeningDone => {
                self.mic_active = false;
                let text = self
                    .transcript
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from);
                let action = match text {
                    Some(text) => {
                        self.snapshot = HostSnapshot::default();
                        self.host_reported = false;
                        match host.submit(&text) {
                            Ok(()) => VoiceAction::TranscriptReady,
                            Err(e) => VoiceAction::Error(e.to_string()),
                        }
                    }
                    None => VoiceAction::TranscriptEmpty,
                };
                self.pending.push_back(action);
            }
            VoiceState::Receiving => {
                let actions = self.snapshot_actions();
                self.pending.extend(actions);
            }
            VoiceState::SpeakingStart => {
                if self.mic_active {
                    self.stop_recognizer();
                }
                self.pending.push_back(VoiceAction::ChunkUpdated);
                let update = self.player.start(self.snapshot.chunks.clone());
                self.pending.extend(playback_action(update));
                if !self.snapshot.is_loading {
                    let update = self.player.seal();
                    self.pending.extend(playback_action(update));
                }
            }
            VoiceState::SpeakingDone => {
                self.player.stop();
                self.transcript = None;
                self.pending.push_back(VoiceAction::StartListening);
            }
            VoiceState::Error => {
                if self.mic_active {
                    self.stop_recognizer();
                }
                self.player.stop();
            }
            VoiceState::Idle
            | VoiceState::Listening
            | VoiceState::Sending
            | VoiceState::Speaking => {}
        }
    }

    fn start_recognizer(&mut self) -> std::result::Result<(), String> {
        match self.recognizer.start(&self.locale) {
            Ok(()) => {
                self.mic_active = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start listening");
                Err(format!("failed to start listening: {e}"))
            }
        }
    }

    fn stop_recognizer(&mut self) {
        if let Err(e) = self.recognizer.stop() {
            tracing::warn!(error = %e, "failed to stop listening");
        }
        self.mic_active = false;
    }
}

/// Machine action implied by a playback update
fn playback_action(update: PlaybackUpdate) -> Option<VoiceAction> {
    match update {
        PlaybackUpdate::Finished => Some(VoiceAction::PlaybackFinished),
        PlaybackUpdate::ChunkFailed { index, message, .. } => Some(VoiceAction::Error(format!(
            "speech synthesis failed on chunk {index}: {message}"
        ))),
        PlaybackUpdate::Ignored | PlaybackUpdate::Speaking { .. } | PlaybackUpdate::Waiting => None,
    }
}
