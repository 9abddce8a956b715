//! Ordered speech playback over a growing chunk sequence
//!
//! [`SpeechPlayer`] hands one chunk at a time to a [`SpeechSynthesizer`] and
//! advances only when the engine reports the utterance done or failed. The
//! sequence may keep growing while earlier chunks are spoken; it is complete
//! once [`seal`](SpeechPlayer::seal)ed and the cursor reaches its end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::lock::AudioSession;
use crate::Result;

/// Voice parameters applied to every utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechOptions {
    pub rate: f32,
    pub pitch: f32,
    pub language: String,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            language: "en-US".to_string(),
        }
    }
}

/// One request to the synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Correlates engine callbacks with this request
    pub id: u64,
    pub text: String,
    pub options: SpeechOptions,
}

/// Completion callbacks from a synthesizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Done(u64),
    Failed(u64, String),
}

/// Text-to-speech engine
///
/// `speak` starts an utterance and returns; completion is reported later as
/// a [`SynthesisEvent`] carrying the utterance id.
pub trait SpeechSynthesizer: Send + Sync {
    /// Begin speaking an utterance
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the utterance outright
    fn speak(&self, utterance: &Utterance) -> Result<()>;

    /// Pause the current utterance
    fn pause(&self);

    /// Resume a paused utterance
    fn resume(&self);

    /// Abort the current utterance; no completion event is expected
    fn stop(&self);
}

/// What a playback call changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackUpdate {
    /// Nothing relevant happened (stale callback, inactive player)
    Ignored,
    /// A chunk is being spoken
    Speaking { index: usize },
    /// Everything known so far was spoken; more chunks may follow
    Waiting,
    /// The sealed sequence was spoken to the end
    Finished,
    /// The engine failed on a chunk; playback moved past it
    ///
    /// `finished` is set when the failed chunk was the last of a sealed
    /// sequence, so no [`Finished`](Self::Finished) update will follow.
    ChunkFailed {
        index: usize,
        message: String,
        finished: bool,
    },
}

/// Speaks a chunk sequence strictly in order under the speech lock
pub struct SpeechPlayer {
    engine: Arc<dyn SpeechSynthesizer>,
    session: AudioSession,
    options: SpeechOptions,
    chunks: Vec<String>,
    cursor: usize,
    sealed: bool,
    paused: bool,
    in_flight: Option<u64>,
    next_utterance: u64,
    lease: Option<u64>,
    preempted: Arc<AtomicBool>,
}

impl std::fmt::Debug for SpeechPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechPlayer")
            .field("chunks", &self.chunks.len())
            .field("cursor", &self.cursor)
            .field("sealed", &self.sealed)
            .field("paused", &self.paused)
            .field("in_flight", &self.in_flight)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl SpeechPlayer {
    /// Create a player bound to the process-wide speech lock
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechSynthesizer>, options: SpeechOptions) -> Self {
        Self::with_session(engine, options, AudioSession::global())
    }

    /// Create a player bound to a specific speech lock
    #[must_use]
    pub fn with_session(
        engine: Arc<dyn SpeechSynthesizer>,
        options: SpeechOptions,
        session: AudioSession,
    ) -> Self {
        Self {
            engine,
            session,
            options,
            chunks: Vec::new(),
            cursor: 0,
            sealed: false,
            paused: false,
            in_flight: None,
            next_utterance: 0,
            lease: None,
            preempted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start speaking `chunks` from the beginning
    ///
    /// Takes the speech lock, stopping any other holder before the first
    /// chunk is handed to the engine.
    pub fn start(&mut self, chunks: Vec<String>) -> PlaybackUpdate {
        self.stop();

        let preempted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&preempted);
        let engine = Arc::clone(&self.engine);
        self.lease = Some(self.session.acquire(move || {
            flag.store(true, Ordering::SeqCst);
            engine.stop();
        }));
        self.preempted = preempted;
        self.chunks = chunks;

        tracing::debug!(chunks = self.chunks.len(), "starting playback");
        self.speak_next()
    }

    /// Replace the sequence with a longer version of itself
    ///
    /// Chunks below the cursor are never spoken again.
    pub fn update_content(&mut self, chunks: &[String]) -> PlaybackUpdate {
        if !self.check_active() {
            return PlaybackUpdate::Ignored;
        }
        if chunks.len() > self.chunks.len() {
            self.chunks.extend_from_slice(&chunks[self.chunks.len()..]);
        }
        if self.in_flight.is_some() {
            return PlaybackUpdate::Speaking { index: self.cursor };
        }
        self.speak_next()
    }

    /// Mark the sequence complete; no more chunks will be added
    pub fn seal(&mut self) -> PlaybackUpdate {
        self.sealed = true;
        if !self.check_active() {
            return PlaybackUpdate::Ignored;
        }
        if self.in_flight.is_some() {
            return PlaybackUpdate::Speaking { index: self.cursor };
        }
        self.speak_next()
    }

    /// Apply an engine callback
    pub fn handle_event(&mut self, event: &SynthesisEvent) -> PlaybackUpdate {
        let id = match event {
            SynthesisEvent::Done(id) | SynthesisEvent::Failed(id, _) => *id,
        };
        if self.in_flight != Some(id) || !self.check_active() {
            tracing::trace!(utterance = id, "ignoring stale synthesis event");
            return PlaybackUpdate::Ignored;
        }

        let index = self.cursor;
        self.in_flight = None;
        self.cursor += 1;

        match event {
            SynthesisEvent::Done(_) => self.speak_next(),
            SynthesisEvent::Failed(_, message) => {
                tracing::warn!(index, error = %message, "synthesis failed, skipping chunk");
                let finished = matches!(
                    self.speak_next(),
                    PlaybackUpdate::Finished | PlaybackUpdate::ChunkFailed { finished: true, .. }
                );
                PlaybackUpdate::ChunkFailed {
                    index,
                    message: message.clone(),
                    finished,
                }
            }
        }
    }

    /// Pause the current utterance, keeping the cursor
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        if self.in_flight.is_some() {
            self.engine.pause();
        }
    }

    /// Continue after [`pause`](Self::pause)
    pub fn resume(&mut self) -> PlaybackUpdate {
        if !self.paused {
            return PlaybackUpdate::Ignored;
        }
        self.paused = false;
        if !self.check_active() {
            return PlaybackUpdate::Ignored;
        }
        if self.in_flight.is_some() {
            self.engine.resume();
            return PlaybackUpdate::Speaking { index: self.cursor };
        }
        self.speak_next()
    }

    /// Halt playback, reset the cursor and release the speech lock
    pub fn stop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if self.session.release(lease) && self.in_flight.is_some() {
                self.engine.stop();
            }
            tracing::debug!(cursor = self.cursor, "playback stopped");
        }
        self.chunks.clear();
        self.cursor = 0;
        self.sealed = false;
        self.paused = false;
        self.in_flight = None;
    }

    /// Whether an utterance is currently audible
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.in_flight.is_some() && !self.paused
    }

    /// Whether the sealed sequence has been spoken to the end
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.sealed && self.in_flight.is_none() && self.cursor >= self.chunks.len()
    }

    /// Whether the player holds the speech lock
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lease.is_some() && !self.preempted.load(Ordering::SeqCst)
    }

    /// Index of the next chunk to finish
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drop local state if another player took the lock
    fn check_active(&mut self) -> bool {
        if self.lease.is_some() && self.preempted.load(Ordering::SeqCst) {
            tracing::debug!("playback preempted by another speaker");
            self.lease = None;
            self.in_flight = None;
        }
        self.lease.is_some()
    }

    /// Hand the next chunk to the engine, or report where playback stands
    fn speak_next(&mut self) -> PlaybackUpdate {
        if self.paused || self.lease.is_none() {
            return PlaybackUpdate::Waiting;
        }

        let mut failure = None;
        while self.cursor < self.chunks.len() {
            self.next_utterance += 1;
            let utterance = Utterance {
                id: self.next_utterance,
                text: self.chunks[self.cursor].clone(),
                options: self.options.clone(),
            };
            match self.engine.speak(&utterance) {
                Ok(()) => {
                    self.in_flight = Some(utterance.id);
                    return failure.map_or(
                        PlaybackUpdate::Speaking { index: self.cursor },
                        |(index, message)| PlaybackUpdate::ChunkFailed {
                            index,
                            message,
                            finished: false,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(index = self.cursor, error = %e, "synthesizer rejected chunk");
                    failure.get_or_insert((self.cursor, e.to_string()));
                    self.cursor += 1;
                }
            }
        }

        let finished = self.sealed;
        if finished {
            if let Some(lease) = self.lease.take() {
                self.session.release(lease);
            }
            tracing::debug!(chunks = self.chunks.len(), "playback finished");
        }
        match failure {
            Some((index, message)) => PlaybackUpdate::ChunkFailed {
                index,
                message,
                finished,
            },
            None if finished => PlaybackUpdate::Finished,
            None => PlaybackUpdate::Waiting,
        }
    }
}

impl Drop for SpeechPlayer {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.session.release(lease);
        }
    }
}
