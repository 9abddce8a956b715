//! Chat flow host
//!
//! Owns the conversation history of one chat session, persists it, and
//! turns each user turn into a streaming request. The streaming response is
//! exposed as a [`HostSnapshot`] so the voice session can follow it.

use tokio::sync::mpsc;

use crate::db::{Message, Session, SessionRepo};
use crate::stream::{
    ChatMessage, ResponseHandle, Role, StreamChunk, StreamClient, StreamEvent, StreamRequest,
    source_text,
};
use crate::voice::{ChatHost, HostSnapshot};
use crate::{Error, Result};

/// Number of words of the first message used as the session topic
const TOPIC_WORDS: usize = 5;

/// Request parameters applied to every turn
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: crate::stream::DEFAULT_MODEL.to_string(),
            max_tokens: crate::stream::DEFAULT_MAX_TOKENS,
            system_prompt: None,
        }
    }
}

/// Topic for a new session: the first few words of its first message
#[must_use]
pub fn topic_from(text: &str) -> String {
    text.split_whitespace()
        .take(TOPIC_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Request in flight for the current turn
struct Turn {
    handle: ResponseHandle,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    user_message_id: String,
}

/// One chat conversation bound to the store and the stream client
pub struct ChatFlow {
    repo: SessionRepo,
    client: StreamClient,
    settings: ChatSettings,
    session: Option<Session>,
    history: Vec<Message>,
    response: Vec<StreamChunk>,
    turn: Option<Turn>,
    error: Option<String>,
}

impl std::fmt::Debug for ChatFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatFlow")
            .field("session", &self.session.as_ref().map(|s| &s.id))
            .field("history", &self.history.len())
            .field("response", &self.response.len())
            .field("loading", &self.is_loading())
            .finish_non_exhaustive()
    }
}

impl ChatFlow {
    /// Start with no session; one is created on the first message
    #[must_use]
    pub const fn new(repo: SessionRepo, client: StreamClient, settings: ChatSettings) -> Self {
        Self {
            repo,
            client,
            settings,
            session: None,
            history: Vec::new(),
            response: Vec::new(),
            turn: None,
            error: None,
        }
    }

    /// Continue an existing session
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist or cannot be read
    pub fn load(&mut self, session_id: &str) -> Result<()> {
        self.stop();
        let loaded = self.repo.with_messages(session_id)?;
        tracing::info!(
            session_id,
            messages = loaded.messages.len(),
            "loaded chat session"
        );
        self.session = Some(loaded.session);
        self.history = loaded.messages;
        self.response.clear();
        self.error = None;
        Ok(())
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Persisted messages, oldest first
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Chunks of the current (or last) response
    #[must_use]
    pub fn response(&self) -> &[StreamChunk] {
        &self.response
    }

    /// Current response text exactly as streamed
    #[must_use]
    pub fn response_text(&self) -> String {
        source_text(&self.response)
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.turn.is_some()
    }

    /// User-facing message of the last failure
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Send a user message and start streaming the answer
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the text is blank or the store cannot be written
    pub fn send(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("message is empty".to_string()));
        }
        self.stop();

        let session_id = match &self.session {
            Some(session) => session.id.clone(),
            None => {
                let session = self.repo.create(&topic_from(text))?;
                let id = session.id.clone();
                self.session = Some(session);
                id
            }
        };

        let message = self.repo.add_message(&session_id, Role::User, text)?;
        let user_message_id = message.id.clone();
        self.history.push(message);

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(self.history.iter().map(Message::to_chat));

        let request = StreamRequest {
            messages,
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(session_id = %session_id, turns = self.history.len(), "sending chat turn");
        let (handle, events) = self.client.start(request);

        self.response.clear();
        self.error = None;
        self.turn = Some(Turn {
            handle,
            events,
            user_message_id,
        });
        Ok(())
    }

    /// Wait for the next stream event and apply it
    ///
    /// Returns `None` when no request is in flight or the request ended
    /// without a terminal event (cancellation).
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.turn.as_mut()?.events.recv().await;
        match event {
            Some(event) => {
                self.apply(&event);
                Some(event)
            }
            None => {
                self.turn = None;
                None
            }
        }
    }

    /// Apply every event that is already available
    pub fn poll(&mut self) -> Vec<StreamEvent> {
        let mut applied = Vec::new();
        while let Some(turn) = self.turn.as_mut() {
            match turn.events.try_recv() {
                Ok(event) => {
                    self.apply(&event);
                    applied.push(event);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.turn = None;
                }
            }
        }
        applied
    }

    /// Cancel the request in flight, keeping what has arrived
    pub fn stop(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.handle.cancel();
            tracing::debug!(chunks = self.response.len(), "chat turn stopped");
        }
    }

    /// What the voice session sees of this host
    #[must_use]
    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            chunks: self.response.iter().map(|c| c.text.clone()).collect(),
            is_loading: self.is_loading(),
            error: self.error.clone(),
        }
    }

    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Chunk(chunk) => self.response.push(chunk.clone()),
            StreamEvent::Finished => {
                self.turn = None;
                self.persist_response();
            }
            StreamEvent::Failed(e) => {
                let user_message_id = self.turn.take().map(|t| t.user_message_id);
                tracing::warn!(error = %e, "chat turn failed");
                self.error = Some(e.user_message().to_string());
                if let Some(id) = user_message_id {
                    self.rollback(&id);
                }
            }
        }
    }

    fn persist_response(&mut self) {
        let text = self.response_text();
        if text.is_empty() {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        match self.repo.add_message(&session.id, Role::Assistant, &text) {
            Ok(message) => self.history.push(message),
            Err(e) => {
                tracing::error!(error = %e, "failed to persist assistant message");
                self.error = Some("Failed to save the response.".to_string());
            }
        }
    }

    /// Remove the optimistic user message of a failed turn
    fn rollback(&mut self, message_id: &str) {
        self.history.retain(|m| m.id != message_id);
        if let Err(e) = self.repo.delete_message(message_id) {
            tracing::error!(error = %e, message_id, "failed to roll back user message");
        }
    }
}

impl ChatHost for ChatFlow {
    fn submit(&mut self, text: &str) -> Result<()> {
        self.send(text)
    }
}
