//! Streaming completion client
//!
//! Opens one long-lived request per response and republishes it as a push
//! sequence of [`StreamEvent`]s. The byte-level work (SSE lines → deltas →
//! chunks) lives in [`pump`] so it can be driven by canned chunks in tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::chunker::{ChunkPolicy, Chunker, StreamChunk};
use super::error::StreamError;
use super::sse::{SseLineParser, parse_text_delta};

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";

/// Default output bound
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// API version header value
const API_VERSION: &str = "2023-06-01";

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Parameters for one streaming completion
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: u32,
}

impl StreamRequest {
    /// Request with the default model and output bound
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Build the JSON body; system messages move to the top-level `system` field
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        let system: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n\n"));
        }
        body
    }
}

/// One item of the push sequence produced for a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Next chunk, in transport order
    Chunk(StreamChunk),
    /// Stream ended normally (all chunks, including the flush, already sent)
    Finished,
    /// Stream ended with a failure (buffered text was flushed first)
    Failed(StreamError),
}

/// Control handle for an in-flight response
#[derive(Debug, Clone)]
pub struct ResponseHandle {
    cancel: CancellationToken,
    in_flight: Arc<AtomicBool>,
}

impl ResponseHandle {
    /// Whether the request is still producing events
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Abort the request; no further events are delivered and no error is raised
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("cancelling response stream");
        }
        self.cancel.cancel();
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Client for the streaming messages endpoint
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    policy: ChunkPolicy,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client with the default endpoint and sentence chunking
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            policy: ChunkPolicy::default(),
        }
    }

    /// Override the endpoint (trailing slashes are dropped)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Select the chunking policy
    #[must_use]
    pub const fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Chunking policy in use
    #[must_use]
    pub const fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// Send the request and return the response once headers arrive
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Network`] if the connection fails and the
    /// mapped status class for any non-success response
    pub async fn open(&self, request: &StreamRequest) -> Result<reqwest::Response, StreamError> {
        let url = format!("{}/v1/messages", self.base_url);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            "opening response stream"
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&request.to_body())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "stream request failed");
                StreamError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "stream request returned error");
            return Err(StreamError::from_status(status, &body));
        }

        Ok(response)
    }

    /// Start a response on the current tokio runtime
    ///
    /// Events arrive on the returned receiver in transport order. The channel
    /// closes after `Finished`/`Failed`, or silently after cancellation.
    #[must_use]
    pub fn start(&self, request: StreamRequest) -> (ResponseHandle, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ResponseHandle {
            cancel: CancellationToken::new(),
            in_flight: Arc::new(AtomicBool::new(true)),
        };

        let client = self.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let cancel = task_handle.cancel.clone();
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("response stream cancelled");
                }
                () = client.run(&request, &tx, &cancel) => {}
            }
            task_handle.in_flight.store(false, Ordering::SeqCst);
        });

        (handle, rx)
    }

    async fn run(
        &self,
        request: &StreamRequest,
        tx: &mpsc::UnboundedSender<StreamEvent>,
        cancel: &CancellationToken,
    ) {
        match self.open(request).await {
            Ok(response) => {
                pump(response.bytes_stream(), self.policy, tx, cancel).await;
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    let _ = tx.send(StreamEvent::Failed(e));
                }
            }
        }
    }
}

/// Drive a byte stream through SSE parsing and chunking
///
/// Sends every chunk, then `Finished` on a clean end or `Failed(Network)` on
/// a read error, always flushing buffered text first. Malformed event lines
/// are logged and skipped. Nothing is sent once `cancel` fires or the
/// receiver is gone.
pub async fn pump<S, B, E>(
    mut bytes: S,
    policy: ChunkPolicy,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut parser = SseLineParser::new();
    let mut chunker = Chunker::new(policy);
    let send = |event: StreamEvent| -> bool { !cancel.is_cancelled() && tx.send(event).is_ok() };

    let mut failure = None;
    while let Some(item) = bytes.next().await {
        match item {
            Ok(chunk) => {
                for data in parser.push(chunk.as_ref()) {
                    if !feed(&mut chunker, &data, &send) {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "response stream read error");
                failure = Some(StreamError::Network(e.to_string()));
                break;
            }
        }
    }

    if failure.is_none() {
        if let Some(data) = parser.finish() {
            if !feed(&mut chunker, &data, &send) {
                return;
            }
        }
    }

    if let Some(chunk) = chunker.flush() {
        if !send(StreamEvent::Chunk(chunk)) {
            return;
        }
    }

    tracing::debug!(chunks = chunker.emitted(), failed = failure.is_some(), "response stream ended");
    let _ = send(failure.map_or(StreamEvent::Finished, StreamEvent::Failed));
}

/// Decode one data payload and send the chunks it completes
fn feed(chunker: &mut Chunker, data: &str, send: &impl Fn(StreamEvent) -> bool) -> bool {
    match parse_text_delta(data) {
        Ok(Some(delta)) => chunker
            .push(&delta)
            .into_iter()
            .all(|chunk| send(StreamEvent::Chunk(chunk))),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(error = %e, data = %data, "skipping malformed stream event");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn delta_line(text: &str) -> String {
        format!(
            "event: content_block_delta\ndata: {}\n\n",
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}})
        )
    }

    async fn collect(
        parts: Vec<Result<Vec<u8>, String>>,
        policy: ChunkPolicy,
    ) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        pump(futures::stream::iter(parts), policy, &tx, &cancel).await;
        drop(tx);
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    fn chunk_texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn sentence_chunks_and_finish() {
        let parts = ["Hi ", "there. ", "Bye", "!"]
            .iter()
            .map(|t| Ok(delta_line(t).into_bytes()))
            .collect();
        let events = collect(parts, ChunkPolicy::Sentences).await;
        assert_eq!(chunk_texts(&events), vec!["Hi there.", "Bye!"]);
        assert_eq!(events.last(), Some(&StreamEvent::Finished));
    }

    #[tokio::test]
    async fn fixed_count_chunks() {
        let parts = ["a", "b", "c", "d"]
            .iter()
            .map(|t| Ok(delta_line(t).into_bytes()))
            .collect();
        let policy = ChunkPolicy::EveryDeltas(NonZeroUsize::new(3).unwrap());
        let events = collect(parts, policy).await;
        assert_eq!(chunk_texts(&events), vec!["abc", "d"]);
    }

    #[tokio::test]
    async fn malformed_event_does_not_abort_stream() {
        let parts = vec![
            Ok(delta_line("One. ").into_bytes()),
            Ok(b"data: {broken json\n\n".to_vec()),
            Ok(delta_line("Two.").into_bytes()),
        ];
        let events = collect(parts, ChunkPolicy::Sentences).await;
        assert_eq!(chunk_texts(&events), vec!["One.", "Two."]);
        assert_eq!(events.last(), Some(&StreamEvent::Finished));
    }

    #[tokio::test]
    async fn chunks_split_mid_line() {
        let whole = delta_line("Split across reads. ") + &delta_line("Done.");
        let bytes = whole.into_bytes();
        let parts = bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();
        let events = collect(parts, ChunkPolicy::Sentences).await;
        assert_eq!(chunk_texts(&events), vec!["Split across reads.", "Done."]);
    }

    #[tokio::test]
    async fn read_error_flushes_then_fails() {
        let parts = vec![
            Ok(delta_line("partial answer").into_bytes()),
            Err("connection reset".to_string()),
        ];
        let events = collect(parts, ChunkPolicy::Sentences).await;
        assert_eq!(chunk_texts(&events), vec!["partial answer"]);
        assert!(matches!(events.last(), Some(StreamEvent::Failed(StreamError::Network(_)))));
    }

    #[tokio::test]
    async fn cancelled_pump_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(delta_line("Hello. ").into_bytes())];
        pump(futures::stream::iter(parts), ChunkPolicy::Sentences, &tx, &cancel).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn body_moves_system_prompt() {
        let request = StreamRequest::new(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
        ]);
        let body = request.to_body();
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
    }

    #[test]
    fn body_without_system_has_no_field() {
        let body = StreamRequest::new(vec![ChatMessage::user("Hi")]).to_body();
        assert!(body.get("system").is_none());
    }
}
