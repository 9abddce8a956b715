//! Response streaming pipeline
//!
//! Bytes from the completion endpoint flow through the SSE line parser,
//! become text deltas, and are re-segmented into chunks by the [`Chunker`]
//! before being pushed to consumers as [`StreamEvent`]s.

mod chunker;
mod client;
mod error;
mod segment;
mod sse;

pub use chunker::{ChunkPolicy, Chunker, StreamChunk, source_text};
pub use client::{
    ChatMessage, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, ResponseHandle, Role,
    StreamClient, StreamEvent, StreamRequest, pump,
};
pub use error::StreamError;
pub use segment::{Segmented, split_sentences};
pub use sse::{SseLineParser, parse_text_delta};
