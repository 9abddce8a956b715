//! Talkback - streaming AI chat client with a hands-free voice mode
//!
//! This library provides the core of the Talkback client:
//! - Response streaming (SSE parsing, sentence/fixed-count chunking)
//! - Speech playback under a process-wide speech lock
//! - The voice-mode conversation state machine
//! - Chat sessions persisted in `SQLite`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │        CLI chat   │   CLI voice   │   embedders      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Chat flow                          │
//! │   VoiceSession  │  SpeechPlayer  │  SessionRepo      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Response stream                        │
//! │   HTTP/SSE  │  Chunker  │  Sentence segmenter        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod setup;
pub mod stream;
pub mod voice;

pub use chat::{ChatFlow, ChatSettings};
pub use config::Config;
pub use db::{DbConn, DbPool, KeyStore, SessionRepo};
pub use error::{Error, Result};
pub use stream::{ChunkPolicy, StreamChunk, StreamClient, StreamError, StreamEvent};
pub use voice::{ChatHost, HostSnapshot, VoiceSession, VoiceState};
