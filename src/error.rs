//! Error types for Talkback

use thiserror::Error;

use crate::stream::StreamError;

/// Result type alias for Talkback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Talkback
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing API credential
    #[error("no API key configured (set ANTHROPIC_API_KEY or run `talkback set-key`)")]
    MissingApiKey,

    /// Response stream error
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Rejected user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Chat session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
