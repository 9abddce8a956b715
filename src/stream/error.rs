//! Failure taxonomy for streaming completion requests

use reqwest::StatusCode;
use thiserror::Error;

/// Why a streaming request failed
///
/// Cancellation is deliberately absent: a cancelled request simply stops
/// producing events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// 400: the server rejected the request shape
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// 401: missing or wrong API key
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// 403: key is valid but lacks permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 404: unknown model or endpoint
    #[error("not found: {0}")]
    NotFound(String),

    /// 429: too many requests
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 500: upstream failed internally
    #[error("upstream internal error: {0}")]
    UpstreamInternal(String),

    /// 502/503/504/529: upstream overloaded or unreachable behind its gateway
    #[error("upstream unavailable ({status}): {detail}")]
    UpstreamUnavailable { status: u16, detail: String },

    /// Any other non-success status
    #[error("upstream error ({status}): {detail}")]
    Upstream { status: u16, detail: String },

    /// Connection, TLS or mid-stream read failure
    #[error("network error: {0}")]
    Network(String),
}

impl StreamError {
    /// Map a non-success HTTP response to its failure class
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = extract_error_message(body);

        match status.as_u16() {
            400 => Self::BadRequest(detail),
            401 => Self::InvalidCredential(detail),
            403 => Self::Forbidden(detail),
            404 => Self::NotFound(detail),
            429 => Self::RateLimited(detail),
            500 => Self::UpstreamInternal(detail),
            s @ (502 | 503 | 504 | 529) => Self::UpstreamUnavailable { status: s, detail },
            s => Self::Upstream { status: s, detail },
        }
    }

    /// Human-readable message shown inline in the chat surface
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "The request was malformed. Please try again.",
            Self::InvalidCredential(_) => {
                "Invalid API key. Please check your API key and try again."
            }
            Self::Forbidden(_) => "Access denied. Your API key does not have permission for this request.",
            Self::NotFound(_) => "The requested model or endpoint was not found.",
            Self::RateLimited(_) => "Rate limit exceeded. Please wait a moment and try again.",
            Self::UpstreamInternal(_) => {
                "The AI service encountered an internal error. Please try again later."
            }
            Self::UpstreamUnavailable { .. } => {
                "The AI service is temporarily unavailable. Please try again later."
            }
            Self::Upstream { .. } => "The AI service returned an unexpected error.",
            Self::Network(_) => "Network error. Please check your connection and try again.",
        }
    }
}

/// Pull `error.message` out of a JSON error body, falling back to raw text
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_string()
            } else {
                body.chars().take(500).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_status_class() {
        let cases = [
            (400, "BadRequest"),
            (401, "InvalidCredential"),
            (403, "Forbidden"),
            (404, "NotFound"),
            (429, "RateLimited"),
            (500, "UpstreamInternal"),
            (503, "UpstreamUnavailable"),
            (529, "UpstreamUnavailable"),
            (418, "Upstream"),
        ];
        for (code, name) in cases {
            let err = StreamError::from_status(StatusCode::from_u16(code).unwrap(), "");
            assert!(format!("{err:?}").starts_with(name), "{code} -> {err:?}");
        }
    }

    #[test]
    fn credential_and_rate_limit_messages_differ() {
        let auth = StreamError::from_status(StatusCode::UNAUTHORIZED, "");
        let limited = StreamError::from_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert_ne!(auth.user_message(), limited.user_message());
        assert!(auth.user_message().contains("API key"));
        assert!(limited.user_message().contains("Rate limit"));
    }

    #[test]
    fn extracts_json_error_detail() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = StreamError::from_status(StatusCode::UNAUTHORIZED, body);
        assert_eq!(err, StreamError::InvalidCredential("invalid x-api-key".into()));
    }

    #[test]
    fn falls_back_to_raw_body() {
        let err = StreamError::from_status(StatusCode::BAD_GATEWAY, "upstream hiccup");
        assert_eq!(
            err,
            StreamError::UpstreamUnavailable {
                status: 502,
                detail: "upstream hiccup".into()
            }
        );
    }
}
