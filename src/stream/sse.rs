//! Incremental server-sent-event line parser
//!
//! Consumes raw byte chunks in whatever sizes the transport delivers them and
//! yields the payload of every complete `data:` line. Lines and multi-byte
//! characters split across chunks are reassembled before decoding.

use serde::Deserialize;

/// Sentinel some providers send as the last data line
const DONE_SENTINEL: &str = "[DONE]";

/// Line-oriented SSE parser
#[derive(Debug, Default)]
pub struct SseLineParser {
    pending: Vec<u8>,
}

impl SseLineParser {
    /// Create a parser with an empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning the data payloads it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line[..line.len() - 1]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that was never newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

/// Extract the payload of a `data:` line, ignoring every other field
fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }
    Some(data.to_string())
}

#[derive(Debug, Deserialize)]
struct DeltaEvent {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

/// Decode one data payload into its text delta, if it carries one
///
/// # Errors
///
/// Returns the JSON error when the payload is not a JSON object of the
/// expected shape; callers log and skip such lines
pub fn parse_text_delta(data: &str) -> Result<Option<String>, serde_json::Error> {
    let event: DeltaEvent = serde_json::from_str(data)?;
    Ok(event
        .delta
        .and_then(|d| d.text)
        .filter(|text| !text.is_empty()))
}
