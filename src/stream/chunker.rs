//! Re-segmentation of text deltas into emit-ready chunks

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::segment::split_sentences;

/// One unit of assistant output released to the UI and speech layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Emission index within the current response, starting at 0
    pub index: usize,
    /// Chunk text, trimmed in sentence mode
    pub text: String,
    /// Exact slice of the response this chunk was cut from
    pub source: String,
}

/// Reassemble the response text exactly as it was streamed
#[must_use]
pub fn source_text(chunks: &[StreamChunk]) -> String {
    chunks.iter().map(|c| c.source.as_str()).collect()
}

/// How buffered deltas are turned into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkPolicy {
    /// Emit every complete sentence as soon as it is terminated
    #[default]
    Sentences,
    /// Emit the whole buffer every N delta events
    EveryDeltas(NonZeroUsize),
}

impl FromStr for ChunkPolicy {
    type Err = String;

    /// Accepts `sentence`, `sentences`, `-1` or a positive delta count
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sentence" | "sentences" | "-1" => Ok(Self::Sentences),
            other => other
                .parse::<usize>()
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Self::EveryDeltas)
                .ok_or_else(|| format!("invalid chunk policy '{s}' (expected 'sentence' or N >= 1)")),
        }
    }
}

impl fmt::Display for ChunkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentences => f.write_str("sentence"),
            Self::EveryDeltas(n) => write!(f, "{n}"),
        }
    }
}

/// Buffers deltas and releases chunks according to a [`ChunkPolicy`]
#[derive(Debug)]
pub struct Chunker {
    policy: ChunkPolicy,
    buffer: String,
    deltas: usize,
    next_index: usize,
}

impl Chunker {
    #[must_use]
    pub const fn new(policy: ChunkPolicy) -> Self {
        Self {
            policy,
            buffer: String::new(),
            deltas: 0,
            next_index: 0,
        }
    }

    /// Number of chunks emitted so far
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.next_index
    }

    /// Accept one delta and return the chunks it completes
    pub fn push(&mut self, delta: &str) -> Vec<StreamChunk> {
        self.buffer.push_str(delta);
        self.deltas += 1;

        match self.policy {
            ChunkPolicy::Sentences => self.drain_sentences(),
            ChunkPolicy::EveryDeltas(n) => {
                if self.deltas % n.get() == 0 {
                    self.take_buffer().into_iter().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Release whatever is still buffered as a final chunk
    pub fn flush(&mut self) -> Option<StreamChunk> {
        self.take_buffer()
    }

    /// Emit terminated sentences, holding back one that touches the end of
    /// the buffer since the next delta may extend its terminator run
    fn drain_sentences(&mut self) -> Vec<StreamChunk> {
        let sentences: Vec<String> = {
            let seg = split_sentences(&self.buffer);
            let mut sentences = seg.sentences;
            if seg.remainder.is_empty() {
                sentences.pop();
            }
            sentences.into_iter().map(String::from).collect()
        };
        let consumed: usize = sentences.iter().map(String::len).sum();
        self.buffer.drain(..consumed);

        sentences
            .into_iter()
            .map(|source| self.emit(source.trim().to_string(), source))
            .collect()
    }

    fn take_buffer(&mut self) -> Option<StreamChunk> {
        let source = std::mem::take(&mut self.buffer);
        let text = match self.policy {
            ChunkPolicy::Sentences => source.trim().to_string(),
            ChunkPolicy::EveryDeltas(_) => source.clone(),
        };
        if text.is_empty() {
            return None;
        }
        Some(self.emit(text, source))
    }

    fn emit(&mut self, text: String, source: String) -> StreamChunk {
        let chunk = StreamChunk {
            index: self.next_index,
            text,
            source,
        };
        self.next_index += 1;
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[StreamChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn fixed_count_emits_every_third_delta() {
        let mut chunker = Chunker::new(ChunkPolicy::EveryDeltas(NonZeroUsize::new(3).unwrap()));
        assert!(chunker.push("a").is_empty());
        assert!(chunker.push("b").is_empty());
        let third = chunker.push("c");
        assert_eq!(texts(&third), vec!["abc"]);
        assert_eq!(third[0].index, 0);
        assert!(chunker.push("d").is_empty());

        let last = chunker.flush().unwrap();
        assert_eq!(last.text, "d");
        assert_eq!(last.index, 1);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn fixed_count_of_one_emits_each_delta() {
        let mut chunker = Chunker::new(ChunkPolicy::EveryDeltas(NonZeroUsize::MIN));
        assert_eq!(texts(&chunker.push("x")), vec!["x"]);
        assert_eq!(texts(&chunker.push("y")), vec!["y"]);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn sentence_mode_waits_for_terminator() {
        let mut chunker = Chunker::new(ChunkPolicy::Sentences);
        assert!(chunker.push("Hi ").is_empty());
        assert_eq!(texts(&chunker.push("there. ")), vec!["Hi there."]);
        assert!(chunker.push("Bye").is_empty());
        assert!(chunker.push("!").is_empty());
        assert_eq!(chunker.flush().unwrap().text, "Bye!");
    }

    #[test]
    fn sentence_mode_keeps_split_terminator_runs() {
        let mut chunker = Chunker::new(ChunkPolicy::Sentences);
        assert!(chunker.push("Wait.").is_empty());
        assert!(chunker.push("..").is_empty());
        assert_eq!(texts(&chunker.push(" go")), vec!["Wait..."]);
        assert_eq!(chunker.flush().unwrap().text, "go");
    }

    #[test]
    fn sentence_mode_releases_tail_only_on_flush() {
        let mut chunker = Chunker::new(ChunkPolicy::Sentences);
        let mut emitted = Vec::new();
        for delta in ["Hi ", "there. ", "Bye", "!"] {
            emitted.extend(chunker.push(delta));
        }
        assert_eq!(texts(&emitted), vec!["Hi there."]);
        emitted.extend(chunker.flush());
        assert_eq!(texts(&emitted), vec!["Hi there.", "Bye!"]);
        assert_eq!(chunker.emitted(), 2);
    }

    #[test]
    fn sentence_mode_emits_several_at_once() {
        let mut chunker = Chunker::new(ChunkPolicy::Sentences);
        let out = chunker.push("One. Two! Three? Fo");
        assert_eq!(texts(&out), vec!["One.", "Two!", "Three?"]);
        assert_eq!(out.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(chunker.flush().unwrap().text, "Fo");
    }

    #[test]
    fn source_text_keeps_line_breaks() {
        let reply = "Here is a list:\n\n1. First.\n2. Second.";
        let mut chunker = Chunker::new(ChunkPolicy::Sentences);
        let mut emitted = Vec::new();
        for delta in ["Here is ", "a list:\n\n1", ". First.\n", "2. Sec", "ond."] {
            emitted.extend(chunker.push(delta));
        }
        emitted.extend(chunker.flush());

        assert!(emitted.iter().all(|c| c.text == c.text.trim()));
        assert_eq!(source_text(&emitted), reply);
    }

    #[test]
    fn fixed_count_source_matches_text() {
        let mut chunker = Chunker::new(ChunkPolicy::EveryDeltas(NonZeroUsize::new(2).unwrap()));
        let mut emitted = chunker.push("a\n");
        emitted.extend(chunker.push(" b"));
        emitted.extend(chunker.push("c"));
        emitted.extend(chunker.flush());
        assert_eq!(texts(&emitted), vec!["a\n b", "c"]);
        assert_eq!(source_text(&emitted), "a\n bc");
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("sentence".parse::<ChunkPolicy>().unwrap(), ChunkPolicy::Sentences);
        assert_eq!("-1".parse::<ChunkPolicy>().unwrap(), ChunkPolicy::Sentences);
        assert_eq!(
            "4".parse::<ChunkPolicy>().unwrap(),
            ChunkPolicy::EveryDeltas(NonZeroUsize::new(4).unwrap())
        );
        assert!("0".parse::<ChunkPolicy>().is_err());
        assert!("often".parse::<ChunkPolicy>().is_err());
        assert_eq!(ChunkPolicy::Sentences.to_string(), "sentence");
    }
}
