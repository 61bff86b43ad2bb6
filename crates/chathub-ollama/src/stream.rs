//! NDJSON stream decoding and reply assembly

use chathub_core::{ChatResponse, StreamChunk};

use crate::types::OllamaChatResponse;

/// Splits a byte stream into complete lines. Bytes are buffered until a
/// newline arrives, so multi-byte characters split across network chunks
/// decode intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes, returning every line they complete (blank lines skipped)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Accumulates streamed lines into the unary result
#[derive(Debug, Default)]
pub struct ReplyBuilder {
    content: String,
    eval_count: Option<u32>,
    total_duration_ns: Option<u64>,
    done: bool,
}

impl ReplyBuilder {
    pub fn apply(&mut self, line: &OllamaChatResponse) {
        self.content.push_str(line.content());
        if line.eval_count.is_some() {
            self.eval_count = line.eval_count;
        }
        if line.total_duration.is_some() {
            self.total_duration_ns = line.total_duration;
        }
        self.done |= line.is_done();
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(self) -> ChatResponse {
        ChatResponse {
            content: self.content,
            eval_count: self.eval_count,
            total_duration_ms: self.total_duration_ns.map(|ns| ns / 1_000_000),
        }
    }
}

/// Chunk event for one streamed line
pub fn to_chunk(request_id: &str, line: &OllamaChatResponse) -> StreamChunk {
    StreamChunk {
        request_id: request_id.to_string(),
        content_delta: line.content().to_string(),
        done: line.is_done(),
        eval_count: line.eval_count,
        error: line.error.clone(),
    }
}
