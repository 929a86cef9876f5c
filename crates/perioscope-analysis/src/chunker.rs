//! Paragraph-respecting document chunker.
//!
//! Paragraphs (blank-line separated) are packed greedily into chunks of at
//! most `max_chunk_chars` characters. A paragraph is never split: one that is
//! longer than the limit on its own becomes a single oversized chunk.

use std::sync::OnceLock;

use perioscope_common::{PerioscopeError, Result};
use regex::Regex;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::models::DocumentChunk;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_chars: usize,
    max_input_bytes: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars.max(1),
            max_input_bytes: config.max_input_bytes,
        }
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<DocumentChunk>> {
        if text.trim().is_empty() {
            return Err(PerioscopeError::EmptyInput);
        }
        if text.len() > self.max_input_bytes {
            return Err(PerioscopeError::InputTooLarge {
                size: text.len(),
                limit: self.max_input_bytes,
            });
        }

        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut buffer_chars = 0usize;

        let paragraphs = paragraph_break()
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty());

        for paragraph in paragraphs {
            let len = paragraph.chars().count();
            if !buffer.is_empty() && buffer_chars + PARAGRAPH_SEPARATOR.len() + len > self.max_chunk_chars {
                flush(&mut chunks, &mut buffer);
                buffer_chars = 0;
            }
            if !buffer.is_empty() {
                buffer.push_str(PARAGRAPH_SEPARATOR);
                buffer_chars += PARAGRAPH_SEPARATOR.len();
            }
            buffer.push_str(paragraph);
            buffer_chars += len;
        }
        flush(&mut chunks, &mut buffer);

        debug!(
            chunks = chunks.len(),
            input_bytes = text.len(),
            max_chunk_chars = self.max_chunk_chars,
            "Document chunked"
        );
        Ok(chunks)
    }
}

fn flush(chunks: &mut Vec<DocumentChunk>, buffer: &mut String) {
    let text = buffer.trim();
    if !text.is_empty() {
        chunks.push(DocumentChunk { index: chunks.len(), text: text.to_string() });
    }
    buffer.clear();
}

/// Chunks `text` with the default input ceiling.
pub fn chunk_text(text: &str, max_size: usize) -> Result<Vec<DocumentChunk>> {
    let config = ChunkingConfig { max_chunk_chars: max_size, ..ChunkingConfig::default() };
    Chunker::new(&config).chunk(text)
}
