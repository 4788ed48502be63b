//! Splitting documents into overlapping token windows.

use std::collections::BTreeMap;
use timegraph_config::ChunkingConfig;
use timegraph_core::{FullDocument, TextChunk, compute_id};

use crate::token::estimate_tokens;

/// Characters per token window unit, matching [`estimate_tokens`] on ASCII.
const CHARS_PER_TOKEN: usize = 4;

/// Splits one document into chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, doc_id: &str, doc: &FullDocument) -> Vec<TextChunk>;
}

/// Fixed-size windows of `chunk_token_size` tokens, each starting
/// `chunk_token_size - overlap_token_size` tokens after the previous one.
#[derive(Debug, Clone)]
pub struct TokenWindowChunker {
    chunk_token_size: usize,
    overlap_token_size: usize,
}

impl TokenWindowChunker {
    pub fn new(chunk_token_size: usize, overlap_token_size: usize) -> Self {
        let chunk_token_size = chunk_token_size.max(1);
        Self {
            chunk_token_size,
            overlap_token_size: overlap_token_size.min(chunk_token_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_token_size, config.overlap_token_size)
    }
}

impl Default for TokenWindowChunker {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

impl Chunker for TokenWindowChunker {
    fn chunk(&self, doc_id: &str, doc: &FullDocument) -> Vec<TextChunk> {
        let text = doc.content.as_str();
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain([text.len()])
            .collect();
        let char_count = bounds.len() - 1;
        let window = self.chunk_token_size * CHARS_PER_TOKEN;
        let step = (self.chunk_token_size - self.overlap_token_size) * CHARS_PER_TOKEN;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < char_count {
            let end = (start + window).min(char_count);
            let raw = &text[bounds[start]..bounds[end]];
            let content = raw.trim();
            if !content.is_empty() {
                chunks.push(TextChunk {
                    tokens: estimate_tokens(raw).min(self.chunk_token_size),
                    content: content.to_string(),
                    full_doc_id: doc_id.to_string(),
                    chunk_order_index: chunks.len(),
                    period: doc.period.clone(),
                });
            }
            start += step;
        }
        chunks
    }
}

/// Chunk every document, keyed by `chunk-` content hash.
pub fn get_chunks(
    docs: &BTreeMap<String, FullDocument>,
    chunker: &dyn Chunker,
) -> BTreeMap<String, TextChunk> {
    docs.iter()
        .flat_map(|(doc_id, doc)| chunker.chunk(doc_id, doc))
        .map(|chunk| (compute_id("chunk-", &chunk.content), chunk))
        .collect()
}
