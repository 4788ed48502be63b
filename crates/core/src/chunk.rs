//! Documents, text chunks and content-hash identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::graph::Period;

/// A full source document as submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullDocument {
    pub content: String,
    pub period: Period,
}

/// A window of a document that extraction runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub tokens: usize,
    pub content: String,
    pub full_doc_id: String,
    pub chunk_order_index: usize,
    /// Ingestion period the chunk belongs to
    pub period: Period,
}

impl TextChunk {
    /// Human-readable source time shown next to passages in context.
    pub fn source_time(&self) -> String {
        format!("data from {}", self.period)
    }
}

/// `prefix` followed by the hex SHA-256 of `content`.
pub fn compute_id(prefix: &str, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{prefix}{}", hex::encode(digest))
}
