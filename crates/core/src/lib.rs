//! # timegraph core
//!
//! Domain types, traits, and error definitions for the timegraph temporal
//! knowledge graph. Every other crate depends inward on this one.
//!
//! ## Layout
//!
//! - `graph`: periods, fragments, nodes, edges
//! - `record`: validated extraction output
//! - `chunk`: documents, chunks, content-hash ids
//! - `community`: communities and reports
//! - `storage`: graph, vector and key-value store traits
//! - `provider`: chat and embedding collaborators

pub mod chunk;
pub mod community;
pub mod error;
pub mod graph;
pub mod message;
pub mod provider;
pub mod record;
pub mod storage;

// Re-export key types at crate root for ergonomics
pub use chunk::{FullDocument, TextChunk, compute_id};
pub use community::{Community, CommunityReport, CommunityReportRecord, Finding};
pub use error::{Error, ProviderError, Result, StorageError};
pub use graph::{
    Edge, EdgeKey, Fragment, GRAPH_FIELD_SEP, Node, Period, UNKNOWN_ENTITY_TYPE, WeightHeuristic,
};
pub use message::{Message, Role};
pub use provider::{Embedder, Provider, ProviderRequest, ProviderResponse};
pub use record::{EdgeCandidate, ExtractionRecord, NodeCandidate};
pub use storage::{GraphStore, KvStore, VectorMatch, VectorRecord, VectorStore};
