//! Storage traits: the contracts the engine consumes.
//!
//! Three kinds of store back a working dataset:
//! - a graph store holding nodes, edges and the community schema
//! - a vector store for similarity search over entities
//! - namespaced key-value stores for documents, chunks, reports and caches
//!
//! Implementations live in `timegraph-storage`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use crate::community::Community;
use crate::error::StorageError;
use crate::graph::{Edge, EdgeKey, Node};

type StoreResult<T> = std::result::Result<T, StorageError>;

/// Undirected property graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn namespace(&self) -> &str;

    async fn has_node(&self, name: &str) -> StoreResult<bool>;

    async fn has_edge(&self, a: &str, b: &str) -> StoreResult<bool>;

    async fn get_node(&self, name: &str) -> StoreResult<Option<Node>>;

    async fn get_edge(&self, a: &str, b: &str) -> StoreResult<Option<Edge>>;

    /// Keys of the edges incident to `name`; `None` if the node is unknown.
    async fn get_node_edges(&self, name: &str) -> StoreResult<Option<Vec<EdgeKey>>>;

    /// Number of neighbors of `name`.
    async fn node_degree(&self, name: &str) -> StoreResult<usize>;

    /// Sum of both endpoint degrees.
    async fn edge_degree(&self, a: &str, b: &str) -> StoreResult<usize>;

    async fn upsert_node(&self, node: Node) -> StoreResult<()>;

    /// Endpoints must already exist.
    async fn upsert_edge(&self, edge: Edge) -> StoreResult<()>;

    async fn node_names(&self) -> StoreResult<Vec<String>>;

    async fn edge_keys(&self) -> StoreResult<Vec<EdgeKey>>;

    /// Recompute the community hierarchy.
    async fn clustering(&self) -> StoreResult<()>;

    /// Communities from the last clustering pass, keyed by community id.
    async fn community_schema(&self) -> StoreResult<BTreeMap<String, Community>>;

    async fn flush(&self) -> StoreResult<()>;
}

/// Content and metadata stored under a vector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A ranked vector search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity to the query
    pub score: f32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl VectorMatch {
    /// A string metadata field, e.g. `entity_name`.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Similarity index over embedded text.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn namespace(&self) -> &str;

    async fn upsert(&self, records: BTreeMap<String, VectorRecord>) -> StoreResult<()>;

    async fn query(&self, text: &str, top_k: usize) -> StoreResult<Vec<VectorMatch>>;

    async fn count(&self) -> StoreResult<usize>;

    async fn flush(&self) -> StoreResult<()>;
}

/// Namespaced key-value store.
#[async_trait]
pub trait KvStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    fn namespace(&self) -> &str;

    async fn all_keys(&self) -> StoreResult<Vec<String>>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<T>>;

    /// One slot per requested id, `None` where absent.
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Option<T>>>;

    /// The subset of `keys` not yet present in the store.
    async fn filter_keys(&self, keys: &[String]) -> StoreResult<BTreeSet<String>>;

    async fn upsert(&self, data: BTreeMap<String, T>) -> StoreResult<()>;

    async fn drop_all(&self) -> StoreResult<()>;

    async fn flush(&self) -> StoreResult<()>;
}
