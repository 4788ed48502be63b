//! In-memory undirected graph store with JSON persistence.
//!
//! Storage location: `{working_dir}/graph_{namespace}.json`. The file holds
//! node and edge lists plus the last computed community schema; adjacency
//! is rebuilt on load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timegraph_core::{Community, Edge, EdgeKey, GraphStore, Node, StorageError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cluster::{GraphView, detect_communities};
use crate::persist::{read_json, write_json};

#[derive(Default, Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    communities: BTreeMap<String, Community>,
}

#[derive(Default)]
struct GraphData {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    communities: BTreeMap<String, Community>,
}

impl GraphData {
    fn from_file(file: GraphFile) -> Self {
        let mut data = GraphData {
            nodes: file.nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            communities: file.communities,
            ..Default::default()
        };
        for edge in file.edges {
            data.insert_edge(edge);
        }
        data
    }

    fn to_file(&self) -> GraphFile {
        GraphFile {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            communities: self.communities.clone(),
        }
    }

    fn insert_edge(&mut self, mut edge: Edge) {
        let key = edge.key();
        edge.source = key.source.clone();
        edge.target = key.target.clone();
        self.adjacency
            .entry(key.source.clone())
            .or_default()
            .insert(key.target.clone());
        self.adjacency
            .entry(key.target.clone())
            .or_default()
            .insert(key.source.clone());
        self.edges.insert(key, edge);
    }

    fn degree(&self, name: &str) -> usize {
        self.adjacency.get(name).map(BTreeSet::len).unwrap_or(0)
    }
}

/// Graph store backed by ordered maps.
pub struct JsonGraphStore {
    namespace: String,
    path: Option<PathBuf>,
    max_label_rounds: usize,
    data: Arc<RwLock<GraphData>>,
}

impl JsonGraphStore {
    /// Open the namespace under `working_dir`, loading any existing file.
    pub fn open(working_dir: &Path, namespace: &str) -> Result<Self, StorageError> {
        let path = working_dir.join(format!("graph_{namespace}.json"));
        let data = read_json::<GraphFile>(&path)?
            .map(GraphData::from_file)
            .unwrap_or_default();
        debug!(
            namespace,
            nodes = data.nodes.len(),
            edges = data.edges.len(),
            "Graph store loaded"
        );
        Ok(Self {
            namespace: namespace.to_string(),
            path: Some(path),
            max_label_rounds: 20,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// A graph that is never written to disk, e.g. a query-time projection.
    pub fn in_memory(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            path: None,
            max_label_rounds: 20,
            data: Arc::new(RwLock::new(GraphData::default())),
        }
    }

    /// Override the label propagation round limit used by `clustering`.
    pub fn with_max_label_rounds(mut self, rounds: usize) -> Self {
        self.max_label_rounds = rounds.max(1);
        self
    }

    pub async fn node_count(&self) -> usize {
        self.data.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.data.read().await.edges.len()
    }
}

#[async_trait]
impl GraphStore for JsonGraphStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn has_node(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.nodes.contains_key(name))
    }

    async fn has_edge(&self, a: &str, b: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.edges.contains_key(&EdgeKey::new(a, b)))
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, StorageError> {
        Ok(self.data.read().await.nodes.get(name).cloned())
    }

    async fn get_edge(&self, a: &str, b: &str) -> Result<Option<Edge>, StorageError> {
        Ok(self.data.read().await.edges.get(&EdgeKey::new(a, b)).cloned())
    }

    async fn get_node_edges(&self, name: &str) -> Result<Option<Vec<EdgeKey>>, StorageError> {
        let data = self.data.read().await;
        if !data.nodes.contains_key(name) {
            return Ok(None);
        }
        let keys = data
            .adjacency
            .get(name)
            .into_iter()
            .flatten()
            .map(|other| EdgeKey::new(name, other.as_str()))
            .collect();
        Ok(Some(keys))
    }

    async fn node_degree(&self, name: &str) -> Result<usize, StorageError> {
        Ok(self.data.read().await.degree(name))
    }

    async fn edge_degree(&self, a: &str, b: &str) -> Result<usize, StorageError> {
        let data = self.data.read().await;
        Ok(data.degree(a) + data.degree(b))
    }

    async fn upsert_node(&self, node: Node) -> Result<(), StorageError> {
        self.data.write().await.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    async fn upsert_edge(&self, edge: Edge) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        for endpoint in [&edge.source, &edge.target] {
            if !data.nodes.contains_key(endpoint) {
                return Err(StorageError::Storage(format!(
                    "Edge {} references missing node {endpoint}",
                    edge.key()
                )));
            }
        }
        data.insert_edge(edge);
        Ok(())
    }

    async fn node_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.read().await.nodes.keys().cloned().collect())
    }

    async fn edge_keys(&self) -> Result<Vec<EdgeKey>, StorageError> {
        Ok(self.data.read().await.edges.keys().cloned().collect())
    }

    async fn clustering(&self) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        let communities = {
            let view = GraphView {
                nodes: &data.nodes,
                edges: &data.edges,
                adjacency: &data.adjacency,
            };
            detect_communities(&view, self.max_label_rounds)
        };
        info!(
            namespace = %self.namespace,
            communities = communities.len(),
            "Clustering finished"
        );
        data.communities = communities;
        Ok(())
    }

    async fn community_schema(&self) -> Result<BTreeMap<String, Community>, StorageError> {
        Ok(self.data.read().await.communities.clone())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = self.data.read().await.to_file();
        write_json(path, &file).await?;
        debug!(
            namespace = %self.namespace,
            nodes = file.nodes.len(),
            edges = file.edges.len(),
            "Graph store flushed"
        );
        Ok(())
    }
}
