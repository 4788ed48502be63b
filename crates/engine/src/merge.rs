//! Merge engine: folds a batch of extracted candidates into the durable
//! graph.
//!
//! Node merges are independent of each other and run concurrently. Edge
//! merges run one at a time in key order because an edge may need to
//! create a stub for an endpoint that another edge also touches.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use timegraph_core::graph::union_fragments;
use timegraph_core::{
    Edge, EdgeCandidate, EdgeKey, Fragment, GraphStore, Node, NodeCandidate, Period,
    StorageError, UNKNOWN_ENTITY_TYPE, VectorRecord, compute_id,
};
use tracing::{debug, info};

use crate::extraction::ExtractionBatch;

/// The most frequent type, ties going to the alphabetically first.
fn dominant_type<'a>(types: impl IntoIterator<Item = &'a str>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in types {
        *counts.entry(t).or_default() += 1;
    }
    // BTreeMap iterates alphabetically, so the first maximum wins a tie
    let mut best: Option<(&str, usize)> = None;
    for (t, n) in counts {
        if best.is_none_or(|(_, m)| n > m) {
            best = Some((t, n));
        }
    }
    best.map(|(t, _)| t.to_string())
        .unwrap_or_else(|| UNKNOWN_ENTITY_TYPE.to_string())
}

/// Merge a node's new candidates into its existing record.
pub fn merge_node(
    name: &str,
    candidates: &[NodeCandidate],
    existing: Option<Node>,
    period: &Period,
) -> Node {
    let entity_type = dominant_type(
        candidates
            .iter()
            .map(|c| c.entity_type.as_str())
            .chain(existing.as_ref().map(|n| n.entity_type.as_str())),
    );

    let (old_description, mut source_id, mut timestamp) = match existing {
        Some(node) => (node.description, node.source_id, node.timestamp),
        None => Default::default(),
    };
    source_id.extend(candidates.iter().map(|c| c.source_id.clone()));
    timestamp.insert(period.clone());

    Node {
        name: name.to_string(),
        entity_type,
        description: union_fragments(&old_description, candidates.iter().map(|c| c.fragment(period))),
        source_id,
        timestamp,
    }
}

/// Merge an edge's new candidates into its existing record.
pub fn merge_edge(
    key: &EdgeKey,
    candidates: &[EdgeCandidate],
    existing: Option<Edge>,
    period: &Period,
) -> Edge {
    let batch_weight: f64 = candidates.iter().map(|c| c.weight).sum();
    let batch_order = candidates.iter().map(|c| c.order).min();

    let (weight, order, mut weight_history, old_description, mut source_id, mut timestamp) =
        match existing {
            Some(edge) => (
                edge.weight,
                Some(edge.order),
                edge.weight_history,
                edge.description,
                edge.source_id,
                edge.timestamp,
            ),
            None => (0.0, None, Vec::new(), Vec::new(), BTreeSet::new(), BTreeSet::new()),
        };
    weight_history.push(batch_weight);
    source_id.extend(candidates.iter().map(|c| c.source_id.clone()));
    timestamp.insert(period.clone());

    Edge {
        source: key.source.clone(),
        target: key.target.clone(),
        weight: weight + batch_weight,
        order: order.into_iter().chain(batch_order).min().unwrap_or(1),
        weight_history,
        description: union_fragments(&old_description, candidates.iter().map(|c| c.fragment(period))),
        source_id,
        timestamp,
    }
}

/// Placeholder for an endpoint only known through an edge.
pub fn stub_node(name: &str, fragments: Vec<Fragment>, period: &Period) -> Node {
    let source_id = fragments
        .iter()
        .flat_map(|f| f.source_ids.iter().cloned())
        .collect();
    Node {
        name: name.to_string(),
        entity_type: UNKNOWN_ENTITY_TYPE.to_string(),
        description: union_fragments(&[], fragments),
        source_id,
        timestamp: BTreeSet::from([period.clone()]),
    }
}

/// Vector index entry for an entity: `ent-` id, name plus description.
pub fn entity_vector_record(node: &Node) -> (String, VectorRecord) {
    let mut metadata = serde_json::Map::new();
    metadata.insert("entity_name".into(), serde_json::Value::String(node.name.clone()));
    (
        compute_id("ent-", &node.name),
        VectorRecord {
            content: format!("{}{}", node.name, node.description_text()),
            metadata,
        },
    )
}

/// What a batch merge wrote.
#[derive(Debug, Clone, Default)]
pub struct MergedBatch {
    /// Nodes merged from entity candidates, in name order
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Endpoints synthesized for edges
    pub stubs: Vec<String>,
}

/// Merge every candidate of `batch` into `graph` under `period`.
pub async fn merge_batch(
    graph: &dyn GraphStore,
    batch: &ExtractionBatch,
    period: &Period,
) -> Result<MergedBatch, StorageError> {
    let node_tasks = batch.nodes.iter().map(|(name, candidates)| async move {
        let existing = graph.get_node(name).await?;
        let node = merge_node(name, candidates, existing, period);
        graph.upsert_node(node.clone()).await?;
        Ok::<_, StorageError>(node)
    });
    let nodes = try_join_all(node_tasks).await?;

    let mut merged = MergedBatch {
        nodes,
        ..Default::default()
    };

    for (key, candidates) in &batch.edges {
        for endpoint in [&key.source, &key.target] {
            if graph.has_node(endpoint).await? {
                continue;
            }
            let fragments = candidates.iter().map(|c| c.fragment(period)).collect();
            graph.upsert_node(stub_node(endpoint, fragments, period)).await?;
            debug!(node = %endpoint, edge = %key, "Created stub endpoint");
            merged.stubs.push(endpoint.clone());
        }
        let existing = graph.get_edge(&key.source, &key.target).await?;
        let edge = merge_edge(key, candidates, existing, period);
        graph.upsert_edge(edge.clone()).await?;
        merged.edges.push(edge);
    }

    info!(
        period = %period,
        nodes = merged.nodes.len(),
        edges = merged.edges.len(),
        stubs = merged.stubs.len(),
        "Batch merged"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timegraph_storage::JsonGraphStore;

    fn node(name: &str, entity_type: &str, description: &str, chunk: &str) -> NodeCandidate {
        NodeCandidate {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            source_id: chunk.into(),
        }
    }

    fn edge(a: &str, b: &str, weight: f64, order: u32, chunk: &str) -> EdgeCandidate {
        EdgeCandidate {
            source: a.into(),
            target: b.into(),
            description: format!("{a} relates to {b}"),
            weight,
            order,
            source_id: chunk.into(),
        }
    }

    #[test]
    fn node_merge_is_idempotent() {
        let period = Period::from("2022");
        let candidates = vec![node("AUDI", "ORGANIZATION", "D1", "c1")];
        let first = merge_node("AUDI", &candidates, None, &period);
        let second = merge_node("AUDI", &candidates, Some(first.clone()), &period);
        assert_eq!(first, second);
    }

    #[test]
    fn node_merge_accumulates_periods() {
        let first = merge_node("AUDI", &[node("AUDI", "ORGANIZATION", "D1", "c1")], None, &Period::from("2022"));
        let second = merge_node(
            "AUDI",
            &[node("AUDI", "ORGANIZATION", "D2", "c2")],
            Some(first),
            &Period::from("2023"),
        );
        assert_eq!(second.description_text(), "D1-data from 2022-<SEP>D2-data from 2023-");
        assert_eq!(second.timestamp.len(), 2);
        assert_eq!(second.source_id.len(), 2);
    }

    #[test]
    fn type_ties_go_to_alphabetical_first() {
        let candidates = vec![
            node("X", "PERSON", "a", "c1"),
            node("X", "ORGANIZATION", "b", "c1"),
        ];
        let merged = merge_node("X", &candidates, None, &Period::from("2022"));
        assert_eq!(merged.entity_type, "ORGANIZATION");

        let existing = merge_node("X", &[node("X", "PERSON", "a", "c1")], None, &Period::from("2022"));
        let merged = merge_node("X", &[node("X", "PERSON", "c", "c2"), node("X", "GEO", "d", "c2")], Some(existing), &Period::from("2023"));
        assert_eq!(merged.entity_type, "PERSON");
    }

    #[test]
    fn edge_weight_sums_and_order_takes_min() {
        let key = EdgeKey::new("A", "B");
        let period = Period::from("2022");
        let first = merge_edge(&key, &[edge("A", "B", 2.0, 3, "c1")], None, &period);
        let second = merge_edge(
            &key,
            &[edge("B", "A", 3.0, 1, "c2"), edge("A", "B", 1.0, 5, "c3")],
            Some(first),
            &Period::from("2023"),
        );
        assert_eq!(second.weight, 6.0);
        assert_eq!(second.order, 1);
        assert_eq!(second.weight_history, vec![2.0, 4.0]);
        assert_eq!(second.source, "A");
    }

    #[test]
    fn stub_carries_edge_provenance() {
        let period = Period::from("2022");
        let stub = stub_node("VW", vec![edge("AUDI", "VW", 1.0, 1, "c1").fragment(&period)], &period);
        assert_eq!(stub.entity_type, UNKNOWN_ENTITY_TYPE);
        assert!(stub.source_id.contains("c1"));
        assert_eq!(stub.single_period(), Some(&period));
    }

    #[test]
    fn vector_record_uses_entity_id() {
        let n = merge_node("AUDI", &[node("AUDI", "ORGANIZATION", "D1", "c1")], None, &Period::from("2022"));
        let (id, record) = entity_vector_record(&n);
        assert_eq!(id, compute_id("ent-", "AUDI"));
        assert_eq!(record.content, "AUDID1-data from 2022-");
        assert_eq!(record.metadata["entity_name"], "AUDI");
    }

    #[tokio::test]
    async fn batch_merge_synthesizes_missing_endpoints() {
        let graph = JsonGraphStore::in_memory("test");
        let mut batch = ExtractionBatch::default();
        batch.nodes.insert("AUDI".into(), vec![node("AUDI", "ORGANIZATION", "D1", "c1")]);
        batch.edges.insert(EdgeKey::new("AUDI", "VW"), vec![edge("VW", "AUDI", 2.0, 1, "c1")]);

        let merged = merge_batch(&graph, &batch, &Period::from("2022")).await.unwrap();
        assert_eq!(merged.nodes.len(), 1);
        assert_eq!(merged.stubs, vec!["VW".to_string()]);
        assert!(graph.has_edge("VW", "AUDI").await.unwrap());
        let vw = graph.get_node("VW").await.unwrap().unwrap();
        assert_eq!(vw.entity_type, UNKNOWN_ENTITY_TYPE);
        assert_eq!(graph.get_node("AUDI").await.unwrap().unwrap().entity_type, "ORGANIZATION");
    }

    #[tokio::test]
    async fn repeated_batch_accumulates_weight_history() {
        let graph = JsonGraphStore::in_memory("test");
        let mut batch = ExtractionBatch::default();
        batch.nodes.insert("A".into(), vec![node("A", "GEO", "a", "c1")]);
        batch.nodes.insert("B".into(), vec![node("B", "GEO", "b", "c1")]);
        batch.edges.insert(EdgeKey::new("A", "B"), vec![edge("A", "B", 2.0, 1, "c1")]);

        merge_batch(&graph, &batch, &Period::from("2022")).await.unwrap();
        merge_batch(&graph, &batch, &Period::from("2023")).await.unwrap();

        let stored = graph.get_edge("A", "B").await.unwrap().unwrap();
        assert_eq!(stored.weight, 4.0);
        assert_eq!(stored.weight_history, vec![2.0, 2.0]);
        assert_eq!(stored.timestamp.len(), 2);
        assert_eq!(graph.node_count().await, 2);
    }
}
