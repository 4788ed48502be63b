//! Temporal projection: a point-in-time view of the multi-period graph.
//!
//! A record seen in exactly one selected period passes through untouched.
//! Records spanning several periods are cut down to the fragments and
//! source chunks of the selected ones, and edge weights are recomputed from
//! their merge history. Everything else is left out, except that a kept
//! edge always has both endpoints: a node without a selected period is
//! replaced by an `UNKNOWN` stub. The result lives in scratch stores that
//! are dropped after the query.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use timegraph_core::{
    Edge, Embedder, GraphStore, KvStore, Node, Period, StorageError, TextChunk,
    UNKNOWN_ENTITY_TYPE, VectorRecord, VectorStore, WeightHeuristic,
};
use timegraph_storage::{JsonGraphStore, NanoVectorStore};
use tracing::{debug, info, warn};

use crate::merge::entity_vector_record;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Time selector is empty")]
    Empty,

    #[error("Invalid year range {0}")]
    InvalidRange(String),

    #[error("Year range {range} spans more than {max} years")]
    RangeTooWide { range: String, max: u32 },
}

/// Range cap used when no configured one is given.
pub const DEFAULT_MAX_RANGE_YEARS: u32 = 200;

impl From<SelectorError> for timegraph_core::Error {
    fn from(e: SelectorError) -> Self {
        timegraph_core::Error::Planner(e.to_string())
    }
}

/// The set of periods a query is scoped to. Ranges are expanded up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSelector {
    periods: BTreeSet<Period>,
}

impl TimeSelector {
    pub fn new(periods: impl IntoIterator<Item = Period>) -> Self {
        Self {
            periods: periods.into_iter().collect(),
        }
    }

    /// Parse `2022`, `2012<SEP>2021`, `2012,2021` or `2010-2015`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Self::parse_bounded(input, DEFAULT_MAX_RANGE_YEARS)
    }

    /// Like [`parse`](Self::parse), rejecting ranges wider than `max_years`.
    pub fn parse_bounded(input: &str, max_years: u32) -> Result<Self, SelectorError> {
        let mut periods = BTreeSet::new();
        for piece in input
            .split("<SEP>")
            .flat_map(|p| p.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            match Self::parse_range(piece, max_years)? {
                Some((start, end)) => {
                    periods.extend((start..=end).map(|y| Period::new(y.to_string())))
                }
                None => {
                    periods.insert(Period::from(piece));
                }
            }
        }
        if periods.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self { periods })
    }

    fn parse_range(piece: &str, max_years: u32) -> Result<Option<(u32, u32)>, SelectorError> {
        let Some((start, end)) = piece.split_once('-') else {
            return Ok(None);
        };
        match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
            (Ok(start), Ok(end)) if start > end => {
                Err(SelectorError::InvalidRange(piece.to_string()))
            }
            (Ok(start), Ok(end)) if end - start >= max_years => Err(SelectorError::RangeTooWide {
                range: piece.to_string(),
                max: max_years,
            }),
            (Ok(start), Ok(end)) => Ok(Some((start, end))),
            _ => Ok(None),
        }
    }

    pub fn contains(&self, period: &Period) -> bool {
        self.periods.contains(period)
    }

    pub fn periods(&self) -> &BTreeSet<Period> {
        &self.periods
    }

    fn intersect(&self, timestamp: &BTreeSet<Period>) -> BTreeSet<Period> {
        timestamp.intersection(&self.periods).cloned().collect()
    }
}

impl std::fmt::Display for TimeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<&str> = self.periods.iter().map(Period::as_str).collect();
        write!(f, "{}", tags.join(","))
    }
}

fn retain_sources(
    source_id: &BTreeSet<String>,
    periods: &BTreeSet<Period>,
    chunk_periods: &BTreeMap<String, Period>,
) -> BTreeSet<String> {
    source_id
        .iter()
        .filter(|id| chunk_periods.get(*id).is_some_and(|p| periods.contains(p)))
        .cloned()
        .collect()
}

/// Project one node; `None` when it has no selected period.
pub fn project_node(
    node: &Node,
    selector: &TimeSelector,
    chunk_periods: &BTreeMap<String, Period>,
) -> Option<Node> {
    if let Some(period) = node.single_period() {
        return selector.contains(period).then(|| node.clone());
    }
    let periods = selector.intersect(&node.timestamp);
    if periods.is_empty() {
        return None;
    }
    Some(Node {
        name: node.name.clone(),
        entity_type: node.entity_type.clone(),
        description: node
            .description
            .iter()
            .filter(|f| periods.contains(&f.period))
            .cloned()
            .collect(),
        source_id: retain_sources(&node.source_id, &periods, chunk_periods),
        timestamp: periods,
    })
}

/// Project one edge; `None` when it has no selected period.
pub fn project_edge(
    edge: &Edge,
    selector: &TimeSelector,
    chunk_periods: &BTreeMap<String, Period>,
    heuristic: WeightHeuristic,
) -> Option<Edge> {
    if let Some(period) = edge.single_period() {
        return selector.contains(period).then(|| edge.clone());
    }
    let periods = selector.intersect(&edge.timestamp);
    if periods.is_empty() {
        return None;
    }
    Some(Edge {
        source: edge.source.clone(),
        target: edge.target.clone(),
        weight: heuristic.apply(&edge.weight_history).unwrap_or(edge.weight),
        order: edge.order,
        weight_history: edge.weight_history.clone(),
        description: edge
            .description
            .iter()
            .filter(|f| periods.contains(&f.period))
            .cloned()
            .collect(),
        source_id: retain_sources(&edge.source_id, &periods, chunk_periods),
        timestamp: periods,
    })
}

/// `UNKNOWN` endpoint for a projected edge whose node has no selected
/// period. It carries the edge's projected provenance and is not indexed.
fn endpoint_stub(name: &str, edge: &Edge) -> Node {
    Node {
        name: name.to_string(),
        entity_type: UNKNOWN_ENTITY_TYPE.to_string(),
        description: edge.description.clone(),
        source_id: edge.source_id.clone(),
        timestamp: edge.timestamp.clone(),
    }
}

/// Scratch graph and entity index scoped to one selector.
pub struct Projection {
    pub graph: Arc<JsonGraphStore>,
    pub entities: Arc<NanoVectorStore>,
    /// Projected nodes plus endpoint stubs
    pub node_count: usize,
    pub edge_count: usize,
}

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }
}

pub struct TemporalProjector {
    chunks: Arc<dyn KvStore<TextChunk>>,
    embedder: Arc<dyn Embedder>,
    heuristic: WeightHeuristic,
    batch_num: usize,
    threshold: f32,
}

impl TemporalProjector {
    pub fn new(chunks: Arc<dyn KvStore<TextChunk>>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunks,
            embedder,
            heuristic: WeightHeuristic::default(),
            batch_num: 32,
            threshold: 0.2,
        }
    }

    pub fn with_heuristic(mut self, heuristic: WeightHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Batch size and similarity threshold of the scratch entity index.
    pub fn with_index_settings(mut self, batch_num: usize, threshold: f32) -> Self {
        self.batch_num = batch_num;
        self.threshold = threshold;
        self
    }

    /// Periods of the given chunks; unknown chunks are left out.
    async fn chunk_periods(
        &self,
        ids: BTreeSet<String>,
    ) -> Result<BTreeMap<String, Period>, StorageError> {
        let ids: Vec<String> = ids.into_iter().collect();
        let chunks = self.chunks.get_by_ids(&ids).await?;
        Ok(ids
            .into_iter()
            .zip(chunks)
            .filter_map(|(id, chunk)| chunk.map(|c| (id, c.period)))
            .collect())
    }

    pub async fn project(
        &self,
        graph: &dyn GraphStore,
        selector: &TimeSelector,
    ) -> Result<Projection, StorageError> {
        let mut nodes = Vec::new();
        for name in graph.node_names().await? {
            if let Some(node) = graph.get_node(&name).await? {
                nodes.push(node);
            }
        }
        let mut edges = Vec::new();
        for key in graph.edge_keys().await? {
            if let Some(edge) = graph.get_edge(&key.source, &key.target).await? {
                edges.push(edge);
            }
        }

        // Only records that span several periods need their chunks looked up
        let wanted: BTreeSet<String> = nodes
            .iter()
            .filter(|n| n.single_period().is_none())
            .flat_map(|n| n.source_id.iter().cloned())
            .chain(
                edges
                    .iter()
                    .filter(|e| e.single_period().is_none())
                    .flat_map(|e| e.source_id.iter().cloned()),
            )
            .collect();
        let chunk_periods = self.chunk_periods(wanted).await?;

        let scratch = JsonGraphStore::in_memory("projection");
        let mut vectors: BTreeMap<String, VectorRecord> = BTreeMap::new();
        let mut included = BTreeSet::new();
        for node in &nodes {
            let Some(projected) = project_node(node, selector, &chunk_periods) else {
                continue;
            };
            let (id, record) = entity_vector_record(&projected);
            vectors.insert(id, record);
            included.insert(projected.name.clone());
            scratch.upsert_node(projected).await?;
        }

        let mut edge_count = 0;
        let mut stubs = 0;
        for edge in &edges {
            let Some(projected) = project_edge(edge, selector, &chunk_periods, self.heuristic)
            else {
                continue;
            };
            for endpoint in [&projected.source, &projected.target] {
                if included.contains(endpoint) || scratch.has_node(endpoint).await? {
                    continue;
                }
                debug!(node = %endpoint, edge = %projected.key(), "Stubbing excluded endpoint");
                scratch.upsert_node(endpoint_stub(endpoint, &projected)).await?;
                stubs += 1;
            }
            scratch.upsert_edge(projected).await?;
            edge_count += 1;
        }

        let entities = NanoVectorStore::in_memory("projection_entities", self.embedder.clone())
            .with_batch_num(self.batch_num)
            .with_threshold(self.threshold);
        if included.is_empty() {
            warn!(selector = %selector, "Temporal projection is empty");
        } else {
            entities.upsert(vectors).await?;
        }

        info!(
            selector = %selector,
            nodes = included.len(),
            stubs,
            edges = edge_count,
            "Graph projected"
        );
        Ok(Projection {
            graph: Arc::new(scratch),
            entities: Arc::new(entities),
            node_count: included.len() + stubs,
            edge_count,
        })
    }
}
