//! Local retrieval: turns a question into a token-budgeted context block
//! built from a (projected) graph.
//!
//! Matched entities are refined first. Every description fragment is
//! scored against the question and only the globally best fragments
//! survive; entities left without fragments drop out. Source passages and
//! relationships are then drawn from the refined entities, and each table
//! is cut to its token budget.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use timegraph_core::graph::render_fragments;
use timegraph_core::{
    Edge, Embedder, Fragment, GraphStore, KvStore, Node, Result, TextChunk, VectorStore,
};
use timegraph_providers::{CallParams, LlmClient};
use timegraph_storage::cosine_similarity;
use tracing::{debug, info, warn};

use crate::param::QueryParam;
use crate::prompts::{FAIL_RESPONSE, LOCAL_RAG_RESPONSE, LOCAL_RAG_SYSTEM, fill};
use crate::table::{section, to_csv};
use crate::token::truncate_by_tokens;

/// Texts per embedding call when scoring fragments.
const EMBED_BATCH: usize = 32;

#[derive(Debug, Clone)]
struct ScoredFragment {
    fragment: Fragment,
    similarity: f32,
}

#[derive(Debug, Clone)]
struct RankedEntity {
    node: Node,
    /// Node degree in the active graph
    rank: usize,
    fragments: Vec<ScoredFragment>,
    score: f32,
}

impl RankedEntity {
    fn description(&self) -> String {
        render_fragments(self.fragments.iter().map(|f| &f.fragment))
    }
}

#[derive(Debug, Clone)]
struct RankedEdge {
    edge: Edge,
    rank: usize,
    description: String,
}

#[derive(Debug)]
struct TextUnit {
    chunk: TextChunk,
    order: usize,
    relation_counts: usize,
}

/// Builds local query contexts against a graph and entity index.
#[derive(Clone)]
pub struct RetrievalAssembler {
    chunks: Arc<dyn KvStore<TextChunk>>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalAssembler {
    pub fn new(chunks: Arc<dyn KvStore<TextChunk>>, embedder: Arc<dyn Embedder>) -> Self {
        Self { chunks, embedder }
    }

    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batches = texts.chunks(EMBED_BATCH).map(|batch| self.embedder.embed(batch));
        Ok(try_join_all(batches).await?.into_iter().flatten().collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    /// Score every fragment of the matched entities, keep the globally best
    /// ones and rank entities by the mean similarity of what is left.
    async fn refine_entities(
        &self,
        matched: Vec<(Node, usize)>,
        query_vector: &[f32],
        param: &QueryParam,
    ) -> Result<Vec<RankedEntity>> {
        let texts: Vec<String> = matched
            .iter()
            .flat_map(|(node, _)| node.description.iter().map(Fragment::marked))
            .collect();
        let vectors = self.embed_all(texts).await?;
        let mut similarities = vectors.iter().map(|v| cosine_similarity(v, query_vector));

        let mut entities: Vec<RankedEntity> = matched
            .into_iter()
            .map(|(node, rank)| {
                let mut fragments: Vec<ScoredFragment> = node
                    .description
                    .iter()
                    .map(|fragment| ScoredFragment {
                        fragment: fragment.clone(),
                        similarity: similarities.next().unwrap_or(0.0),
                    })
                    .collect();
                fragments.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
                RankedEntity {
                    node,
                    rank,
                    fragments,
                    score: 0.0,
                }
            })
            .collect();

        let mut all: Vec<(f32, String)> = entities
            .iter()
            .flat_map(|e| e.fragments.iter().map(|f| (f.similarity, f.fragment.marked())))
            .collect();
        all.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut useful: BTreeSet<String> = BTreeSet::new();
        for (_, text) in all {
            if useful.len() >= param.top_fragments {
                break;
            }
            useful.insert(text);
        }

        for entity in &mut entities {
            entity.fragments.retain(|f| useful.contains(&f.fragment.marked()));
            if !entity.fragments.is_empty() {
                let total: f32 = entity.fragments.iter().map(|f| f.similarity).sum();
                entity.score = total / entity.fragments.len() as f32;
            }
        }
        entities.retain(|e| !e.fragments.is_empty());
        entities.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(entities)
    }

    /// Source passages of the refined entities. Passages that also back a
    /// one-hop neighbor rank higher within the same entity.
    async fn related_text_units(
        &self,
        graph: &dyn GraphStore,
        entities: &[RankedEntity],
        param: &QueryParam,
    ) -> Result<Vec<TextChunk>> {
        let mut neighbor_sources: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut entity_edges = Vec::with_capacity(entities.len());
        for entity in entities {
            let edges = graph.get_node_edges(&entity.node.name).await?.unwrap_or_default();
            for key in &edges {
                let Some(neighbor) = key.other(&entity.node.name) else {
                    continue;
                };
                if neighbor_sources.contains_key(neighbor) {
                    continue;
                }
                if let Some(node) = graph.get_node(neighbor).await? {
                    neighbor_sources.insert(neighbor.to_string(), node.source_id);
                }
            }
            entity_edges.push(edges);
        }

        let mut seen = BTreeSet::new();
        let mut units = Vec::new();
        let mut missing = 0usize;
        for (order, (entity, edges)) in entities.iter().zip(&entity_edges).enumerate() {
            for chunk_id in entity.fragments.iter().flat_map(|f| f.fragment.source_ids.iter()) {
                if !seen.insert(chunk_id.clone()) {
                    continue;
                }
                let relation_counts = edges
                    .iter()
                    .filter_map(|key| key.other(&entity.node.name))
                    .filter(|n| neighbor_sources.get(*n).is_some_and(|s| s.contains(chunk_id)))
                    .count();
                match self.chunks.get_by_id(chunk_id).await? {
                    Some(chunk) => units.push(TextUnit {
                        chunk,
                        order,
                        relation_counts,
                    }),
                    None => missing += 1,
                }
            }
        }
        if missing > 0 {
            warn!(missing, "Text chunks are missing, maybe the storage is damaged");
        }

        units.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then(b.relation_counts.cmp(&a.relation_counts))
        });
        let units = truncate_by_tokens(units, param.max_token_for_text_unit, |u| {
            u.chunk.content.clone()
        });
        Ok(units.into_iter().map(|u| u.chunk).collect())
    }

    /// Relationships incident to the refined entities, strongest first.
    async fn related_edges(
        &self,
        graph: &dyn GraphStore,
        entities: &[RankedEntity],
        query_vector: &[f32],
        param: &QueryParam,
    ) -> Result<Vec<RankedEdge>> {
        let mut keys = BTreeSet::new();
        for entity in entities {
            keys.extend(graph.get_node_edges(&entity.node.name).await?.unwrap_or_default());
        }

        let mut edges = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(edge) = graph.get_edge(&key.source, &key.target).await? else {
                continue;
            };
            let rank = graph.edge_degree(&key.source, &key.target).await?;
            edges.push(RankedEdge {
                description: edge.description_text(),
                edge,
                rank,
            });
        }
        edges.sort_by(|a, b| {
            b.rank
                .cmp(&a.rank)
                .then(b.edge.weight.total_cmp(&a.edge.weight))
        });

        for ranked in &mut edges {
            if ranked.edge.description.len() <= param.edge_fragment_limit {
                continue;
            }
            let texts: Vec<String> = ranked.edge.description.iter().map(Fragment::marked).collect();
            let vectors = self.embed_all(texts.clone()).await?;
            let mut scored: Vec<(f32, String)> = vectors
                .iter()
                .map(|v| cosine_similarity(v, query_vector))
                .zip(texts)
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(param.edge_fragment_limit);
            ranked.description = scored
                .into_iter()
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join(timegraph_core::GRAPH_FIELD_SEP);
        }

        Ok(truncate_by_tokens(edges, param.max_token_for_local_context, |e| {
            e.description.clone()
        }))
    }

    /// Assemble the entity, relationship and source tables for `query`.
    ///
    /// `None` when no entity matches.
    pub async fn build_context(
        &self,
        query: &str,
        graph: &dyn GraphStore,
        entities: &dyn VectorStore,
        param: &QueryParam,
    ) -> Result<Option<String>> {
        let hits = entities.query(query, param.top_k).await?;
        if hits.is_empty() {
            debug!(query, "No entity matched the query");
            return Ok(None);
        }

        let mut matched = Vec::with_capacity(hits.len());
        let mut missing = 0usize;
        for hit in &hits {
            let Some(name) = hit.meta_str("entity_name") else {
                missing += 1;
                continue;
            };
            match graph.get_node(name).await? {
                Some(node) => {
                    let degree = graph.node_degree(name).await?;
                    matched.push((node, degree));
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!(missing, "Some nodes are missing, maybe the storage is damaged");
        }

        let query_vector = self.embed_query(query).await?;
        let refined = self.refine_entities(matched, &query_vector, param).await?;
        let text_units = self.related_text_units(graph, &refined, param).await?;
        let relations = self.related_edges(graph, &refined, &query_vector, param).await?;
        let refined = truncate_by_tokens(refined, param.max_token_for_entities, |e| e.description());

        info!(
            entities = refined.len(),
            relations = relations.len(),
            text_units = text_units.len(),
            "Local context assembled"
        );
        Ok(Some(render_context(&refined, &relations, &text_units)))
    }

    /// Answer `query` from the local context of `graph`.
    pub async fn local_query(
        &self,
        llm: &LlmClient,
        query: &str,
        graph: &dyn GraphStore,
        entities: &dyn VectorStore,
        param: &QueryParam,
    ) -> Result<String> {
        let Some(context) = self.build_context(query, graph, entities, param).await? else {
            return Ok(FAIL_RESPONSE.to_string());
        };
        if param.only_need_context {
            return Ok(context);
        }
        let prompt = fill(
            LOCAL_RAG_RESPONSE,
            &[("question", query), ("context_data", &context)],
        );
        Ok(llm
            .complete(&prompt, Some(LOCAL_RAG_SYSTEM), &[], CallParams::default())
            .await?)
    }
}

fn render_context(entities: &[RankedEntity], relations: &[RankedEdge], units: &[TextChunk]) -> String {
    let entity_rows = entities.iter().enumerate().map(|(i, e)| {
        vec![
            i.to_string(),
            e.node.name.clone(),
            e.node.entity_type.clone(),
            e.description(),
            e.rank.to_string(),
        ]
    });
    let entity_table = to_csv(
        std::iter::once(["id", "entity", "type", "description", "rank"].map(String::from).to_vec())
            .chain(entity_rows),
    );

    let relation_rows = relations.iter().enumerate().map(|(i, r)| {
        vec![
            i.to_string(),
            r.edge.source.clone(),
            r.edge.target.clone(),
            r.description.clone(),
            r.edge.weight.to_string(),
            r.rank.to_string(),
        ]
    });
    let relation_table = to_csv(
        std::iter::once(
            ["id", "source", "target", "description", "weight", "rank"]
                .map(String::from)
                .to_vec(),
        )
        .chain(relation_rows),
    );

    let source_rows = units.iter().enumerate().map(|(i, chunk)| {
        vec![
            format!("########text unit-{i}:"),
            chunk.source_time(),
            format!("content:{}##########", chunk.content),
        ]
    });
    let source_table = to_csv(
        std::iter::once(["id", "data source time", "content"].map(String::from).to_vec())
            .chain(source_rows),
    );

    format!(
        "\n{}\n{}\n{}\n",
        section("Entities", &entity_table),
        section("Relationships", &relation_table),
        section("Sources", &source_table)
    )
}
