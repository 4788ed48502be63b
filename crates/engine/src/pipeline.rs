//! The `TimeGraph` facade: one dataset, its stores and the model harness.
//!
//! Ingestion is period-scoped. Every `insert` call tags the documents,
//! chunks and merged fragments it produces with the period it was given,
//! so later queries can project the graph onto any set of periods.

use std::collections::BTreeMap;
use std::sync::Arc;
use timegraph_config::AppConfig;
use timegraph_core::{
    CommunityReportRecord, Error, FullDocument, GraphStore, KvStore, Period, Result, TextChunk,
    VectorRecord, VectorStore, compute_id,
};
use timegraph_providers::{CachedResponse, Harness, build_from_config};
use timegraph_storage::{JsonGraphStore, JsonKvStore, NanoVectorStore};
use tracing::{info, warn};

use crate::chunking::{Chunker, TokenWindowChunker, get_chunks};
use crate::community::CommunityReporter;
use crate::extraction::EntityExtractor;
use crate::global::global_query;
use crate::merge::{entity_vector_record, merge_batch};
use crate::param::QueryParam;
use crate::planner::TemporalPlanner;
use crate::retrieval::RetrievalAssembler;
use crate::temporal::{Projection, TemporalProjector, TimeSelector};

/// Result of an `insert` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted {
        documents: usize,
        chunks: usize,
        entities: usize,
        relations: usize,
    },
    /// Every document was already indexed
    AlreadyIndexed,
    /// Extraction found nothing; the documents were not committed
    NoEntities,
}

pub struct TimeGraph {
    config: AppConfig,
    harness: Harness,
    chunker: Box<dyn Chunker>,
    full_docs: Arc<JsonKvStore<FullDocument>>,
    text_chunks: Arc<JsonKvStore<TextChunk>>,
    chunk_summaries: Arc<JsonKvStore<String>>,
    llm_response_cache: Arc<JsonKvStore<CachedResponse>>,
    community_reports: Arc<JsonKvStore<CommunityReportRecord>>,
    graph: Arc<JsonGraphStore>,
    entities: Arc<NanoVectorStore>,
}

impl TimeGraph {
    /// Open the dataset in `config.working_dir` with the configured
    /// OpenAI-compatible backend.
    pub fn open(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.working_dir).map_err(|e| Error::Config {
            message: format!(
                "Cannot create working directory {}: {e}",
                config.working_dir.display()
            ),
        })?;
        let cache = Arc::new(JsonKvStore::<CachedResponse>::open(
            &config.working_dir,
            "llm_response_cache",
        )?);
        let harness = build_from_config(&config, Some(cache.clone()));
        Self::assemble(config, harness, cache)
    }

    /// Open the dataset with an externally built harness. The harness is
    /// used as is; `llm_response_cache` is only kept for flushing.
    pub fn with_harness(config: AppConfig, harness: Harness) -> Result<Self> {
        let cache = Arc::new(JsonKvStore::<CachedResponse>::open(
            &config.working_dir,
            "llm_response_cache",
        )?);
        Self::assemble(config, harness, cache)
    }

    /// Fails when any store file exists but cannot be loaded.
    fn assemble(
        config: AppConfig,
        harness: Harness,
        llm_response_cache: Arc<JsonKvStore<CachedResponse>>,
    ) -> Result<Self> {
        let dir = config.working_dir.clone();
        let graph = JsonGraphStore::open(&dir, "chunk_entity_relation")?
            .with_max_label_rounds(config.community.max_label_rounds);
        let entities = NanoVectorStore::open(&dir, "entities", harness.embedder.clone())?
            .with_batch_num(config.embedding.batch_num)
            .with_threshold(config.embedding.better_than_threshold);
        let tg = Self {
            chunker: Box::new(TokenWindowChunker::from_config(&config.chunking)),
            full_docs: Arc::new(JsonKvStore::open(&dir, "full_docs")?),
            text_chunks: Arc::new(JsonKvStore::open(&dir, "text_chunks")?),
            chunk_summaries: Arc::new(JsonKvStore::open(&dir, "chunk_summaries")?),
            llm_response_cache,
            community_reports: Arc::new(JsonKvStore::open(&dir, "community_reports")?),
            graph: Arc::new(graph),
            entities: Arc::new(entities),
            harness,
            config,
        };
        info!(working_dir = %dir.display(), "Dataset opened");
        Ok(tg)
    }

    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The durable multi-period graph.
    pub fn graph(&self) -> &JsonGraphStore {
        &self.graph
    }

    pub fn text_chunks(&self) -> Arc<dyn KvStore<TextChunk>> {
        self.text_chunks.clone()
    }

    pub fn community_reports(&self) -> &JsonKvStore<CommunityReportRecord> {
        &self.community_reports
    }

    fn projector(&self) -> TemporalProjector {
        TemporalProjector::new(self.text_chunks.clone(), self.harness.embedder.clone())
            .with_heuristic(self.config.temporal.weight_heuristic)
            .with_index_settings(
                self.config.embedding.batch_num,
                self.config.embedding.better_than_threshold,
            )
    }

    fn assembler(&self) -> RetrievalAssembler {
        RetrievalAssembler::new(self.text_chunks.clone(), self.harness.embedder.clone())
    }

    /// Default query parameters from the `[query]` section.
    pub fn query_param(&self) -> QueryParam {
        QueryParam::from_config(&self.config.query)
    }

    /// Index `documents` as observed in `period`.
    pub async fn insert(&self, documents: &[String], period: &Period) -> Result<InsertOutcome> {
        let docs: BTreeMap<String, FullDocument> = documents
            .iter()
            .map(|d| {
                let content = d.trim().to_string();
                (
                    compute_id("doc-", &content),
                    FullDocument {
                        content,
                        period: period.clone(),
                    },
                )
            })
            .collect();
        let ids: Vec<String> = docs.keys().cloned().collect();
        let new_ids = self.full_docs.filter_keys(&ids).await?;
        let new_docs: BTreeMap<String, FullDocument> = docs
            .into_iter()
            .filter(|(id, _)| new_ids.contains(id))
            .collect();
        if new_docs.is_empty() {
            warn!(period = %period, "All docs are already in the storage");
            return Ok(InsertOutcome::AlreadyIndexed);
        }
        info!(period = %period, documents = new_docs.len(), "Inserting new docs");

        let chunks = get_chunks(&new_docs, self.chunker.as_ref());
        let chunk_ids: Vec<String> = chunks.keys().cloned().collect();
        let new_chunk_ids = self.text_chunks.filter_keys(&chunk_ids).await?;
        let new_chunks: BTreeMap<String, TextChunk> = chunks
            .into_iter()
            .filter(|(id, _)| new_chunk_ids.contains(id))
            .collect();
        if new_chunks.is_empty() {
            warn!(period = %period, "All chunks are already in the storage");
            return Ok(InsertOutcome::AlreadyIndexed);
        }
        info!(period = %period, chunks = new_chunks.len(), "Inserting new chunks");

        let extractor = EntityExtractor::new(self.harness.llm.clone(), &self.config.extraction)
            .map_err(|e| Error::Internal(format!("Invalid extraction pattern: {e}")))?;
        let batch = extractor.extract_all(&new_chunks).await?;
        if batch.nodes.is_empty() {
            warn!(period = %period, "Didn't extract any entities, maybe your LLM is not working");
            return Ok(InsertOutcome::NoEntities);
        }

        let merged = merge_batch(self.graph.as_ref(), &batch, period).await?;
        let vectors: BTreeMap<String, VectorRecord> = merged
            .nodes
            .iter()
            .map(entity_vector_record)
            .collect();
        self.entities.upsert(vectors).await?;

        if !batch.summaries.is_empty() {
            self.chunk_summaries.upsert(batch.summaries.clone()).await?;
        }
        let outcome = InsertOutcome::Inserted {
            documents: new_docs.len(),
            chunks: new_chunks.len(),
            entities: merged.nodes.len(),
            relations: merged.edges.len(),
        };
        self.full_docs.upsert(new_docs).await?;
        self.text_chunks.upsert(new_chunks).await?;
        self.flush().await?;
        Ok(outcome)
    }

    /// Point-in-time view of the graph for `selector`.
    pub async fn project(&self, selector: &TimeSelector) -> Result<Projection> {
        Ok(self.projector().project(self.graph.as_ref(), selector).await?)
    }

    /// Local query scoped to `selector`.
    pub async fn query(
        &self,
        question: &str,
        selector: &TimeSelector,
        param: &QueryParam,
    ) -> Result<String> {
        let projection = self.project(selector).await?;
        self.assembler()
            .local_query(
                &self.harness.llm,
                question,
                projection.graph.as_ref(),
                projection.entities.as_ref(),
                param,
            )
            .await
    }

    /// Map-reduce query over the community reports of the full graph.
    pub async fn query_global(&self, question: &str, param: &QueryParam) -> Result<String> {
        global_query(
            &self.harness.llm,
            self.graph.as_ref(),
            self.community_reports.as_ref(),
            question,
            param,
        )
        .await
    }

    /// Recluster the graph and regenerate every community report.
    pub async fn generate_community_reports(&self) -> Result<usize> {
        self.graph.clustering().await?;
        let count = CommunityReporter::new(self.harness.llm.clone(), &self.config.community)
            .generate(self.graph.as_ref(), self.community_reports.as_ref())
            .await?;
        self.graph.flush().await?;
        self.community_reports.flush().await?;
        self.llm_response_cache.flush().await?;
        info!(reports = count, "Community reports generated");
        Ok(count)
    }

    /// Parse a user-supplied time selector under the configured range cap.
    pub fn parse_selector(&self, input: &str) -> Result<TimeSelector> {
        Ok(TimeSelector::parse_bounded(
            input,
            self.config.temporal.max_range_years,
        )?)
    }

    /// Local query scoped to the years the model reads from the question.
    /// A question with no determinable time is answered from the full graph.
    pub async fn query_auto(&self, question: &str, param: &QueryParam) -> Result<String> {
        let projector = self.projector();
        let assembler = self.assembler();
        let planner = TemporalPlanner {
            llm: &self.harness.llm,
            projector: &projector,
            assembler: &assembler,
            max_range_years: self.config.temporal.max_range_years,
        };
        let scope = planner.scope(question).await?;
        let answer = match scope.selector {
            Some(selector) => {
                info!(kind = ?scope.kind, selector = %selector, "Time scope inferred");
                self.query(question, &selector, param).await
            }
            None => {
                info!("No time scope in question, querying every period");
                assembler
                    .local_query(
                        &self.harness.llm,
                        question,
                        self.graph.as_ref(),
                        self.entities.as_ref(),
                        param,
                    )
                    .await
            }
        };
        self.llm_response_cache.flush().await?;
        answer
    }

    /// Answer a question that may span several times.
    pub async fn answer_temporal(&self, question: &str, param: &QueryParam) -> Result<String> {
        let projector = self.projector();
        let assembler = self.assembler();
        let planner = TemporalPlanner {
            llm: &self.harness.llm,
            projector: &projector,
            assembler: &assembler,
            max_range_years: self.config.temporal.max_range_years,
        };
        let answer = planner.answer(self.graph.as_ref(), question, param).await;
        self.llm_response_cache.flush().await?;
        answer
    }

    /// Write every store to disk.
    pub async fn flush(&self) -> Result<()> {
        self.full_docs.flush().await?;
        self.text_chunks.flush().await?;
        self.chunk_summaries.flush().await?;
        self.llm_response_cache.flush().await?;
        self.community_reports.flush().await?;
        self.graph.flush().await?;
        self.entities.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::FAIL_RESPONSE;
    use crate::test_helpers::{KeywordEmbedder, RuleProvider, llm_client};

    const EXTRACTION_2022: &str = r#"("entity"<|>"AUDI"<|>"ORGANIZATION"<|>"Audi delivered 1.6 million cars in 2022.")##("entity"<|>"INGOLSTADT"<|>"GEO"<|>"Ingolstadt hosts an Audi plant.")##("relationship"<|>"AUDI"<|>"INGOLSTADT"<|>"Audi builds cars in Ingolstadt."<|>8)<|COMPLETE|>"#;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.working_dir = dir.to_path_buf();
        config.extraction.summarize_chunks = false;
        config.extraction.max_gleaning = 0;
        config
    }

    fn timegraph(dir: &std::path::Path, provider: Arc<RuleProvider>) -> TimeGraph {
        let harness = Harness::new(llm_client(provider), Arc::new(KeywordEmbedder::default()));
        TimeGraph::with_harness(config(dir), harness).unwrap()
    }

    #[tokio::test]
    async fn insert_merges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new(EXTRACTION_2022));
        let tg = timegraph(dir.path(), provider.clone());

        let outcome = tg
            .insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Inserted {
                documents: 1,
                chunks: 1,
                entities: 2,
                relations: 1
            }
        );
        assert!(tg.graph().has_edge("AUDI", "INGOLSTADT").await.unwrap());
        assert!(dir.path().join("graph_chunk_entity_relation.json").exists());
        assert!(dir.path().join("kv_store_full_docs.json").exists());
        assert!(dir.path().join("vdb_entities.json").exists());

        let again = tg
            .insert(&[" Audi delivered 1.6 million cars. ".into()], &Period::from("2022"))
            .await
            .unwrap();
        assert_eq!(again, InsertOutcome::AlreadyIndexed);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn nothing_extracted_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new("<|COMPLETE|>"));
        let tg = timegraph(dir.path(), provider);

        let outcome = tg
            .insert(&["Nothing to see.".into()], &Period::from("2022"))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::NoEntities);
        assert!(tg.full_docs.all_keys().await.unwrap().is_empty());
        assert!(tg.text_chunks.all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_outside_indexed_periods_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new(EXTRACTION_2022));
        let tg = timegraph(dir.path(), provider);
        tg.insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();

        let selector = TimeSelector::parse("1999").unwrap();
        let answer = tg
            .query("How many cars did Audi deliver?", &selector, &tg.query_param())
            .await
            .unwrap();
        assert_eq!(answer, FAIL_RESPONSE);
    }

    #[tokio::test]
    async fn context_only_query_shows_sources() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new(EXTRACTION_2022));
        let tg = timegraph(dir.path(), provider.clone());
        tg.insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();

        let selector = TimeSelector::parse("2022").unwrap();
        let context = tg
            .query("Audi cars", &selector, &tg.query_param().context_only())
            .await
            .unwrap();
        assert!(context.contains("AUDI"));
        assert!(context.contains("data from 2022"));
        // extraction only, no answer call
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn reopened_dataset_sees_previous_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new(EXTRACTION_2022));
        timegraph(dir.path(), provider.clone())
            .insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();

        let reopened = timegraph(dir.path(), provider);
        assert!(reopened.graph().has_node("AUDI").await.unwrap());
        let again = reopened
            .insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();
        assert_eq!(again, InsertOutcome::AlreadyIndexed);
    }

    #[tokio::test]
    async fn query_auto_scopes_by_inferred_year() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            RuleProvider::new(EXTRACTION_2022).when("Determine which years", "[time=1999, type=1]"),
        );
        let tg = timegraph(dir.path(), provider.clone());
        tg.insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();

        let answer = tg
            .query_auto("How many cars did Audi deliver in 1999?", &tg.query_param())
            .await
            .unwrap();
        assert_eq!(answer, FAIL_RESPONSE);
        // extraction and scope classification only
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn query_auto_without_time_uses_full_graph() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            RuleProvider::new(EXTRACTION_2022).when("Determine which years", "[time=None, type=5]"),
        );
        let tg = timegraph(dir.path(), provider.clone());
        tg.insert(&["Audi delivered 1.6 million cars.".into()], &Period::from("2022"))
            .await
            .unwrap();

        let context = tg
            .query_auto("Audi cars", &tg.query_param().context_only())
            .await
            .unwrap();
        assert!(context.contains("AUDI"));
        assert!(context.contains("data from 2022"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn unparseable_scope_is_a_planner_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(RuleProvider::new("I am not sure."));
        let tg = timegraph(dir.path(), provider);
        let err = tg.query_auto("When?", &tg.query_param()).await.unwrap_err();
        assert!(matches!(err, Error::Planner(_)));
    }

    #[test]
    fn selector_range_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.temporal.max_range_years = 5;
        let harness = Harness::new(
            llm_client(Arc::new(RuleProvider::new(""))),
            Arc::new(KeywordEmbedder::default()),
        );
        let tg = TimeGraph::with_harness(config, harness).unwrap();
        assert_eq!(tg.parse_selector("2010-2014").unwrap().periods().len(), 5);
        assert!(matches!(tg.parse_selector("2010-2015"), Err(Error::Planner(_))));
    }

    #[test]
    fn damaged_store_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("graph_chunk_entity_relation.json"), "{\"nodes\": [").unwrap();
        let harness = Harness::new(
            llm_client(Arc::new(RuleProvider::new(""))),
            Arc::new(KeywordEmbedder::default()),
        );
        let err = TimeGraph::with_harness(config(dir.path()), harness).err().unwrap();
        assert!(matches!(err, Error::Storage(_)));
        let content = std::fs::read_to_string(dir.path().join("graph_chunk_entity_relation.json")).unwrap();
        assert_eq!(content, "{\"nodes\": [");
    }
}
