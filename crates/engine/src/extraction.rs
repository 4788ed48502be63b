//! Entity and relationship extraction.
//!
//! Each chunk is (optionally) summarized, sent through the extraction
//! prompt, and then re-prompted for missed entities up to `max_gleaning`
//! times. The raw output is split into records and validated into
//! [`ExtractionRecord`]s; anything malformed is dropped here.

use futures::future::try_join_all;
use regex_lite::Regex;
use std::collections::BTreeMap;
use timegraph_config::ExtractionConfig;
use timegraph_core::error::ProviderError;
use timegraph_core::message::exchange;
use timegraph_core::{
    EdgeCandidate, EdgeKey, ExtractionRecord, GRAPH_FIELD_SEP, Message, NodeCandidate, TextChunk,
    UNKNOWN_ENTITY_TYPE,
};
use timegraph_providers::{CallParams, LlmClient};
use tracing::{debug, info, trace, warn};

use crate::prompts::{
    CHUNK_SUMMARY, COMPLETION_DELIMITER, CONTINUE_EXTRACTION, ENTITY_EXTRACTION,
    IF_LOOP_EXTRACTION, RECORD_DELIMITER, TUPLE_DELIMITER, fill,
};

/// Trim, decode common HTML entities and drop control characters.
pub fn clean_str(input: &str) -> String {
    let decoded = input
        .trim()
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    decoded
        .chars()
        .filter(|c| !matches!(*c as u32, 0x00..=0x1f | 0x7f..=0x9f))
        .collect()
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

/// Canonical entity name: cleaned, upper case, without surrounding quotes.
pub fn canonical_name(raw: &str) -> String {
    unquote(&clean_str(&raw.to_uppercase()))
}

/// Split on any of `markers`, trimming pieces and dropping empty ones.
pub fn split_by_markers(text: &str, markers: &[&str]) -> Vec<String> {
    let mut pieces = vec![text.to_string()];
    for marker in markers {
        pieces = pieces
            .iter()
            .flat_map(|piece| piece.split(marker).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn flag_separator(kind: &str, name: &str, description: &str) {
    if description.contains(GRAPH_FIELD_SEP) {
        warn!(kind, name, "Extracted description contains the field separator");
    }
}

/// Validate one record's attributes.
pub fn parse_record(attributes: &[String], chunk_id: &str) -> Option<ExtractionRecord> {
    let tag = attributes.first().map(|t| unquote(t).to_lowercase())?;
    match tag.as_str() {
        "entity" if attributes.len() >= 4 => {
            let name = canonical_name(&attributes[1]);
            if name.is_empty() {
                return None;
            }
            let entity_type = match canonical_name(&attributes[2]) {
                t if t.is_empty() => UNKNOWN_ENTITY_TYPE.to_string(),
                t => t,
            };
            let description = unquote(&clean_str(&attributes[3]));
            flag_separator("entity", &name, &description);
            Some(ExtractionRecord::Node(NodeCandidate {
                name,
                entity_type,
                description,
                source_id: chunk_id.to_string(),
            }))
        }
        "relationship" if attributes.len() >= 5 => {
            let source = canonical_name(&attributes[1]);
            let target = canonical_name(&attributes[2]);
            if source.is_empty() || target.is_empty() || source == target {
                return None;
            }
            let description = unquote(&clean_str(&attributes[3]));
            flag_separator("relationship", &source, &description);
            let weight = attributes
                .last()
                .and_then(|w| unquote(w).parse::<f64>().ok())
                .filter(|w| w.is_finite())
                .unwrap_or(1.0);
            Some(ExtractionRecord::Edge(EdgeCandidate {
                source,
                target,
                description,
                weight,
                order: 1,
                source_id: chunk_id.to_string(),
            }))
        }
        _ => None,
    }
}

/// Validated output of one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkExtraction {
    pub nodes: BTreeMap<String, Vec<NodeCandidate>>,
    pub edges: BTreeMap<EdgeKey, Vec<EdgeCandidate>>,
    pub summary: Option<String>,
}

/// Parses raw extraction output into records.
pub struct RecordParser {
    body: Regex,
}

impl RecordParser {
    pub fn new() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            body: Regex::new(r"\((.*)\)")?,
        })
    }

    pub fn parse(&self, output: &str, chunk_id: &str) -> ChunkExtraction {
        let mut result = ChunkExtraction::default();
        for record in split_by_markers(output, &[RECORD_DELIMITER, COMPLETION_DELIMITER]) {
            let Some(body) = self.body.captures(&record).and_then(|c| c.get(1)) else {
                trace!(record = %record, "Dropping record without a body");
                continue;
            };
            let attributes = split_by_markers(body.as_str(), &[TUPLE_DELIMITER]);
            match parse_record(&attributes, chunk_id) {
                Some(ExtractionRecord::Node(node)) => {
                    result.nodes.entry(node.name.clone()).or_default().push(node)
                }
                Some(ExtractionRecord::Edge(edge)) => {
                    result.edges.entry(edge.key()).or_default().push(edge)
                }
                None => trace!(record = %record, "Dropping malformed record"),
            }
        }
        result
    }
}

/// Combined output of every chunk in an ingestion batch.
#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    pub nodes: BTreeMap<String, Vec<NodeCandidate>>,
    pub edges: BTreeMap<EdgeKey, Vec<EdgeCandidate>>,
    /// Chunk id to summary text
    pub summaries: BTreeMap<String, String>,
}

impl ExtractionBatch {
    pub fn absorb(&mut self, chunk_id: &str, extraction: ChunkExtraction) {
        for (name, nodes) in extraction.nodes {
            self.nodes.entry(name).or_default().extend(nodes);
        }
        for (key, edges) in extraction.edges {
            self.edges.entry(key).or_default().extend(edges);
        }
        if let Some(summary) = extraction.summary {
            self.summaries.insert(chunk_id.to_string(), summary);
        }
    }
}

/// Runs the extraction prompts against the language model.
pub struct EntityExtractor {
    llm: LlmClient,
    parser: RecordParser,
    max_gleaning: usize,
    summarize_chunks: bool,
    entity_types: Vec<String>,
}

impl EntityExtractor {
    pub fn new(llm: LlmClient, config: &ExtractionConfig) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            llm,
            parser: RecordParser::new()?,
            max_gleaning: config.max_gleaning,
            summarize_chunks: config.summarize_chunks,
            entity_types: config.entity_types.clone(),
        })
    }

    /// Extract from a single chunk.
    pub async fn extract_chunk(
        &self,
        chunk_id: &str,
        chunk: &TextChunk,
    ) -> Result<ChunkExtraction, ProviderError> {
        let summary = if self.summarize_chunks {
            let prompt = fill(CHUNK_SUMMARY, &[("text", &chunk.content)]);
            Some(self.llm.ask(&prompt).await?)
        } else {
            None
        };
        let input_text = summary.as_deref().unwrap_or(&chunk.content);

        let entity_types = self.entity_types.join(",");
        let prompt = fill(
            ENTITY_EXTRACTION,
            &[
                ("tuple_delimiter", TUPLE_DELIMITER),
                ("record_delimiter", RECORD_DELIMITER),
                ("completion_delimiter", COMPLETION_DELIMITER),
                ("entity_types", &entity_types),
                ("input_text", input_text),
            ],
        );

        let mut output = self.llm.ask(&prompt).await?;
        let mut history: Vec<Message> = exchange(prompt.as_str(), output.as_str()).to_vec();

        for round in 0..self.max_gleaning {
            let glean = self
                .llm
                .complete(CONTINUE_EXTRACTION, None, &history, CallParams::default())
                .await?;
            history.extend(exchange(CONTINUE_EXTRACTION, glean.as_str()));
            output.push_str(&glean);

            if round + 1 == self.max_gleaning {
                break;
            }

            let answer = self
                .llm
                .complete(IF_LOOP_EXTRACTION, None, &history, CallParams::default())
                .await?;
            let answer = answer.trim().trim_matches('"').trim_matches('\'').to_lowercase();
            if answer != "yes" {
                debug!(chunk = %chunk_id, round, "Gleaning stopped");
                break;
            }
        }

        let mut extraction = self.parser.parse(&output, chunk_id);
        extraction.summary = summary;
        trace!(
            chunk = %chunk_id,
            entities = extraction.nodes.len(),
            relations = extraction.edges.len(),
            "Chunk extracted"
        );
        Ok(extraction)
    }

    /// Extract from every chunk concurrently and combine the results.
    pub async fn extract_all(
        &self,
        chunks: &BTreeMap<String, TextChunk>,
    ) -> Result<ExtractionBatch, ProviderError> {
        let tasks = chunks
            .iter()
            .map(|(id, chunk)| async move { self.extract_chunk(id, chunk).await.map(|e| (id, e)) });
        let results = try_join_all(tasks).await?;

        let mut batch = ExtractionBatch::default();
        for (chunk_id, extraction) in results {
            batch.absorb(chunk_id, extraction);
        }
        info!(
            chunks = chunks.len(),
            entities = batch.nodes.len(),
            relations = batch.edges.len(),
            "Extraction finished"
        );
        Ok(batch)
    }
}
