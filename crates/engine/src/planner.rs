//! Temporal question planning.
//!
//! Two ways of finding the times a question is about. The model can scope
//! the whole question as `[time=<time>, type=<n>]`, which yields one
//! selector. Or it can split a question spanning several times into
//! `[<time><SEP><sub-question>]` items; each item is answered against a
//! projection of the graph for its time, and the answers are composed into
//! a final reply.

use regex_lite::Regex;
use thiserror::Error;
use timegraph_core::{GraphStore, Result};
use timegraph_providers::LlmClient;
use tracing::{debug, info};

use crate::param::QueryParam;
use crate::prompts::{FINAL_ANSWER, TEMPORAL_DECOMPOSE, TIME_SCOPE, fill};
use crate::retrieval::RetrievalAssembler;
use crate::temporal::{SelectorError, TemporalProjector, TimeSelector};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("No time-scoped sub-question found in: {0}")]
    NoSubQuestions(String),

    #[error("No [time=..., type=...] scope found in: {0}")]
    NoTimeScope(String),

    #[error("Unknown time scope type {0}")]
    UnknownScopeType(String),

    #[error("Invalid time in sub-question: {0}")]
    Selector(#[from] SelectorError),

    #[error("Failed to build decomposition pattern: {0}")]
    Pattern(#[from] regex_lite::Error),
}

impl From<PlannerError> for timegraph_core::Error {
    fn from(e: PlannerError) -> Self {
        timegraph_core::Error::Planner(e.to_string())
    }
}

/// One time-scoped sub-question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubQuestion {
    /// Time as written by the model, `2022` or `2010-2015`
    pub time: String,
    pub selector: TimeSelector,
    pub question: String,
}

/// How the model scoped a question in time, by its type code 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    SingleYear,
    SeveralYears,
    YearRange,
    /// A vague period such as "the late 1980s", made explicit by the model
    FuzzyRange,
    Undetermined,
}

impl ScopeKind {
    fn from_code(code: &str) -> Option<Self> {
        match code.parse::<u8>().ok()? {
            1 => Some(Self::SingleYear),
            2 => Some(Self::SeveralYears),
            3 => Some(Self::YearRange),
            4 => Some(Self::FuzzyRange),
            5 => Some(Self::Undetermined),
            _ => None,
        }
    }
}

/// Time scope of a whole question. `selector` is `None` when undetermined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeScope {
    pub kind: ScopeKind,
    pub selector: Option<TimeSelector>,
}

/// Reads a `[time=<time>, type=<n>]` classification reply.
pub struct TimeScopeParser {
    pattern: Regex,
    max_range_years: u32,
}

impl TimeScopeParser {
    pub fn new(max_range_years: u32) -> std::result::Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Regex::new(r"time\s*=\s*([^\s,\]]+)\s*,\s*type\s*=\s*(\d+)")?,
            max_range_years,
        })
    }

    pub fn parse(&self, reply: &str) -> std::result::Result<TimeScope, PlannerError> {
        let caps = self
            .pattern
            .captures(reply)
            .ok_or_else(|| PlannerError::NoTimeScope(reply.trim().to_string()))?;
        let (Some(time), Some(code)) = (caps.get(1), caps.get(2)) else {
            return Err(PlannerError::NoTimeScope(reply.trim().to_string()));
        };
        let kind = ScopeKind::from_code(code.as_str())
            .ok_or_else(|| PlannerError::UnknownScopeType(code.as_str().to_string()))?;
        let time = time.as_str();
        if kind == ScopeKind::Undetermined || time.eq_ignore_ascii_case("none") {
            return Ok(TimeScope {
                kind: ScopeKind::Undetermined,
                selector: None,
            });
        }
        Ok(TimeScope {
            kind,
            selector: Some(TimeSelector::parse_bounded(time, self.max_range_years)?),
        })
    }
}

/// Extracts sub-questions from a decomposition reply.
pub struct DecompositionParser {
    item: Regex,
    body: Regex,
    max_range_years: u32,
}

impl DecompositionParser {
    pub fn new(max_range_years: u32) -> std::result::Result<Self, regex_lite::Error> {
        Ok(Self {
            item: Regex::new(r"\[([^\[\]]+<SEP>[^\[\]]+)\]")?,
            body: Regex::new(r"(\d{4}-\d{4}|\d{4})<SEP>(.*)")?,
            max_range_years,
        })
    }

    /// Sub-questions in order of first appearance of their time. Questions
    /// sharing a time are concatenated.
    pub fn parse(&self, reply: &str) -> std::result::Result<Vec<SubQuestion>, PlannerError> {
        let mut items: Vec<SubQuestion> = Vec::new();
        for caps in self.item.captures_iter(reply) {
            let Some(inner) = caps.get(1) else {
                continue;
            };
            let Some(body) = self.body.captures(inner.as_str()) else {
                debug!(item = inner.as_str(), "Skipping sub-question without a year");
                continue;
            };
            let (Some(time), Some(question)) = (body.get(1), body.get(2)) else {
                continue;
            };
            let (time, question) = (time.as_str(), question.as_str());
            match items.iter_mut().find(|s| s.time == time) {
                Some(existing) => existing.question.push_str(question),
                None => items.push(SubQuestion {
                    time: time.to_string(),
                    selector: TimeSelector::parse_bounded(time, self.max_range_years)?,
                    question: question.to_string(),
                }),
            }
        }
        if items.is_empty() {
            return Err(PlannerError::NoSubQuestions(reply.trim().to_string()));
        }
        Ok(items)
    }
}

/// Render answered sub-questions for the final prompt.
fn render_qa_pairs(answers: &[(SubQuestion, String)]) -> String {
    answers
        .iter()
        .enumerate()
        .map(|(i, (sub, answer))| {
            format!(
                "sub question-{n} ({time}): {question}\nanswer-{n}: {answer}\n",
                n = i + 1,
                time = sub.time,
                question = sub.question,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scopes questions in time and answers multi-time questions by
/// decomposition.
pub struct TemporalPlanner<'a> {
    pub llm: &'a LlmClient,
    pub projector: &'a TemporalProjector,
    pub assembler: &'a RetrievalAssembler,
    /// Widest year range accepted from the model
    pub max_range_years: u32,
}

impl TemporalPlanner<'_> {
    /// Ask the model which years `question` needs.
    pub async fn scope(&self, question: &str) -> Result<TimeScope> {
        let prompt = fill(TIME_SCOPE, &[("question", question)]);
        let reply = self.llm.ask(&prompt).await?;
        debug!(reply = %reply, "Time scope reply");
        let parser = TimeScopeParser::new(self.max_range_years).map_err(PlannerError::from)?;
        Ok(parser.parse(&reply)?)
    }

    /// Ask the model to split `question` into time-scoped sub-questions.
    pub async fn decompose(&self, question: &str) -> Result<Vec<SubQuestion>> {
        let prompt = fill(TEMPORAL_DECOMPOSE, &[("question", question)]);
        let reply = self.llm.ask(&prompt).await?;
        debug!(reply = %reply, "Decomposition reply");
        let parser = DecompositionParser::new(self.max_range_years).map_err(PlannerError::from)?;
        Ok(parser.parse(&reply)?)
    }

    pub async fn answer(
        &self,
        graph: &dyn GraphStore,
        question: &str,
        param: &QueryParam,
    ) -> Result<String> {
        let subs = self.decompose(question).await?;
        info!(sub_questions = subs.len(), "Question decomposed");

        let mut answers = Vec::with_capacity(subs.len());
        for sub in subs {
            let projection = self.projector.project(graph, &sub.selector).await?;
            let answer = self
                .assembler
                .local_query(
                    self.llm,
                    &sub.question,
                    projection.graph.as_ref(),
                    projection.entities.as_ref(),
                    param,
                )
                .await?;
            debug!(time = %sub.time, "Sub-question answered");
            answers.push((sub, answer));
        }

        let qa_pairs = render_qa_pairs(&answers);
        let prompt = fill(
            FINAL_ANSWER,
            &[("question", question), ("qa_pairs", &qa_pairs)],
        );
        Ok(self.llm.ask(&prompt).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_node;
    use crate::temporal::DEFAULT_MAX_RANGE_YEARS;
    use crate::test_helpers::{KeywordEmbedder, RuleProvider, llm_client};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use timegraph_core::{KvStore, NodeCandidate, Period, TextChunk};
    use timegraph_storage::{JsonGraphStore, JsonKvStore};

    fn parser() -> DecompositionParser {
        DecompositionParser::new(DEFAULT_MAX_RANGE_YEARS).unwrap()
    }

    fn scope(reply: &str) -> std::result::Result<TimeScope, PlannerError> {
        TimeScopeParser::new(DEFAULT_MAX_RANGE_YEARS).unwrap().parse(reply)
    }

    fn years(scope: &TimeScope) -> Vec<&str> {
        scope
            .selector
            .as_ref()
            .map(|s| s.periods().iter().map(Period::as_str).collect())
            .unwrap_or_default()
    }

    #[test]
    fn scope_single_and_several_years() {
        let single = scope("[time=1998, type=1]").unwrap();
        assert_eq!(single.kind, ScopeKind::SingleYear);
        assert_eq!(years(&single), vec!["1998"]);

        let several = scope("Answer: [time=2012<SEP>2021,type=2]").unwrap();
        assert_eq!(several.kind, ScopeKind::SeveralYears);
        assert_eq!(years(&several), vec!["2012", "2021"]);
    }

    #[test]
    fn scope_ranges_are_expanded() {
        let range = scope("[time=2010-2015, type=3]").unwrap();
        assert_eq!(range.kind, ScopeKind::YearRange);
        assert_eq!(years(&range).len(), 6);

        let fuzzy = scope("[time=1900-1920, type=4]").unwrap();
        assert_eq!(fuzzy.kind, ScopeKind::FuzzyRange);
        assert_eq!(years(&fuzzy).first(), Some(&"1900"));
        assert_eq!(years(&fuzzy).last(), Some(&"1920"));
    }

    #[test]
    fn undetermined_scope_has_no_selector() {
        let none = scope("[time=None, type=5]").unwrap();
        assert_eq!(none.kind, ScopeKind::Undetermined);
        assert!(none.selector.is_none());
        // a typed scope without a time is undetermined too
        assert!(scope("[time=None, type=1]").unwrap().selector.is_none());
    }

    #[test]
    fn malformed_scope_replies_are_errors() {
        assert!(matches!(scope("It depends."), Err(PlannerError::NoTimeScope(_))));
        assert!(matches!(
            scope("[time=2022, type=9]"),
            Err(PlannerError::UnknownScopeType(code)) if code == "9"
        ));
        assert!(matches!(
            scope("[time=1000-3000, type=4]"),
            Err(PlannerError::Selector(SelectorError::RangeTooWide { .. }))
        ));
    }

    #[test]
    fn parses_years_and_ranges() {
        let subs = parser()
            .parse("[2022<SEP>Deliveries in 2022?][2010-2012<SEP>Deliveries early on?]")
            .unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].time, "2022");
        assert_eq!(subs[0].question, "Deliveries in 2022?");
        assert_eq!(subs[1].selector.periods().len(), 3);
        assert!(subs[1].selector.contains(&Period::from("2011")));
    }

    #[test]
    fn same_time_questions_are_concatenated() {
        let subs = parser()
            .parse("[2022<SEP>Who led Audi?] and [2022<SEP> What did it sell?]")
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].question, "Who led Audi? What did it sell?");
    }

    #[test]
    fn reply_without_items_is_an_error() {
        let err = parser().parse("I cannot tell which year you mean.").unwrap_err();
        assert!(matches!(err, PlannerError::NoSubQuestions(_)));
        let core: timegraph_core::Error = err.into();
        assert!(matches!(core, timegraph_core::Error::Planner(_)));
    }

    #[test]
    fn item_without_year_is_skipped() {
        let subs = parser()
            .parse("[recently<SEP>What happened?][2023<SEP>Sales?]")
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].time, "2023");
    }

    #[tokio::test]
    async fn answers_each_time_then_composes() {
        let graph = JsonGraphStore::in_memory("g");
        let chunks: Arc<JsonKvStore<TextChunk>> = Arc::new(JsonKvStore::in_memory("chunks"));
        let period = Period::from("2022");
        chunks
            .upsert(BTreeMap::from([(
                "c1".to_string(),
                TextChunk {
                    tokens: 10,
                    content: "Audi delivered 1.6 million cars.".into(),
                    full_doc_id: "doc-1".into(),
                    chunk_order_index: 0,
                    period: period.clone(),
                },
            )]))
            .await
            .unwrap();
        let candidate = NodeCandidate {
            name: "AUDI".into(),
            entity_type: "ORGANIZATION".into(),
            description: "Audi delivered 1.6 million cars".into(),
            source_id: "c1".into(),
        };
        graph
            .upsert_node(merge_node("AUDI", &[candidate], None, &period))
            .await
            .unwrap();

        let provider = Arc::new(
            RuleProvider::new("unused")
                .when("Split the question", "[2022<SEP>How many cars did Audi deliver?]")
                .when("sub-questions and answers", "Audi delivered 1.6 million cars in 2022.")
                .when("---Data tables---", "1.6 million"),
        );
        let llm = llm_client(provider.clone());
        let embedder = Arc::new(KeywordEmbedder::default());
        let projector = TemporalProjector::new(chunks.clone(), embedder.clone());
        let assembler = RetrievalAssembler::new(chunks, embedder);
        let planner = TemporalPlanner {
            llm: &llm,
            projector: &projector,
            assembler: &assembler,
            max_range_years: DEFAULT_MAX_RANGE_YEARS,
        };

        let answer = planner
            .answer(&graph, "How many cars did Audi deliver in 2022?", &QueryParam::default())
            .await
            .unwrap();
        assert_eq!(answer, "Audi delivered 1.6 million cars in 2022.");
        assert_eq!(provider.call_count(), 3);
        let last = provider.requests().pop().unwrap();
        let prompt = &last.messages.last().unwrap().content;
        assert!(prompt.contains("sub question-1 (2022): How many cars did Audi deliver?"));
        assert!(prompt.contains("answer-1: 1.6 million"));
    }
}
