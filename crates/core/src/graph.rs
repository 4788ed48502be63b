//! Graph domain types: period tags, description fragments, nodes and edges.
//!
//! Multi-valued fields are explicit collections here. The `<SEP>`-joined
//! form only exists when a record is rendered into a context table.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Join delimiter used when multi-valued fields are rendered as text.
pub const GRAPH_FIELD_SEP: &str = "<SEP>";

/// Entity type given to endpoints synthesized by an edge merge.
pub const UNKNOWN_ENTITY_TYPE: &str = "UNKNOWN";

/// A tag identifying the time context of an ingestion batch (e.g. a year).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(pub String);

impl Period {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Period {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One description sentence contributed by a single extraction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub period: Period,
    /// Chunks this sentence was extracted from.
    #[serde(default)]
    pub source_ids: BTreeSet<String>,
}

impl Fragment {
    pub fn new(text: impl Into<String>, period: Period, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            period,
            source_ids: BTreeSet::from([source_id.into()]),
        }
    }

    /// The sentence with its provenance marker appended, e.g.
    /// `"Audi sells cars-data from 2022-"`. This is the ordering and
    /// de-duplication key of a description.
    pub fn marked(&self) -> String {
        format!("{}-data from {}-", self.text, self.period)
    }
}

/// Sorted, de-duplicated union of two fragment collections.
///
/// Fragments with the same marked text collapse into one entry whose chunk
/// ids are the union of both.
pub fn union_fragments(
    existing: &[Fragment],
    incoming: impl IntoIterator<Item = Fragment>,
) -> Vec<Fragment> {
    let mut by_key: BTreeMap<String, Fragment> = BTreeMap::new();
    for fragment in existing.iter().cloned().chain(incoming) {
        match by_key.entry(fragment.marked()) {
            Entry::Occupied(mut slot) => slot.get_mut().source_ids.extend(fragment.source_ids),
            Entry::Vacant(slot) => {
                slot.insert(fragment);
            }
        }
    }
    by_key.into_values().collect()
}

/// Render fragments as a single `<SEP>`-joined description string.
pub fn render_fragments<'a>(fragments: impl IntoIterator<Item = &'a Fragment>) -> String {
    fragments
        .into_iter()
        .map(Fragment::marked)
        .collect::<Vec<_>>()
        .join(GRAPH_FIELD_SEP)
}

/// A graph entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical upper-case name, the node key
    pub name: String,
    pub entity_type: String,
    pub description: Vec<Fragment>,
    pub source_id: BTreeSet<String>,
    pub timestamp: BTreeSet<Period>,
}

impl Node {
    pub fn description_text(&self) -> String {
        render_fragments(&self.description)
    }

    /// The period tag when the node was only ever seen in one period.
    pub fn single_period(&self) -> Option<&Period> {
        match self.timestamp.len() {
            1 => self.timestamp.iter().next(),
            _ => None,
        }
    }
}

/// Canonical key of an undirected edge: `source < target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

impl EdgeKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { source: a, target: b }
        } else {
            Self { source: b, target: a }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.source == name || self.target == name
    }

    /// The endpoint opposite to `name`, if `name` is an endpoint.
    pub fn other(&self, name: &str) -> Option<&str> {
        if self.source == name {
            Some(&self.target)
        } else if self.target == name {
            Some(&self.source)
        } else {
            None
        }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.source, self.target)
    }
}

/// A graph relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Accumulated weight over every merge
    pub weight: f64,
    /// Priority, smaller is more authoritative
    pub order: u32,
    /// Weight contributed by each merge call, oldest first
    #[serde(default)]
    pub weight_history: Vec<f64>,
    pub description: Vec<Fragment>,
    pub source_id: BTreeSet<String>,
    pub timestamp: BTreeSet<Period>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }

    pub fn description_text(&self) -> String {
        render_fragments(&self.description)
    }

    pub fn single_period(&self) -> Option<&Period> {
        match self.timestamp.len() {
            1 => self.timestamp.iter().next(),
            _ => None,
        }
    }
}

/// How a projected edge's weight is derived from its merge history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightHeuristic {
    /// `max(history) + len(history)`; rewards edges seen across many merges
    #[default]
    MaxPlusCount,
    /// Plain sum of the history
    Sum,
    /// Largest single contribution
    Max,
}

impl WeightHeuristic {
    /// Recompute a weight from its history. `None` when there is no history.
    pub fn apply(&self, history: &[f64]) -> Option<f64> {
        if history.is_empty() {
            return None;
        }
        let max = history.iter().copied().fold(f64::MIN, f64::max);
        Some(match self {
            WeightHeuristic::MaxPlusCount => max + history.len() as f64,
            WeightHeuristic::Sum => history.iter().sum(),
            WeightHeuristic::Max => max,
        })
    }
}
