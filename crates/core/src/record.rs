//! Provenance-tagged extraction records.
//!
//! Extraction output is validated into one of these variants at the parse
//! boundary; anything that does not fit is dropped there.

use serde::{Deserialize, Serialize};
use crate::graph::{EdgeKey, Fragment, Period};

/// An entity fact extracted from one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    /// Chunk the fact came from
    pub source_id: String,
}

impl NodeCandidate {
    /// The description tagged with the ingestion period.
    pub fn fragment(&self, period: &Period) -> Fragment {
        Fragment::new(self.description.clone(), period.clone(), self.source_id.clone())
    }
}

/// A relationship fact extracted from one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCandidate {
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f64,
    #[serde(default = "default_order")]
    pub order: u32,
    pub source_id: String,
}

fn default_order() -> u32 {
    1
}

impl EdgeCandidate {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }

    pub fn fragment(&self, period: &Period) -> Fragment {
        Fragment::new(self.description.clone(), period.clone(), self.source_id.clone())
    }
}

/// One validated extraction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRecord {
    Node(NodeCandidate),
    Edge(EdgeCandidate),
}
