//! Communities and their summary reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use crate::graph::EdgeKey;

/// A cluster of nodes and edges at one hierarchy level.
///
/// Level 0 is the finest. `sub_communities` point at ids one level below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub level: u32,
    pub title: String,
    pub nodes: BTreeSet<String>,
    pub edges: BTreeSet<EdgeKey>,
    #[serde(default)]
    pub chunk_ids: BTreeSet<String>,
    /// Relative importance in `[0, 1]`
    pub occurrence: f64,
    #[serde(default)]
    pub sub_communities: Vec<String>,
}

/// One finding of a community report.
///
/// Models sometimes answer with bare strings instead of objects; both
/// shapes are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FindingRepr")]
pub struct Finding {
    pub summary: String,
    pub explanation: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindingRepr {
    Text(String),
    Full {
        #[serde(default)]
        summary: String,
        #[serde(default)]
        explanation: String,
    },
}

impl From<FindingRepr> for Finding {
    fn from(repr: FindingRepr) -> Self {
        match repr {
            FindingRepr::Text(summary) => Finding {
                summary,
                explanation: String::new(),
            },
            FindingRepr::Full { summary, explanation } => Finding { summary, explanation },
        }
    }
}

/// Structured summary of a community produced by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub rating_explanation: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

fn default_title() -> String {
    "Report".into()
}

impl Default for CommunityReport {
    fn default() -> Self {
        Self {
            title: default_title(),
            summary: String::new(),
            rating: 0.0,
            rating_explanation: String::new(),
            findings: Vec::new(),
        }
    }
}

impl CommunityReport {
    /// Markdown rendering used as `report_string`.
    pub fn render(&self) -> String {
        let sections = self
            .findings
            .iter()
            .map(|f| format!("## {}\n\n{}", f.summary, f.explanation))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("# {}\n\n{}\n\n{}", self.title, self.summary, sections)
    }
}

/// A community together with its generated report, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReportRecord {
    pub report_string: String,
    pub report_json: CommunityReport,
    #[serde(flatten)]
    pub community: Community,
}

impl CommunityReportRecord {
    pub fn new(community: Community, report: CommunityReport) -> Self {
        Self {
            report_string: report.render(),
            report_json: report,
            community,
        }
    }
}
