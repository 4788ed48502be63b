//! Community packing and report generation.
//!
//! A community is described to the model as up to three tables: reports of
//! its sub-communities, its entities and its relationships. The finest
//! level only has the latter two. Coarser levels pull in sub-community
//! reports once their own tables no longer fit the budget, and spend what
//! budget is left on the entities and relationships those reports do not
//! already cover.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use timegraph_config::CommunityConfig;
use timegraph_core::{
    Community, CommunityReport, CommunityReportRecord, EdgeKey, GraphStore, KvStore, Result,
    StorageError,
};
use timegraph_providers::{CallParams, LlmClient};
use tracing::{debug, info, warn};

use crate::prompts::{COMMUNITY_REPORT, fill, parse_json_reply};
use crate::table::{section, to_csv};
use crate::token::{estimate_tokens, truncate_by_tokens};

/// A table row together with the key it describes.
struct Row<K> {
    key: K,
    degree: usize,
    cells: Vec<String>,
}

impl<K> Row<K> {
    fn description(&self) -> &str {
        &self.cells[3]
    }
}

fn render_rows<K>(header: &[&str], rows: &[Row<K>]) -> String {
    to_csv(
        std::iter::once(header.iter().map(|h| h.to_string()).collect::<Vec<_>>())
            .chain(rows.iter().map(|r| r.cells.clone())),
    )
}

/// How many leading rows fit into `budget`.
fn rows_within<K>(rows: &[Row<K>], budget: usize) -> usize {
    truncate_by_tokens(rows.iter().collect::<Vec<_>>(), budget, |r| r.description().to_string()).len()
}

/// Sub-community reports table plus the nodes and edges those reports cover.
fn pack_sub_reports(
    community: &Community,
    max_token_size: usize,
    already_reports: &BTreeMap<String, CommunityReportRecord>,
) -> (String, BTreeSet<String>, BTreeSet<EdgeKey>) {
    let mut subs: Vec<&CommunityReportRecord> = community
        .sub_communities
        .iter()
        .filter_map(|id| already_reports.get(id))
        .collect();
    subs.sort_by(|a, b| b.community.occurrence.total_cmp(&a.community.occurrence));
    let subs = truncate_by_tokens(subs, max_token_size, |r| r.report_string.clone());

    let table = to_csv(
        std::iter::once(["id", "report", "rating", "importance"].map(String::from).to_vec()).chain(
            subs.iter().enumerate().map(|(i, r)| {
                vec![
                    i.to_string(),
                    r.report_string.clone(),
                    r.report_json.rating.to_string(),
                    r.community.occurrence.to_string(),
                ]
            }),
        ),
    );
    let nodes = subs.iter().flat_map(|r| r.community.nodes.iter().cloned()).collect();
    let edges = subs.iter().flat_map(|r| r.community.edges.iter().cloned()).collect();
    (table, nodes, edges)
}

/// Rows not covered by a report first, then covered ones, cut to `budget`.
fn uncovered_first<K, F>(rows: Vec<Row<K>>, covered: F, budget: usize) -> Vec<Row<K>>
where
    F: Fn(&K) -> bool,
{
    let (inside, outside): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| covered(&r.key));
    truncate_by_tokens(
        outside.into_iter().chain(inside).collect(),
        budget,
        |r: &Row<K>| r.description().to_string(),
    )
}

/// Describe `community` within `max_token_size` tokens.
pub async fn pack_community(
    graph: &dyn GraphStore,
    community: &Community,
    max_token_size: usize,
    already_reports: &BTreeMap<String, CommunityReportRecord>,
    force_to_use_sub_communities: bool,
) -> std::result::Result<String, StorageError> {
    let mut node_rows = Vec::with_capacity(community.nodes.len());
    for (i, name) in community.nodes.iter().enumerate() {
        let Some(node) = graph.get_node(name).await? else {
            warn!(node = %name, "Community node is missing, maybe the storage is damaged");
            continue;
        };
        let degree = graph.node_degree(name).await?;
        node_rows.push(Row {
            key: name.clone(),
            degree,
            cells: vec![
                i.to_string(),
                name.clone(),
                node.entity_type.clone(),
                node.description_text(),
                degree.to_string(),
            ],
        });
    }

    let mut edge_keys: Vec<&EdgeKey> = community.edges.iter().collect();
    edge_keys.sort_by_key(|k| format!("{}{}", k.source, k.target));
    let mut edge_rows = Vec::with_capacity(edge_keys.len());
    for (i, key) in edge_keys.into_iter().enumerate() {
        let Some(edge) = graph.get_edge(&key.source, &key.target).await? else {
            warn!(edge = %key, "Community edge is missing, maybe the storage is damaged");
            continue;
        };
        let rank = graph.edge_degree(&key.source, &key.target).await?;
        edge_rows.push(Row {
            key: key.clone(),
            degree: rank,
            cells: vec![
                i.to_string(),
                key.source.clone(),
                key.target.clone(),
                edge.description_text(),
                rank.to_string(),
            ],
        });
    }

    node_rows.sort_by(|a, b| b.degree.cmp(&a.degree));
    edge_rows.sort_by(|a, b| b.degree.cmp(&a.degree));

    let half = max_token_size / 2;
    let nodes_fit = rows_within(&node_rows, half);
    let edges_fit = rows_within(&edge_rows, half);
    let truncated = nodes_fit < node_rows.len() || edges_fit < edge_rows.len();

    let use_sub_communities =
        truncated && !community.sub_communities.is_empty() && !already_reports.is_empty();

    let (reports, node_rows, edge_rows) = if use_sub_communities || force_to_use_sub_communities {
        debug!(
            community = %community.title,
            "Packing community through its sub-community reports"
        );
        let (reports, covered_nodes, covered_edges) =
            pack_sub_reports(community, max_token_size, already_reports);
        let budget = max_token_size.saturating_sub(estimate_tokens(&reports)) / 2;
        (
            reports,
            uncovered_first(node_rows, |k| covered_nodes.contains(k), budget),
            uncovered_first(edge_rows, |k| covered_edges.contains(k), budget),
        )
    } else {
        node_rows.truncate(nodes_fit);
        edge_rows.truncate(edges_fit);
        (String::new(), node_rows, edge_rows)
    };

    Ok(format!(
        "{}\n{}\n{}",
        section("Reports", &reports),
        section(
            "Entities",
            &render_rows(&["id", "entity", "type", "description", "degree"], &node_rows)
        ),
        section(
            "Relationships",
            &render_rows(&["id", "source", "target", "description", "rank"], &edge_rows)
        )
    ))
}

/// Generates and stores a report for every community of a graph.
pub struct CommunityReporter {
    llm: LlmClient,
    max_token_size: usize,
    force_to_use_sub_communities: bool,
}

impl CommunityReporter {
    pub fn new(llm: LlmClient, config: &CommunityConfig) -> Self {
        Self {
            llm,
            max_token_size: config.max_token_size,
            force_to_use_sub_communities: config.force_to_use_sub_communities,
        }
    }

    async fn report(
        &self,
        graph: &dyn GraphStore,
        community: &Community,
        already_reports: &BTreeMap<String, CommunityReportRecord>,
    ) -> Result<CommunityReport> {
        let describe = pack_community(
            graph,
            community,
            self.max_token_size,
            already_reports,
            self.force_to_use_sub_communities,
        )
        .await?;
        let prompt = fill(COMMUNITY_REPORT, &[("input_text", &describe)]);
        let reply = self.llm.complete(&prompt, None, &[], CallParams::json()).await?;
        Ok(parse_json_reply(&reply))
    }

    /// Regenerate every report, finest level first, replacing whatever
    /// `reports` held before. Returns the number of reports written.
    pub async fn generate(
        &self,
        graph: &dyn GraphStore,
        reports: &dyn KvStore<CommunityReportRecord>,
    ) -> Result<usize> {
        let schema = graph.community_schema().await?;
        if schema.is_empty() {
            warn!("No communities to report on");
            return Ok(0);
        }

        let levels: BTreeSet<u32> = schema.values().map(|c| c.level).collect();
        info!(?levels, communities = schema.len(), "Generating community reports");

        let mut done: BTreeMap<String, CommunityReportRecord> = BTreeMap::new();
        for level in levels {
            let this_level: Vec<(&String, &Community)> =
                schema.iter().filter(|(_, c)| c.level == level).collect();
            let already = &done;
            let generated = try_join_all(this_level.iter().map(|(_, community)| async move {
                self.report(graph, community, already).await
            }))
            .await?;
            for ((id, community), report) in this_level.into_iter().zip(generated) {
                done.insert(id.clone(), CommunityReportRecord::new(community.clone(), report));
            }
            debug!(level, total = done.len(), "Community level reported");
        }

        let count = done.len();
        reports.drop_all().await?;
        reports.upsert(done).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge_edge, merge_node};
    use crate::test_helpers::{RuleProvider, llm_client};
    use std::sync::Arc;
    use timegraph_core::{EdgeCandidate, NodeCandidate, Period};
    use timegraph_storage::{JsonGraphStore, JsonKvStore};

    async fn graph_with(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> JsonGraphStore {
        let graph = JsonGraphStore::in_memory("g");
        let period = Period::from("2022");
        for (name, description) in nodes {
            let candidate = NodeCandidate {
                name: name.to_string(),
                entity_type: "ORGANIZATION".into(),
                description: description.to_string(),
                source_id: format!("chunk-{name}"),
            };
            graph
                .upsert_node(merge_node(name, &[candidate], None, &period))
                .await
                .unwrap();
        }
        for (a, b) in edges {
            let candidate = EdgeCandidate {
                source: a.to_string(),
                target: b.to_string(),
                description: format!("{a} works with {b}"),
                weight: 1.0,
                order: 1,
                source_id: format!("chunk-{a}"),
            };
            let key = EdgeKey::new(*a, *b);
            graph
                .upsert_edge(merge_edge(&key, &[candidate], None, &period))
                .await
                .unwrap();
        }
        graph
    }

    fn community(level: u32, nodes: &[&str], edges: &[(&str, &str)], subs: &[&str]) -> Community {
        Community {
            level,
            title: format!("Cluster {level}"),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            edges: edges.iter().map(|(a, b)| EdgeKey::new(*a, *b)).collect(),
            chunk_ids: BTreeSet::new(),
            occurrence: 1.0,
            sub_communities: subs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn report_record(c: Community, title: &str, occurrence: f64) -> CommunityReportRecord {
        let mut c = c;
        c.occurrence = occurrence;
        CommunityReportRecord::new(
            c,
            CommunityReport {
                title: title.into(),
                summary: "s".into(),
                rating: 5.0,
                ..CommunityReport::default()
            },
        )
    }

    #[tokio::test]
    async fn finest_level_has_empty_reports_section() {
        let graph = graph_with(&[("A", "a"), ("B", "b"), ("C", "c")], &[("A", "B"), ("B", "C")]).await;
        let c = community(0, &["A", "B", "C"], &[("A", "B"), ("B", "C")], &[]);
        let packed = pack_community(&graph, &c, 32768, &BTreeMap::new(), false).await.unwrap();

        assert!(packed.starts_with("-----Reports-----\n```csv\n\n```\n-----Entities-----"));
        // B has degree 2 and leads the entity table
        let entities = packed.split("-----Entities-----").nth(1).unwrap();
        let first_row = entities.lines().nth(3).unwrap();
        assert!(first_row.starts_with("1,\tB,\tORGANIZATION"));
        assert!(packed.contains("id,\tsource,\ttarget,\tdescription,\trank"));
    }

    #[tokio::test]
    async fn entity_rows_carry_type_and_description() {
        let graph = graph_with(&[("A", "Alpha builds engines")], &[]).await;
        let c = community(0, &["A"], &[], &[]);
        let packed = pack_community(&graph, &c, 32768, &BTreeMap::new(), false).await.unwrap();

        let row = packed
            .lines()
            .find(|l| l.starts_with("0,\tA,"))
            .expect("entity row for A");
        assert!(row.contains("ORGANIZATION"));
        assert!(row.contains("Alpha builds engines-data from 2022-"));
    }

    #[tokio::test]
    async fn coarse_level_uses_sub_reports_when_truncated() {
        let long = "x".repeat(200);
        let long = long.as_str();
        let graph = graph_with(
            &[("A", long), ("B", long), ("C", long), ("D", long)],
            &[("A", "B"), ("C", "D"), ("B", "C")],
        )
        .await;
        let low = community(0, &["A", "B"], &[("A", "B")], &[]);
        let high = community(0, &["C", "D"], &[("C", "D")], &[]);
        let already = BTreeMap::from([
            ("0-0".to_string(), report_record(low, "Low", 0.2)),
            ("0-1".to_string(), report_record(high, "High", 0.9)),
        ]);
        let parent = community(
            1,
            &["A", "B", "C", "D"],
            &[("A", "B"), ("C", "D"), ("B", "C")],
            &["0-0", "0-1"],
        );

        let packed = pack_community(&graph, &parent, 200, &already, false).await.unwrap();
        let reports = packed.find("-----Reports-----").unwrap();
        let entities = packed.find("-----Entities-----").unwrap();
        assert_eq!(reports, 0);
        assert!(reports < entities);
        let report_table = &packed[..entities];
        assert!(report_table.contains("id,\treport,\trating,\timportance"));
        let high_at = report_table.find("# High").unwrap();
        let low_at = report_table.find("# Low").unwrap();
        assert!(high_at < low_at);
    }

    #[tokio::test]
    async fn fitting_community_ignores_sub_reports() {
        let graph = graph_with(&[("A", "a"), ("B", "b")], &[("A", "B")]).await;
        let low = community(0, &["A"], &[], &[]);
        let already = BTreeMap::from([("0-0".to_string(), report_record(low, "Low", 1.0))]);
        let parent = community(1, &["A", "B"], &[("A", "B")], &["0-0"]);
        let packed = pack_community(&graph, &parent, 32768, &already, false).await.unwrap();
        assert!(!packed.contains("# Low"));

        let forced = pack_community(&graph, &parent, 32768, &already, true).await.unwrap();
        assert!(forced.contains("# Low"));
    }

    #[tokio::test]
    async fn reports_are_generated_per_level_and_replaced() {
        let graph = graph_with(&[("A", "a"), ("B", "b"), ("C", "c")], &[("A", "B")]).await;
        graph.clustering().await.unwrap();
        let provider = Arc::new(RuleProvider::new(
            r#"{"title": "Community", "summary": "S", "rating": 4.5, "findings": ["f"]}"#,
        ));
        let reporter = CommunityReporter::new(llm_client(provider.clone()), &CommunityConfig::default());
        let store = JsonKvStore::<CommunityReportRecord>::in_memory("community_reports");
        store
            .upsert(BTreeMap::from([(
                "stale".to_string(),
                report_record(community(0, &["Z"], &[], &[]), "Stale", 1.0),
            )]))
            .await
            .unwrap();

        let written = reporter.generate(&graph, &store).await.unwrap();
        let schema = graph.community_schema().await.unwrap();
        assert_eq!(written, schema.len());
        assert_eq!(provider.call_count(), schema.len());
        assert!(store.get_by_id("stale").await.unwrap().is_none());
        let keys = store.all_keys().await.unwrap();
        let record = store.get_by_id(&keys[0]).await.unwrap().unwrap();
        assert_eq!(record.report_json.rating, 4.5);
        assert!(provider.requests().iter().all(|r| r.json_mode));
    }
}
