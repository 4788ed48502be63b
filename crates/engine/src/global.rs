//! Global (map-reduce) query over community reports.
//!
//! Reports are grouped under a token budget, each group is asked for
//! scored key points, and the surviving points are handed to a final
//! reduce call.

use futures::future::try_join_all;
use serde::Deserialize;
use timegraph_core::{CommunityReportRecord, GraphStore, KvStore, Result};
use timegraph_providers::{CallParams, LlmClient};
use tracing::{debug, info, warn};

use crate::param::QueryParam;
use crate::prompts::{FAIL_RESPONSE, GLOBAL_MAP_POINTS, GLOBAL_REDUCE, fill, parse_json_reply};
use crate::table::to_csv;
use crate::token::truncate_by_tokens;

#[derive(Debug, Default, Deserialize)]
struct MapReply {
    #[serde(default)]
    points: Vec<MapPoint>,
}

#[derive(Debug, Deserialize)]
struct MapPoint {
    description: Option<String>,
    #[serde(default = "default_score")]
    score: f64,
}

fn default_score() -> f64 {
    1.0
}

#[derive(Debug)]
struct SupportPoint {
    analyst: usize,
    answer: String,
    score: f64,
}

/// Split reports into consecutive groups that each fit `max_tokens`.
/// A report larger than the budget forms a group on its own.
fn group_reports(
    mut reports: Vec<CommunityReportRecord>,
    max_tokens: usize,
) -> Vec<Vec<CommunityReportRecord>> {
    let mut groups = Vec::new();
    while !reports.is_empty() {
        let fitting = truncate_by_tokens(
            reports.iter().collect::<Vec<_>>(),
            max_tokens,
            |r| r.report_string.clone(),
        )
        .len()
        .max(1);
        let rest = reports.split_off(fitting);
        groups.push(reports);
        reports = rest;
    }
    groups
}

async fn map_group(
    llm: &LlmClient,
    query: &str,
    group: &[CommunityReportRecord],
) -> Result<Vec<MapPoint>> {
    let table = to_csv(
        std::iter::once(["id", "content", "rating", "importance"].map(String::from).to_vec()).chain(
            group.iter().enumerate().map(|(i, r)| {
                vec![
                    i.to_string(),
                    r.report_string.clone(),
                    r.report_json.rating.to_string(),
                    r.community.occurrence.to_string(),
                ]
            }),
        ),
    );
    let system = fill(GLOBAL_MAP_POINTS, &[("context_data", &table)]);
    let reply = llm.complete(query, Some(&system), &[], CallParams::json()).await?;
    Ok(parse_json_reply::<MapReply>(&reply).points)
}

/// Answer `query` from the community reports of `graph`.
pub async fn global_query(
    llm: &LlmClient,
    graph: &dyn GraphStore,
    reports: &dyn KvStore<CommunityReportRecord>,
    query: &str,
    param: &QueryParam,
) -> Result<String> {
    let mut schema: Vec<(String, f64)> = graph
        .community_schema()
        .await?
        .into_iter()
        .filter(|(_, c)| c.level <= param.level)
        .map(|(id, c)| (id, c.occurrence))
        .collect();
    if schema.is_empty() {
        warn!(level = param.level, "No communities available for global query");
        return Ok(FAIL_RESPONSE.to_string());
    }
    schema.sort_by(|a, b| b.1.total_cmp(&a.1));
    schema.truncate(param.global_max_consider_community);

    let ids: Vec<String> = schema.into_iter().map(|(id, _)| id).collect();
    let mut records: Vec<CommunityReportRecord> = reports
        .get_by_ids(&ids)
        .await?
        .into_iter()
        .flatten()
        .filter(|r| r.report_json.rating >= param.global_min_community_rating)
        .collect();
    records.sort_by(|a, b| {
        b.community
            .occurrence
            .total_cmp(&a.community.occurrence)
            .then(b.report_json.rating.total_cmp(&a.report_json.rating))
    });
    info!(communities = records.len(), "Retrieved community reports");

    let groups = group_reports(records, param.global_max_token_for_community_report);
    debug!(groups = groups.len(), "Grouped reports for global search");
    let mapped = try_join_all(groups.iter().map(|g| map_group(llm, query, g))).await?;

    let mut points: Vec<SupportPoint> = mapped
        .into_iter()
        .enumerate()
        .flat_map(|(analyst, points)| {
            points.into_iter().filter_map(move |p| {
                p.description.map(|answer| SupportPoint {
                    analyst,
                    answer,
                    score: p.score,
                })
            })
        })
        .filter(|p| p.score > 0.0)
        .collect();
    if points.is_empty() {
        warn!("Global query produced no supporting points");
        return Ok(FAIL_RESPONSE.to_string());
    }
    points.sort_by(|a, b| b.score.total_cmp(&a.score));
    let points = truncate_by_tokens(points, param.global_max_token_for_community_report, |p| {
        p.answer.clone()
    });

    let report_data = points
        .iter()
        .map(|p| {
            format!(
                "----Analyst {}----\nImportance Score: {}\n{}\n",
                p.analyst, p.score, p.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    if param.only_need_context {
        return Ok(report_data);
    }

    let system = fill(
        GLOBAL_REDUCE,
        &[
            ("response_type", &param.response_type),
            ("report_data", &report_data),
        ],
    );
    Ok(llm
        .complete(query, Some(&system), &[], CallParams::default())
        .await?)
}
