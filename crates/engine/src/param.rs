//! Per-query knobs, seeded from the `[query]` config section.

use timegraph_config::QueryConfig;

#[derive(Debug, Clone)]
pub struct QueryParam {
    /// Return the assembled context instead of asking the model
    pub only_need_context: bool,
    pub response_type: String,
    pub top_k: usize,
    pub max_token_for_text_unit: usize,
    pub max_token_for_local_context: usize,
    pub max_token_for_entities: usize,
    pub top_fragments: usize,
    pub edge_fragment_limit: usize,
    pub level: u32,
    pub global_max_consider_community: usize,
    pub global_min_community_rating: f64,
    pub global_max_token_for_community_report: usize,
}

impl QueryParam {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            only_need_context: false,
            response_type: config.response_type.clone(),
            top_k: config.top_k,
            max_token_for_text_unit: config.max_token_for_text_unit,
            max_token_for_local_context: config.max_token_for_local_context,
            max_token_for_entities: config.max_token_for_entities,
            top_fragments: config.top_fragments,
            edge_fragment_limit: config.edge_fragment_limit,
            level: config.level,
            global_max_consider_community: config.global_max_consider_community,
            global_min_community_rating: config.global_min_community_rating,
            global_max_token_for_community_report: config.global_max_token_for_community_report,
        }
    }

    pub fn context_only(mut self) -> Self {
        self.only_need_context = true;
        self
    }
}

impl Default for QueryParam {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}
