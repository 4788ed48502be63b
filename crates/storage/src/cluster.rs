//! Two-level community detection over the in-memory graph.
//!
//! Level 1 communities are connected components. Inside each component a
//! weighted label propagation pass splits nodes into level 0 communities,
//! which become the component's sub-communities. Node iteration is in name
//! order and ties go to the smallest label, so results are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use timegraph_core::{Community, Edge, EdgeKey, Node};

pub(crate) struct GraphView<'a> {
    pub nodes: &'a BTreeMap<String, Node>,
    pub edges: &'a BTreeMap<EdgeKey, Edge>,
    pub adjacency: &'a BTreeMap<String, BTreeSet<String>>,
}

impl GraphView<'_> {
    fn neighbors(&self, name: &str) -> impl Iterator<Item = &String> {
        self.adjacency.get(name).into_iter().flatten()
    }

    fn weight(&self, a: &str, b: &str) -> f64 {
        self.edges
            .get(&EdgeKey::new(a, b))
            .map(|e| e.weight.max(0.0))
            .unwrap_or(0.0)
    }

    fn components(&self) -> Vec<BTreeSet<String>> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut components = Vec::new();

        for start in self.nodes.keys() {
            if !seen.insert(start.as_str()) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([start.as_str()]);
            while let Some(name) = queue.pop_front() {
                component.insert(name.to_string());
                for next in self.neighbors(name) {
                    if seen.insert(next.as_str()) {
                        queue.push_back(next.as_str());
                    }
                }
            }
            components.push(component);
        }
        components
    }

    fn propagate_labels(&self, members: &BTreeSet<String>, max_rounds: usize) -> Vec<BTreeSet<String>> {
        let mut labels: BTreeMap<&str, String> =
            members.iter().map(|n| (n.as_str(), n.clone())).collect();

        for _ in 0..max_rounds {
            let mut changed = false;
            for name in members {
                let mut score: BTreeMap<&str, f64> = BTreeMap::new();
                for neighbor in self.neighbors(name) {
                    if let Some(label) = labels.get(neighbor.as_str()) {
                        *score.entry(label.as_str()).or_default() += self.weight(name, neighbor);
                    }
                }
                // BTreeMap order makes the first maximum the smallest label.
                let best = score
                    .iter()
                    .fold(None::<(&str, f64)>, |best, (label, s)| match best {
                        Some((_, b)) if *s <= b => best,
                        _ => Some((*label, *s)),
                    })
                    .map(|(label, _)| label.to_string());

                if let Some(best) = best {
                    if labels.get(name.as_str()) != Some(&best) {
                        labels.insert(name.as_str(), best);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, label) in labels {
            groups.entry(label).or_default().insert(name.to_string());
        }
        groups.into_values().collect()
    }

    fn community(&self, level: u32, title: String, nodes: BTreeSet<String>) -> Community {
        let edges = self
            .edges
            .keys()
            .filter(|k| nodes.contains(&k.source) && nodes.contains(&k.target))
            .cloned()
            .collect();
        let chunk_ids = nodes
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .flat_map(|n| n.source_id.iter().cloned())
            .collect();
        Community {
            level,
            title,
            nodes,
            edges,
            chunk_ids,
            occurrence: 0.0,
            sub_communities: Vec::new(),
        }
    }
}

/// Build the community schema, keyed by ids of the form `{level}-{index}`.
pub(crate) fn detect_communities(view: &GraphView<'_>, max_rounds: usize) -> BTreeMap<String, Community> {
    let mut schema = BTreeMap::new();
    let mut fine_index = 0usize;

    for (index, component) in view.components().into_iter().enumerate() {
        let mut sub_ids = Vec::new();
        for cluster in view.propagate_labels(&component, max_rounds) {
            let id = format!("0-{fine_index}");
            fine_index += 1;
            schema.insert(id.clone(), view.community(0, format!("Cluster {id}"), cluster));
            sub_ids.push(id);
        }

        let id = format!("1-{index}");
        let mut community = view.community(1, format!("Cluster {id}"), component);
        community.sub_communities = sub_ids;
        schema.insert(id, community);
    }

    let max_chunks = schema
        .values()
        .map(|c: &Community| c.chunk_ids.len())
        .max()
        .unwrap_or(0);
    if max_chunks > 0 {
        for community in schema.values_mut() {
            community.occurrence = community.chunk_ids.len() as f64 / max_chunks as f64;
        }
    }
    schema
}
