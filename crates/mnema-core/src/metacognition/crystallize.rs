//! Crystallisation: merge near-duplicate rules
//!
//! Rules cluster by vector similarity (greedy connected components over a
//! k-NN graph built from the stored rule embeddings). Each cluster of at
//! least `min_cluster` members is merged by the chat model into one
//! statement; external edges of the members are rewired onto the new node,
//! intra-cluster edges drop, and the members are deleted.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ensure_active, Result};
use crate::memory::{canonical_node_id, GraphEdge, NodeType};
use crate::model::cosine_similarity;
use crate::storage::{tables, GraphStorage, VectorStorage};
use crate::text::Lang;
use crate::usage::TokenUsage;

use super::{MetacognitionEngine, ID_NAMESPACE};

/// Neighbours considered per rule when building the similarity graph
const KNN_NEIGHBORS: usize = 8;

/// What one crystallisation pass did
#[derive(Debug, Default, Clone)]
pub struct CrystallizeReport {
    pub clusters_merged: u64,
    pub rules_deleted: u64,
    pub usage: TokenUsage,
}

impl MetacognitionEngine {
    /// Merge semantically near-duplicate rules in `memory_group`.
    pub async fn crystallize(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        node_set: &str,
        lang: Lang,
    ) -> Result<CrystallizeReport> {
        let mut report = CrystallizeReport::default();

        let rules = self
            .storage
            .get_nodes_by_type(NodeType::Rule.as_str(), memory_group)?;
        if rules.len() < self.config.min_cluster {
            return Ok(report);
        }
        let ids: Vec<String> = rules.iter().map(|rule| rule.id.clone()).collect();

        // reuse the embeddings the rule table already carries
        let rows = self
            .storage
            .get_embeddings_by_ids(tables::RULE, &ids, memory_group)?;
        if rows.len() < self.config.min_cluster {
            return Ok(report);
        }

        let clusters = similarity_components(&rows, self.config.sim_crystal, KNN_NEIGHBORS);

        for cluster in clusters {
            if cluster.len() < self.config.min_cluster {
                continue;
            }
            ensure_active(ctx)?;

            let member_texts: Vec<&str> = cluster
                .iter()
                .map(|&index| rows[index].text.as_str())
                .collect();
            let member_ids: HashSet<&str> =
                cluster.iter().map(|&index| rows[index].id.as_str()).collect();

            let listing = member_texts
                .iter()
                .map(|text| format!("- {text}"))
                .collect::<Vec<_>>()
                .join("\n");
            let response = self
                .chat
                .complete(ctx, self.prompts.rule_merge.get(lang), &listing)
                .await?;
            report.usage.add(&response.usage);
            let merged_text = response.text.trim().to_string();
            if merged_text.is_empty() {
                tracing::warn!("merge produced empty text, cluster skipped");
                continue;
            }

            // the merged rule goes through the normal persist path
            self.persist_rule(ctx, memory_group, node_set, &merged_text)
                .await?;
            let merged_uuid =
                Uuid::new_v5(&ID_NAMESPACE, format!("{node_set}/{merged_text}").as_bytes());
            let merged_id = canonical_node_id(&format!("rule:{merged_uuid}"), memory_group);

            // rewire every external edge of every member onto the new node;
            // intra-cluster edges die with the members
            let mut rewired: Vec<GraphEdge> = Vec::new();
            for &index in &cluster {
                let member_id = rows[index].id.as_str();
                for mut edge in self.storage.get_edges_by_node(member_id, memory_group)? {
                    let source_in = member_ids.contains(edge.source_id.as_str());
                    let target_in = member_ids.contains(edge.target_id.as_str());
                    if source_in && target_in {
                        continue;
                    }
                    if source_in {
                        edge.source_id = merged_id.clone();
                    } else {
                        edge.target_id = merged_id.clone();
                    }
                    if edge.source_id != edge.target_id {
                        rewired.push(edge);
                    }
                }
            }
            self.storage.add_edges(&rewired)?;

            for &index in &cluster {
                let member_id = &rows[index].id;
                if *member_id == merged_id {
                    continue;
                }
                if let Err(e) = self.storage.delete_node(member_id, memory_group) {
                    tracing::warn!(node = %member_id, "crystallised member delete failed: {e}");
                } else {
                    report.rules_deleted += 1;
                }
            }

            tracing::info!(
                merged = %merged_id,
                members = cluster.len(),
                "crystallised rule cluster"
            );
            report.clusters_merged += 1;
        }

        Ok(report)
    }
}

/// Greedy connected components over the k-NN similarity graph.
///
/// Returns clusters as index sets into `rows`, deterministic for a given
/// row order.
fn similarity_components(
    rows: &[crate::storage::EmbeddingRow],
    threshold: f32,
    k: usize,
) -> Vec<Vec<usize>> {
    let n = rows.len();
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();

    for i in 0..n {
        // k nearest by cosine, then gate on the threshold
        let mut neighbors: Vec<(usize, f32)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (j, cosine_similarity(&rows[i].embedding, &rows[j].embedding)))
            .collect();
        neighbors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (j, similarity) in neighbors.into_iter().take(k) {
            if similarity >= threshold {
                adjacency.entry(i).or_default().push(j);
                adjacency.entry(j).or_default().push(i);
            }
        }
    }

    let mut seen = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if seen[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(node) = stack.pop() {
            component.push(node);
            if let Some(neighbors) = adjacency.get(&node) {
                for &next in neighbors {
                    if !seen[next] {
                        seen[next] = true;
                        stack.push(next);
                    }
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}
