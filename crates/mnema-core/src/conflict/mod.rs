//! Conflict Resolver
//!
//! Stage 1 is deterministic: exclusive relations keep one winner by
//! thickness, non-exclusive relations collapse duplicate targets and hand
//! genuinely contradictory groups to Stage 2, where the chat model
//! arbitrates. Stage 1 is a pure function of its input, so sweep results
//! reproduce exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use crate::error::{ensure_active, Result};
use crate::memory::ScoredTriple;
use crate::model::{parse_json_payload, ChatModel, PromptSet};
use crate::text::Lang;
use crate::usage::TokenUsage;

/// Relations where one source holds at most one current value
pub const EXCLUSIVE_RELATIONS: &[&str] = &[
    "IS_STATUS",
    "LIVES_IN",
    "WORKS_AT",
    "MARRIED_TO",
    "CAPITAL_OF",
    "CEO_OF",
    "CURRENT_VERSION",
    "POPULATION",
    "FOUNDED_ON",
    "PRIMARY_EMAIL",
    "WEBSITE",
    "HEADQUARTERED_IN",
    "BORN_IN",
    "NATIONALITY",
];

/// Whether `relation` admits only one current target per source.
pub fn is_exclusive(relation: &str) -> bool {
    EXCLUSIVE_RELATIONS.contains(&relation)
}

/// Result of Stage-1 resolution
#[derive(Debug, Default)]
pub struct Resolution {
    /// Triples that survive
    pub resolved: Vec<ScoredTriple>,
    /// Triples to delete (physically, by the caller's policy)
    pub discarded: Vec<ScoredTriple>,
    /// Non-exclusive groups still holding > 1 distinct target; Stage-2 input
    pub residual_groups: Vec<Vec<ScoredTriple>>,
}

/// Stage 1: deterministic exclusivity rules.
pub fn resolve_stage_one(triples: Vec<ScoredTriple>) -> Resolution {
    // BTreeMap keeps group order independent of input order
    let mut groups: BTreeMap<(String, String), Vec<ScoredTriple>> = BTreeMap::new();
    for triple in triples {
        let key = (
            triple.triple.edge.source_id.clone(),
            triple.triple.edge.edge_type.clone(),
        );
        groups.entry(key).or_default().push(triple);
    }

    let mut outcome = Resolution::default();
    for ((_, relation), mut group) in groups {
        if group.len() == 1 {
            outcome.resolved.append(&mut group);
            continue;
        }

        // deterministic winner order: thickness, then recency, then target id
        group.sort_by(|a, b| {
            b.thickness
                .partial_cmp(&a.thickness)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.triple.edge.unix.cmp(&a.triple.edge.unix))
                .then(a.triple.edge.target_id.cmp(&b.triple.edge.target_id))
        });

        if is_exclusive(&relation) {
            let mut iter = group.into_iter();
            let winner = iter.next().expect("group is non-empty");
            outcome.resolved.push(winner);
            outcome.discarded.extend(iter);
            continue;
        }

        // non-exclusive: collapse duplicate targets, highest thickness wins
        let mut kept: Vec<ScoredTriple> = Vec::new();
        for triple in group {
            if kept
                .iter()
                .any(|k| k.triple.edge.target_id == triple.triple.edge.target_id)
            {
                outcome.discarded.push(triple);
            } else {
                kept.push(triple);
            }
        }
        if kept.len() > 1 {
            outcome.residual_groups.push(kept.clone());
        }
        outcome.resolved.extend(kept);
    }
    outcome
}

#[derive(Debug, Serialize)]
struct ArbitrationItem<'a> {
    source_id: &'a str,
    relation_type: &'a str,
    target_id: &'a str,
    score: f64,
    unix: i64,
}

#[derive(Debug, Deserialize)]
struct ArbitrationVerdict {
    #[serde(default)]
    discarded: Vec<DiscardedItem>,
}

#[derive(Debug, Deserialize)]
struct DiscardedItem {
    source_id: String,
    relation_type: String,
    target_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// Stage 2: chat-model arbitration of the residual groups.
///
/// Moves model-discarded triples from `resolved` to `discarded` in place and
/// clears the residual list. With no residual groups this is free.
pub async fn resolve_stage_two(
    ctx: &CancellationToken,
    chat: &dyn ChatModel,
    prompts: &PromptSet,
    lang: Lang,
    resolution: &mut Resolution,
) -> Result<TokenUsage> {
    if resolution.residual_groups.is_empty() {
        return Ok(TokenUsage::default());
    }
    ensure_active(ctx)?;

    let items: Vec<ArbitrationItem<'_>> = resolution
        .residual_groups
        .iter()
        .flatten()
        .map(|t| ArbitrationItem {
            source_id: &t.triple.edge.source_id,
            relation_type: &t.triple.edge.edge_type,
            target_id: &t.triple.edge.target_id,
            score: t.thickness,
            unix: t.triple.edge.unix,
        })
        .collect();
    let payload = serde_json::to_string(&items)?;

    let response = chat
        .complete(ctx, prompts.conflict_arbitration.get(lang), &payload)
        .await?;
    let verdict: ArbitrationVerdict = parse_json_payload(&response.text)?;

    for discard in verdict.discarded {
        let matches = |t: &ScoredTriple| {
            t.triple.edge.source_id == discard.source_id
                && t.triple.edge.edge_type == discard.relation_type
                && t.triple.edge.target_id == discard.target_id
        };
        let mut index = 0;
        while index < resolution.resolved.len() {
            if matches(&resolution.resolved[index]) {
                let removed = resolution.resolved.remove(index);
                resolution.discarded.push(removed);
            } else {
                index += 1;
            }
        }
    }
    resolution.residual_groups.clear();

    Ok(response.usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GraphEdge, GraphNode, Triple};

    fn scored(src: &str, relation: &str, tgt: &str, thickness: f64, unix: i64) -> ScoredTriple {
        let edge = GraphEdge {
            source_id: src.to_string(),
            target_id: tgt.to_string(),
            memory_group: "g1".to_string(),
            edge_type: relation.to_string(),
            properties: serde_json::Map::new(),
            weight: 1.0,
            confidence: 1.0,
            unix,
        };
        ScoredTriple {
            triple: Triple {
                source: GraphNode::new(src, "Entity", "g1", 0),
                target: GraphNode::new(tgt, "Entity", "g1", 0),
                edge,
            },
            thickness,
        }
    }

    #[test]
    fn test_exclusive_keeps_highest_thickness() {
        let outcome = resolve_stage_one(vec![
            scored("A", "LIVES_IN", "X", 0.4, 1),
            scored("A", "LIVES_IN", "Y", 0.9, 2),
        ]);

        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].triple.edge.target_id, "Y");
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(outcome.discarded[0].triple.edge.target_id, "X");
        assert!(outcome.residual_groups.is_empty());
    }

    #[test]
    fn test_non_exclusive_collapses_duplicates_only() {
        let outcome = resolve_stage_one(vec![
            scored("A", "KNOWS", "B", 0.3, 1),
            scored("A", "KNOWS", "B", 0.8, 2),
            scored("A", "KNOWS", "C", 0.5, 3),
        ]);

        // duplicate (A,KNOWS,B) collapsed to the thicker one
        assert_eq!(outcome.resolved.len(), 2);
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(outcome.discarded[0].thickness, 0.3);
        // two distinct targets remain → residual for stage 2
        assert_eq!(outcome.residual_groups.len(), 1);
        assert_eq!(outcome.residual_groups[0].len(), 2);
    }

    #[test]
    fn test_singleton_groups_pass_through() {
        let outcome = resolve_stage_one(vec![
            scored("A", "CREATED", "B", 0.2, 1),
            scored("C", "CREATED", "D", 0.9, 2),
        ]);
        assert_eq!(outcome.resolved.len(), 2);
        assert!(outcome.discarded.is_empty());
        assert!(outcome.residual_groups.is_empty());
    }

    #[test]
    fn test_stage_one_deterministic_across_input_orders() {
        let triples = vec![
            scored("A", "LIVES_IN", "X", 0.4, 1),
            scored("A", "LIVES_IN", "Y", 0.9, 2),
            scored("B", "KNOWS", "C", 0.5, 3),
        ];
        let mut reversed = triples.clone();
        reversed.reverse();

        let a = resolve_stage_one(triples);
        let b = resolve_stage_one(reversed);
        let ids = |r: &Resolution| {
            r.resolved
                .iter()
                .map(|t| t.triple.edge.target_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_exclusive_tie_breaks_by_recency() {
        let outcome = resolve_stage_one(vec![
            scored("A", "WORKS_AT", "Old", 0.5, 1_000),
            scored("A", "WORKS_AT", "New", 0.5, 2_000),
        ]);
        assert_eq!(outcome.resolved[0].triple.edge.target_id, "New");
    }
}
