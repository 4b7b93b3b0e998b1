//! Graph Metabolism Engine
//!
//! The decay half of self-maintenance: prune edges whose thickness fell
//! under the group threshold, delete orphaned and weakly-connected nodes,
//! and sweep the whole graph for contradictions in overlapping windows.
//! Every phase is best-effort: failures are logged warnings and the run
//! continues, returning what it managed to do.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::conflict::{resolve_stage_one, resolve_stage_two};
use crate::decay::{lambda, now_ms};
use crate::error::{ensure_active, Result};
use crate::events::{emit, EventKind, SharedSink};
use crate::memory::{GraphNode, MemoryGroupConfig, MetabolismConfig, NodeType};
use crate::model::{ChatModel, Embedder, PromptSet};
use crate::query::score_triples;
use crate::storage::{tables, GraphStorage, SharedStorage, VectorStorage};
use crate::text::Lang;
use crate::usage::TokenUsage;

/// Fixed description-length saving assumed for removing one weak node.
///
/// A weak node is deleted when this benefit exceeds the reconstruction
/// difficulty inferred from its nearest foreign neighbour. Single global
/// constant; per-group tuning has not been needed yet.
pub const MDL_REDUCTION_BENEFIT: f64 = 0.35;

/// Source-id page size for the sweeps
const SWEEP_PAGE: usize = 200;

/// Window overlap for the conflict sweep; prevents boundary misses
const SWEEP_OVERLAP: usize = 20;

/// Per-run options
#[derive(Debug, Clone, Copy)]
pub struct MetabolismOptions {
    /// 1 = deterministic sweeps only, 2 = arbitrate residual conflicts
    pub conflict_resolution_stage: u8,
    pub lang: Lang,
}

impl Default for MetabolismOptions {
    fn default() -> Self {
        Self {
            conflict_resolution_stage: 1,
            lang: Lang::En,
        }
    }
}

/// What one run did
#[derive(Debug, Default, Clone)]
pub struct MetabolismReport {
    pub pruned_edges: u64,
    pub deleted_orphans: u64,
    pub deleted_weak_nodes: u64,
    pub conflict_deleted: u64,
    pub usage: TokenUsage,
}

/// The metabolism runner for one cube
pub struct MetabolismEngine {
    storage: SharedStorage,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    prompts: Arc<PromptSet>,
    events: SharedSink,
    config: MetabolismConfig,
}

impl MetabolismEngine {
    pub fn new(
        storage: SharedStorage,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        prompts: Arc<PromptSet>,
        events: SharedSink,
        config: MetabolismConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            chat,
            prompts,
            events,
            config,
        }
    }

    /// One full metabolism pass over `memory_group`.
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        options: MetabolismOptions,
    ) -> Result<MetabolismReport> {
        let mut report = MetabolismReport::default();
        let group_config = self
            .storage
            .get_memory_group_config(memory_group)
            .unwrap_or_default();
        let grace = Duration::from_secs(self.config.grace_minutes * 60);

        self.phase(ctx, "edge_pruning", &mut report, |r| {
            self.prune_edges(memory_group, &group_config, r)
        })?;

        self.phase(ctx, "orphan_deletion", &mut report, |r| {
            self.delete_orphans(memory_group, grace, r)
        })?;

        ensure_active(ctx)?;
        emit(
            &self.events,
            EventKind::MetabolismPhaseStart,
            serde_json::json!({"phase": "mdl_sweep"}),
        );
        if let Err(e) = self
            .mdl_sweep(ctx, memory_group, &group_config, grace, &mut report)
            .await
        {
            if matches!(e, crate::error::EngineError::Cancelled) {
                return Err(e);
            }
            tracing::warn!(group = memory_group, "MDL sweep failed: {e}");
        }
        emit(
            &self.events,
            EventKind::MetabolismPhaseEnd,
            serde_json::json!({"phase": "mdl_sweep", "deleted": report.deleted_weak_nodes}),
        );

        ensure_active(ctx)?;
        emit(
            &self.events,
            EventKind::MetabolismPhaseStart,
            serde_json::json!({"phase": "conflict_sweep"}),
        );
        if let Err(e) = self
            .conflict_sweep(ctx, memory_group, &group_config, options, &mut report)
            .await
        {
            if matches!(e, crate::error::EngineError::Cancelled) {
                return Err(e);
            }
            tracing::warn!(group = memory_group, "conflict sweep failed: {e}");
        }
        emit(
            &self.events,
            EventKind::MetabolismPhaseEnd,
            serde_json::json!({"phase": "conflict_sweep", "deleted": report.conflict_deleted}),
        );

        Ok(report)
    }

    /// Run a synchronous phase with warn-and-continue semantics.
    fn phase(
        &self,
        ctx: &CancellationToken,
        name: &str,
        report: &mut MetabolismReport,
        f: impl FnOnce(&mut MetabolismReport) -> Result<u64>,
    ) -> Result<()> {
        ensure_active(ctx)?;
        emit(
            &self.events,
            EventKind::MetabolismPhaseStart,
            serde_json::json!({"phase": name}),
        );
        match f(report) {
            Ok(count) => {
                emit(
                    &self.events,
                    EventKind::MetabolismPhaseEnd,
                    serde_json::json!({"phase": name, "count": count}),
                );
            }
            Err(e) => {
                tracing::warn!(phase = name, "metabolism phase failed: {e}");
                emit(
                    &self.events,
                    EventKind::MetabolismPhaseEnd,
                    serde_json::json!({"phase": name, "error": e.to_string()}),
                );
            }
        }
        Ok(())
    }

    /// Paged edge pruning: old enough and thinner than the threshold → gone.
    fn prune_edges(
        &self,
        memory_group: &str,
        config: &MemoryGroupConfig,
        report: &mut MetabolismReport,
    ) -> Result<u64> {
        let lambda = lambda(config.half_life_days);
        let max_unix = self.storage.get_max_unix(memory_group)?;
        let protection_ms = (config.min_survival_protection_hours * 3_600_000.0) as i64;
        let now = now_ms();

        let mut offset = 0usize;
        loop {
            let ids = self
                .storage
                .get_source_node_ids(memory_group, offset, SWEEP_PAGE)?;
            if ids.is_empty() {
                break;
            }
            let triples = self.storage.get_triples_by_source_ids(&ids, memory_group)?;
            for triple in triples {
                let edge = &triple.edge;
                let protected = now - edge.unix < protection_ms;
                if protected {
                    continue;
                }
                if edge.thickness(max_unix, lambda) < config.prune_threshold {
                    if let Err(e) = self.storage.delete_edge(
                        &edge.source_id,
                        &edge.edge_type,
                        &edge.target_id,
                        memory_group,
                    ) {
                        tracing::warn!(source = %edge.source_id, "edge prune failed: {e}");
                    } else {
                        report.pruned_edges += 1;
                    }
                }
            }
            offset += SWEEP_PAGE;
        }
        Ok(report.pruned_edges)
    }

    fn delete_orphans(
        &self,
        memory_group: &str,
        grace: Duration,
        report: &mut MetabolismReport,
    ) -> Result<u64> {
        let orphans = self.storage.get_orphan_nodes(memory_group, grace)?;
        for node in orphans {
            if let Err(e) = self.storage.delete_node(&node.id, memory_group) {
                tracing::warn!(node = %node.id, "orphan delete failed: {e}");
            } else {
                report.deleted_orphans += 1;
            }
        }
        Ok(report.deleted_orphans)
    }

    /// Delete weakly-connected nodes whose removal saves more description
    /// length than their reconstruction would cost.
    async fn mdl_sweep(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        config: &MemoryGroupConfig,
        grace: Duration,
        report: &mut MetabolismReport,
    ) -> Result<()> {
        let weak =
            self.storage
                .get_weakly_connected_nodes(memory_group, config.prune_threshold, grace)?;

        for node in weak {
            ensure_active(ctx)?;
            let text = node.representative_text();
            let embedded = match self.embedder.embed(ctx, &text).await {
                Ok(embedded) => embedded,
                Err(e) => {
                    tracing::warn!(node = %node.id, "MDL embed failed: {e}");
                    continue;
                }
            };
            report.usage.add(&embedded.usage);

            let hits = self.storage.query(
                typed_table(&node),
                &embedded.vector,
                config.mdl_k_neighbors + 1,
                memory_group,
            )?;
            // the nearest foreign neighbour is the reconstruction proxy
            let similarity = hits
                .iter()
                .find(|hit| hit.id != node.id)
                .map(|hit| hit.distance as f64)
                .unwrap_or(0.0);
            let restoration_difficulty = 1.0 - similarity;

            if MDL_REDUCTION_BENEFIT > restoration_difficulty {
                if let Err(e) = self.storage.delete_node(&node.id, memory_group) {
                    tracing::warn!(node = %node.id, "MDL delete failed: {e}");
                } else {
                    tracing::debug!(
                        node = %node.id,
                        difficulty = restoration_difficulty,
                        "MDL sweep removed weak node"
                    );
                    report.deleted_weak_nodes += 1;
                }
            }
        }
        Ok(())
    }

    /// Walk source ids with overlapping windows and physically delete every
    /// edge conflict resolution discards, de-duplicated across windows.
    async fn conflict_sweep(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        config: &MemoryGroupConfig,
        options: MetabolismOptions,
        report: &mut MetabolismReport,
    ) -> Result<()> {
        let max_unix = self.storage.get_max_unix(memory_group)?;
        let stride = SWEEP_PAGE - SWEEP_OVERLAP;
        let mut deleted: HashSet<(String, String, String)> = HashSet::new();
        let mut offset = 0usize;

        loop {
            ensure_active(ctx)?;
            let ids = self
                .storage
                .get_source_node_ids(memory_group, offset, SWEEP_PAGE)?;
            if ids.is_empty() {
                break;
            }
            let last_page = ids.len() < SWEEP_PAGE;

            let triples = self.storage.get_triples_by_source_ids(&ids, memory_group)?;
            // no threshold here: the sweep adjudicates everything it sees
            let scored = score_triples(triples, max_unix, config, 0.0);

            let mut resolution = resolve_stage_one(scored);
            if options.conflict_resolution_stage >= 2 && !resolution.residual_groups.is_empty() {
                match resolve_stage_two(
                    ctx,
                    self.chat.as_ref(),
                    &self.prompts,
                    options.lang,
                    &mut resolution,
                )
                .await
                {
                    Ok(usage) => report.usage.add(&usage),
                    Err(e) => {
                        if matches!(e, crate::error::EngineError::Cancelled) {
                            return Err(e);
                        }
                        tracing::warn!("stage-2 arbitration failed, window skipped: {e}");
                    }
                }
            }

            for discarded in resolution.discarded {
                let edge = discarded.triple.edge;
                let key = (
                    edge.source_id.clone(),
                    edge.edge_type.clone(),
                    edge.target_id.clone(),
                );
                if !deleted.insert(key) {
                    continue;
                }
                if let Err(e) = self.storage.delete_edge(
                    &edge.source_id,
                    &edge.edge_type,
                    &edge.target_id,
                    memory_group,
                ) {
                    tracing::warn!(source = %edge.source_id, "conflict delete failed: {e}");
                } else {
                    report.conflict_deleted += 1;
                }
            }

            if last_page {
                break;
            }
            offset += stride;
        }
        Ok(())
    }
}

/// Typed vector table a node's embedding lives in.
fn typed_table(node: &GraphNode) -> &'static str {
    match node.node_type.as_str() {
        t if t == NodeType::Rule.as_str() => tables::RULE,
        t if t == NodeType::Summary.as_str() => tables::SUMMARY,
        t if t == NodeType::Unknown.as_str() => tables::UNKNOWN,
        t if t == NodeType::Capability.as_str() => tables::CAPABILITY,
        _ => tables::ENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decay::MS_PER_DAY;
    use crate::error::EngineError;
    use crate::events::NullSink;
    use crate::memory::{EmbeddingModelConfig, GraphEdge};
    use crate::model::{ChatResponse, EmbeddingResponse};
    use crate::storage::{CubeStorage, GraphStorage, VectorStorage};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, _: &CancellationToken, _text: &str) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                vector: vec![1.0, 0.0, 0.0, 0.0],
                usage: TokenUsage::of_call("mock-embed", 1, 0),
            })
        }
        fn dimension(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "mock-embed"
        }
    }

    struct StaticChat;

    #[async_trait]
    impl ChatModel for StaticChat {
        async fn complete(
            &self,
            _: &CancellationToken,
            _: &str,
            _: &str,
        ) -> Result<ChatResponse> {
            Ok(ChatResponse {
                text: r#"{"discarded": []}"#.to_string(),
                usage: TokenUsage::of_call("mock-chat", 5, 2),
            })
        }
        fn model_name(&self) -> &str {
            "mock-chat"
        }
    }

    fn storage() -> (TempDir, Arc<CubeStorage>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            CubeStorage::open(
                dir.path().join("cube.db"),
                &EmbeddingModelConfig {
                    model_name: "mock-embed".to_string(),
                    dimension: 4,
                },
                MetabolismConfig::default(),
            )
            .unwrap(),
        );
        (dir, storage)
    }

    fn engine(storage: Arc<CubeStorage>) -> MetabolismEngine {
        MetabolismEngine::new(
            storage,
            Arc::new(AxisEmbedder),
            Arc::new(StaticChat),
            Arc::new(PromptSet::default()),
            Arc::new(NullSink),
            MetabolismConfig::default(),
        )
    }

    fn edge(src: &str, etype: &str, tgt: &str, w: f64, c: f64, unix: i64) -> GraphEdge {
        GraphEdge {
            source_id: src.to_string(),
            target_id: tgt.to_string(),
            memory_group: "g1".to_string(),
            edge_type: etype.to_string(),
            properties: serde_json::Map::new(),
            weight: w,
            confidence: c,
            unix,
        }
    }

    #[tokio::test]
    async fn test_prune_respects_protection_and_threshold() {
        let (_dir, storage) = storage();
        let now = now_ms();
        // decayed far past the threshold, old enough to lose protection
        let ancient = now - 365 * MS_PER_DAY as i64;
        // fresh edge, would be thin but is protected
        storage
            .add_edges(&[
                edge("a::g1", "OLD_REL", "b::g1", 0.9, 0.9, ancient),
                edge("a::g1", "FRESH_REL", "c::g1", 0.01, 0.5, now),
                edge("a::g1", "STRONG_REL", "d::g1", 0.9, 0.9, now),
            ])
            .unwrap();

        let report = engine(Arc::clone(&storage))
            .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
            .await
            .unwrap();

        assert_eq!(report.pruned_edges, 1);
        let remaining = storage.get_edges_by_node("a::g1", "g1").unwrap();
        let types: Vec<&str> = remaining.iter().map(|e| e.edge_type.as_str()).collect();
        assert!(types.contains(&"FRESH_REL"), "protected edge must survive");
        assert!(types.contains(&"STRONG_REL"));
        assert!(!types.contains(&"OLD_REL"));
    }

    #[tokio::test]
    async fn test_orphans_deleted_after_grace() {
        let (_dir, storage) = storage();
        let now = now_ms();
        storage
            .add_nodes(&[
                GraphNode {
                    created_at_ms: now - 2 * 3_600_000,
                    ..GraphNode::new("old-orphan", "Entity", "g1", now)
                },
                GraphNode::new("fresh-orphan", "Entity", "g1", now),
            ])
            .unwrap();

        let report = engine(Arc::clone(&storage))
            .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
            .await
            .unwrap();

        assert_eq!(report.deleted_orphans, 1);
        let remaining = storage.get_nodes_by_type("Entity", "g1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "fresh-orphan::g1");
    }

    #[tokio::test]
    async fn test_mdl_deletes_reconstructible_weak_node() {
        let (_dir, storage) = storage();
        let now = now_ms();
        let old = now - 2 * 3_600_000;
        storage
            .add_nodes(&[
                GraphNode { created_at_ms: old, ..GraphNode::new("weak", "Entity", "g1", now) },
                GraphNode { created_at_ms: old, ..GraphNode::new("twin", "Entity", "g1", now) },
            ])
            .unwrap();
        storage
            .add_edges(&[edge("weak::g1", "REL", "twin::g1", 0.05, 0.5, now)])
            .unwrap();
        // a perfect neighbour: same axis as the mock embedder output
        storage
            .save_embedding(tables::ENTITY, "weak::g1", "weak", &[1.0, 0.0, 0.0, 0.0], "g1")
            .unwrap();
        storage
            .save_embedding(tables::ENTITY, "twin::g1", "twin", &[1.0, 0.0, 0.0, 0.0], "g1")
            .unwrap();

        let report = engine(Arc::clone(&storage))
            .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
            .await
            .unwrap();

        // similarity 1.0 → difficulty 0.0 < benefit → deleted
        assert_eq!(report.deleted_weak_nodes, 1);
        assert!(report.usage.input_tokens > 0, "MDL embedding is billed");
        assert!(storage.get_edges_by_node("weak::g1", "g1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mdl_keeps_hard_to_reconstruct_node() {
        let (_dir, storage) = storage();
        let now = now_ms();
        let old = now - 2 * 3_600_000;
        storage
            .add_nodes(&[GraphNode {
                created_at_ms: old,
                ..GraphNode::new("lonely", "Entity", "g1", now)
            }])
            .unwrap();
        storage
            .add_edges(&[edge("lonely::g1", "REL", "x::g1", 0.05, 0.5, now)])
            .unwrap();
        // no other vector rows: no foreign neighbour, difficulty = 1.0
        storage
            .save_embedding(tables::ENTITY, "lonely::g1", "lonely", &[1.0, 0.0, 0.0, 0.0], "g1")
            .unwrap();

        let report = engine(Arc::clone(&storage))
            .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
            .await
            .unwrap();

        assert_eq!(report.deleted_weak_nodes, 0);
        assert_eq!(storage.get_nodes_by_type("Entity", "g1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_sweep_deletes_exclusive_losers() {
        let (_dir, storage) = storage();
        let now = now_ms();
        storage
            .add_edges(&[
                edge("guido::g1", "WORKS_AT", "cwi::g1", 0.9, 0.9, now - 30 * MS_PER_DAY as i64),
                edge("guido::g1", "WORKS_AT", "google::g1", 0.9, 0.9, now),
            ])
            .unwrap();

        let report = engine(Arc::clone(&storage))
            .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
            .await
            .unwrap();

        assert_eq!(report.conflict_deleted, 1);
        let remaining = storage.get_edges_by_node("guido::g1", "g1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_id, "google::g1");
    }

    #[tokio::test]
    async fn test_cancel_aborts_run() {
        let (_dir, storage) = storage();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = engine(storage)
            .run(&ctx, "g1", MetabolismOptions::default())
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
