//! Hybrid Retrieval Engine
//!
//! One query runs: embed (cached) → entity seed search → FTS expansion →
//! graph traversal → decay scoring → conflict resolution → presentation.
//! Edges the resolver discards are deleted in a detached background task so
//! query latency never pays for writes; the task is bounded by a 30-second
//! timeout and aborts when the cube closes.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio_util::sync::CancellationToken;

use crate::conflict::{resolve_stage_one, resolve_stage_two};
use crate::decay;
use crate::error::{ensure_active, Result};
use crate::events::{emit, EventKind, SharedSink};
use crate::memory::{
    canonical_node_id, display_name, GraphEdge, MemoryGroupConfig, ScoredTriple, Triple,
};
use crate::model::{ChatModel, Embedder, PromptSet};
use crate::storage::{tables, GraphStorage, SharedStorage, VectorStorage};
use crate::text::{normalize, query_terms};
use crate::usage::TokenUsage;

use super::{render_graph, QueryConfig, QueryOutput, QueryType};

/// Bound on the detached conflict-delete task
const BACKGROUND_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Query-embedding cache capacity
const QUERY_CACHE_SIZE: usize = 100;

/// The retrieval engine for one cube
pub struct QueryEngine {
    storage: SharedStorage,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    prompts: Arc<PromptSet>,
    events: SharedSink,
    /// The owning cube's shutdown token; background deletes stop on it
    shutdown: CancellationToken,
    /// Sibling calls share query embeddings through this cache
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl QueryEngine {
    pub fn new(
        storage: SharedStorage,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        prompts: Arc<PromptSet>,
        events: SharedSink,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            embedder,
            chat,
            prompts,
            events,
            shutdown,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Run one query against `memory_group`.
    pub async fn query(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        query_text: &str,
        config: &QueryConfig,
    ) -> Result<QueryOutput> {
        let mut usage = TokenUsage::default();
        let lang = config.lang();
        let normalized = normalize(query_text);

        let embedding = self.embed_query(ctx, &normalized, &mut usage).await?;
        let mut out = QueryOutput {
            embedding: Some(embedding.clone()),
            ..QueryOutput::default()
        };

        if config.query_type.needs_chunks() && config.chunk_topk > 0 {
            emit(
                &self.events,
                EventKind::VectorSearchStart,
                serde_json::json!({"table": tables::CHUNK}),
            );
            let hits =
                self.storage
                    .query(tables::CHUNK, &embedding, config.chunk_topk, memory_group)?;
            emit(
                &self.events,
                EventKind::VectorSearchEnd,
                serde_json::json!({"table": tables::CHUNK, "hits": hits.len()}),
            );
            out.chunks = hits.into_iter().map(|hit| hit.text).collect();
        }

        if config.query_type.needs_summaries() && config.summary_topk > 0 {
            emit(
                &self.events,
                EventKind::VectorSearchStart,
                serde_json::json!({"table": tables::SUMMARY}),
            );
            let hits = self.storage.query(
                tables::SUMMARY,
                &embedding,
                config.summary_topk,
                memory_group,
            )?;
            emit(
                &self.events,
                EventKind::VectorSearchEnd,
                serde_json::json!({"table": tables::SUMMARY, "hits": hits.len()}),
            );
            out.summaries = hits.into_iter().map(|hit| hit.text).collect();
        }

        if config.query_type.needs_graph() {
            out.graph = self
                .collect_graph(ctx, memory_group, &normalized, &embedding, config, &mut usage)
                .await?;

            if config.query_type.renders_graph() {
                let rendered = render_graph(&out.graph, lang);
                if config.query_type.summarises_graph() {
                    emit(
                        &self.events,
                        EventKind::GenerationStart,
                        serde_json::json!({"step": "graph_summary"}),
                    );
                    let response = self
                        .chat
                        .complete(ctx, self.prompts.graph_summary.get(lang), &rendered)
                        .await?;
                    usage.add(&response.usage);
                    emit(
                        &self.events,
                        EventKind::GenerationEnd,
                        serde_json::json!({"step": "graph_summary"}),
                    );
                    out.graph_text = Some(response.text);
                } else {
                    out.graph_text = Some(rendered);
                }
            }
        }

        if config.query_type.generates_answer() {
            let context = Self::answer_context(&out, config.query_type, lang);
            emit(
                &self.events,
                EventKind::GenerationStart,
                serde_json::json!({"step": "answer"}),
            );
            let user = format!("{context}\n\n## question\n{query_text}");
            let response = self
                .chat
                .complete(ctx, self.prompts.rag_answer.get(lang), &user)
                .await?;
            usage.add(&response.usage);
            emit(
                &self.events,
                EventKind::GenerationEnd,
                serde_json::json!({"step": "answer"}),
            );
            out.answer = Some(response.text);
        }

        out.usage = usage;
        Ok(out)
    }

    /// Embed the normalised query, sharing vectors across sibling calls.
    async fn embed_query(
        &self,
        ctx: &CancellationToken,
        normalized: &str,
        usage: &mut TokenUsage,
    ) -> Result<Vec<f32>> {
        if let Some(vector) = self
            .query_cache
            .lock()
            .expect("query cache lock poisoned")
            .get(normalized)
        {
            return Ok(vector.clone());
        }

        emit(
            &self.events,
            EventKind::EmbeddingStart,
            serde_json::json!({"step": "query"}),
        );
        let response = self.embedder.embed(ctx, normalized).await?;
        usage.add(&response.usage);
        emit(
            &self.events,
            EventKind::EmbeddingEnd,
            serde_json::json!({"step": "query"}),
        );

        self.query_cache
            .lock()
            .expect("query cache lock poisoned")
            .put(normalized.to_string(), response.vector.clone());
        Ok(response.vector)
    }

    /// Steps 2–6: seeds, FTS expansion, traversal, scoring, resolution.
    async fn collect_graph(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        normalized_query: &str,
        embedding: &[f32],
        config: &QueryConfig,
        usage: &mut TokenUsage,
    ) -> Result<Vec<ScoredTriple>> {
        let lang = config.lang();

        emit(
            &self.events,
            EventKind::VectorSearchStart,
            serde_json::json!({"table": tables::ENTITY}),
        );
        let seeds =
            self.storage
                .query(tables::ENTITY, embedding, config.entity_topk, memory_group)?;
        emit(
            &self.events,
            EventKind::VectorSearchEnd,
            serde_json::json!({"table": tables::ENTITY, "hits": seeds.len()}),
        );

        let mut candidates: Vec<String> = Vec::new();
        for seed in &seeds {
            if !candidates.contains(&seed.id) {
                candidates.push(seed.id.clone());
            }
        }

        if config.fts_topk > 0 {
            emit(
                &self.events,
                EventKind::FullTextSearchStart,
                serde_json::json!({"layer": config.fts_layer.column()}),
            );

            // morphological terms of the query itself
            for term in query_terms(normalized_query, lang, config.fts_layer) {
                let id = canonical_node_id(&term, memory_group);
                if !candidates.contains(&id) {
                    candidates.push(id);
                }
            }

            // per-seed BM25: harvest the nouns layer of every hit
            let mut fts_hits = 0usize;
            for seed in &seeds {
                ensure_active(ctx)?;
                let name = display_name(&seed.id, memory_group);
                let hits = self.storage.full_text_search(
                    tables::CHUNK,
                    name,
                    config.fts_topk,
                    memory_group,
                    lang.is_en(),
                    config.fts_layer,
                )?;
                fts_hits += hits.len();
                for hit in hits {
                    for noun in hit.nouns.split_whitespace() {
                        let id = canonical_node_id(noun, memory_group);
                        if !candidates.contains(&id) {
                            candidates.push(id);
                        }
                    }
                }
            }

            emit(
                &self.events,
                EventKind::FullTextSearchEnd,
                serde_json::json!({"hits": fts_hits, "candidates": candidates.len()}),
            );
        }

        ensure_active(ctx)?;
        emit(
            &self.events,
            EventKind::GraphSearchStart,
            serde_json::json!({"candidates": candidates.len()}),
        );
        let triples = self.storage.get_triples(&candidates, memory_group)?;
        emit(
            &self.events,
            EventKind::GraphSearchEnd,
            serde_json::json!({"triples": triples.len()}),
        );

        let max_unix = self.storage.get_max_unix(memory_group)?;
        let group_config = self.storage.get_memory_group_config(memory_group)?;
        let scored = score_triples(triples, max_unix, &group_config, config.threshold());

        emit(
            &self.events,
            EventKind::ConflictResolutionStart,
            serde_json::json!({"triples": scored.len()}),
        );
        let mut resolution = resolve_stage_one(scored);
        if config.conflict_resolution_stage >= 2 && !resolution.residual_groups.is_empty() {
            let stage_two_usage = resolve_stage_two(
                ctx,
                self.chat.as_ref(),
                &self.prompts,
                lang,
                &mut resolution,
            )
            .await?;
            usage.add(&stage_two_usage);
        }
        emit(
            &self.events,
            EventKind::ConflictResolutionEnd,
            serde_json::json!({
                "resolved": resolution.resolved.len(),
                "discarded": resolution.discarded.len(),
            }),
        );

        if !resolution.discarded.is_empty() {
            let edges: Vec<GraphEdge> = resolution
                .discarded
                .into_iter()
                .map(|t| t.triple.edge)
                .collect();
            self.spawn_background_delete(edges);
        }

        Ok(resolution.resolved)
    }

    /// Physically delete discarded edges without coupling query latency to
    /// writes. Bounded by a timeout; stops if the cube shuts down first.
    fn spawn_background_delete(&self, edges: Vec<GraphEdge>) {
        let storage = Arc::clone(&self.storage);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let work = tokio::task::spawn_blocking(move || {
                for edge in edges {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    if let Err(e) = storage.delete_edge(
                        &edge.source_id,
                        &edge.edge_type,
                        &edge.target_id,
                        &edge.memory_group,
                    ) {
                        tracing::warn!(
                            source = %edge.source_id,
                            relation = %edge.edge_type,
                            "background conflict delete failed: {e}"
                        );
                    }
                }
            });
            tokio::select! {
                _ = tokio::time::sleep(BACKGROUND_DELETE_TIMEOUT) => {
                    tracing::warn!("background conflict delete timed out");
                }
                result = work => {
                    if let Err(e) = result {
                        tracing::warn!("background conflict delete panicked: {e}");
                    }
                }
            }
        });
    }

    /// Assemble the generation context for answer-producing types.
    fn answer_context(out: &QueryOutput, query_type: QueryType, lang: crate::text::Lang) -> String {
        let (graph_header, chunk_header, summary_header) = match lang {
            crate::text::Lang::En => ("## graph summary", "## chunks", "## summaries"),
            crate::text::Lang::Ja => ("## グラフ要約", "## チャンク", "## 要約"),
        };

        let mut context = String::new();
        if let Some(graph_text) = &out.graph_text {
            context.push_str(graph_header);
            context.push('\n');
            context.push_str(graph_text);
            context.push('\n');
        }
        if query_type.needs_chunks() {
            context.push_str(chunk_header);
            context.push('\n');
            for chunk in &out.chunks {
                context.push_str("- ");
                context.push_str(chunk);
                context.push('\n');
            }
        }
        if query_type.needs_summaries() {
            context.push_str(summary_header);
            context.push('\n');
            for summary in &out.summaries {
                context.push_str("- ");
                context.push_str(summary);
                context.push('\n');
            }
        }
        context
    }
}

/// Decay-score triples against the group's newest edge and drop everything
/// under the threshold. Pure.
pub(crate) fn score_triples(
    triples: Vec<Triple>,
    max_unix: i64,
    config: &MemoryGroupConfig,
    threshold: f64,
) -> Vec<ScoredTriple> {
    let lambda = decay::lambda(config.half_life_days);
    triples
        .into_iter()
        .filter_map(|triple| {
            let thickness = triple.edge.thickness(max_unix, lambda);
            (thickness >= threshold).then_some(ScoredTriple { triple, thickness })
        })
        .collect()
}
