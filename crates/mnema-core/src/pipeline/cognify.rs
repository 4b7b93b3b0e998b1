//! Cognify tasks: chunking, graph extraction, storage, summarisation

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ensure_active, Result};
use crate::memory::{
    canonical_node_id, relation_type, Chunk, ChunkingConfig, Document, GraphEdge, GraphNode,
    NodeType,
};
use crate::model::parse_json_payload;
use crate::storage::{tables, GraphStorage, VectorStorage};
use crate::text::{approx_token_count, keyword_layers, Lang};
use crate::usage::TokenUsage;

use super::{PipelineContext, PipelineState};

/// One extracted entity
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedNode {
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// One extracted relation
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub edge_type: String,
    pub weight: Option<f64>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// The `{nodes, edges}` payload the extraction prompt demands
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub nodes: Vec<ExtractedNode>,
    #[serde(default)]
    pub edges: Vec<ExtractedEdge>,
}

/// Parse and validate a model extraction response.
///
/// Nodes without a name and edges without both endpoints are dropped rather
/// than failing the whole chunk.
pub fn parse_extraction(text: &str) -> Result<GraphPayload> {
    let mut payload: GraphPayload = parse_json_payload(text)?;
    payload.nodes.retain(|n| !n.name.trim().is_empty());
    payload
        .edges
        .retain(|e| !e.source.trim().is_empty() && !e.target.trim().is_empty());
    for node in &mut payload.nodes {
        if node.node_type.trim().is_empty() {
            node.node_type = "Entity".to_string();
        }
    }
    for edge in &mut payload.edges {
        if edge.edge_type.trim().is_empty() {
            edge.edge_type = "RELATED_TO".to_string();
        }
    }
    Ok(payload)
}

/// Deterministic chunk rows for one document (no embeddings yet).
pub fn build_chunks(document: &Document, config: ChunkingConfig, lang: Lang) -> Vec<Chunk> {
    crate::text::chunk_text(&document.text, config.chunk_chars, config.overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let layers = keyword_layers(&text, lang);
            Chunk {
                id: Uuid::new_v4().to_string(),
                memory_group: document.memory_group.clone(),
                document_id: document.id.clone(),
                token_count: approx_token_count(&text),
                chunk_index: index as u32,
                nouns: layers.nouns,
                nouns_verbs: layers.nouns_verbs,
                keywords_all: layers.keywords_all,
                text,
                embedding: None,
                created_at: Utc::now(),
            }
        })
        .collect()
}

/// Chunking task: pure, no model calls.
pub(super) fn chunk_task(
    cx: &PipelineContext,
    mut state: PipelineState,
) -> Result<(PipelineState, TokenUsage)> {
    for document in &state.documents {
        state
            .chunks
            .extend(build_chunks(document, cx.config.chunking, cx.lang));
    }
    tracing::debug!(
        documents = state.documents.len(),
        chunks = state.chunks.len(),
        "chunked documents"
    );
    Ok((state, TokenUsage::default()))
}

/// Graph extraction task: one chat call per chunk, results accumulated.
pub(super) async fn extract_graph_task(
    cx: &PipelineContext,
    mut state: PipelineState,
) -> Result<(PipelineState, TokenUsage)> {
    let mut usage = TokenUsage::default();
    let system = cx.prompts.graph_extraction.get(cx.lang);
    let now = crate::decay::now_ms();

    for chunk in &state.chunks {
        ensure_active(&cx.ctx)?;
        let response = cx.chat.complete(&cx.ctx, system, &chunk.text).await?;
        usage.add(&response.usage);

        let payload = parse_extraction(&response.text)?;
        for node in payload.nodes {
            let id = canonical_node_id(&node.name, &cx.memory_group);
            if state.nodes.iter().any(|n| n.id == id) {
                continue;
            }
            state.nodes.push(GraphNode {
                id,
                memory_group: cx.memory_group.clone(),
                node_type: node.node_type,
                properties: node.properties,
                created_at_ms: now,
            });
        }
        for edge in payload.edges {
            state.edges.push(GraphEdge {
                source_id: canonical_node_id(&edge.source, &cx.memory_group),
                target_id: canonical_node_id(&edge.target, &cx.memory_group),
                memory_group: cx.memory_group.clone(),
                edge_type: relation_type(&edge.edge_type),
                properties: edge.properties,
                weight: edge.weight.unwrap_or(0.5).clamp(0.0, 1.0),
                confidence: edge.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
                unix: now,
            });
        }
    }

    Ok((state, usage))
}

/// Storage task: embed chunks and entities, persist everything.
pub(super) async fn store_task(
    cx: &PipelineContext,
    mut state: PipelineState,
) -> Result<(PipelineState, TokenUsage)> {
    let mut usage = TokenUsage::default();

    for chunk in &mut state.chunks {
        ensure_active(&cx.ctx)?;
        let embedded = cx.embedder.embed(&cx.ctx, &chunk.text).await?;
        usage.add(&embedded.usage);
        chunk.embedding = Some(embedded.vector);
        cx.storage.save_chunk(chunk)?;
    }

    cx.storage.add_nodes(&state.nodes)?;
    cx.storage.add_edges(&state.edges)?;

    // entity vector rows for seed search; a single failed node embedding is
    // logged, not fatal
    for node in &state.nodes {
        ensure_active(&cx.ctx)?;
        let text = node.representative_text();
        match cx.embedder.embed(&cx.ctx, &text).await {
            Ok(embedded) => {
                usage.add(&embedded.usage);
                cx.storage.save_embedding(
                    tables::ENTITY,
                    &node.id,
                    &text,
                    &embedded.vector,
                    &cx.memory_group,
                )?;
            }
            Err(e) => {
                tracing::warn!(node = %node.id, "failed to embed entity: {e}");
            }
        }
    }

    state.stored_nodes = state.nodes.len();
    state.stored_edges = state.edges.len();
    Ok((state, usage))
}

/// Summarisation task: one Summary row per chunk.
pub(super) async fn summarize_task(
    cx: &PipelineContext,
    mut state: PipelineState,
) -> Result<(PipelineState, TokenUsage)> {
    let mut usage = TokenUsage::default();
    let system = cx.prompts.summarization.get(cx.lang);
    let now = crate::decay::now_ms();

    for chunk in &state.chunks {
        ensure_active(&cx.ctx)?;
        let response = cx.chat.complete(&cx.ctx, system, &chunk.text).await?;
        usage.add(&response.usage);
        let summary_text = response.text.trim().to_string();
        if summary_text.is_empty() {
            continue;
        }

        let summary_id = Uuid::new_v4().to_string();
        let mut node = GraphNode::new(
            &format!("summary:{summary_id}"),
            NodeType::Summary.as_str(),
            &cx.memory_group,
            now,
        );
        node.properties.insert(
            "chunk_id".to_string(),
            serde_json::Value::String(chunk.id.clone()),
        );
        node.properties.insert(
            "text".to_string(),
            serde_json::Value::String(summary_text.clone()),
        );
        cx.storage.add_nodes(std::slice::from_ref(&node))?;

        let embedded = cx.embedder.embed(&cx.ctx, &summary_text).await?;
        usage.add(&embedded.usage);
        cx.storage.save_embedding(
            tables::SUMMARY,
            &node.id,
            &summary_text,
            &embedded.vector,
            &cx.memory_group,
        )?;
        state.summaries += 1;
    }

    Ok((state, usage))
}
