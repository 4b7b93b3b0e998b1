//! Ingestion & Cognify Pipeline
//!
//! A pipeline is an ordered task list over a shared context; the executor is
//! a fold that threads state through the tasks, accumulating token usage and
//! short-circuiting on the first error. `absorb` composes the Add pipeline
//! (ingest + blob staging) with the Cognify pipeline (chunk → extract →
//! store → summarise) and deletes staged blobs once cognify succeeds.

mod cognify;

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ensure_active, Result};
use crate::events::{emit, EventKind, SharedSink};
use crate::memory::{canonical_node_id, Document, EngineConfig, GraphEdge, GraphNode};
use crate::model::{BlobStore, ChatModel, Embedder, PromptSet};
use crate::storage::{GraphStorage, SharedStorage, VectorStorage};
use crate::text::{extract_content, Lang, SourceKind};
use crate::usage::TokenUsage;

pub use cognify::{build_chunks, parse_extraction, ExtractedEdge, ExtractedNode, GraphPayload};

/// Everything tasks share
pub struct PipelineContext {
    pub ctx: CancellationToken,
    pub storage: SharedStorage,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub blobs: Arc<dyn BlobStore>,
    pub prompts: Arc<PromptSet>,
    pub events: SharedSink,
    pub config: EngineConfig,
    pub memory_group: String,
    pub lang: Lang,
}

/// One file handed to absorb
///
/// Raw-to-text parsing for binary formats happens upstream; the body here is
/// already text (possibly HTML or Markdown, which the pipeline extracts).
#[derive(Debug, Clone)]
pub struct IngestFile {
    pub name: String,
    pub body: String,
    pub original_location: String,
    pub extension: String,
    pub mime_type: String,
    pub owner_id: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IngestFile {
    /// Plain-text file with defaults for everything else.
    pub fn text(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            original_location: String::new(),
            extension: "txt".to_string(),
            mime_type: "text/plain".to_string(),
            owner_id: String::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// State threaded through the task fold
#[derive(Debug, Default)]
pub struct PipelineState {
    pub files: Vec<IngestFile>,
    pub data_ids: Vec<String>,
    pub documents: Vec<Document>,
    pub chunks: Vec<crate::memory::Chunk>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub staged_blobs: Vec<String>,
    pub deduped: usize,
    pub stored_nodes: usize,
    pub stored_edges: usize,
    pub summaries: usize,
}

/// The pipeline task sum type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineTask {
    Ingest,
    Chunk,
    ExtractGraph,
    Store,
    Summarize,
}

impl PipelineTask {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineTask::Ingest => "ingest",
            PipelineTask::Chunk => "chunk",
            PipelineTask::ExtractGraph => "extract_graph",
            PipelineTask::Store => "store",
            PipelineTask::Summarize => "summarize",
        }
    }

    async fn run(
        &self,
        cx: &PipelineContext,
        state: PipelineState,
    ) -> Result<(PipelineState, TokenUsage)> {
        ensure_active(&cx.ctx)?;
        match self {
            PipelineTask::Ingest => ingest_task(cx, state).await,
            PipelineTask::Chunk => cognify::chunk_task(cx, state),
            PipelineTask::ExtractGraph => cognify::extract_graph_task(cx, state).await,
            PipelineTask::Store => cognify::store_task(cx, state).await,
            PipelineTask::Summarize => cognify::summarize_task(cx, state).await,
        }
    }
}

/// An ordered task list
#[derive(Debug, Clone)]
pub struct Pipeline {
    tasks: Vec<PipelineTask>,
}

impl Pipeline {
    /// The Add half of absorb.
    pub fn add() -> Self {
        Self {
            tasks: vec![PipelineTask::Ingest],
        }
    }

    /// The Cognify half of absorb.
    pub fn cognify() -> Self {
        Self {
            tasks: vec![
                PipelineTask::Chunk,
                PipelineTask::ExtractGraph,
                PipelineTask::Store,
                PipelineTask::Summarize,
            ],
        }
    }

    pub fn tasks(&self) -> &[PipelineTask] {
        &self.tasks
    }

    /// Fold the state through the tasks.
    ///
    /// The usage accumulated before a failure is returned alongside the
    /// error, so callers can bill partial work.
    pub async fn run(
        &self,
        cx: &PipelineContext,
        mut state: PipelineState,
    ) -> (Result<PipelineState>, TokenUsage) {
        let mut usage = TokenUsage::default();
        for task in &self.tasks {
            emit(
                &cx.events,
                EventKind::PipelineTaskStart,
                serde_json::json!({"task": task.name()}),
            );
            match task.run(cx, state).await {
                Ok((next, task_usage)) => {
                    usage.add(&task_usage);
                    emit(
                        &cx.events,
                        EventKind::PipelineTaskEnd,
                        serde_json::json!({"task": task.name()}),
                    );
                    state = next;
                }
                Err(e) => {
                    emit(
                        &cx.events,
                        EventKind::PipelineTaskEnd,
                        serde_json::json!({"task": task.name(), "error": e.to_string()}),
                    );
                    return (Err(e), usage);
                }
            }
        }
        (Ok(state), usage)
    }
}

/// What absorb did
#[derive(Debug, Default, Clone)]
pub struct AbsorbReport {
    pub data_ids: Vec<String>,
    pub deduped: usize,
    pub chunk_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub summary_count: usize,
}

/// Ingest files then cognify them; blobs staged by Add are deleted once
/// Cognify succeeds. Returns the report (or first fatal error) plus all
/// token usage accumulated up to that point.
pub async fn absorb(
    cx: &PipelineContext,
    files: Vec<IngestFile>,
) -> (Result<AbsorbReport>, TokenUsage) {
    let mut usage = TokenUsage::default();

    let state = PipelineState {
        files,
        ..PipelineState::default()
    };

    let (added, add_usage) = Pipeline::add().run(cx, state).await;
    usage.add(&add_usage);
    let state = match added {
        Ok(state) => state,
        Err(e) => return (Err(e), usage),
    };

    let (cognified, cognify_usage) = Pipeline::cognify().run(cx, state).await;
    usage.add(&cognify_usage);
    let state = match cognified {
        Ok(state) => state,
        Err(e) => return (Err(e), usage),
    };

    // staged blobs are only a crash-recovery net; drop them now
    for key in &state.staged_blobs {
        if let Err(e) = cx.blobs.delete(&cx.ctx, key).await {
            tracing::warn!(key = %key, "failed to delete staged blob: {e}");
        }
    }

    let report = AbsorbReport {
        data_ids: state.data_ids,
        deduped: state.deduped,
        chunk_count: state.chunks.len(),
        node_count: state.stored_nodes,
        edge_count: state.stored_edges,
        summary_count: state.summaries,
    };
    (Ok(report), usage)
}

/// The Add task: Data rows, blob staging, Document rows.
async fn ingest_task(
    cx: &PipelineContext,
    mut state: PipelineState,
) -> Result<(PipelineState, TokenUsage)> {
    // group config is created lazily on first ingest
    let group_config = cx.storage.get_memory_group_config(&cx.memory_group)?;
    cx.storage
        .upsert_memory_group(&cx.memory_group, &group_config)?;

    let files = std::mem::take(&mut state.files);
    for file in files {
        ensure_active(&cx.ctx)?;

        let content_hash = hex_sha256(file.body.as_bytes());
        if cx.storage.exists(&content_hash, &cx.memory_group)? {
            // refresh descriptive fields, skip re-cognify
            let existing_id = cx.storage.save_data(&crate::memory::DataRecord {
                id: Uuid::new_v4().to_string(),
                memory_group: cx.memory_group.clone(),
                name: file.name.clone(),
                raw_location: String::new(),
                original_location: file.original_location.clone(),
                extension: file.extension.clone(),
                mime_type: file.mime_type.clone(),
                content_hash: content_hash.clone(),
                owner_id: file.owner_id.clone(),
                created_at: Utc::now(),
            })?;
            state.data_ids.push(existing_id);
            state.deduped += 1;
            tracing::debug!(name = %file.name, "skipping duplicate content");
            continue;
        }

        let data_id = Uuid::new_v4().to_string();
        let raw_location = format!("staging/{}/{}", cx.memory_group, data_id);
        cx.blobs
            .put(&cx.ctx, &raw_location, file.body.clone().into_bytes())
            .await?;
        state.staged_blobs.push(raw_location.clone());

        cx.storage.save_data(&crate::memory::DataRecord {
            id: data_id.clone(),
            memory_group: cx.memory_group.clone(),
            name: file.name.clone(),
            raw_location,
            original_location: file.original_location.clone(),
            extension: file.extension.clone(),
            mime_type: file.mime_type.clone(),
            content_hash,
            owner_id: file.owner_id.clone(),
            created_at: Utc::now(),
        })?;

        let kind = SourceKind::infer(&file.extension, &file.mime_type);
        let document = Document {
            id: Uuid::new_v4().to_string(),
            memory_group: cx.memory_group.clone(),
            data_id: data_id.clone(),
            text: extract_content(&file.body, kind),
            metadata: file.metadata.clone(),
            created_at: Utc::now(),
        };
        cx.storage.save_document(&document)?;

        // data → document linkage in the graph; MERGE atomicity is the
        // backend transaction's guarantee
        let now = crate::decay::now_ms();
        let data_node = GraphNode::new(&format!("data:{data_id}"), "Data", &cx.memory_group, now);
        let doc_node = GraphNode::new(
            &format!("document:{}", document.id),
            "Document",
            &cx.memory_group,
            now,
        );
        let mut properties = serde_json::Map::new();
        properties.insert(
            "memory_group".to_string(),
            serde_json::Value::String(cx.memory_group.clone()),
        );
        let edge = GraphEdge {
            source_id: canonical_node_id(&format!("data:{data_id}"), &cx.memory_group),
            target_id: canonical_node_id(&format!("document:{}", document.id), &cx.memory_group),
            memory_group: cx.memory_group.clone(),
            edge_type: "HAS_DOCUMENT".to_string(),
            properties,
            weight: 1.0,
            confidence: 1.0,
            unix: now,
        };
        cx.storage.add_nodes(&[data_node, doc_node])?;
        cx.storage.add_edges(&[edge])?;

        state.data_ids.push(data_id);
        state.documents.push(document);
    }

    Ok((state, TokenUsage::default()))
}

/// Hex SHA-256 of `bytes`.
pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
