//! Storage Contract
//!
//! Two capability sets over one cube file: [`VectorStorage`] (rows,
//! embeddings, FTS) and [`GraphStorage`] (nodes, edges, triples,
//! maintenance). [`CubeStorage`] is the single concrete type implementing
//! both; engines hold `Arc<dyn Storage>` so a different backend can slot in
//! behind the same seam.
//!
//! Contract guarantees: every read is scoped by `memory_group`; writes are
//! transactional per public operation; concurrent writers serialise on the
//! writer connection; `checkpoint` durably flushes WAL state; `close` and
//! `is_open` are idempotent.

mod schema;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::memory::{
    Chunk, DataRecord, Document, DocumentChunk, GraphEdge, GraphNode, MemoryGroupConfig, Triple,
};
use crate::text::FtsLayer;

pub use schema::{apply_migrations, Migration, MIGRATIONS};
pub use sqlite::CubeStorage;

/// Names of the typed vector tables
pub mod tables {
    pub const ENTITY: &str = "entity";
    pub const SUMMARY: &str = "summary";
    pub const RULE: &str = "rule";
    pub const UNKNOWN: &str = "unknown";
    pub const CAPABILITY: &str = "capability";
    /// Chunk vectors live on the chunk rows themselves
    pub const CHUNK: &str = "chunk";
}

/// One retrieval hit
///
/// `distance` is "higher is more relevant" on every path: cosine similarity
/// for vector search, BM25 score for FTS.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub distance: f32,
    pub nouns: String,
    pub nouns_verbs: String,
}

/// A stored embedding row
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Row/vector/FTS operations
pub trait VectorStorage: Send + Sync {
    /// Upsert on `(content_hash, memory_group)`; returns the stored row id
    /// (the original id when the hash already existed).
    fn save_data(&self, data: &DataRecord) -> Result<String>;

    /// True iff a Data row with this `(content_hash, memory_group)` exists.
    fn exists(&self, content_hash: &str, memory_group: &str) -> Result<bool>;

    fn get_data_by_id(&self, id: &str, memory_group: &str) -> Result<Option<DataRecord>>;

    fn get_data_list(&self, memory_group: &str) -> Result<Vec<DataRecord>>;

    fn save_document(&self, document: &Document) -> Result<()>;

    fn save_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Upsert a typed vector row; the keyword layers of `text` are derived
    /// here so vector hits can feed FTS expansion.
    fn save_embedding(
        &self,
        table: &str,
        id: &str,
        text: &str,
        vector: &[f32],
        memory_group: &str,
    ) -> Result<()>;

    /// Vector Top-K within one memory group, cosine-ranked.
    fn query(
        &self,
        table: &str,
        vector: &[f32],
        topk: usize,
        memory_group: &str,
    ) -> Result<Vec<SearchHit>>;

    /// BM25 full-text search on the selected keyword layer. Only the chunk
    /// table carries an FTS index.
    fn full_text_search(
        &self,
        table: &str,
        query: &str,
        topk: usize,
        memory_group: &str,
        is_en: bool,
        layer: FtsLayer,
    ) -> Result<Vec<SearchHit>>;

    fn get_embedding_by_id(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<EmbeddingRow>>;

    fn get_embeddings_by_ids(
        &self,
        table: &str,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<EmbeddingRow>>;
}

/// Graph and maintenance operations
pub trait GraphStorage: Send + Sync {
    /// Upsert nodes; existing rows keep their `created_at_ms`.
    fn add_nodes(&self, nodes: &[GraphNode]) -> Result<()>;

    /// Upsert edges. Re-observing an existing `(source, type, target)`
    /// reinforces it: `w' = w + α(1−w)`, `c' = c + δ(1−c)`, fresh `unix`.
    fn add_edges(&self, edges: &[GraphEdge]) -> Result<()>;

    /// Every edge with either endpoint in `ids`, materialised as triples.
    fn get_triples(&self, ids: &[String], memory_group: &str) -> Result<Vec<Triple>>;

    /// Distinct edge-source ids, paged for metabolism sweeps.
    fn get_source_node_ids(
        &self,
        memory_group: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Outgoing triples of the given source ids.
    fn get_triples_by_source_ids(&self, ids: &[String], memory_group: &str)
        -> Result<Vec<Triple>>;

    /// Stream every chunk of the group in `(document_id, chunk_index)`
    /// order. The error channel resolves once streaming stops.
    fn stream_document_chunks(
        self: Arc<Self>,
        ctx: CancellationToken,
        memory_group: String,
    ) -> (mpsc::Receiver<DocumentChunk>, oneshot::Receiver<Result<()>>);

    fn get_document_chunk_count(&self, memory_group: &str) -> Result<u64>;

    fn get_nodes_by_type(&self, node_type: &str, memory_group: &str) -> Result<Vec<GraphNode>>;

    /// Targets reachable from `node_id` over edges of `edge_type`.
    fn get_nodes_by_edge(
        &self,
        node_id: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>>;

    fn update_edge_weight(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
        weight: f64,
    ) -> Result<()>;

    fn update_edge_metrics(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
        weight: f64,
        confidence: f64,
        unix: i64,
    ) -> Result<()>;

    fn delete_edge(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
    ) -> Result<()>;

    /// Delete a node with its incident edges and typed vector rows.
    fn delete_node(&self, id: &str, memory_group: &str) -> Result<()>;

    /// All edges incident to `id`, both directions.
    fn get_edges_by_node(&self, id: &str, memory_group: &str) -> Result<Vec<GraphEdge>>;

    /// Edge-less nodes older than `grace`.
    fn get_orphan_nodes(&self, memory_group: &str, grace: Duration) -> Result<Vec<GraphNode>>;

    /// Nodes older than `grace` whose every incident edge has
    /// `weight·confidence ≤ threshold`.
    fn get_weakly_connected_nodes(
        &self,
        memory_group: &str,
        threshold: f64,
        grace: Duration,
    ) -> Result<Vec<GraphNode>>;

    /// Newest edge timestamp in the group; 0 when the group has no edges.
    fn get_max_unix(&self, memory_group: &str) -> Result<i64>;

    /// Group config, defaults when no row exists.
    fn get_memory_group_config(&self, memory_group: &str) -> Result<MemoryGroupConfig>;

    fn upsert_memory_group(&self, memory_group: &str, config: &MemoryGroupConfig) -> Result<()>;

    /// Run `f` inside one writer transaction.
    fn transaction(&self, f: &mut dyn FnMut(&Connection) -> Result<()>) -> Result<()>;

    /// Durably flush write-ahead state into the main file.
    fn checkpoint(&self) -> Result<()>;

    /// Idempotent; flushes and marks the handle closed.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// The full storage contract engines program against.
pub trait Storage: VectorStorage + GraphStorage {}

impl<T: VectorStorage + GraphStorage> Storage for T {}

/// Shared storage handle
pub type SharedStorage = Arc<dyn Storage + Send + Sync>;
