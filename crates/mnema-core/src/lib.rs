//! # Mnema Core
//!
//! Self-maintaining knowledge engine. Documents are distilled into a dual
//! representation (dense vector chunks + a typed property graph), queries run
//! hybrid retrieval over both, and background engines continuously
//! *metabolise* the graph: reinforcing supported edges, decaying unused
//! ones, pruning weak nodes, and adjudicating contradictions.
//!
//! ## Subsystems
//!
//! - **Hybrid retrieval** ([`query`]): vector Top-K + BM25 full-text +
//!   graph traversal with time-decayed edge scoring and two-stage conflict
//!   resolution
//! - **Graph metabolism** ([`metabolism`]): temporal decay, edge pruning,
//!   orphan removal, MDL-based weak-node deletion
//! - **Metacognition** ([`metacognition`]): rule extraction (memify),
//!   unknown/capability tracking, self-reflection, crystallisation
//! - **Cube lifecycle** ([`cube`]): per-tenant storage handles with idle
//!   eviction and blob-store cleanup
//!
//! Everything is partitioned by *memory group* (a tenant key); a *cube* is
//! one self-contained SQLite file holding rows, vectors, FTS indices, and
//! the graph.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mnema_core::prelude::*;
//!
//! let service = CubeService::new(EngineConfig::default(), embedding_config, blobs);
//! let handle = service.get_or_open("data/c1.db").await?;
//!
//! // ingest + cognify
//! let cx = PipelineContext { /* models, prompts, events, ... */ };
//! let (report, usage) = absorb(&cx, vec![IngestFile::text("doc.txt", text)]).await;
//!
//! // hybrid query
//! let engine = QueryEngine::new(handle.shared_storage(), embedder, chat,
//!     prompts, events, handle.shutdown_token());
//! let out = engine.query(&ctx, "g1", "Python creator", &QueryConfig::default()).await?;
//! ```
//!
//! External collaborators (embedding model, chat model, blob store, prompt
//! text, event transport) enter through the traits in [`model`] and
//! [`events`]; the core never talks to a provider directly.

// ============================================================================
// MODULES
// ============================================================================

pub mod conflict;
pub mod cube;
pub mod decay;
pub mod error;
pub mod events;
pub mod memory;
pub mod metabolism;
pub mod metacognition;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod text;
pub mod usage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{ensure_active, EngineError, Result};

// Data model
pub use memory::{
    canonical_node_id, display_name, relation_type, Chunk, ChunkingConfig, DataRecord, Document,
    DocumentChunk, EmbeddingModelConfig, EngineConfig, GraphEdge, GraphNode, MemifyConfig,
    MemoryGroupConfig, MetabolismConfig, MetacognitionConfig, NodeType, ScoredTriple, Triple,
};

// Decay primitives
pub use decay::{days_to_ms, lambda, now_ms, thickness};

// Storage contract
pub use storage::{
    tables, CubeStorage, EmbeddingRow, GraphStorage, SearchHit, SharedStorage, Storage,
    VectorStorage,
};

// Cube lifecycle
pub use cube::{cube_id_from_path, export_cube, export_cube_to_path, CubeHandle, CubeService};

// External model seams
pub use model::{
    cosine_similarity, embedding_from_bytes, embedding_to_bytes, parse_json_payload, BlobStore,
    ChatModel, ChatResponse, Embedder, EmbeddingResponse, PromptSet,
};

// Pipeline
pub use pipeline::{
    absorb, hex_sha256, AbsorbReport, IngestFile, Pipeline, PipelineContext, PipelineState,
    PipelineTask,
};

// Retrieval
pub use query::{
    render_graph, QueryConfig, QueryEngine, QueryOutput, QueryType, DEFAULT_THICKNESS_THRESHOLD,
};

// Conflict resolution
pub use conflict::{is_exclusive, resolve_stage_one, resolve_stage_two, Resolution};

// Metabolism
pub use metabolism::{
    MetabolismEngine, MetabolismOptions, MetabolismReport, MDL_REDUCTION_BENEFIT,
};

// Metacognition
pub use metacognition::{
    is_uncertain, CrystallizeReport, MemifyReport, MetacognitionEngine, RecursiveMemifyReport,
    ReflectionReport, Registered,
};

// Text stack
pub use text::{keyword_layers, normalize, FtsLayer, KeywordLayers, Lang};

// Events and usage accounting
pub use events::{Event, EventKind, EventSink, NullSink, SharedSink};
pub use usage::{ModelUsage, TokenUsage};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        absorb, BlobStore, ChatModel, Chunk, CubeHandle, CubeService, CubeStorage, Embedder,
        EmbeddingModelConfig, EngineConfig, EngineError, GraphEdge, GraphNode, IngestFile, Lang,
        MetabolismEngine, MetabolismOptions, MetacognitionEngine, PipelineContext, PromptSet,
        QueryConfig, QueryEngine, QueryType, Result, Storage, TokenUsage,
    };
}
