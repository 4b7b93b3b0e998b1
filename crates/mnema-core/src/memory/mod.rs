//! Core Data Model
//!
//! Rows and graph elements, all partitioned by `memory_group`. Lifecycles:
//! Data → Document → Chunk are created by ingestion; graph nodes and edges by
//! cognify or metacognition; edges are updated and deleted by metabolism,
//! conflict resolution, and crystallisation rewiring.

mod config;
mod graph;
mod records;

pub use config::{
    ChunkingConfig, EmbeddingModelConfig, EngineConfig, MemifyConfig, MemoryGroupConfig,
    MetabolismConfig, MetacognitionConfig,
};
pub use graph::{
    canonical_node_id, display_name, relation_type, GraphEdge, GraphNode, NodeType, ScoredTriple,
    Triple, NODE_ID_SEPARATOR,
};
pub use records::{Chunk, DataRecord, Document, DocumentChunk};
