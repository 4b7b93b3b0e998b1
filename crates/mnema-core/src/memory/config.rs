//! Engine and per-tenant configuration
//!
//! Every knob has a default; missing values always fall back rather than
//! erroring, so a half-written config row never blocks a query.

use serde::{Deserialize, Serialize};

/// Per-memory-group metabolism parameters
///
/// Created lazily on first ingest, updated by operator action. Absent rows
/// read as `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryGroupConfig {
    /// Edge-decay half-life; 0 disables decay
    pub half_life_days: f64,
    /// Thickness floor below which metabolism prunes an edge
    pub prune_threshold: f64,
    /// Edges younger than this survive pruning regardless of thickness
    pub min_survival_protection_hours: f64,
    /// Neighbour count for the MDL reconstruction proxy
    pub mdl_k_neighbors: usize,
}

impl Default for MemoryGroupConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            prune_threshold: 0.1,
            min_survival_protection_hours: 1.0,
            mdl_k_neighbors: 5,
        }
    }
}

/// Embedding model identity recorded in the cube schema
///
/// A cube embeds with exactly one model; reopening with a different
/// dimension is a schema mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingModelConfig {
    pub model_name: String,
    pub dimension: usize,
}

/// Document chunking window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 1200,
            overlap_chars: 100,
        }
    }
}

/// Memify batching thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemifyConfig {
    /// At or under this many chars the whole group goes in one model call
    pub max_chars_for_bulk: usize,
    /// Overlap between consecutive batches, percent of batch size
    pub batch_overlap_percent: usize,
    /// Batches never shrink below this
    pub batch_min_chars: usize,
}

impl Default for MemifyConfig {
    fn default() -> Self {
        Self {
            max_chars_for_bulk: 50_000,
            batch_overlap_percent: 20,
            batch_min_chars: 5_000,
        }
    }
}

/// Metacognition thresholds and limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetacognitionConfig {
    /// Similarity at or above which a new Unknown is a duplicate
    pub sim_unknown: f32,
    /// Distance gate for reflection context hits
    pub sim_reflection: f32,
    /// Similarity at or above which Rules cluster for crystallisation
    pub sim_crystal: f32,
    pub limit_unknown: usize,
    pub limit_refl_chunk: usize,
    pub limit_refl_rule: usize,
    /// Minimum cluster size that crystallises
    pub min_cluster: usize,
    /// Recursion depth for recursive memify
    pub max_depth: usize,
}

impl Default for MetacognitionConfig {
    fn default() -> Self {
        Self {
            sim_unknown: 0.3,
            sim_reflection: 0.5,
            sim_crystal: 0.8,
            limit_unknown: 5,
            limit_refl_chunk: 3,
            limit_refl_rule: 3,
            min_cluster: 2,
            max_depth: 2,
        }
    }
}

/// Metabolism reinforcement and sweep parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetabolismConfig {
    /// Weight reinforcement step on edge re-observation
    pub alpha: f64,
    /// Confidence reinforcement step on edge re-observation
    pub delta: f64,
    /// Default thickness floor when the group config is absent
    pub prune_threshold: f64,
    /// Node grace period before orphan/MDL sweeps may delete
    pub grace_minutes: u64,
}

impl Default for MetabolismConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            delta: 0.3,
            prune_threshold: 0.1,
            grace_minutes: 60,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Idle cube handles are evicted after this many minutes
    pub storage_idle_timeout_minutes: u64,
    /// Blob-store sweep cadence
    pub blob_cleanup_interval_minutes: u64,
    /// Blobs older than this are swept
    pub blob_retention_hours: u64,
    pub chunking: ChunkingConfig,
    pub memify: MemifyConfig,
    pub metacognition: MetacognitionConfig,
    pub metabolism: MetabolismConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_idle_timeout_minutes: 60,
            blob_cleanup_interval_minutes: 60,
            blob_retention_hours: 24,
            chunking: ChunkingConfig::default(),
            memify: MemifyConfig::default(),
            metacognition: MetacognitionConfig::default(),
            metabolism: MetabolismConfig::default(),
        }
    }
}
