//! Ingested rows: Data, Document, Chunk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one ingested file
///
/// `(content_hash, memory_group)` is the dedup key; saving the same pair
/// again upserts the non-hash fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    pub id: String,
    pub memory_group: String,
    /// Original file name
    pub name: String,
    /// Blob-store key where the raw bytes were staged
    pub raw_location: String,
    /// Where the file came from (path, URL)
    pub original_location: String,
    pub extension: String,
    pub mime_type: String,
    /// Hex SHA-256 of the raw bytes
    pub content_hash: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Extracted text of one Data row
///
/// Exactly one Document per Data in the default pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub memory_group: String,
    pub data_id: String,
    pub text: String,
    /// Opaque caller metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A window of a Document
///
/// Chunks of one document form a contiguous ordered sequence by
/// `chunk_index`. The three keyword layers are precomputed at write time so
/// FTS never re-tokenises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub memory_group: String,
    pub document_id: String,
    pub text: String,
    /// Fixed-dimension vector, absent until embedded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// L0: content nouns
    pub nouns: String,
    /// L1: nouns + base-form verbs
    pub nouns_verbs: String,
    /// L2: all content words
    pub keywords_all: String,
    pub token_count: u32,
    pub chunk_index: u32,
    pub created_at: DateTime<Utc>,
}

/// Chunk view streamed to metacognition consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    /// Parent document id
    pub document_id: String,
    pub memory_group: String,
    pub text: String,
    pub chunk_index: u32,
}

impl Chunk {
    /// Streamed view of this chunk.
    pub fn as_document_chunk(&self) -> DocumentChunk {
        DocumentChunk {
            id: self.id.clone(),
            document_id: self.document_id.clone(),
            memory_group: self.memory_group.clone(),
            text: self.text.clone(),
            chunk_index: self.chunk_index,
        }
    }
}
