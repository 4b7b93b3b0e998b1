//! External Model Collaborators
//!
//! The engine consumes language models through these seams and never talks
//! to a provider directly. Implementations live outside the core (or in the
//! e2e mocks); every call accepts a cancellation context and reports its own
//! token usage.

mod blob;
mod embedding;
mod prompts;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::usage::TokenUsage;

pub use blob::BlobStore;
pub use embedding::{cosine_similarity, dot_product, embedding_from_bytes, embedding_to_bytes};
pub use prompts::PromptSet;

/// Parse a JSON payload out of a model completion.
///
/// Models wrap JSON in prose or code fences often enough that strict parsing
/// loses real answers; this finds the outermost object and parses that.
pub fn parse_json_payload<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&trimmed[start..=end]).map_err(|e| {
                crate::error::EngineError::ExternalModel(format!(
                    "model returned malformed JSON: {e}"
                ))
            })
        }
        _ => Err(crate::error::EngineError::ExternalModel(
            "model response contained no JSON object".to_string(),
        )),
    }
}

/// Result of one embedding call
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}

/// Result of one chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Text → fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. Must abort promptly when `ctx` is cancelled.
    async fn embed(&self, ctx: &CancellationToken, text: &str) -> Result<EmbeddingResponse>;

    /// Output dimension; every vector returned by [`Embedder::embed`] has
    /// exactly this length.
    fn dimension(&self) -> usize;

    /// Model identifier used for usage accounting and schema guards.
    fn model_name(&self) -> &str;
}

/// System+user prompt → completion text
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion. Must abort promptly when `ctx` is cancelled.
    async fn complete(
        &self,
        ctx: &CancellationToken,
        system: &str,
        user: &str,
    ) -> Result<ChatResponse>;

    /// Model identifier used for usage accounting.
    fn model_name(&self) -> &str;
}
