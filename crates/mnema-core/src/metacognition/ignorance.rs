//! Ignorance Manager: Unknowns and Capabilities
//!
//! Unknowns are detected gaps (logical holes, missing definitions,
//! unanswered questions); Capabilities are things the system can now do.
//! Both are typed graph nodes with embeddings, deduped by vector
//! similarity. Resolving an Unknown promotes it into a Capability joined by
//! a `RESOLVES` edge.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decay::now_ms;
use crate::error::{ensure_active, Result};
use crate::memory::{canonical_node_id, GraphEdge, GraphNode, NodeType};
use crate::model::parse_json_payload;
use crate::storage::{tables, GraphStorage, VectorStorage};
use crate::text::Lang;
use crate::usage::TokenUsage;

use super::{MetacognitionEngine, ID_NAMESPACE};

/// Outcome of a register call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registered {
    /// Stored under this node id
    Created(String),
    /// A similar row already existed with this id
    Duplicate(String),
}

impl Registered {
    pub fn id(&self) -> &str {
        match self {
            Registered::Created(id) | Registered::Duplicate(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registered::Created(_))
    }
}

#[derive(Debug, Deserialize)]
struct UnknownsPayload {
    #[serde(default)]
    unknowns: Vec<UnknownItem>,
}

#[derive(Debug, Deserialize)]
struct UnknownItem {
    text: String,
}

impl MetacognitionEngine {
    /// Ask the model for knowledge gaps in `text` and register each one.
    pub async fn detect_unknowns(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        text: &str,
        lang: Lang,
    ) -> Result<(Vec<Registered>, TokenUsage)> {
        ensure_active(ctx)?;
        let mut usage = TokenUsage::default();

        let response = self
            .chat
            .complete(ctx, self.prompts.unknown_detection.get(lang), text)
            .await?;
        usage.add(&response.usage);
        let payload: UnknownsPayload = parse_json_payload(&response.text)?;

        let mut registered = Vec::new();
        for unknown in payload.unknowns.into_iter().take(self.config.limit_unknown) {
            let trimmed = unknown.text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let outcome = self
                .register_typed(ctx, memory_group, trimmed, NodeType::Unknown, &mut usage)
                .await?;
            registered.push(outcome);
        }
        Ok((registered, usage))
    }

    /// Register one Unknown, deduped by vector similarity.
    pub async fn register_unknown(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        text: &str,
        usage: &mut TokenUsage,
    ) -> Result<Registered> {
        self.register_typed(ctx, memory_group, text, NodeType::Unknown, usage)
            .await
    }

    /// Register one Capability, deduped by vector similarity.
    pub async fn register_capability(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        text: &str,
        usage: &mut TokenUsage,
    ) -> Result<Registered> {
        self.register_typed(ctx, memory_group, text, NodeType::Capability, usage)
            .await
    }

    /// Promote a resolved Unknown: store the capability and mark a
    /// `RESOLVES` edge capability → unknown.
    pub async fn resolve_unknown(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        unknown_id: &str,
        capability_text: &str,
        usage: &mut TokenUsage,
    ) -> Result<Registered> {
        let capability = self
            .register_typed(
                ctx,
                memory_group,
                capability_text,
                NodeType::Capability,
                usage,
            )
            .await?;

        self.storage.add_edges(&[GraphEdge {
            source_id: capability.id().to_string(),
            target_id: unknown_id.to_string(),
            memory_group: memory_group.to_string(),
            edge_type: "RESOLVES".to_string(),
            properties: serde_json::Map::new(),
            weight: 1.0,
            confidence: 1.0,
            unix: now_ms(),
        }])?;

        // the unknown keeps its row; the edge records the promotion
        let mut unknown_node =
            GraphNode::new(unknown_id, NodeType::Unknown.as_str(), memory_group, 0);
        if let Some(existing) = self
            .storage
            .get_nodes_by_type(NodeType::Unknown.as_str(), memory_group)?
            .into_iter()
            .find(|n| n.id == unknown_id)
        {
            unknown_node = existing;
        }
        unknown_node
            .properties
            .insert("resolved".to_string(), serde_json::Value::Bool(true));
        self.storage.add_nodes(std::slice::from_ref(&unknown_node))?;

        Ok(capability)
    }

    async fn register_typed(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        text: &str,
        node_type: NodeType,
        usage: &mut TokenUsage,
    ) -> Result<Registered> {
        ensure_active(ctx)?;
        let table = match node_type {
            NodeType::Unknown => tables::UNKNOWN,
            NodeType::Capability => tables::CAPABILITY,
            _ => {
                return Err(crate::error::EngineError::InvalidConfig(format!(
                    "register_typed only stores Unknown/Capability, got {node_type}"
                )))
            }
        };

        let embedded = self.embedder.embed(ctx, text).await?;
        usage.add(&embedded.usage);

        // similarity at or above the gate means "we already know this gap"
        let near = self
            .storage
            .query(table, &embedded.vector, 1, memory_group)?;
        if let Some(hit) = near.first() {
            if hit.distance >= self.config.sim_unknown {
                tracing::debug!(existing = %hit.id, "duplicate {node_type} skipped");
                return Ok(Registered::Duplicate(hit.id.clone()));
            }
        }

        let uuid = Uuid::new_v5(&ID_NAMESPACE, format!("{node_type}/{text}").as_bytes());
        let name = format!("{}:{uuid}", node_type.as_str().to_lowercase());
        let id = canonical_node_id(&name, memory_group);

        let mut node = GraphNode::new(&name, node_type.as_str(), memory_group, now_ms());
        node.properties.insert(
            "text".to_string(),
            serde_json::Value::String(text.to_string()),
        );
        self.storage.add_nodes(std::slice::from_ref(&node))?;
        self.storage
            .save_embedding(table, &id, text, &embedded.vector, memory_group)?;

        Ok(Registered::Created(id))
    }
}
