//! Memify: rule extraction over the group's chunk corpus
//!
//! Small corpora go to the model in one call; larger ones split at natural
//! sentence boundaries with overlap, each batch processed independently.
//! Rule identities are UUIDv5 over (node set, rule text), so re-running
//! memify reinforces instead of duplicating.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decay::now_ms;
use crate::error::{ensure_active, Result};
use crate::memory::{canonical_node_id, GraphEdge, GraphNode, NodeType};
use crate::model::parse_json_payload;
use crate::storage::{tables, GraphStorage, VectorStorage};
use crate::text::{split_natural, Lang};
use crate::usage::TokenUsage;

use super::{MetacognitionEngine, ID_NAMESPACE};

/// What one memify run did
#[derive(Debug, Default, Clone)]
pub struct MemifyReport {
    pub chars_processed: u64,
    pub batches: u64,
    pub rules_created: u64,
    pub usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct RulesPayload {
    #[serde(default)]
    rules: Vec<RuleItem>,
}

#[derive(Debug, Deserialize)]
struct RuleItem {
    text: String,
}

impl MetacognitionEngine {
    /// Extract rules from every chunk in `memory_group` into `node_set`.
    pub async fn memify(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        node_set: &str,
        lang: Lang,
    ) -> Result<MemifyReport> {
        let mut report = MemifyReport::default();

        // stream the corpus; chunks arrive in (document, index) order
        let (mut chunks, done) = self
            .storage
            .clone()
            .stream_document_chunks(ctx.clone(), memory_group.to_string());
        let mut corpus = String::new();
        while let Some(chunk) = chunks.recv().await {
            if !corpus.is_empty() {
                corpus.push('\n');
            }
            corpus.push_str(&chunk.text);
        }
        match done.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(crate::error::EngineError::Internal(
                    "chunk stream dropped without a result".into(),
                ))
            }
        }

        if corpus.is_empty() {
            return Ok(report);
        }

        let batches = if corpus.chars().count() <= self.memify.max_chars_for_bulk {
            vec![corpus]
        } else {
            split_natural(
                &corpus,
                self.memify.max_chars_for_bulk,
                self.memify.batch_overlap_percent,
                self.memify.batch_min_chars,
            )
        };

        let system = self.prompts.rule_extraction.get(lang);
        for batch in batches {
            ensure_active(ctx)?;
            report.chars_processed += batch.chars().count() as u64;
            report.batches += 1;

            let response = self.chat.complete(ctx, system, &batch).await?;
            report.usage.add(&response.usage);

            let payload: RulesPayload = match parse_json_payload(&response.text) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("memify batch returned unusable payload: {e}");
                    continue;
                }
            };
            for rule in payload.rules {
                let text = rule.text.trim();
                if text.is_empty() {
                    continue;
                }
                if self.persist_rule(ctx, memory_group, node_set, text).await? {
                    report.rules_created += 1;
                }
            }
        }

        Ok(report)
    }

    /// Persist one rule: Rule node, `BELONGS_TO` edge into the node set, and
    /// a rule-table embedding. Returns false when the rule already existed.
    pub(crate) async fn persist_rule(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        node_set: &str,
        text: &str,
    ) -> Result<bool> {
        let now = now_ms();

        let set_uuid = Uuid::new_v5(&ID_NAMESPACE, node_set.as_bytes());
        let set_id = canonical_node_id(&format!("nodeset:{set_uuid}"), memory_group);
        let rule_uuid = Uuid::new_v5(&ID_NAMESPACE, format!("{node_set}/{text}").as_bytes());
        let rule_id = canonical_node_id(&format!("rule:{rule_uuid}"), memory_group);

        let already = self
            .storage
            .get_embedding_by_id(tables::RULE, &rule_id, memory_group)?
            .is_some();

        let mut set_node = GraphNode::new(
            &format!("nodeset:{set_uuid}"),
            NodeType::NodeSet.as_str(),
            memory_group,
            now,
        );
        set_node.properties.insert(
            "name".to_string(),
            serde_json::Value::String(node_set.to_string()),
        );

        let mut rule_node = GraphNode::new(
            &format!("rule:{rule_uuid}"),
            NodeType::Rule.as_str(),
            memory_group,
            now,
        );
        rule_node.properties.insert(
            "text".to_string(),
            serde_json::Value::String(text.to_string()),
        );

        self.storage.add_nodes(&[set_node, rule_node])?;
        self.storage.add_edges(&[GraphEdge {
            source_id: rule_id.clone(),
            target_id: set_id,
            memory_group: memory_group.to_string(),
            edge_type: "BELONGS_TO".to_string(),
            properties: serde_json::Map::new(),
            weight: 1.0,
            confidence: 1.0,
            unix: now,
        }])?;

        let embedded = self.embedder.embed(ctx, text).await?;
        self.storage
            .save_embedding(tables::RULE, &rule_id, text, &embedded.vector, memory_group)?;

        Ok(!already)
    }
}
