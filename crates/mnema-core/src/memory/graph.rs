//! Graph elements: typed nodes, weighted edges, triples
//!
//! Nodes live in a flat map keyed by canonical id; edges reference endpoints
//! by id pairs and triples are built on demand, so the node ↔ edge ↔ node
//! cycle never exists in memory as owned references.

use serde::{Deserialize, Serialize};

use crate::decay;

/// Separator between a node's logical name and its memory group.
///
/// Canonical ids are derivable (`name::group`) and cross-tenant disjoint.
pub const NODE_ID_SEPARATOR: &str = "::";

/// Canonical graph-node id for `name` within `memory_group`.
pub fn canonical_node_id(name: &str, memory_group: &str) -> String {
    let name = name.trim();
    if name.ends_with(&format!("{NODE_ID_SEPARATOR}{memory_group}")) {
        return name.to_string();
    }
    format!("{name}{NODE_ID_SEPARATOR}{memory_group}")
}

/// The logical name of a canonical node id (suffix stripped).
pub fn display_name<'a>(id: &'a str, memory_group: &str) -> &'a str {
    id.strip_suffix(&format!("{NODE_ID_SEPARATOR}{memory_group}"))
        .unwrap_or(id)
}

/// Normalise a relation name to UPPER_SNAKE_CASE.
pub fn relation_type(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_alnum = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_alnum && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_uppercase());
            prev_alnum = true;
        } else if prev_alnum && !out.ends_with('_') {
            out.push('_');
            prev_alnum = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Well-known node categories the engine itself writes
///
/// Extraction may produce arbitrary PascalCase categories (Person, Place);
/// these are only the ones with engine semantics.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Entity,
    Summary,
    Rule,
    Unknown,
    Capability,
    NodeSet,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entity => "Entity",
            NodeType::Summary => "Summary",
            NodeType::Rule => "Rule",
            NodeType::Unknown => "Unknown",
            NodeType::Capability => "Capability",
            NodeType::NodeSet => "NodeSet",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed entity in the property graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Canonical, memory-group-suffixed id
    pub id: String,
    pub memory_group: String,
    /// PascalCase category (Person, Rule, Unknown, ...)
    pub node_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Creation time, unix ms
    pub created_at_ms: i64,
}

impl GraphNode {
    /// Node with a canonicalised id and no properties.
    pub fn new(name: &str, node_type: impl Into<String>, memory_group: &str, now_ms: i64) -> Self {
        Self {
            id: canonical_node_id(name, memory_group),
            memory_group: memory_group.to_string(),
            node_type: node_type.into(),
            properties: serde_json::Map::new(),
            created_at_ms: now_ms,
        }
    }

    /// Logical name without the memory-group suffix.
    pub fn name(&self) -> &str {
        display_name(&self.id, &self.memory_group)
    }

    /// Text used when this node needs an embedding (MDL sweep, typed rows).
    pub fn representative_text(&self) -> String {
        match self.properties.get("text").and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self.name().to_string(),
        }
    }
}

/// A directed, weighted, time-stamped relation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub memory_group: String,
    /// UPPER_SNAKE_CASE relation
    pub edge_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Importance weight ∈ [0,1]
    pub weight: f64,
    /// Extraction confidence ∈ [0,1]
    pub confidence: f64,
    /// Last observation, unix ms
    pub unix: i64,
}

impl GraphEdge {
    /// Decay-adjusted importance of this edge.
    pub fn thickness(&self, max_unix: i64, lambda: f64) -> f64 {
        decay::thickness(self.weight, self.confidence, self.unix, max_unix, lambda)
    }
}

/// A materialised source → edge → target view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triple {
    pub source: GraphNode,
    pub edge: GraphEdge,
    pub target: GraphNode,
}

/// A triple with its thickness at scoring time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredTriple {
    pub triple: Triple,
    pub thickness: f64,
}
