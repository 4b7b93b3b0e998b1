//! Query Types and Configuration

mod engine;
mod render;

use serde::{Deserialize, Serialize};

use crate::memory::ScoredTriple;
use crate::text::{FtsLayer, Lang};
use crate::usage::TokenUsage;

pub use engine::QueryEngine;
pub(crate) use engine::score_triples;
pub use render::render_graph;

/// Default thickness floor for query-time edge filtering
pub const DEFAULT_THICKNESS_THRESHOLD: f64 = 0.05;

/// What a query returns, and in which language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    GetGraph,
    GetChunks,
    GetPreMadeSummaries,
    GetGraphAndChunks,
    GetGraphAndSummaries,
    GetGraphAndChunksAndSummaries,
    GetGraphExplanationEn,
    GetGraphExplanationJa,
    GetGraphSummaryEn,
    GetGraphSummaryJa,
    GetGraphSummaryToAnswerEn,
    GetGraphSummaryToAnswerJa,
    AnswerBySummariesAndGraphSummaryEn,
    AnswerBySummariesAndGraphSummaryJa,
    AnswerByChunksAndGraphSummaryEn,
    AnswerByChunksAndGraphSummaryJa,
}

impl QueryType {
    /// Whether the graph steps (seed → expand → traverse → score →
    /// resolve) run for this type.
    pub fn needs_graph(&self) -> bool {
        !matches!(self, QueryType::GetChunks | QueryType::GetPreMadeSummaries)
    }

    pub fn needs_chunks(&self) -> bool {
        matches!(
            self,
            QueryType::GetChunks
                | QueryType::GetGraphAndChunks
                | QueryType::GetGraphAndChunksAndSummaries
                | QueryType::AnswerByChunksAndGraphSummaryEn
                | QueryType::AnswerByChunksAndGraphSummaryJa
        )
    }

    pub fn needs_summaries(&self) -> bool {
        matches!(
            self,
            QueryType::GetPreMadeSummaries
                | QueryType::GetGraphAndSummaries
                | QueryType::GetGraphAndChunksAndSummaries
                | QueryType::AnswerBySummariesAndGraphSummaryEn
                | QueryType::AnswerBySummariesAndGraphSummaryJa
        )
    }

    /// Deterministic prose rendering of the resolved graph.
    pub fn renders_graph(&self) -> bool {
        self.needs_graph() && !matches!(
            self,
            QueryType::GetGraph
                | QueryType::GetGraphAndChunks
                | QueryType::GetGraphAndSummaries
                | QueryType::GetGraphAndChunksAndSummaries
        )
    }

    /// Chat-model summarisation of the rendered graph.
    pub fn summarises_graph(&self) -> bool {
        matches!(
            self,
            QueryType::GetGraphSummaryEn
                | QueryType::GetGraphSummaryJa
                | QueryType::GetGraphSummaryToAnswerEn
                | QueryType::GetGraphSummaryToAnswerJa
                | QueryType::AnswerBySummariesAndGraphSummaryEn
                | QueryType::AnswerBySummariesAndGraphSummaryJa
                | QueryType::AnswerByChunksAndGraphSummaryEn
                | QueryType::AnswerByChunksAndGraphSummaryJa
        )
    }

    /// Final answer generation over the assembled context.
    pub fn generates_answer(&self) -> bool {
        matches!(
            self,
            QueryType::GetGraphSummaryToAnswerEn
                | QueryType::GetGraphSummaryToAnswerJa
                | QueryType::AnswerBySummariesAndGraphSummaryEn
                | QueryType::AnswerBySummariesAndGraphSummaryJa
                | QueryType::AnswerByChunksAndGraphSummaryEn
                | QueryType::AnswerByChunksAndGraphSummaryJa
        )
    }

    /// The output language fixed by the type, if any.
    pub fn lang(&self) -> Option<Lang> {
        match self {
            QueryType::GetGraphExplanationEn
            | QueryType::GetGraphSummaryEn
            | QueryType::GetGraphSummaryToAnswerEn
            | QueryType::AnswerBySummariesAndGraphSummaryEn
            | QueryType::AnswerByChunksAndGraphSummaryEn => Some(Lang::En),
            QueryType::GetGraphExplanationJa
            | QueryType::GetGraphSummaryJa
            | QueryType::GetGraphSummaryToAnswerJa
            | QueryType::AnswerBySummariesAndGraphSummaryJa
            | QueryType::AnswerByChunksAndGraphSummaryJa => Some(Lang::Ja),
            _ => None,
        }
    }
}

/// Per-query knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryConfig {
    pub query_type: QueryType,
    pub entity_topk: usize,
    pub chunk_topk: usize,
    pub summary_topk: usize,
    /// 0 skips FTS expansion entirely
    pub fts_topk: usize,
    pub fts_layer: FtsLayer,
    pub is_en: bool,
    /// 1 = deterministic only, 2 = arbitrate residual conflicts
    pub conflict_resolution_stage: u8,
    /// Defaults to [`DEFAULT_THICKNESS_THRESHOLD`]
    pub thickness_threshold: Option<f64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_type: QueryType::GetGraph,
            entity_topk: 5,
            chunk_topk: 5,
            summary_topk: 5,
            fts_topk: 5,
            fts_layer: FtsLayer::Nouns,
            is_en: true,
            conflict_resolution_stage: 1,
            thickness_threshold: None,
        }
    }
}

impl QueryConfig {
    /// Query language: the type's fixed language wins over `is_en`.
    pub fn lang(&self) -> Lang {
        self.query_type
            .lang()
            .unwrap_or(Lang::from_is_en(self.is_en))
    }

    pub fn threshold(&self) -> f64 {
        self.thickness_threshold
            .unwrap_or(DEFAULT_THICKNESS_THRESHOLD)
    }
}

/// Everything a query can emit; fields are empty when the type skips them
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Final generated answer, when the type asks for one
    pub answer: Option<String>,
    /// Surviving scored triples
    pub graph: Vec<ScoredTriple>,
    /// Rendered or summarised graph prose
    pub graph_text: Option<String>,
    pub chunks: Vec<String>,
    pub summaries: Vec<String>,
    /// The query embedding used for retrieval
    pub embedding: Option<Vec<f32>>,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_shapes() {
        assert!(QueryType::GetGraph.needs_graph());
        assert!(!QueryType::GetChunks.needs_graph());
        assert!(!QueryType::GetPreMadeSummaries.needs_graph());
        assert!(QueryType::GetGraphAndChunks.needs_chunks());
        assert!(QueryType::AnswerBySummariesAndGraphSummaryJa.needs_summaries());
        assert!(QueryType::GetGraphSummaryToAnswerEn.generates_answer());
        assert!(!QueryType::GetGraphExplanationEn.generates_answer());
        assert!(QueryType::GetGraphExplanationJa.renders_graph());
        assert!(!QueryType::GetGraph.renders_graph());
    }

    #[test]
    fn test_type_language_overrides_flag() {
        let config = QueryConfig {
            query_type: QueryType::GetGraphSummaryJa,
            is_en: true,
            ..QueryConfig::default()
        };
        assert_eq!(config.lang(), Lang::Ja);

        let config = QueryConfig {
            query_type: QueryType::GetGraph,
            is_en: false,
            ..QueryConfig::default()
        };
        assert_eq!(config.lang(), Lang::Ja);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&QueryType::AnswerByChunksAndGraphSummaryEn).unwrap();
        assert_eq!(json, "\"ANSWER_BY_CHUNKS_AND_GRAPH_SUMMARY_EN\"");
        let parsed: QueryType = serde_json::from_str("\"GET_PRE_MADE_SUMMARIES\"").unwrap();
        assert_eq!(parsed, QueryType::GetPreMadeSummaries);
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(QueryConfig::default().threshold(), DEFAULT_THICKNESS_THRESHOLD);
    }
}
