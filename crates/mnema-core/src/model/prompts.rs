//! Prompt Catalog Seam
//!
//! Prompt text is caller territory. The engine only selects a template by
//! purpose and language; the defaults below are minimal working stand-ins so
//! the engine runs without an outer catalog (tests use them with mock
//! models).

use serde::{Deserialize, Serialize};

use crate::text::Lang;

/// One prompt in both supported languages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPair {
    pub en: String,
    pub ja: String,
}

impl PromptPair {
    pub fn new(en: impl Into<String>, ja: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            ja: ja.into(),
        }
    }

    /// Pick the template for `lang`.
    pub fn get(&self, lang: Lang) -> &str {
        match lang {
            Lang::En => &self.en,
            Lang::Ja => &self.ja,
        }
    }
}

/// All system prompts the engine sends to the chat model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSet {
    /// Entity/relation extraction; model must answer with `{nodes, edges}` JSON.
    pub graph_extraction: PromptPair,
    /// Chunk summarisation into one Summary row.
    pub summarization: PromptPair,
    /// Prose summary of a rendered graph.
    pub graph_summary: PromptPair,
    /// Final RAG answer over chunks/summaries + graph summary.
    pub rag_answer: PromptPair,
    /// Stage-2 arbitration; model must answer with `{discarded}` JSON.
    pub conflict_arbitration: PromptPair,
    /// Rule extraction; model must answer with `{rules}` JSON.
    pub rule_extraction: PromptPair,
    /// Merge near-duplicate rules into one statement.
    pub rule_merge: PromptPair,
    /// Unknown detection; model must answer with `{unknowns}` JSON.
    pub unknown_detection: PromptPair,
    /// Self-reflection question generation; `{questions}` JSON.
    pub reflection_questions: PromptPair,
    /// Self-reflection answering over retrieved context.
    pub reflection_answer: PromptPair,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            graph_extraction: PromptPair::new(
                "Extract entities and relations from the text. Respond with JSON \
                 {\"nodes\":[{\"name\",\"type\",\"properties\"}],\"edges\":[{\"source\",\
                 \"target\",\"type\",\"weight\",\"confidence\"}]} and nothing else.",
                "テキストからエンティティと関係を抽出し、JSON {\"nodes\":[...],\"edges\":[...]} \
                 のみで回答してください。",
            ),
            summarization: PromptPair::new(
                "Summarize the passage in a few sentences, keeping names and facts.",
                "固有名詞と事実を保ちながら、この文章を数文で要約してください。",
            ),
            graph_summary: PromptPair::new(
                "Summarize the following knowledge-graph listing as short prose.",
                "以下のナレッジグラフの内容を短い文章に要約してください。",
            ),
            rag_answer: PromptPair::new(
                "Answer the question using only the provided context. Answer in English.",
                "提供されたコンテキストのみを用いて質問に答えてください。日本語で回答してください。",
            ),
            conflict_arbitration: PromptPair::new(
                "Conflicting relations follow as JSON. Decide which should be discarded and \
                 respond with JSON {\"discarded\":[{\"source_id\",\"relation_type\",\
                 \"target_id\",\"reason\"}]} only.",
                "矛盾する関係をJSONで示します。破棄すべきものを判断し、JSON \
                 {\"discarded\":[...]} のみで回答してください。",
            ),
            rule_extraction: PromptPair::new(
                "Extract general rules or lessons from the text. Respond with JSON \
                 {\"rules\":[{\"text\"}]} only.",
                "テキストから一般的なルールや教訓を抽出し、JSON {\"rules\":[{\"text\"}]} \
                 のみで回答してください。",
            ),
            rule_merge: PromptPair::new(
                "Merge the following near-duplicate rules into a single statement. \
                 Respond with the merged rule text only.",
                "以下のほぼ重複するルールを一つの文にまとめ、その文のみで回答してください。",
            ),
            unknown_detection: PromptPair::new(
                "List knowledge gaps in the text: logical gaps, missing definitions, \
                 unanswered questions. Respond with JSON {\"unknowns\":[{\"text\"}]} only.",
                "テキスト中の知識の欠落（論理の飛躍、未定義語、未回答の疑問）を挙げ、JSON \
                 {\"unknowns\":[{\"text\"}]} のみで回答してください。",
            ),
            reflection_questions: PromptPair::new(
                "Generate 3 to 5 probing questions about these rules. Respond with JSON \
                 {\"questions\":[{\"text\"}]} only.",
                "これらのルールについて3〜5個の検証質問を作り、JSON \
                 {\"questions\":[{\"text\"}]} のみで回答してください。",
            ),
            reflection_answer: PromptPair::new(
                "Answer the question from the context. If the context is insufficient, \
                 say that you cannot determine the answer.",
                "コンテキストに基づいて質問に答えてください。根拠が不十分な場合は\
                 「判断できません」と答えてください。",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_selection() {
        let set = PromptSet::default();
        assert!(set.rag_answer.get(Lang::En).contains("English"));
        assert!(set.rag_answer.get(Lang::Ja).contains("日本語"));
    }
}
