//! Self-Reflection Loop
//!
//! Generate probing questions from the rule corpus, try to answer each one
//! from retrieved chunks and rules, and book the outcome: a confident answer
//! becomes a Capability, a hedged one becomes an Unknown. Recursive memify
//! alternates unknown-resolution with another extraction pass, deepening the
//! graph up to a configured depth.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ensure_active, Result};
use crate::memory::NodeType;
use crate::model::parse_json_payload;
use crate::storage::{tables, GraphStorage, VectorStorage};
use crate::text::Lang;
use crate::usage::TokenUsage;

use super::MetacognitionEngine;

/// Hedging phrases that mark an answer as a failure
const UNCERTAINTY_PHRASES_EN: &[&str] = &[
    "i don't know",
    "i do not know",
    "not sure",
    "cannot determine",
    "can't determine",
    "unclear",
    "no information",
    "insufficient context",
    "cannot answer",
];

const UNCERTAINTY_PHRASES_JA: &[&str] = &[
    "わかりません",
    "分かりません",
    "不明です",
    "判断できません",
    "情報がありません",
    "確信が持てません",
    "答えられません",
];

/// Whether `answer` hedges in `lang`'s uncertainty vocabulary.
pub fn is_uncertain(answer: &str, lang: Lang) -> bool {
    let lowered = answer.to_lowercase();
    let phrases = match lang {
        Lang::En => UNCERTAINTY_PHRASES_EN,
        Lang::Ja => UNCERTAINTY_PHRASES_JA,
    };
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

/// What one reflection pass did
#[derive(Debug, Default, Clone)]
pub struct ReflectionReport {
    pub questions: u64,
    pub capabilities: u64,
    pub unknowns: u64,
    pub usage: TokenUsage,
}

/// What a recursive memify run did
#[derive(Debug, Default, Clone)]
pub struct RecursiveMemifyReport {
    pub iterations: u64,
    pub resolved_unknowns: u64,
    pub rules_created: u64,
    pub usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct QuestionsPayload {
    #[serde(default)]
    questions: Vec<QuestionItem>,
}

#[derive(Debug, Deserialize)]
struct QuestionItem {
    text: String,
}

impl MetacognitionEngine {
    /// One reflection pass over `memory_group`'s rules.
    pub async fn reflect(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        lang: Lang,
    ) -> Result<ReflectionReport> {
        let mut report = ReflectionReport::default();

        let rules = self
            .storage
            .get_nodes_by_type(NodeType::Rule.as_str(), memory_group)?;
        if rules.is_empty() {
            return Ok(report);
        }
        let rule_listing: String = rules
            .iter()
            .take(10)
            .map(|rule| format!("- {}", rule.representative_text()))
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .chat
            .complete(
                ctx,
                self.prompts.reflection_questions.get(lang),
                &rule_listing,
            )
            .await?;
        report.usage.add(&response.usage);
        let payload: QuestionsPayload = parse_json_payload(&response.text)?;

        for question in payload.questions.into_iter().take(5) {
            ensure_active(ctx)?;
            let question = question.text.trim().to_string();
            if question.is_empty() {
                continue;
            }
            report.questions += 1;

            match self
                .answer_from_corpus(ctx, memory_group, &question, lang, &mut report.usage)
                .await?
            {
                Some(answer) => {
                    let capability = format!("{question} — {answer}");
                    let mut usage = TokenUsage::default();
                    self.register_capability(ctx, memory_group, &capability, &mut usage)
                        .await?;
                    report.usage.add(&usage);
                    report.capabilities += 1;
                }
                None => {
                    let mut usage = TokenUsage::default();
                    self.register_unknown(ctx, memory_group, &question, &mut usage)
                        .await?;
                    report.usage.add(&usage);
                    report.unknowns += 1;
                }
            }
        }

        Ok(report)
    }

    /// Recursive memify: alternate unknown resolution (phase A) with another
    /// rule-extraction pass (phase B) up to the configured depth.
    pub async fn recursive_memify(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        node_set: &str,
        lang: Lang,
    ) -> Result<RecursiveMemifyReport> {
        let mut report = RecursiveMemifyReport::default();

        for _ in 0..self.config.max_depth {
            ensure_active(ctx)?;
            report.iterations += 1;
            let mut progressed = false;

            // phase A: try to resolve open unknowns from the corpus
            let unknowns = self
                .storage
                .get_nodes_by_type(NodeType::Unknown.as_str(), memory_group)?;
            let open: Vec<_> = unknowns
                .into_iter()
                .filter(|node| {
                    node.properties.get("resolved") != Some(&serde_json::Value::Bool(true))
                })
                .take(self.config.limit_unknown)
                .collect();

            for unknown in open {
                ensure_active(ctx)?;
                let text = unknown.representative_text();
                if let Some(answer) = self
                    .answer_from_corpus(ctx, memory_group, &text, lang, &mut report.usage)
                    .await?
                {
                    let mut usage = TokenUsage::default();
                    self.resolve_unknown(ctx, memory_group, &unknown.id, &answer, &mut usage)
                        .await?;
                    report.usage.add(&usage);
                    report.resolved_unknowns += 1;
                    progressed = true;
                }
            }

            // phase B: expand the graph with another extraction pass
            let memify_report = self.memify(ctx, memory_group, node_set, lang).await?;
            report.rules_created += memify_report.rules_created;
            report.usage.add(&memify_report.usage);
            if memify_report.rules_created > 0 {
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        Ok(report)
    }

    /// Retrieve grounding for `question` and answer it; `None` when nothing
    /// qualifies or the model hedges.
    async fn answer_from_corpus(
        &self,
        ctx: &CancellationToken,
        memory_group: &str,
        question: &str,
        lang: Lang,
        usage: &mut TokenUsage,
    ) -> Result<Option<String>> {
        let embedded = self.embedder.embed(ctx, question).await?;
        usage.add(&embedded.usage);

        let mut context: Vec<String> = Vec::new();
        for (table, limit) in [
            (tables::CHUNK, self.config.limit_refl_chunk),
            (tables::RULE, self.config.limit_refl_rule),
        ] {
            let hits = self
                .storage
                .query(table, &embedded.vector, limit, memory_group)?;
            for hit in hits {
                if hit.distance >= self.config.sim_reflection {
                    context.push(hit.text);
                }
            }
        }
        if context.is_empty() {
            return Ok(None);
        }

        let user = format!("{}\n\n## question\n{question}", context.join("\n"));
        let response = self
            .chat
            .complete(ctx, self.prompts.reflection_answer.get(lang), &user)
            .await?;
        usage.add(&response.usage);

        if is_uncertain(&response.text, lang) {
            Ok(None)
        } else {
            Ok(Some(response.text.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{engine_with, storage, ScriptedChat};
    use super::*;
    use crate::memory::MemifyConfig;
    use crate::storage::{GraphStorage, VectorStorage};
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn test_uncertainty_phrases() {
        assert!(is_uncertain("I cannot determine the answer.", Lang::En));
        assert!(is_uncertain("Honestly, I'm not sure about this.", Lang::En));
        assert!(!is_uncertain("Decay is exponential with half-life λ.", Lang::En));
        assert!(is_uncertain("その点は判断できません。", Lang::Ja));
        assert!(!is_uncertain("減衰は指数関数的です。", Lang::Ja));
    }

    fn seed_rule_and_chunk(store: &crate::storage::CubeStorage) {
        // a Rule node whose questions will hit the seeded chunk
        let mut rule = crate::memory::GraphNode::new("rule:r1", "Rule", "g1", 0);
        rule.properties.insert(
            "text".into(),
            serde_json::Value::String("alpha rule about decay".into()),
        );
        store.add_nodes(std::slice::from_ref(&rule)).unwrap();
        store
            .save_embedding(
                crate::storage::tables::RULE,
                &rule.id,
                "alpha rule about decay",
                &[1.0, 0.0, 0.0, 0.0],
                "g1",
            )
            .unwrap();

        let layers = crate::text::keyword_layers("alpha chunk grounding decay", crate::text::Lang::En);
        store
            .save_chunk(&crate::memory::Chunk {
                id: "c1".into(),
                memory_group: "g1".into(),
                document_id: "doc1".into(),
                text: "alpha chunk grounding decay".into(),
                embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
                nouns: layers.nouns,
                nouns_verbs: layers.nouns_verbs,
                keywords_all: layers.keywords_all,
                token_count: 4,
                chunk_index: 0,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_confident_answers_become_capabilities() {
        let (_dir, store) = storage();
        seed_rule_and_chunk(&store);
        let engine = engine_with(
            Arc::clone(&store),
            Arc::new(ScriptedChat::new()),
            MemifyConfig::default(),
        );

        let report = engine
            .reflect(&CancellationToken::new(), "g1", Lang::En)
            .await
            .unwrap();

        assert_eq!(report.questions, 3);
        // "alpha question one" grounds on the alpha chunk; beta/gamma find
        // nothing above the similarity gate and become unknowns
        assert_eq!(report.capabilities, 1);
        assert_eq!(report.unknowns, 2);
        assert_eq!(store.get_nodes_by_type("Capability", "g1").unwrap().len(), 1);
        assert_eq!(store.get_nodes_by_type("Unknown", "g1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hedged_answers_become_unknowns() {
        let (_dir, store) = storage();
        seed_rule_and_chunk(&store);
        let engine = engine_with(
            Arc::clone(&store),
            Arc::new(ScriptedChat::uncertain()),
            MemifyConfig::default(),
        );

        let report = engine
            .reflect(&CancellationToken::new(), "g1", Lang::En)
            .await
            .unwrap();

        assert_eq!(report.capabilities, 0);
        assert_eq!(report.unknowns, 3);
    }

    #[tokio::test]
    async fn test_reflection_without_rules_is_noop() {
        let (_dir, store) = storage();
        let chat = Arc::new(ScriptedChat::new());
        let engine = engine_with(store, Arc::clone(&chat), MemifyConfig::default());

        let report = engine
            .reflect(&CancellationToken::new(), "g1", Lang::En)
            .await
            .unwrap();
        assert_eq!(report.questions, 0);
        assert_eq!(chat.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recursive_memify_resolves_unknowns() {
        let (_dir, store) = storage();
        seed_rule_and_chunk(&store);
        let engine = engine_with(
            Arc::clone(&store),
            Arc::new(ScriptedChat::new()),
            MemifyConfig::default(),
        );
        let ctx = CancellationToken::new();

        // an open unknown that grounds on the alpha chunk
        let mut usage = TokenUsage::default();
        engine
            .register_unknown(&ctx, "g1", "alpha: why does decay matter?", &mut usage)
            .await
            .unwrap();

        let report = engine
            .recursive_memify(&ctx, "g1", "default", Lang::En)
            .await
            .unwrap();

        assert!(report.iterations >= 1);
        assert_eq!(report.resolved_unknowns, 1);
        assert!(report.rules_created > 0, "phase B extracts rules from the chunk");
        assert_eq!(store.get_nodes_by_type("Capability", "g1").unwrap().len(), 1);
    }
}
