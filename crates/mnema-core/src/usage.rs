//! Token-Usage Aggregator
//!
//! Every pipeline task, query step, and metabolism phase returns a
//! [`TokenUsage`]; callers sum them. Aggregation is additive, so
//! `usage(absorb) == usage(add) + usage(cognify)` holds by construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-model input/output token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input: u64,
    pub output: u64,
}

/// Accumulated token usage across model calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Total input tokens across all models
    pub input_tokens: u64,
    /// Total output tokens across all models
    pub output_tokens: u64,
    /// Per-model breakdown keyed by model name
    #[serde(default)]
    pub details: HashMap<String, ModelUsage>,
}

impl TokenUsage {
    /// Usage of a single call against one model.
    pub fn of_call(model: &str, input: u64, output: u64) -> Self {
        let mut usage = TokenUsage::default();
        usage.record(model, input, output);
        usage
    }

    /// Record one model call.
    pub fn record(&mut self, model: &str, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        let entry = self.details.entry(model.to_string()).or_default();
        entry.input += input;
        entry.output += output;
    }

    /// Fold another usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        for (model, u) in &other.details {
            let entry = self.details.entry(model.clone()).or_default();
            entry.input += u.input;
            entry.output += u.output;
        }
    }

    /// True when no tokens have been recorded.
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_model() {
        let mut usage = TokenUsage::default();
        usage.record("embed-s", 10, 0);
        usage.record("chat-l", 100, 40);
        usage.record("chat-l", 50, 10);

        assert_eq!(usage.input_tokens, 160);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.details["chat-l"].input, 150);
        assert_eq!(usage.details["chat-l"].output, 50);
        assert_eq!(usage.details["embed-s"].input, 10);
    }

    #[test]
    fn test_add_is_additive() {
        let a = TokenUsage::of_call("m1", 5, 2);
        let b = TokenUsage::of_call("m2", 7, 3);
        let mut sum = TokenUsage::default();
        sum.add(&a);
        sum.add(&b);

        assert_eq!(sum.input_tokens, a.input_tokens + b.input_tokens);
        assert_eq!(sum.output_tokens, a.output_tokens + b.output_tokens);
        assert_eq!(sum.details.len(), 2);
    }

    #[test]
    fn test_is_empty() {
        assert!(TokenUsage::default().is_empty());
        assert!(!TokenUsage::of_call("m", 1, 0).is_empty());
    }
}
