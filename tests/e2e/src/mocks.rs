//! Deterministic external-model mocks
//!
//! The embedder is a bag-of-words hash so related texts land near each
//! other; the chat model scripts the payload shapes the engine validates;
//! the blob store is an in-memory map with age-based cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mnema_core::{
    BlobStore, ChatModel, ChatResponse, Embedder, EmbeddingResponse, EngineError, Result,
    TokenUsage,
};

/// Embedding dimension used across the e2e suite
pub const DIMENSION: usize = 16;

/// Deterministic bag-of-words embedder: texts sharing tokens are similar.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, ctx: &CancellationToken, text: &str) -> Result<EmbeddingResponse> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut vector = vec![0.0_f32; DIMENSION];
        for token in text
            .to_lowercase()
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = token.bytes().map(|b| b as usize).sum::<usize>() % DIMENSION;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        } else {
            vector[0] = 1.0;
        }
        Ok(EmbeddingResponse {
            vector,
            usage: TokenUsage::of_call("journey-embed", text.len() as u64 / 4 + 1, 0),
        })
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "journey-embed"
    }
}

/// Scripted chat model covering every payload shape the engine expects.
pub struct JourneyChat {
    pub calls: AtomicUsize,
}

impl JourneyChat {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Default for JourneyChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for JourneyChat {
    async fn complete(
        &self,
        ctx: &CancellationToken,
        system: &str,
        user: &str,
    ) -> Result<ChatResponse> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let text = if system.contains("Extract entities") {
            if user.contains("Google") {
                r#"{"nodes": [
                    {"name": "Guido van Rossum", "type": "Person"},
                    {"name": "Google", "type": "Company"}
                ],
                "edges": [
                    {"source": "Guido van Rossum", "target": "Google",
                     "type": "WORKS_AT", "weight": 0.9, "confidence": 0.9}
                ]}"#
                    .to_string()
            } else {
                r#"{"nodes": [
                    {"name": "Python", "type": "Language"},
                    {"name": "Guido van Rossum", "type": "Person"},
                    {"name": "CWI", "type": "Organization"},
                    {"name": "1991", "type": "Year"}
                ],
                "edges": [
                    {"source": "Guido van Rossum", "target": "Python",
                     "type": "CREATED", "weight": 0.9, "confidence": 0.9},
                    {"source": "Guido van Rossum", "target": "CWI",
                     "type": "WORKS_AT", "weight": 0.8, "confidence": 0.9},
                    {"source": "Python", "target": "1991",
                     "type": "CREATED_IN", "weight": 0.7, "confidence": 0.8}
                ]}"#
                .to_string()
            }
        } else if system.contains("Summarize the passage") {
            let head: String = user.chars().take(40).collect();
            format!("Summary: {head}")
        } else if system.contains("Extract general rules") {
            r#"{"rules": [{"text": "Language creators shape their ecosystems."}]}"#.to_string()
        } else if system.contains("Conflicting relations") {
            r#"{"discarded": []}"#.to_string()
        } else if system.contains("knowledge gaps") {
            r#"{"unknowns": []}"#.to_string()
        } else if system.contains("probing questions") {
            r#"{"questions": [{"text": "Who created Python?"}]}"#.to_string()
        } else {
            "Guido van Rossum created Python.".to_string()
        };

        Ok(ChatResponse {
            text,
            usage: TokenUsage::of_call("journey-chat", 20, 10),
        })
    }

    fn model_name(&self) -> &str {
        "journey-chat"
    }
}

/// In-memory blob store with mtime-based cleanup.
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, SystemTime)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// Backdate an object so cleanup tests don't have to sleep.
    pub fn age_object(&self, key: &str, age: Duration) {
        if let Some(entry) = self.objects.lock().unwrap().get_mut(key) {
            entry.1 = SystemTime::now() - age;
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, _: &CancellationToken, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, SystemTime::now()));
        Ok(())
    }

    async fn get(&self, _: &CancellationToken, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| EngineError::NotFound(key.to_string()))
    }

    async fn delete(&self, _: &CancellationToken, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn cleanup_by_age(&self, _: &CancellationToken, retention: Duration) -> Result<u64> {
        let cutoff = SystemTime::now() - retention;
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|_, (_, mtime)| *mtime >= cutoff);
        Ok((before - objects.len()) as u64)
    }
}
