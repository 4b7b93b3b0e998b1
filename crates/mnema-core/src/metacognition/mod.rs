//! Metacognition Engine
//!
//! The engine's reflective half: distils rules out of stored chunks
//! (memify), tracks what it does not know (ignorance manager), questions
//! itself against its own corpus (self-reflection), and merges
//! near-duplicate rules into canonical ones (crystallisation).

mod crystallize;
mod ignorance;
mod memify;
mod reflection;

use std::sync::Arc;

use uuid::Uuid;

use crate::events::SharedSink;
use crate::memory::{MemifyConfig, MetacognitionConfig};
use crate::model::{ChatModel, Embedder, PromptSet};
use crate::storage::SharedStorage;

pub use crystallize::CrystallizeReport;
pub use ignorance::Registered;
pub use memify::MemifyReport;
pub use reflection::{is_uncertain, RecursiveMemifyReport, ReflectionReport};

/// Namespace for deterministic rule / node-set identities
pub(crate) const ID_NAMESPACE: Uuid = Uuid::NAMESPACE_URL;

/// The metacognition runner for one cube
pub struct MetacognitionEngine {
    pub(crate) storage: SharedStorage,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) chat: Arc<dyn ChatModel>,
    pub(crate) prompts: Arc<PromptSet>,
    pub(crate) events: SharedSink,
    pub(crate) memify: MemifyConfig,
    pub(crate) config: MetacognitionConfig,
}

impl MetacognitionEngine {
    pub fn new(
        storage: SharedStorage,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        prompts: Arc<PromptSet>,
        events: SharedSink,
        memify: MemifyConfig,
        config: MetacognitionConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            chat,
            prompts,
            events,
            memify,
            config,
        }
    }
}
