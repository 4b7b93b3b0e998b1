//! Temp-cube harness
//!
//! One isolated cube per test, on disk in a temp dir that cleans up on
//! drop, wired to the deterministic mocks.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mnema_core::{
    CubeHandle, CubeService, EmbeddingModelConfig, EngineConfig, MetacognitionEngine,
    MetabolismEngine, NullSink, PipelineContext, PromptSet, QueryEngine,
};

use crate::mocks::{HashEmbedder, JourneyChat, MemoryBlobStore, DIMENSION};

/// One isolated engine stack over a temp cube
pub struct TestCube {
    pub service: Arc<CubeService>,
    pub handle: Arc<CubeHandle>,
    pub blobs: Arc<MemoryBlobStore>,
    pub chat: Arc<JourneyChat>,
    pub embedder: Arc<HashEmbedder>,
    pub prompts: Arc<PromptSet>,
    pub config: EngineConfig,
    _dir: TempDir,
}

impl TestCube {
    /// Open a fresh cube named `c1` with default engine config.
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let blobs = Arc::new(MemoryBlobStore::new());
        let service = CubeService::new(
            config.clone(),
            EmbeddingModelConfig {
                model_name: "journey-embed".to_string(),
                dimension: DIMENSION,
            },
            blobs.clone(),
        );
        let handle = service
            .get_or_open(dir.path().join("c1.db"))
            .await
            .expect("open cube");

        Self {
            service,
            handle,
            blobs,
            chat: Arc::new(JourneyChat::new()),
            embedder: Arc::new(HashEmbedder),
            prompts: Arc::new(PromptSet::default()),
            config,
            _dir: dir,
        }
    }

    /// A pipeline context bound to `memory_group`.
    pub fn pipeline_context(&self, memory_group: &str) -> PipelineContext {
        PipelineContext {
            ctx: CancellationToken::new(),
            storage: self.handle.shared_storage(),
            embedder: self.embedder.clone(),
            chat: self.chat.clone(),
            blobs: self.blobs.clone(),
            prompts: self.prompts.clone(),
            events: Arc::new(NullSink),
            config: self.config.clone(),
            memory_group: memory_group.to_string(),
            lang: mnema_core::Lang::En,
        }
    }

    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(
            self.handle.shared_storage(),
            self.embedder.clone(),
            self.chat.clone(),
            self.prompts.clone(),
            Arc::new(NullSink),
            self.handle.shutdown_token(),
        )
    }

    pub fn metabolism_engine(&self) -> MetabolismEngine {
        MetabolismEngine::new(
            self.handle.shared_storage(),
            self.embedder.clone(),
            self.chat.clone(),
            self.prompts.clone(),
            Arc::new(NullSink),
            self.config.metabolism,
        )
    }

    pub fn metacognition_engine(&self) -> MetacognitionEngine {
        MetacognitionEngine::new(
            self.handle.shared_storage(),
            self.embedder.clone(),
            self.chat.clone(),
            self.prompts.clone(),
            Arc::new(NullSink),
            self.config.memify,
            self.config.metacognition,
        )
    }
}
