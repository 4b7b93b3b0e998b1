//! Progress Event Emission
//!
//! Retrieval and pipeline stages publish structured progress events through
//! an injected sink. The engine only publishes; transport (websocket, log,
//! metrics) lives outside. With no sink configured, emission is a no-op.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Phases the engine reports on
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EmbeddingStart,
    EmbeddingEnd,
    VectorSearchStart,
    VectorSearchEnd,
    FullTextSearchStart,
    FullTextSearchEnd,
    GraphSearchStart,
    GraphSearchEnd,
    ConflictResolutionStart,
    ConflictResolutionEnd,
    GenerationStart,
    GenerationEnd,
    PipelineTaskStart,
    PipelineTaskEnd,
    MetabolismPhaseStart,
    MetabolismPhaseEnd,
}

/// A single progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Free-form payload: step names, counts, durations
    pub payload: serde_json::Value,
}

/// Injected event sink; implementations must be cheap and non-blocking.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Shared sink handle used throughout the engine.
pub type SharedSink = Arc<dyn EventSink>;

/// Emit a `kind` event with a payload built from serializable data.
pub fn emit(sink: &SharedSink, kind: EventKind, payload: serde_json::Value) {
    sink.emit(Event { kind, payload });
}
