//! Absorb a document, then query it back through every retrieval shape.

use mnema_e2e_tests::harness::TestCube;

use mnema_core::{absorb, GraphStorage, IngestFile, QueryConfig, QueryType, VectorStorage};
use tokio_util::sync::CancellationToken;

const DOC: &str = "Python was developed by Guido van Rossum at CWI in 1991.";

#[tokio::test]
async fn absorb_builds_chunks_and_graph() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");

    let (report, usage) = absorb(&cx, vec![IngestFile::text("doc.txt", DOC)]).await;
    let report = report.unwrap();

    assert_eq!(report.data_ids.len(), 1);
    assert_eq!(report.deduped, 0);
    assert!(report.chunk_count >= 1);
    assert!(report.node_count >= 4);
    assert!(report.edge_count >= 2);
    assert!(report.summary_count >= 1);

    // both models billed, additively
    assert!(usage.details.contains_key("journey-chat"));
    assert!(usage.details.contains_key("journey-embed"));
    assert!(usage.input_tokens > 0 && usage.output_tokens > 0);

    // the graph holds the extracted entities, connected by typed edges
    let storage = cube.handle.storage();
    let people = storage.get_nodes_by_type("Person", "g1").unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].id, "Guido van Rossum::g1");
    assert_eq!(storage.get_nodes_by_type("Language", "g1").unwrap().len(), 1);
    assert_eq!(storage.get_nodes_by_type("Organization", "g1").unwrap().len(), 1);
    assert_eq!(storage.get_nodes_by_type("Year", "g1").unwrap().len(), 1);

    let edges = storage.get_edges_by_node("Guido van Rossum::g1", "g1").unwrap();
    assert!(edges.iter().any(|e| e.edge_type == "CREATED" && e.target_id == "Python::g1"));

    // staged blobs were cleaned up after successful cognify
    assert!(cube.blobs.is_empty());

    // chunk rows landed with keyword layers
    assert!(storage.get_document_chunk_count("g1").unwrap() >= 1);
}

#[tokio::test]
async fn absorb_dedups_by_content_hash() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");

    let (first, _) = absorb(&cx, vec![IngestFile::text("doc.txt", DOC)]).await;
    let first = first.unwrap();
    let chunks_before = cube.handle.storage().get_document_chunk_count("g1").unwrap();

    let (second, _) = absorb(&cx, vec![IngestFile::text("renamed.txt", DOC)]).await;
    let second = second.unwrap();

    assert_eq!(second.deduped, 1);
    assert_eq!(second.chunk_count, 0, "duplicate content is not re-cognified");
    assert_eq!(second.data_ids, first.data_ids, "dedup returns the original id");
    assert_eq!(
        cube.handle.storage().get_document_chunk_count("g1").unwrap(),
        chunks_before
    );

    // one Data row whose name reflects the last write
    let list = cube.handle.storage().get_data_list("g1").unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "renamed.txt");
}

#[tokio::test]
async fn graph_query_finds_creator() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");
    let (report, _) = absorb(&cx, vec![IngestFile::text("doc.txt", DOC)]).await;
    report.unwrap();

    let engine = cube.query_engine();
    let config = QueryConfig {
        query_type: QueryType::GetGraph,
        entity_topk: 3,
        ..QueryConfig::default()
    };
    let out = engine
        .query(&CancellationToken::new(), "g1", "Python creator", &config)
        .await
        .unwrap();

    assert!(!out.graph.is_empty());
    let mut endpoint_ids: Vec<&str> = Vec::new();
    for scored in &out.graph {
        endpoint_ids.push(&scored.triple.edge.source_id);
        endpoint_ids.push(&scored.triple.edge.target_id);
    }
    assert!(endpoint_ids.contains(&"Python::g1"));
    assert!(endpoint_ids.contains(&"Guido van Rossum::g1"));
    assert!(out.embedding.is_some());

    // isolation: the same query in another group sees nothing
    let other = engine
        .query(&CancellationToken::new(), "g-other", "Python creator", &config)
        .await
        .unwrap();
    assert!(other.graph.is_empty());
}

#[tokio::test]
async fn chunk_and_summary_queries_return_text() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");
    let (report, _) = absorb(&cx, vec![IngestFile::text("doc.txt", DOC)]).await;
    report.unwrap();

    let engine = cube.query_engine();

    let chunks = engine
        .query(
            &CancellationToken::new(),
            "g1",
            "Python history",
            &QueryConfig {
                query_type: QueryType::GetChunks,
                ..QueryConfig::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(chunks.chunks.len(), 1);
    assert!(chunks.chunks[0].contains("Guido van Rossum"));
    assert!(chunks.graph.is_empty(), "chunk-only query skips the graph");

    let summaries = engine
        .query(
            &CancellationToken::new(),
            "g1",
            "Python history",
            &QueryConfig {
                query_type: QueryType::GetPreMadeSummaries,
                ..QueryConfig::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(summaries.summaries.len(), 1);
    assert!(summaries.summaries[0].starts_with("Summary:"));
}

#[tokio::test]
async fn answer_types_compose_context_and_generate() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");
    let (report, _) = absorb(&cx, vec![IngestFile::text("doc.txt", DOC)]).await;
    report.unwrap();

    let engine = cube.query_engine();
    let out = engine
        .query(
            &CancellationToken::new(),
            "g1",
            "Who created Python?",
            &QueryConfig {
                query_type: QueryType::AnswerByChunksAndGraphSummaryEn,
                ..QueryConfig::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.answer.as_deref(), Some("Guido van Rossum created Python."));
    assert!(out.graph_text.is_some(), "graph summary feeds the answer");
    assert!(!out.chunks.is_empty());
    assert!(out.usage.details.contains_key("journey-chat"));
}
