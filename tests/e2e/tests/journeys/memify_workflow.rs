//! Memify batching behaviour over real ingested corpora.

use std::sync::atomic::Ordering;

use mnema_e2e_tests::harness::TestCube;

use mnema_core::{absorb, GraphStorage, IngestFile, Lang};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn small_corpus_takes_bulk_path() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");
    let (report, _) = absorb(
        &cx,
        vec![IngestFile::text(
            "doc.txt",
            "Python was developed by Guido van Rossum at CWI in 1991.",
        )],
    )
    .await;
    report.unwrap();

    let calls_before = cube.chat.calls.load(Ordering::SeqCst);
    let report = cube
        .metacognition_engine()
        .memify(&CancellationToken::new(), "g1", "default", Lang::En)
        .await
        .unwrap();

    // corpus far under 50 000 chars: exactly one extraction call
    assert_eq!(report.batches, 1);
    assert_eq!(cube.chat.calls.load(Ordering::SeqCst) - calls_before, 1);
    assert_eq!(report.rules_created, 1);

    let storage = cube.handle.storage();
    let rules = storage.get_nodes_by_type("Rule", "g1").unwrap();
    assert_eq!(rules.len(), 1);
    let sets = storage
        .get_nodes_by_edge(&rules[0].id, "BELONGS_TO", "g1")
        .unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].node_type, "NodeSet");
}

#[tokio::test]
async fn large_corpus_takes_batch_path() {
    let mut config = mnema_core::EngineConfig::default();
    config.memify.max_chars_for_bulk = 500;
    config.memify.batch_min_chars = 50;
    let cube = TestCube::with_config(config).await;
    let cx = cube.pipeline_context("g1");

    let sentence = "Knowledge engines decay unused edges to keep their graphs lean. ";
    let body = sentence.repeat(40); // ~2 560 chars
    let total_chars = body.chars().count() as u64;
    let (report, _) = absorb(&cx, vec![IngestFile::text("long.txt", body)]).await;
    report.unwrap();

    let report = cube
        .metacognition_engine()
        .memify(&CancellationToken::new(), "g1", "default", Lang::En)
        .await
        .unwrap();

    assert!(report.batches >= 2, "corpus over the bulk cap must batch");
    // overlap means the processed character count covers the corpus
    assert!(report.chars_processed >= total_chars);
}

#[tokio::test]
async fn memify_is_idempotent_per_node_set() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");
    let (report, _) = absorb(
        &cx,
        vec![IngestFile::text("doc.txt", "Creators shape ecosystems.")],
    )
    .await;
    report.unwrap();

    let engine = cube.metacognition_engine();
    let ctx = CancellationToken::new();
    let first = engine.memify(&ctx, "g1", "default", Lang::En).await.unwrap();
    let second = engine.memify(&ctx, "g1", "default", Lang::En).await.unwrap();

    assert_eq!(first.rules_created, 1);
    assert_eq!(second.rules_created, 0);
    assert_eq!(
        cube.handle
            .storage()
            .get_nodes_by_type("Rule", "g1")
            .unwrap()
            .len(),
        1
    );
}
