//! Decay, exclusivity, and pruning over an evolving graph.

use mnema_e2e_tests::harness::TestCube;

use mnema_core::{
    absorb, lambda, thickness, GraphStorage, IngestFile, MemoryGroupConfig, MetabolismOptions,
};
use tokio_util::sync::CancellationToken;

const DOC_1991: &str = "Python was developed by Guido van Rossum at CWI in 1991.";
const DOC_2005: &str = "Guido moved to Google in 2005.";

const DAY_MS: i64 = 86_400_000;

#[tokio::test]
async fn newer_employment_wins_after_metabolism() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");

    let (report, _) = absorb(&cx, vec![IngestFile::text("doc1.txt", DOC_1991)]).await;
    report.unwrap();
    let (report, _) = absorb(&cx, vec![IngestFile::text("doc2.txt", DOC_2005)]).await;
    report.unwrap();

    let storage = cube.handle.storage();

    // age the CWI employment 60 days into the past
    let now = mnema_core::now_ms();
    storage
        .update_edge_metrics(
            "Guido van Rossum::g1",
            "WORKS_AT",
            "CWI::g1",
            "g1",
            0.8,
            0.9,
            now - 60 * DAY_MS,
        )
        .unwrap();

    let group_config = MemoryGroupConfig {
        half_life_days: 30.0,
        prune_threshold: 0.3,
        ..MemoryGroupConfig::default()
    };
    storage.upsert_memory_group("g1", &group_config).unwrap();

    // decayed thickness of the old edge sits strictly below the new one
    let max_unix = storage.get_max_unix("g1").unwrap();
    let lam = lambda(group_config.half_life_days);
    let edges = storage
        .get_edges_by_node("Guido van Rossum::g1", "g1")
        .unwrap();
    let old = edges
        .iter()
        .find(|e| e.edge_type == "WORKS_AT" && e.target_id == "CWI::g1")
        .unwrap();
    let new = edges
        .iter()
        .find(|e| e.edge_type == "WORKS_AT" && e.target_id == "Google::g1")
        .unwrap();
    let old_thickness = thickness(old.weight, old.confidence, old.unix, max_unix, lam);
    let new_thickness = thickness(new.weight, new.confidence, new.unix, max_unix, lam);
    assert!(old_thickness < new_thickness);

    let report = cube
        .metabolism_engine()
        .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
        .await
        .unwrap();

    // WORKS_AT is exclusive: the decayed CWI edge is discarded
    assert!(report.pruned_edges + report.conflict_deleted >= 1);
    let edges = storage
        .get_edges_by_node("Guido van Rossum::g1", "g1")
        .unwrap();
    let works_at: Vec<_> = edges.iter().filter(|e| e.edge_type == "WORKS_AT").collect();
    assert_eq!(works_at.len(), 1);
    assert_eq!(works_at[0].target_id, "Google::g1");
}

#[tokio::test]
async fn re_absorbing_reinforces_edges() {
    let cube = TestCube::new().await;
    let cx = cube.pipeline_context("g1");

    let (report, _) = absorb(&cx, vec![IngestFile::text("doc1.txt", DOC_1991)]).await;
    report.unwrap();
    let storage = cube.handle.storage();
    let before = storage
        .get_edges_by_node("Guido van Rossum::g1", "g1")
        .unwrap()
        .into_iter()
        .find(|e| e.edge_type == "CREATED")
        .unwrap();

    // same facts from a different file: the edge reinforces, not duplicates
    let (report, _) = absorb(
        &cx,
        vec![IngestFile::text("doc1-copy.txt", format!("{DOC_1991} "))],
    )
    .await;
    report.unwrap();

    let after = storage
        .get_edges_by_node("Guido van Rossum::g1", "g1")
        .unwrap()
        .into_iter()
        .find(|e| e.edge_type == "CREATED")
        .unwrap();
    assert!(after.weight > before.weight);
    assert!(after.unix >= before.unix);
}

#[tokio::test]
async fn orphans_survive_grace_then_die() {
    let mut config = mnema_core::EngineConfig::default();
    config.metabolism.grace_minutes = 60;
    let cube = TestCube::with_config(config).await;
    let storage = cube.handle.storage();

    let now = mnema_core::now_ms();
    storage
        .add_nodes(&[
            mnema_core::GraphNode::new("fresh", "Entity", "g1", now),
            mnema_core::GraphNode {
                created_at_ms: now - 2 * 3_600_000,
                ..mnema_core::GraphNode::new("stale", "Entity", "g1", now)
            },
        ])
        .unwrap();

    let report = cube
        .metabolism_engine()
        .run(&CancellationToken::new(), "g1", MetabolismOptions::default())
        .await
        .unwrap();

    assert_eq!(report.deleted_orphans, 1);
    let remaining = storage.get_nodes_by_type("Entity", "g1").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "fresh::g1");
}
