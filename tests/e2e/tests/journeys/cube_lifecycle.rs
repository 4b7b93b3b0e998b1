//! Cube handle caching, shutdown, blob cleanup, and export.

use std::sync::Arc;
use std::time::Duration;

use mnema_e2e_tests::harness::TestCube;
use mnema_e2e_tests::mocks::{MemoryBlobStore, DIMENSION};

use mnema_core::{
    export_cube_to_path, BlobStore, CubeService, EmbeddingModelConfig, EngineConfig, GraphStorage,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_share_one_handle() {
    let dir = TempDir::new().unwrap();
    let service = CubeService::new(
        EngineConfig::default(),
        EmbeddingModelConfig {
            model_name: "journey-embed".to_string(),
            dimension: DIMENSION,
        },
        Arc::new(MemoryBlobStore::new()),
    );

    let path = dir.path().join("shared.db");
    let mut joins = Vec::new();
    for _ in 0..12 {
        let service = Arc::clone(&service);
        let path = path.clone();
        joins.push(tokio::spawn(async move { service.get_or_open(&path).await }));
    }

    let mut handles = Vec::new();
    let mut stamps = Vec::new();
    for join in joins {
        let handle = join.await.unwrap().unwrap();
        stamps.push(handle.last_used_at());
        handles.push(handle);
    }
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle), "storage opened exactly once");
    }
    assert_eq!(service.open_count().await, 1);

    // last_used_at only ever moves forward
    let before = handles[0].last_used_at();
    let _ = service.get_or_open(&path).await.unwrap();
    assert!(handles[0].last_used_at() >= before);

    service.close().await.unwrap();
}

#[tokio::test]
async fn close_during_gc_tick_does_not_deadlock_and_empties_map() {
    let cube = TestCube::new().await;
    let storage = cube.handle.storage();

    // close must join the GC and cleanup tasks, close the handle, and leave
    // an empty map even when called twice
    tokio::time::timeout(Duration::from_secs(5), cube.service.close())
        .await
        .expect("close must not deadlock")
        .unwrap();
    cube.service.close().await.unwrap();

    assert_eq!(cube.service.open_count().await, 0);
    assert!(!storage.is_open());
    assert!(cube.handle.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn blob_cleanup_removes_expired_objects_only() {
    let blobs = MemoryBlobStore::new();
    let ctx = CancellationToken::new();

    blobs.put(&ctx, "fresh", b"new".to_vec()).await.unwrap();
    blobs.put(&ctx, "stale", b"old".to_vec()).await.unwrap();
    blobs.age_object("stale", Duration::from_secs(25 * 3600));

    let removed = blobs
        .cleanup_by_age(&ctx, Duration::from_secs(24 * 3600))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(blobs.contains("fresh"));
    assert!(!blobs.contains("stale"));

    // readers tolerate expired keys as NotFound
    let missing = blobs.get(&ctx, "stale").await;
    assert!(matches!(missing, Err(mnema_core::EngineError::NotFound(_))));
}

#[tokio::test]
async fn export_writes_db_and_metadata_layout() {
    let cube = TestCube::new().await;
    let storage = cube.handle.storage();
    storage
        .add_nodes(&[mnema_core::GraphNode::new(
            "exported",
            "Entity",
            "g1",
            mnema_core::now_ms(),
        )])
        .unwrap();

    let dir = TempDir::new().unwrap();
    let archive_path = dir.path().join("c1.zip");
    export_cube_to_path(
        &cube.handle,
        &[("manifest.json".to_string(), br#"{"cube":"c1"}"#.to_vec())],
        &archive_path,
    )
    .unwrap();

    let file = std::fs::File::open(&archive_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"db/c1.db".to_string()));
    assert!(names.contains(&"manifest.json".to_string()));

    cube.service.close().await.unwrap();
}
