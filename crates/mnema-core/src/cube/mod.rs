//! Cube Lifecycle Manager
//!
//! A cube is one self-contained database file; its identity is the file
//! basename. The service caches open handles, refreshes `last_used_at` on
//! every hit, evicts idle handles from a minutely GC task, and sweeps the
//! blob store on its own cadence. Both background tasks stop on one close
//! signal; `close` joins them and then closes every handle, collecting
//! errors.

mod export;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::memory::{EmbeddingModelConfig, EngineConfig};
use crate::model::BlobStore;
use crate::storage::{CubeStorage, GraphStorage, SharedStorage};

pub use export::{export_cube, export_cube_to_path};

/// Cube identity: the database file's basename without extension.
pub fn cube_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// One open cube
pub struct CubeHandle {
    cube_id: String,
    path: PathBuf,
    storage: Arc<CubeStorage>,
    /// Refreshed on every cache hit, read by the idle GC
    last_used_at: Mutex<Instant>,
    /// Cancelled when the handle is evicted or the service closes; query-time
    /// background deletes select on this so they never outlive the cube.
    shutdown: CancellationToken,
}

impl CubeHandle {
    pub fn cube_id(&self) -> &str {
        &self.cube_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The concrete backend.
    pub fn storage(&self) -> Arc<CubeStorage> {
        Arc::clone(&self.storage)
    }

    /// The backend behind the storage seam engines use.
    pub fn shared_storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    /// Token that fires when this cube is going away.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock().expect("last_used_at lock poisoned")
    }

    fn touch(&self) {
        let mut last = self.last_used_at.lock().expect("last_used_at lock poisoned");
        *last = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at().elapsed()
    }
}

/// Owner of every open cube in the process
///
/// One instance per service; pass the handle around explicitly instead of
/// going through a global.
pub struct CubeService {
    config: EngineConfig,
    embedding: EmbeddingModelConfig,
    blobs: Arc<dyn BlobStore>,
    cubes: tokio::sync::RwLock<HashMap<String, Arc<CubeHandle>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CubeService {
    /// Create the service and spawn its two background tasks (idle GC,
    /// blob cleanup). Must run inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        embedding: EmbeddingModelConfig,
        blobs: Arc<dyn BlobStore>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            config,
            embedding,
            blobs,
            cubes: tokio::sync::RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let gc = tokio::spawn(Self::idle_gc_loop(Arc::clone(&service)));
        let sweep = tokio::spawn(Self::blob_cleanup_loop(Arc::clone(&service)));
        service
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .extend([gc, sweep]);

        service
    }

    /// Look up an open handle or open the cube at `path`.
    ///
    /// The read lock serves the hot path; a miss upgrades to the write lock
    /// and re-checks, so N concurrent callers open the storage exactly once.
    pub async fn get_or_open(&self, path: impl AsRef<Path>) -> Result<Arc<CubeHandle>> {
        self.check_running()?;
        let path = path.as_ref();
        let cube_id = cube_id_from_path(path);

        {
            let cubes = self.cubes.read().await;
            if let Some(handle) = cubes.get(&cube_id) {
                handle.touch();
                return Ok(Arc::clone(handle));
            }
        }

        let mut cubes = self.cubes.write().await;
        if let Some(handle) = cubes.get(&cube_id) {
            handle.touch();
            return Ok(Arc::clone(handle));
        }

        let storage = CubeStorage::open(path, &self.embedding, self.config.metabolism)?;
        let handle = Arc::new(CubeHandle {
            cube_id: cube_id.clone(),
            path: path.to_path_buf(),
            storage: Arc::new(storage),
            last_used_at: Mutex::new(Instant::now()),
            shutdown: self.shutdown.child_token(),
        });
        cubes.insert(cube_id.clone(), Arc::clone(&handle));
        tracing::debug!(cube = %cube_id, "opened cube");
        Ok(handle)
    }

    /// How many cubes are currently open.
    pub async fn open_count(&self) -> usize {
        self.cubes.read().await.len()
    }

    /// Close one cube and drop it from the cache.
    pub async fn close_cube(&self, cube_id: &str) -> Result<()> {
        let handle = self.cubes.write().await.remove(cube_id);
        match handle {
            Some(handle) => {
                handle.shutdown.cancel();
                handle.storage.close()
            }
            None => Ok(()),
        }
    }

    /// Idempotent shutdown: stop both background tasks, join them, close
    /// every handle, and aggregate per-handle errors.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("tasks lock poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        let handles: Vec<Arc<CubeHandle>> = {
            let mut cubes = self.cubes.write().await;
            cubes.drain().map(|(_, handle)| handle).collect()
        };

        let mut errors = Vec::new();
        for handle in handles {
            if let Err(e) = handle.storage.close() {
                errors.push(format!("{}: {e}", handle.cube_id));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Internal(format!(
                "close failures: {}",
                errors.join("; ")
            )))
        }
    }

    fn check_running(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::Internal("cube service is closed".into()))
        } else {
            Ok(())
        }
    }

    async fn idle_gc_loop(service: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = service.shutdown.cancelled() => return,
                _ = ticker.tick() => service.evict_idle().await,
            }
        }
    }

    async fn evict_idle(&self) {
        let timeout = Duration::from_secs(self.config.storage_idle_timeout_minutes * 60);
        let mut cubes = self.cubes.write().await;
        let expired: Vec<String> = cubes
            .iter()
            .filter(|(_, handle)| handle.idle_for() >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for cube_id in expired {
            if let Some(handle) = cubes.remove(&cube_id) {
                handle.shutdown.cancel();
                if let Err(e) = handle.storage.close() {
                    tracing::warn!(cube = %cube_id, "failed to close idle cube: {e}");
                } else {
                    tracing::info!(cube = %cube_id, "evicted idle cube");
                }
            }
        }
    }

    async fn blob_cleanup_loop(service: Arc<Self>) {
        let interval = Duration::from_secs(service.config.blob_cleanup_interval_minutes * 60);
        let retention = Duration::from_secs(service.config.blob_retention_hours * 3600);
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so a fresh service does
        // not sweep before anything could expire
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = service.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    match service.blobs.cleanup_by_age(&service.shutdown, retention).await {
                        Ok(removed) if removed > 0 => {
                            tracing::info!(removed, "blob cleanup pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("blob cleanup failed: {e}"),
                    }
                }
            }
        }
    }
}
