//! Blob Store Seam
//!
//! Raw ingested files are staged in an external blob store between the add
//! and cognify halves of absorb; successful cognify deletes them, and a
//! background sweep in the cube service expires leftovers by age. Cleanup
//! scans do not coordinate with in-flight reads, so callers tolerate a
//! `NotFound` on an expired key.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// External blob storage (S3-like), multi-reader/multi-writer per key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, overwriting.
    async fn put(&self, ctx: &CancellationToken, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch the bytes stored under `key`; `NotFound` when absent or expired.
    async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`; removing an absent key is not an error.
    async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<()>;

    /// Delete every object older than `retention`; returns how many went.
    async fn cleanup_by_age(&self, ctx: &CancellationToken, retention: Duration) -> Result<u64>;
}
