//! Concrete L2 cache backend: LMDB when configured, a no-op otherwise.
//!
//! `MultiLayerCache<C, J>` is generic over a concrete `C: CacheBackend`, so
//! the facade needs exactly one concrete type regardless of whether
//! `SwarmMemConfig::l2_lmdb_path` is set. Wrapping the choice in an enum
//! that itself implements `CacheBackend` gives that one type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swarmmem_core::{MemoryEntry, SwarmId, SwarmMemResult};
use swarmmem_storage::cache::{CacheBackend, CacheStats, LmdbCacheBackend};

pub enum L2Backend {
    Lmdb(LmdbCacheBackend),
    Disabled,
}

#[async_trait]
impl CacheBackend for L2Backend {
    async fn get(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<(MemoryEntry, DateTime<Utc>)>> {
        match self {
            L2Backend::Lmdb(backend) => backend.get(swarm_id, namespace, key).await,
            L2Backend::Disabled => Ok(None),
        }
    }

    async fn put(&self, entry: &MemoryEntry, cached_at: DateTime<Utc>) -> SwarmMemResult<()> {
        match self {
            L2Backend::Lmdb(backend) => backend.put(entry, cached_at).await,
            L2Backend::Disabled => Ok(()),
        }
    }

    async fn delete(&self, swarm_id: SwarmId, namespace: &str, key: &[u8]) -> SwarmMemResult<()> {
        match self {
            L2Backend::Lmdb(backend) => backend.delete(swarm_id, namespace, key).await,
            L2Backend::Disabled => Ok(()),
        }
    }

    async fn invalidate_swarm(&self, swarm_id: SwarmId) -> SwarmMemResult<u64> {
        match self {
            L2Backend::Lmdb(backend) => backend.invalidate_swarm(swarm_id).await,
            L2Backend::Disabled => Ok(0),
        }
    }

    async fn invalidate_namespace(&self, swarm_id: SwarmId, namespace: &str) -> SwarmMemResult<u64> {
        match self {
            L2Backend::Lmdb(backend) => backend.invalidate_namespace(swarm_id, namespace).await,
            L2Backend::Disabled => Ok(0),
        }
    }

    async fn stats(&self) -> SwarmMemResult<CacheStats> {
        match self {
            L2Backend::Lmdb(backend) => backend.stats().await,
            L2Backend::Disabled => Ok(CacheStats::default()),
        }
    }
}
