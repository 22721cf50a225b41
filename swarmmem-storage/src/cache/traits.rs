//! Cache backend trait and the cacheable-entity marker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swarmmem_core::{MemoryEntry, SwarmId, SwarmMemResult};

/// Marker trait for types the multi-tier cache can hold. Only `MemoryEntry`
/// implements this today; the trait exists so a second cacheable kind (e.g.
/// a resolved ACL decision) can be added without reshaping `CacheBackend`.
pub trait CacheableEntity: Clone + Send + Sync + 'static {
    fn swarm_id(&self) -> SwarmId;
    fn namespace(&self) -> &str;
    fn cache_key_bytes(&self) -> &[u8];
}

impl CacheableEntity for MemoryEntry {
    fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn cache_key_bytes(&self) -> &[u8] {
        &self.key
    }
}

/// Cache backend trait for pluggable cache tiers (L1 in-process, L2 LMDB).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<(MemoryEntry, DateTime<Utc>)>>;

    async fn put(&self, entry: &MemoryEntry, cached_at: DateTime<Utc>) -> SwarmMemResult<()>;

    async fn delete(&self, swarm_id: SwarmId, namespace: &str, key: &[u8]) -> SwarmMemResult<()>;

    /// Invalidate every entry cached for a swarm.
    async fn invalidate_swarm(&self, swarm_id: SwarmId) -> SwarmMemResult<u64>;

    /// Invalidate every entry cached for a swarm/namespace pair.
    async fn invalidate_namespace(&self, swarm_id: SwarmId, namespace: &str) -> SwarmMemResult<u64>;

    async fn stats(&self) -> SwarmMemResult<CacheStats>;
}

/// Statistics about a single cache tier's usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
