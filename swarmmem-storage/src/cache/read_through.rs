//! Three-tier read-through cache with correctness contracts.
//!
//! L1 is an in-process LRU bounded by entry count and byte budget. L2 is a
//! shared [`CacheBackend`] (normally LMDB). L3 is the persistent store
//! itself. Reads promote from a lower tier to every tier above it; writes
//! go through to L1 and L2 before acknowledging, except `setex`-style
//! writes with a very short TTL which may write around L2 to avoid
//! evicting longer-lived entries.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use swarmmem_core::{MemoryEntry, SwarmId, SwarmMemResult};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::EntryKey;
use crate::StorageTrait;

use super::freshness::{CacheRead, Freshness};
use super::tenant_key::MemoryCacheKey;
use super::traits::CacheBackend;
use super::watermark::ChangeJournal;

/// Configuration for the multi-layer cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum staleness for best-effort reads when not specified.
    pub default_max_staleness: Duration,
    /// Maximum number of entries held in L1.
    pub l1_max_entries: usize,
    /// Maximum total bytes (by `MemoryEntry::size_bytes`) held in L1.
    pub l1_max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_max_staleness: Duration::from_secs(60),
            l1_max_entries: 10_000,
            l1_max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_staleness(mut self, duration: Duration) -> Self {
        self.default_max_staleness = duration;
        self
    }

    pub fn with_l1_max_entries(mut self, max: usize) -> Self {
        self.l1_max_entries = max;
        self
    }

    pub fn with_l1_max_bytes(mut self, max: u64) -> Self {
        self.l1_max_bytes = max;
        self
    }
}

/// Fetches the current row for a logical key from the system of record.
/// Implemented for any [`StorageTrait`] so the cache never depends on a
/// concrete storage backend.
#[async_trait::async_trait]
pub trait StorageFetcher: Send + Sync {
    async fn fetch(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<MemoryEntry>>;
}

#[async_trait::async_trait]
impl<S: StorageTrait + ?Sized> StorageFetcher for S {
    async fn fetch(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<MemoryEntry>> {
        let entry_key: EntryKey = (key.to_vec(), namespace.to_string(), swarm_id, None);
        self.entry_get_current(&entry_key).await
    }
}

/// A cross-tier invalidation event, broadcast so every process holding an
/// L1 copy can evict it.
#[derive(Debug, Clone)]
pub enum CacheInvalidation {
    Entry {
        swarm_id: SwarmId,
        namespace: String,
        key: Vec<u8>,
    },
    Namespace {
        swarm_id: SwarmId,
        namespace: String,
    },
    Swarm {
        swarm_id: SwarmId,
    },
}

struct L1 {
    entries: LruCache<MemoryCacheKey, (MemoryEntry, chrono::DateTime<Utc>)>,
    current_bytes: u64,
    max_bytes: u64,
}

impl L1 {
    fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(max_entries.max(1)).unwrap()),
            current_bytes: 0,
            max_bytes,
        }
    }

    fn get(&mut self, key: &MemoryCacheKey) -> Option<(MemoryEntry, chrono::DateTime<Utc>)> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: MemoryCacheKey, entry: MemoryEntry, cached_at: chrono::DateTime<Utc>) {
        let size = entry.size_bytes;
        if let Some((_, (old, _))) = self.entries.push(key, (entry, cached_at)) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }
        self.current_bytes += size;
        while self.current_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, (evicted, _))) => {
                    self.current_bytes = self.current_bytes.saturating_sub(evicted.size_bytes);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &MemoryCacheKey) {
        if let Some((entry, _)) = self.entries.pop(key) {
            self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
        }
    }

    fn retain_matching<F>(&mut self, predicate: F)
    where
        F: Fn(&MemoryCacheKey) -> bool,
    {
        let doomed: Vec<MemoryCacheKey> = self
            .entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| *k)
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }
}

/// Three-tier cache: in-process LRU (L1), shared backend (L2, normally
/// LMDB), persistent store (L3). L2 unavailability degrades to an L1/L3
/// cache rather than failing reads.
pub struct MultiLayerCache<C, J>
where
    C: CacheBackend,
    J: ChangeJournal,
{
    l1: AsyncMutex<L1>,
    l2: Arc<C>,
    journal: Arc<J>,
    config: CacheConfig,
    invalidations: broadcast::Sender<CacheInvalidation>,
}

impl<C, J> MultiLayerCache<C, J>
where
    C: CacheBackend,
    J: ChangeJournal,
{
    pub fn new(l2: Arc<C>, journal: Arc<J>, config: CacheConfig) -> Self {
        let (invalidations, _) = broadcast::channel(1024);
        Self {
            l1: AsyncMutex::new(L1::new(config.l1_max_entries, config.l1_max_bytes)),
            l2,
            journal,
            config,
            invalidations,
        }
    }

    pub fn with_defaults(l2: Arc<C>, journal: Arc<J>) -> Self {
        Self::new(l2, journal, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn l2(&self) -> &C {
        &self.l2
    }

    /// Subscribe to cross-tier invalidation events, so a replica's own L1
    /// stays consistent with writes made elsewhere.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheInvalidation> {
        self.invalidations.subscribe()
    }

    /// Apply an invalidation received from [`subscribe`](Self::subscribe)
    /// (e.g. from another process) to this instance's own L1.
    pub async fn apply_invalidation(&self, event: &CacheInvalidation) {
        let mut l1 = self.l1.lock().await;
        match event {
            CacheInvalidation::Entry {
                swarm_id,
                namespace,
                key,
            } => l1.remove(&MemoryCacheKey::new(*swarm_id, namespace, key)),
            CacheInvalidation::Namespace { swarm_id, namespace } => {
                let prefix = MemoryCacheKey::swarm_namespace_prefix(*swarm_id, namespace);
                l1.retain_matching(|k| k.encode()[..prefix.len()] == prefix);
            }
            CacheInvalidation::Swarm { swarm_id } => {
                let prefix = MemoryCacheKey::swarm_prefix(*swarm_id);
                l1.retain_matching(|k| k.encode()[..prefix.len()] == prefix);
            }
        }
    }

    /// Read with an explicit freshness waiver, promoting across tiers on a
    /// lower-tier hit.
    pub async fn get<S: StorageFetcher + ?Sized>(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
        freshness: Freshness,
        storage: &S,
    ) -> SwarmMemResult<Option<CacheRead<MemoryEntry>>> {
        let cache_key = MemoryCacheKey::new(swarm_id, namespace, key);

        if let Some((entry, cached_at)) = self.l1.lock().await.get(&cache_key) {
            if self.is_fresh_enough(swarm_id, cached_at, &freshness).await? {
                return Ok(Some(CacheRead::from_cache(entry, cached_at, None)));
            }
        }

        match self.l2.get(swarm_id, namespace, key).await {
            Ok(Some((entry, cached_at))) => {
                if self.is_fresh_enough(swarm_id, cached_at, &freshness).await? {
                    self.l1
                        .lock()
                        .await
                        .put(cache_key, entry.clone(), cached_at);
                    return Ok(Some(CacheRead::from_cache(entry, cached_at, None)));
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "l2 cache tier unavailable, falling back to storage");
            }
        }

        match storage.fetch(swarm_id, namespace, key).await? {
            Some(entry) => {
                let cached_at = Utc::now();
                if let Err(e) = self.l2.put(&entry, cached_at).await {
                    warn!(error = %e, "failed to populate l2 cache on storage fetch");
                }
                self.l1
                    .lock()
                    .await
                    .put(cache_key, entry.clone(), cached_at);
                Ok(Some(CacheRead::from_storage(entry, None)))
            }
            None => Ok(None),
        }
    }

    async fn is_fresh_enough(
        &self,
        swarm_id: SwarmId,
        cached_at: chrono::DateTime<Utc>,
        freshness: &Freshness,
    ) -> SwarmMemResult<bool> {
        match freshness {
            Freshness::BestEffort { max_staleness } => {
                let staleness = Utc::now()
                    .signed_duration_since(cached_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                Ok(staleness <= *max_staleness)
            }
            Freshness::Consistent => {
                let changed = match self.journal.watermark_at(swarm_id, cached_at).await? {
                    Some(watermark) => self.journal.changes_since(swarm_id, &watermark).await?,
                    None => true,
                };
                Ok(!changed)
            }
        }
    }

    /// Write a fresh value through to L1 and L2, then announce the change
    /// so other replicas' L1 tiers can evict their stale copy.
    pub async fn put(&self, entry: &MemoryEntry) -> SwarmMemResult<()> {
        let cache_key = MemoryCacheKey::new(entry.swarm_id, &entry.namespace, &entry.key);
        let cached_at = Utc::now();

        if let Err(e) = self.l2.put(entry, cached_at).await {
            warn!(error = %e, "l2 cache tier unavailable on write-through");
        }
        self.l1.lock().await.put(cache_key, entry.clone(), cached_at);

        let _ = self.invalidations.send(CacheInvalidation::Entry {
            swarm_id: entry.swarm_id,
            namespace: entry.namespace.clone(),
            key: entry.key.clone(),
        });
        Ok(())
    }

    /// Write around L2 for very short-lived entries (e.g. `setex` with a
    /// TTL shorter than typical L2 residency), keeping only the L1 copy.
    pub async fn put_write_around(&self, entry: &MemoryEntry) {
        let cache_key = MemoryCacheKey::new(entry.swarm_id, &entry.namespace, &entry.key);
        self.l1
            .lock()
            .await
            .put(cache_key, entry.clone(), Utc::now());
        debug!(namespace = %entry.namespace, "write-around: skipped l2 for short-lived entry");
    }

    pub async fn delete(&self, swarm_id: SwarmId, namespace: &str, key: &[u8]) -> SwarmMemResult<()> {
        let cache_key = MemoryCacheKey::new(swarm_id, namespace, key);
        self.l1.lock().await.remove(&cache_key);
        self.l2.delete(swarm_id, namespace, key).await?;
        let _ = self.invalidations.send(CacheInvalidation::Entry {
            swarm_id,
            namespace: namespace.to_string(),
            key: key.to_vec(),
        });
        Ok(())
    }

    pub async fn invalidate_namespace(&self, swarm_id: SwarmId, namespace: &str) -> SwarmMemResult<u64> {
        let prefix = MemoryCacheKey::swarm_namespace_prefix(swarm_id, namespace);
        self.l1
            .lock()
            .await
            .retain_matching(|k| k.encode()[..prefix.len()] == prefix);
        let count = self.l2.invalidate_namespace(swarm_id, namespace).await?;
        let _ = self.invalidations.send(CacheInvalidation::Namespace {
            swarm_id,
            namespace: namespace.to_string(),
        });
        Ok(count)
    }

    pub async fn invalidate_swarm(&self, swarm_id: SwarmId) -> SwarmMemResult<u64> {
        let prefix = MemoryCacheKey::swarm_prefix(swarm_id);
        self.l1
            .lock()
            .await
            .retain_matching(|k| k.encode()[..prefix.len()] == prefix);
        let count = self.l2.invalidate_swarm(swarm_id).await?;
        let _ = self.invalidations.send(CacheInvalidation::Swarm { swarm_id });
        Ok(count)
    }

    /// Drop every L1 entry. Used by tests and by operators recovering from
    /// suspected corruption.
    pub async fn clear_l1(&self) {
        self.l1.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::watermark::InMemoryChangeJournal;
    use swarmmem_core::{
        compute_content_hash, ACLLevel, AgentId, Compression, EncryptionMode, EntityIdType,
        EntryId, MemoryKind,
    };
    use std::collections::HashMap;
    use std::sync::RwLock as StdRwLock;

    #[derive(Default)]
    struct MockL2 {
        data: StdRwLock<HashMap<[u8; 41], (MemoryEntry, chrono::DateTime<Utc>)>>,
    }

    #[async_trait::async_trait]
    impl CacheBackend for MockL2 {
        async fn get(
            &self,
            swarm_id: SwarmId,
            namespace: &str,
            key: &[u8],
        ) -> SwarmMemResult<Option<(MemoryEntry, chrono::DateTime<Utc>)>> {
            let cache_key = MemoryCacheKey::new(swarm_id, namespace, key).encode();
            Ok(self.data.read().unwrap().get(&cache_key).cloned())
        }

        async fn put(&self, entry: &MemoryEntry, cached_at: chrono::DateTime<Utc>) -> SwarmMemResult<()> {
            let cache_key = MemoryCacheKey::new(entry.swarm_id, &entry.namespace, &entry.key).encode();
            self.data.write().unwrap().insert(cache_key, (entry.clone(), cached_at));
            Ok(())
        }

        async fn delete(&self, swarm_id: SwarmId, namespace: &str, key: &[u8]) -> SwarmMemResult<()> {
            let cache_key = MemoryCacheKey::new(swarm_id, namespace, key).encode();
            self.data.write().unwrap().remove(&cache_key);
            Ok(())
        }

        async fn invalidate_swarm(&self, swarm_id: SwarmId) -> SwarmMemResult<u64> {
            let prefix = MemoryCacheKey::swarm_prefix(swarm_id);
            let mut data = self.data.write().unwrap();
            let before = data.len();
            data.retain(|k, _| k[..prefix.len()] != prefix);
            Ok((before - data.len()) as u64)
        }

        async fn invalidate_namespace(&self, swarm_id: SwarmId, namespace: &str) -> SwarmMemResult<u64> {
            let prefix = MemoryCacheKey::swarm_namespace_prefix(swarm_id, namespace);
            let mut data = self.data.write().unwrap();
            let before = data.len();
            data.retain(|k, _| k[..prefix.len()] != prefix);
            Ok((before - data.len()) as u64)
        }

        async fn stats(&self) -> SwarmMemResult<super::super::traits::CacheStats> {
            Ok(super::super::traits::CacheStats::default())
        }
    }

    struct NoStorage;

    #[async_trait::async_trait]
    impl StorageFetcher for NoStorage {
        async fn fetch(
            &self,
            _swarm_id: SwarmId,
            _namespace: &str,
            _key: &[u8],
        ) -> SwarmMemResult<Option<MemoryEntry>> {
            Ok(None)
        }
    }

    fn sample_entry(swarm_id: SwarmId, namespace: &str, key: &[u8]) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            entry_id: EntryId::now_v7(),
            key: key.to_vec(),
            namespace: namespace.to_string(),
            value_blob: b"payload".to_vec(),
            kind: MemoryKind::State,
            agent_id: AgentId::now_v7(),
            team_id: None,
            project_id: None,
            swarm_id,
            acl_level: ACLLevel::Private,
            compression: Compression::None,
            encryption: EncryptionMode::None,
            iv: None,
            tag: None,
            key_id: None,
            version: 1,
            parent_entry_id: None,
            ttl_seconds: None,
            expires_at: None,
            access_count: 0,
            last_accessed_at: None,
            size_bytes: 7,
            checksum: compute_content_hash(b"payload"),
            created_at: now,
            updated_at: now,
        }
    }

    fn fixture() -> MultiLayerCache<MockL2, InMemoryChangeJournal> {
        MultiLayerCache::with_defaults(
            Arc::new(MockL2::default()),
            Arc::new(InMemoryChangeJournal::default()),
        )
    }

    #[tokio::test]
    async fn test_put_then_get_hits_l1() {
        let cache = fixture();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(swarm_id, "ns", b"k1");
        cache.put(&entry).await.unwrap();

        let read = cache
            .get(swarm_id, "ns", b"k1", Freshness::best_effort(Duration::from_secs(60)), &NoStorage)
            .await
            .unwrap()
            .unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.value().entry_id, entry.entry_id);
    }

    #[tokio::test]
    async fn test_l1_miss_promotes_from_l2() {
        let cache = fixture();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(swarm_id, "ns", b"k1");
        cache.l2.put(&entry, Utc::now()).await.unwrap();

        let read = cache
            .get(swarm_id, "ns", b"k1", Freshness::best_effort(Duration::from_secs(60)), &NoStorage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.value().entry_id, entry.entry_id);
        assert!(cache.l1.lock().await.get(&MemoryCacheKey::new(swarm_id, "ns", b"k1")).is_some());
    }

    #[tokio::test]
    async fn test_delete_evicts_both_tiers() {
        let cache = fixture();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(swarm_id, "ns", b"k1");
        cache.put(&entry).await.unwrap();

        cache.delete(swarm_id, "ns", b"k1").await.unwrap();
        assert!(cache.l2.get(swarm_id, "ns", b"k1").await.unwrap().is_none());
        assert!(cache.l1.lock().await.get(&MemoryCacheKey::new(swarm_id, "ns", b"k1")).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_namespace_scoped() {
        let cache = fixture();
        let swarm_id = SwarmId::now_v7();
        cache.put(&sample_entry(swarm_id, "ns-a", b"k1")).await.unwrap();
        cache.put(&sample_entry(swarm_id, "ns-b", b"k1")).await.unwrap();

        let count = cache.invalidate_namespace(swarm_id, "ns-a").await.unwrap();
        assert_eq!(count, 1);
        assert!(cache.l2.get(swarm_id, "ns-a", b"k1").await.unwrap().is_none());
        assert!(cache.l2.get(swarm_id, "ns-b", b"k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_l1_byte_budget_evicts_lru() {
        let cache = MultiLayerCache::new(
            Arc::new(MockL2::default()),
            Arc::new(InMemoryChangeJournal::default()),
            CacheConfig::default().with_l1_max_bytes(10),
        );
        let swarm_id = SwarmId::now_v7();
        cache.put(&sample_entry(swarm_id, "ns", b"k1")).await.unwrap();
        cache.put(&sample_entry(swarm_id, "ns", b"k2")).await.unwrap();

        let l1 = cache.l1.lock().await;
        assert!(l1.current_bytes <= 10);
    }

    #[tokio::test]
    async fn test_apply_invalidation_evicts_l1_only() {
        let cache = fixture();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(swarm_id, "ns", b"k1");
        cache.put(&entry).await.unwrap();

        cache
            .apply_invalidation(&CacheInvalidation::Entry {
                swarm_id,
                namespace: "ns".to_string(),
                key: b"k1".to_vec(),
            })
            .await;
        assert!(cache.l1.lock().await.get(&MemoryCacheKey::new(swarm_id, "ns", b"k1")).is_none());
        assert!(cache.l2.get(swarm_id, "ns", b"k1").await.unwrap().is_some());
    }
}
