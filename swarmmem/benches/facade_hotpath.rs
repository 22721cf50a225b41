use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use swarmmem_core::{MemoryEntry, SwarmId, SwarmMemResult};
use swarmmem_storage::cache::{CacheBackend, CacheConfig, CacheStats, Freshness, InMemoryChangeJournal, MultiLayerCache};
use swarmmem_storage::crypto::KeyManager;
use swarmmem_storage::{MockStorage, StorageTrait};

/// No-op L2 tier so the bench exercises L1 + journal-watermark logic
/// without LMDB's I/O cost.
#[derive(Default)]
struct NoL2;

#[async_trait]
impl CacheBackend for NoL2 {
    async fn get(
        &self,
        _swarm_id: SwarmId,
        _namespace: &str,
        _key: &[u8],
    ) -> SwarmMemResult<Option<(MemoryEntry, DateTime<Utc>)>> {
        Ok(None)
    }

    async fn put(&self, _entry: &MemoryEntry, _cached_at: DateTime<Utc>) -> SwarmMemResult<()> {
        Ok(())
    }

    async fn delete(&self, _swarm_id: SwarmId, _namespace: &str, _key: &[u8]) -> SwarmMemResult<()> {
        Ok(())
    }

    async fn invalidate_swarm(&self, _swarm_id: SwarmId) -> SwarmMemResult<u64> {
        Ok(0)
    }

    async fn invalidate_namespace(&self, _swarm_id: SwarmId, _namespace: &str) -> SwarmMemResult<u64> {
        Ok(0)
    }

    async fn stats(&self) -> SwarmMemResult<CacheStats> {
        Ok(CacheStats::default())
    }
}

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("build tokio runtime")
}

fn bench_aead_roundtrip(c: &mut Criterion) {
    let rt = rt();
    let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
    let keys = rt.block_on(async {
        let km = KeyManager::new(b"bench-master-secret-not-for-prod", storage).unwrap();
        km.bootstrap().await.unwrap();
        km
    });
    let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(8);

    c.bench_function("crypto/encrypt_decrypt_roundtrip", |b| {
        b.iter(|| {
            rt.block_on(async {
                let payload = keys.encrypt(black_box(&plaintext)).await.unwrap();
                let recovered = keys
                    .decrypt(payload.key_id, &payload.iv, &payload.ciphertext, &payload.tag)
                    .await
                    .unwrap();
                black_box(recovered.len());
            });
        });
    });
}

fn bench_cache_read_through(c: &mut Criterion) {
    use swarmmem_core::{
        compute_content_hash, ACLLevel, AgentId, Compression, EncryptionMode, EntityIdType,
        EntryId, MemoryKind,
    };

    let rt = rt();
    let storage = Arc::new(MockStorage::new());
    let journal = Arc::new(InMemoryChangeJournal::default());
    let cache = MultiLayerCache::new(Arc::new(NoL2::default()), journal, CacheConfig::default());

    let swarm_id = SwarmId::now_v7();
    let entry = MemoryEntry {
        entry_id: EntryId::now_v7(),
        key: b"bench-key".to_vec(),
        namespace: "bench".to_string(),
        value_blob: b"cached payload".to_vec(),
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
        size_bytes: 14,
        checksum: compute_content_hash(b"cached payload"),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    rt.block_on(cache.put(&entry)).unwrap();

    c.bench_function("cache/read_through_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let read = cache
                    .get(swarm_id, "bench", b"bench-key", Freshness::Consistent, storage.as_ref())
                    .await
                    .unwrap();
                black_box(read.is_some());
            });
        });
    });
}

criterion_group!(benches, bench_aead_roundtrip, bench_cache_read_through);
criterion_main!(benches);
