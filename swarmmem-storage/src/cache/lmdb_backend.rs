//! LMDB-backed L2 cache tier, with strict per-swarm isolation.
//!
//! Uses `heed` (Rust bindings for LMDB) as the shared, memory-mapped
//! key-value store. Every operation goes through `MemoryCacheKey`, whose
//! private constructor makes a cross-swarm key unrepresentable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use swarmmem_core::{CacheError, MemoryEntry, SwarmId, SwarmMemError, SwarmMemResult};

use super::tenant_key::MemoryCacheKey;
use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    #[error("failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("failed to open database: {0}")]
    DbOpen(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for SwarmMemError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::TierUnavailable {
            tier: "l2_lmdb".to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

#[derive(Debug, Default)]
struct SwarmStatsInner {
    hits: u64,
    misses: u64,
    entries: u64,
    size_bytes: u64,
}

/// LMDB-backed cache with swarm isolation. The shared, distributed tier
/// between the in-process L1 and the persistent store.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    swarm_stats: RwLock<HashMap<SwarmId, SwarmStatsInner>>,
    global_stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (creating if absent) the LMDB environment at `path`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            swarm_stats: RwLock::new(HashMap::new()),
            global_stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record_hit(&self, swarm_id: SwarmId) {
        self.swarm_stats.write().unwrap().entry(swarm_id).or_default().hits += 1;
        self.global_stats.write().unwrap().hits += 1;
    }

    fn record_miss(&self, swarm_id: SwarmId) {
        self.swarm_stats.write().unwrap().entry(swarm_id).or_default().misses += 1;
        self.global_stats.write().unwrap().misses += 1;
    }

    fn update_entry_stats(&self, swarm_id: SwarmId, size_bytes: usize, is_new: bool) {
        let mut stats = self.swarm_stats.write().unwrap();
        let swarm_stats = stats.entry(swarm_id).or_default();
        if is_new {
            swarm_stats.entries += 1;
        }
        swarm_stats.size_bytes += size_bytes as u64;
        if is_new {
            self.global_stats.write().unwrap().entry_count += 1;
        }
    }

    /// Statistics scoped to a single swarm, for operators debugging
    /// per-tenant hit rates.
    pub fn swarm_stats(&self, swarm_id: SwarmId) -> CacheStats {
        self.swarm_stats
            .read()
            .unwrap()
            .get(&swarm_id)
            .map(|s| CacheStats {
                hits: s.hits,
                misses: s.misses,
                entry_count: s.entries,
                memory_bytes: s.size_bytes,
                evictions: 0,
            })
            .unwrap_or_default()
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            if let Ok((key, _)) = result {
                if key.len() >= prefix.len() && &key[0..prefix.len()] == prefix {
                    keys.push(key.to_vec());
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<(MemoryEntry, DateTime<Utc>)>> {
        let cache_key = MemoryCacheKey::new(swarm_id, namespace, key);
        let encoded = cache_key.encode();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, &encoded) {
            Ok(Some(bytes)) => {
                if bytes.len() < 8 {
                    drop(rtxn);
                    self.record_miss(swarm_id);
                    return Ok(None);
                }
                let timestamp_bytes: [u8; 8] = bytes[0..8]
                    .try_into()
                    .map_err(|_| LmdbCacheError::Deserialization("invalid timestamp".into()))?;
                let cached_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
                    .unwrap_or_else(Utc::now);
                let value: MemoryEntry = serde_json::from_slice(&bytes[8..])
                    .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
                drop(rtxn);
                self.record_hit(swarm_id);
                Ok(Some((value, cached_at)))
            }
            Ok(None) => {
                drop(rtxn);
                self.record_miss(swarm_id);
                Ok(None)
            }
            Err(e) => {
                drop(rtxn);
                self.record_miss(swarm_id);
                Err(LmdbCacheError::Transaction(e.to_string()).into())
            }
        }
    }

    async fn put(&self, entry: &MemoryEntry, cached_at: DateTime<Utc>) -> SwarmMemResult<()> {
        let cache_key = MemoryCacheKey::new(entry.swarm_id, &entry.namespace, &entry.key);
        let encoded = cache_key.encode();

        let timestamp_bytes = cached_at.timestamp_millis().to_le_bytes();
        let value_bytes =
            serde_json::to_vec(entry).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let mut full_bytes = Vec::with_capacity(8 + value_bytes.len());
        full_bytes.extend_from_slice(&timestamp_bytes);
        full_bytes.extend_from_slice(&value_bytes);

        let is_new = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            self.db.get(&rtxn, &encoded).ok().flatten().is_none()
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, &encoded, &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.update_entry_stats(entry.swarm_id, full_bytes.len(), is_new);
        Ok(())
    }

    async fn delete(&self, swarm_id: SwarmId, namespace: &str, key: &[u8]) -> SwarmMemResult<()> {
        let cache_key = MemoryCacheKey::new(swarm_id, namespace, key);
        let encoded = cache_key.encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let deleted = self
            .db
            .delete(&mut wtxn, &encoded)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if deleted {
            let mut stats = self.swarm_stats.write().unwrap();
            if let Some(s) = stats.get_mut(&swarm_id) {
                s.entries = s.entries.saturating_sub(1);
            }
            drop(stats);
            let mut global = self.global_stats.write().unwrap();
            global.entry_count = global.entry_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn invalidate_swarm(&self, swarm_id: SwarmId) -> SwarmMemResult<u64> {
        let prefix = MemoryCacheKey::swarm_prefix(swarm_id);
        let keys = self
            .collect_keys_with_prefix(&prefix)
            .map_err(SwarmMemError::from)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.swarm_stats.write().unwrap().remove(&swarm_id);
        let mut global = self.global_stats.write().unwrap();
        global.entry_count = global.entry_count.saturating_sub(deleted);
        Ok(deleted)
    }

    async fn invalidate_namespace(&self, swarm_id: SwarmId, namespace: &str) -> SwarmMemResult<u64> {
        let prefix = MemoryCacheKey::swarm_namespace_prefix(swarm_id, namespace);
        let keys = self
            .collect_keys_with_prefix(&prefix)
            .map_err(SwarmMemError::from)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut global = self.global_stats.write().unwrap();
        global.entry_count = global.entry_count.saturating_sub(deleted);
        Ok(deleted)
    }

    async fn stats(&self) -> SwarmMemResult<CacheStats> {
        Ok(self.global_stats.read().unwrap().clone())
    }
}
