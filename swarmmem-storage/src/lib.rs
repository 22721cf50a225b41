//! Persistent store, multi-tier cache, and key manager for the swarm memory
//! engine.
//!
//! `StorageTrait` is the durable-storage seam; `SqliteStorage` is the
//! production implementation, `MockStorage` is an in-memory implementation
//! used by tests and by the ACL/facade crates' own unit tests. The `cache`
//! module implements the three-tier cache; the `crypto` module implements
//! the key manager.

pub mod cache;
pub mod compression;
pub mod crypto;
pub mod schema;
pub mod sqlite;

pub use compression::CompressionError;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use swarmmem_core::{
    AgentId, AuditId, AuditRecord, EncryptionKey, EntryId, GrantedEntity, KeyId, KeyStatus,
    LogicalKey, MemoryEntry, Permission, PermissionId, ProjectId, StoreError, SwarmId,
    SwarmMemResult, Timestamp,
};

/// The logical-key tuple a `memory_entries` row is addressed by.
pub type EntryKey = (LogicalKey, String, SwarmId, Option<ProjectId>);

/// Aggregate counters exposed by `StorageTrait::stats`.
#[derive(Debug, Clone, Default)]
pub struct StorageStatistics {
    pub entry_count: u64,
    pub total_bytes: u64,
    pub expired_pending_sweep: u64,
}

/// Durable storage seam. Every method is async: the SQLite implementation
/// dispatches onto a blocking pool, and the facade composes this trait with
/// cache and ACL layers that are themselves async.
#[async_trait]
pub trait StorageTrait: Send + Sync {
    // === Memory entries ===

    /// Insert a new version row for a logical key. The caller has already
    /// resolved `version` (previous + 1, or 1 for a brand-new key); this
    /// method enforces that no newer row exists for the same logical key,
    /// returning `StoreError::Conflict` on a race.
    async fn entry_put(&self, entry: MemoryEntry) -> SwarmMemResult<MemoryEntry>;

    /// Fetch the current (highest-version, non-tombstoned) row for a
    /// logical key, irrespective of expiry — callers check `is_expired`.
    async fn entry_get_current(&self, key: &EntryKey) -> SwarmMemResult<Option<MemoryEntry>>;

    /// Fetch a specific version by its entry id.
    async fn entry_get_by_id(&self, entry_id: EntryId) -> SwarmMemResult<Option<MemoryEntry>>;

    /// Remove the current row for a logical key. Idempotent: the second
    /// call on an already-deleted key returns `Ok(false)`.
    async fn entry_delete(&self, key: &EntryKey) -> SwarmMemResult<bool>;

    /// Remove every row for a namespace within a swarm (`clear`).
    async fn entry_clear_namespace(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
    ) -> SwarmMemResult<u64>;

    /// List logical keys in a namespace, optionally filtered by a prefix
    /// over the raw key bytes.
    async fn entry_list_keys(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
        prefix: Option<&[u8]>,
    ) -> SwarmMemResult<Vec<LogicalKey>>;

    /// Record an access (bumps `access_count`, sets `last_accessed_at`).
    async fn entry_touch_access(&self, entry_id: EntryId, at: Timestamp) -> SwarmMemResult<()>;

    /// Delete up to `batch_size` rows whose `expires_at` has passed as of
    /// `now`. Returns the number of rows removed.
    async fn entry_sweep_expired(&self, now: Timestamp, batch_size: usize) -> SwarmMemResult<u64>;

    /// Logical-key tuples of every current row still encrypted under
    /// `key_id`, up to `limit`. Drives the re-encryption sweep after a key
    /// rotation or compromise.
    async fn entry_list_by_key_id(
        &self,
        key_id: KeyId,
        limit: usize,
    ) -> SwarmMemResult<Vec<EntryKey>>;

    async fn stats(&self) -> SwarmMemResult<StorageStatistics>;

    // === Permissions (consulted by the ACL enforcer) ===

    async fn permission_insert(&self, permission: Permission) -> SwarmMemResult<Permission>;

    /// All permission grants naming this entity, active or not — the
    /// caller filters by `is_usable`.
    async fn permission_list_for_entity(
        &self,
        entity: GrantedEntity,
    ) -> SwarmMemResult<Vec<Permission>>;

    async fn permission_revoke(&self, permission_id: PermissionId) -> SwarmMemResult<bool>;

    // === Audit log (append-only) ===

    async fn audit_append(&self, record: AuditRecord) -> SwarmMemResult<AuditId>;

    async fn audit_list_for_actor(
        &self,
        actor_id: AgentId,
        limit: usize,
    ) -> SwarmMemResult<Vec<AuditRecord>>;

    // === Encryption keys (the key manager) ===

    async fn key_insert(&self, key: EncryptionKey) -> SwarmMemResult<EncryptionKey>;

    async fn key_get(&self, key_id: KeyId) -> SwarmMemResult<Option<EncryptionKey>>;

    /// The single key currently in `KeyStatus::Active`, if any. The store
    /// enforces at most one active key at a time.
    async fn key_get_active(&self) -> SwarmMemResult<Option<EncryptionKey>>;

    async fn key_set_status(&self, key_id: KeyId, status: KeyStatus) -> SwarmMemResult<()>;

    async fn key_list(&self) -> SwarmMemResult<Vec<EncryptionKey>>;
}

/// In-memory `StorageTrait` implementation used by tests.
#[derive(Debug, Default)]
pub struct MockStorage {
    entries_by_id: RwLock<HashMap<EntryId, MemoryEntry>>,
    current_index: RwLock<HashMap<(LogicalKey, String, SwarmId, Option<ProjectId>), EntryId>>,
    permissions: RwLock<HashMap<PermissionId, Permission>>,
    audit_log: RwLock<Vec<AuditRecord>>,
    keys: RwLock<HashMap<KeyId, EncryptionKey>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_key(key: &EntryKey) -> (LogicalKey, String, SwarmId, Option<ProjectId>) {
        (key.0.clone(), key.1.clone(), key.2, key.3)
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn entry_put(&self, entry: MemoryEntry) -> SwarmMemResult<MemoryEntry> {
        let index_key = (
            entry.key.clone(),
            entry.namespace.clone(),
            entry.swarm_id,
            entry.project_id,
        );

        let mut current_index = self.current_index.write().unwrap();
        let mut entries_by_id = self.entries_by_id.write().unwrap();

        if let Some(&existing_id) = current_index.get(&index_key) {
            let existing_version = entries_by_id.get(&existing_id).map(|e| e.version);
            if let Some(existing_version) = existing_version {
                if entry.version <= existing_version {
                    return Err(StoreError::Conflict.into());
                }
            }
        }

        current_index.insert(index_key, entry.entry_id);
        entries_by_id.insert(entry.entry_id, entry.clone());
        Ok(entry)
    }

    async fn entry_get_current(&self, key: &EntryKey) -> SwarmMemResult<Option<MemoryEntry>> {
        let index_key = Self::index_key(key);
        let current_index = self.current_index.read().unwrap();
        let entries_by_id = self.entries_by_id.read().unwrap();
        Ok(current_index
            .get(&index_key)
            .and_then(|id| entries_by_id.get(id))
            .cloned())
    }

    async fn entry_get_by_id(&self, entry_id: EntryId) -> SwarmMemResult<Option<MemoryEntry>> {
        Ok(self.entries_by_id.read().unwrap().get(&entry_id).cloned())
    }

    async fn entry_delete(&self, key: &EntryKey) -> SwarmMemResult<bool> {
        let index_key = Self::index_key(key);
        let mut current_index = self.current_index.write().unwrap();
        if let Some(entry_id) = current_index.remove(&index_key) {
            self.entries_by_id.write().unwrap().remove(&entry_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn entry_clear_namespace(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
    ) -> SwarmMemResult<u64> {
        let mut current_index = self.current_index.write().unwrap();
        let mut entries_by_id = self.entries_by_id.write().unwrap();

        let matching: Vec<_> = current_index
            .keys()
            .filter(|(_, ns, sid, pid)| ns == namespace && *sid == swarm_id && *pid == project_id)
            .cloned()
            .collect();

        let count = matching.len() as u64;
        for k in matching {
            if let Some(id) = current_index.remove(&k) {
                entries_by_id.remove(&id);
            }
        }
        Ok(count)
    }

    async fn entry_list_keys(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
        prefix: Option<&[u8]>,
    ) -> SwarmMemResult<Vec<LogicalKey>> {
        let current_index = self.current_index.read().unwrap();
        Ok(current_index
            .keys()
            .filter(|(_, ns, sid, pid)| ns == namespace && *sid == swarm_id && *pid == project_id)
            .filter(|(k, ..)| prefix.map(|p| k.starts_with(p)).unwrap_or(true))
            .map(|(k, ..)| k.clone())
            .collect())
    }

    async fn entry_touch_access(&self, entry_id: EntryId, at: Timestamp) -> SwarmMemResult<()> {
        let mut entries_by_id = self.entries_by_id.write().unwrap();
        if let Some(entry) = entries_by_id.get_mut(&entry_id) {
            entry.access_count += 1;
            entry.last_accessed_at = Some(at);
        }
        Ok(())
    }

    async fn entry_sweep_expired(&self, now: Timestamp, batch_size: usize) -> SwarmMemResult<u64> {
        let mut current_index = self.current_index.write().unwrap();
        let mut entries_by_id = self.entries_by_id.write().unwrap();

        let expired: Vec<_> = current_index
            .iter()
            .filter(|(_, id)| {
                entries_by_id
                    .get(id)
                    .map(|e| e.is_expired(now))
                    .unwrap_or(false)
            })
            .take(batch_size)
            .map(|(k, id)| (k.clone(), *id))
            .collect();

        let count = expired.len() as u64;
        for (k, id) in expired {
            current_index.remove(&k);
            entries_by_id.remove(&id);
        }
        Ok(count)
    }

    async fn entry_list_by_key_id(
        &self,
        key_id: KeyId,
        limit: usize,
    ) -> SwarmMemResult<Vec<EntryKey>> {
        let current_index = self.current_index.read().unwrap();
        let entries_by_id = self.entries_by_id.read().unwrap();
        Ok(current_index
            .iter()
            .filter(|(_, id)| {
                entries_by_id
                    .get(id)
                    .map(|e| e.key_id == Some(key_id))
                    .unwrap_or(false)
            })
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn stats(&self) -> SwarmMemResult<StorageStatistics> {
        let entries_by_id = self.entries_by_id.read().unwrap();
        let now = Utc::now();
        Ok(StorageStatistics {
            entry_count: entries_by_id.len() as u64,
            total_bytes: entries_by_id.values().map(|e| e.size_bytes).sum(),
            expired_pending_sweep: entries_by_id
                .values()
                .filter(|e| e.is_expired(now))
                .count() as u64,
        })
    }

    async fn permission_insert(&self, permission: Permission) -> SwarmMemResult<Permission> {
        self.permissions
            .write()
            .unwrap()
            .insert(permission.permission_id, permission.clone());
        Ok(permission)
    }

    async fn permission_list_for_entity(
        &self,
        entity: GrantedEntity,
    ) -> SwarmMemResult<Vec<Permission>> {
        Ok(self
            .permissions
            .read()
            .unwrap()
            .values()
            .filter(|p| p.entity == entity)
            .cloned()
            .collect())
    }

    async fn permission_revoke(&self, permission_id: PermissionId) -> SwarmMemResult<bool> {
        let mut permissions = self.permissions.write().unwrap();
        if let Some(p) = permissions.get_mut(&permission_id) {
            p.active = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn audit_append(&self, record: AuditRecord) -> SwarmMemResult<AuditId> {
        let id = record.audit_id;
        self.audit_log.write().unwrap().push(record);
        Ok(id)
    }

    async fn audit_list_for_actor(
        &self,
        actor_id: AgentId,
        limit: usize,
    ) -> SwarmMemResult<Vec<AuditRecord>> {
        Ok(self
            .audit_log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.actor_id == actor_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn key_insert(&self, key: EncryptionKey) -> SwarmMemResult<EncryptionKey> {
        self.keys.write().unwrap().insert(key.key_id, key.clone());
        Ok(key)
    }

    async fn key_get(&self, key_id: KeyId) -> SwarmMemResult<Option<EncryptionKey>> {
        Ok(self.keys.read().unwrap().get(&key_id).cloned())
    }

    async fn key_get_active(&self) -> SwarmMemResult<Option<EncryptionKey>> {
        Ok(self
            .keys
            .read()
            .unwrap()
            .values()
            .find(|k| k.status == KeyStatus::Active)
            .cloned())
    }

    async fn key_set_status(&self, key_id: KeyId, status: KeyStatus) -> SwarmMemResult<()> {
        let mut keys = self.keys.write().unwrap();
        let key = keys
            .get_mut(&key_id)
            .ok_or(StoreError::NotFound { entry_id: None })?;
        key.status = status;
        match status {
            KeyStatus::Active => key.activated_at = Some(Utc::now()),
            KeyStatus::Retired | KeyStatus::Compromised => key.retired_at = Some(Utc::now()),
        }
        Ok(())
    }

    async fn key_list(&self) -> SwarmMemResult<Vec<EncryptionKey>> {
        Ok(self.keys.read().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmmem_core::{
        compute_content_hash, ACLLevel, Compression, EncryptionMode, EntityIdType, MemoryKind,
    };

    fn sample_entry(key: &[u8], namespace: &str, swarm_id: SwarmId, version: u64) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            entry_id: EntryId::now_v7(),
            key: key.to_vec(),
            namespace: namespace.to_string(),
            value_blob: b"v".to_vec(),
            kind: MemoryKind::Data,
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
            version,
            parent_entry_id: None,
            ttl_seconds: None,
            expires_at: None,
            access_count: 0,
            last_accessed_at: None,
            size_bytes: 1,
            checksum: compute_content_hash(b"v"),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_current() {
        let storage = MockStorage::new();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(b"k", "default", swarm_id, 1);
        let key: EntryKey = (entry.key.clone(), entry.namespace.clone(), swarm_id, None);

        storage.entry_put(entry.clone()).await.unwrap();
        let fetched = storage.entry_get_current(&key).await.unwrap();
        assert_eq!(fetched.unwrap().entry_id, entry.entry_id);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let storage = MockStorage::new();
        let swarm_id = SwarmId::now_v7();
        let v1 = sample_entry(b"k", "default", swarm_id, 1);
        let v1_again = sample_entry(b"k", "default", swarm_id, 1);

        storage.entry_put(v1).await.unwrap();
        let result = storage.entry_put(v1_again).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = MockStorage::new();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(b"k", "default", swarm_id, 1);
        let key: EntryKey = (entry.key.clone(), entry.namespace.clone(), swarm_id, None);

        storage.entry_put(entry).await.unwrap();
        assert!(storage.entry_delete(&key).await.unwrap());
        assert!(!storage.entry_delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let storage = MockStorage::new();
        let swarm_id = SwarmId::now_v7();
        let e1 = sample_entry(b"cfg", "ns1", swarm_id, 1);
        let e2 = sample_entry(b"cfg", "ns2", swarm_id, 1);

        storage.entry_put(e1.clone()).await.unwrap();
        storage.entry_put(e2.clone()).await.unwrap();

        let k1: EntryKey = (b"cfg".to_vec(), "ns1".to_string(), swarm_id, None);
        let k2: EntryKey = (b"cfg".to_vec(), "ns2".to_string(), swarm_id, None);

        assert_eq!(
            storage
                .entry_get_current(&k1)
                .await
                .unwrap()
                .unwrap()
                .entry_id,
            e1.entry_id
        );
        assert_eq!(
            storage
                .entry_get_current(&k2)
                .await
                .unwrap()
                .unwrap()
                .entry_id,
            e2.entry_id
        );
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_expired() {
        let storage = MockStorage::new();
        let swarm_id = SwarmId::now_v7();
        let now = Utc::now();

        let mut expired = sample_entry(b"a", "default", swarm_id, 1);
        expired.expires_at = Some(now - chrono::Duration::seconds(1));
        let fresh = sample_entry(b"b", "default", swarm_id, 1);

        storage.entry_put(expired).await.unwrap();
        storage.entry_put(fresh.clone()).await.unwrap();

        let swept = storage.entry_sweep_expired(now, 10).await.unwrap();
        assert_eq!(swept, 1);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_active_key_lookup() {
        let storage = MockStorage::new();
        let key = EncryptionKey {
            key_id: KeyId::now_v7(),
            generation: 1,
            key_material_wrapped: vec![0u8; 32],
            algorithm: "aes-256-gcm".to_string(),
            created_at: Utc::now(),
            activated_at: None,
            retired_at: None,
            status: KeyStatus::Active,
        };
        storage.key_insert(key.clone()).await.unwrap();
        let active = storage.key_get_active().await.unwrap().unwrap();
        assert_eq!(active.key_id, key.key_id);
    }
}
