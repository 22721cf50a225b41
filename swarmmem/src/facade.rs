//! The public entry point: a namespaced, ACL-enforced, encrypted,
//! three-tier-cached key/value store scoped to a swarm.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use swarmmem_acl::{AclEnforcer, Decision, RequestContext};
use swarmmem_core::{
    ACLLevel, Action, ActionSet, Agent, AgentId, AgentRole, AuditRecord, DenyReason, EncryptionKey,
    EntityIdType, EntryId, GrantedEntity, KeyId, Permission, PermissionConditions, PermissionId,
    ProjectId, RotationCause, StoreError, SwarmMemConfig, SwarmMemError, SwarmMemResult, Timestamp,
};
use swarmmem_storage::cache::{
    CacheConfig, CacheRead, ChangeJournal, Freshness, InMemoryChangeJournal, MemoryCacheKey,
    MultiLayerCache,
};
use swarmmem_storage::crypto::KeyManager;
use swarmmem_storage::sqlite::SqliteStorage;
use swarmmem_storage::{EntryKey, StorageTrait};

use crate::actor::ActorContext;
use crate::background::{spawn_key_rotation_check, spawn_reencrypt_sweep, spawn_ttl_sweep};
use crate::events::SwarmEvent;
use crate::l2::L2Backend;
use crate::metrics::{AtomicCounters, MetricsSnapshot};
use crate::options::{ClearScope, SetOptions};
use crate::seal::{seal, unseal};

const DEFAULT_L2_MAX_SIZE_MB: usize = 256;

fn resource_label(entry_id: EntryId) -> String {
    format!("memory_entry:{}", entry_id.as_uuid())
}

/// A namespaced, encrypted, ACL-enforced memory store for a single process.
/// Every operation runs under an [`ActorContext`] and is scoped to that
/// actor's swarm.
pub struct SwarmMemory {
    storage: Arc<dyn StorageTrait>,
    cache: Arc<MultiLayerCache<L2Backend, InMemoryChangeJournal>>,
    journal: Arc<InMemoryChangeJournal>,
    acl: Arc<AclEnforcer>,
    keys: Arc<KeyManager>,
    events: broadcast::Sender<SwarmEvent>,
    counters: Arc<AtomicCounters>,
    config: SwarmMemConfig,
    key_locks: StdMutex<HashMap<[u8; 41], Arc<AsyncMutex<()>>>>,
    cancel: CancellationToken,
    background: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl SwarmMemory {
    /// Wire a `SwarmMemory` on top of an already-open storage backend.
    /// Opens or bootstraps the active encryption key, builds the cache and
    /// ACL layers from `config`, and spawns the maintenance tasks.
    pub async fn new(
        storage: Arc<dyn StorageTrait>,
        config: SwarmMemConfig,
        master_secret: &[u8],
    ) -> SwarmMemResult<Self> {
        let keys = Arc::new(KeyManager::new(master_secret, storage.clone())?);
        keys.bootstrap().await?;

        let l2_backend = match &config.l2_lmdb_path {
            Some(path) => {
                L2Backend::Lmdb(swarmmem_storage::cache::LmdbCacheBackend::new(
                    path,
                    DEFAULT_L2_MAX_SIZE_MB,
                )?)
            }
            None => L2Backend::Disabled,
        };
        let journal = Arc::new(InMemoryChangeJournal::default());
        let cache_config = CacheConfig::new()
            .with_l1_max_entries(config.l1_max_entries)
            .with_l1_max_bytes(config.l1_max_bytes)
            .with_max_staleness(config.l2_ttl);
        let cache = Arc::new(MultiLayerCache::new(
            Arc::new(l2_backend),
            journal.clone(),
            cache_config,
        ));

        let acl = Arc::new(AclEnforcer::new(
            storage.clone(),
            config.acl_cache_capacity,
            config.acl_cache_ttl,
        ));

        let (events, _) = broadcast::channel(1024);
        let counters = Arc::new(AtomicCounters::default());
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        handles.push(spawn_ttl_sweep(
            storage.clone(),
            counters.clone(),
            config.ttl_sweep_interval,
            config.ttl_sweep_batch_size,
            cancel.clone(),
        ));
        handles.push(spawn_key_rotation_check(
            keys.clone(),
            counters.clone(),
            events.clone(),
            config.key_rotation_check_interval,
            config.key_rotation_interval,
            cancel.clone(),
        ));
        handles.push(spawn_reencrypt_sweep(
            storage.clone(),
            keys.clone(),
            cache.clone(),
            journal.clone(),
            config.key_rotation_check_interval,
            config.reencrypt_batch_size,
            cancel.clone(),
        ));

        info!("swarm memory engine initialized");

        Ok(Self {
            storage,
            cache,
            journal,
            acl,
            keys,
            events,
            counters,
            config,
            key_locks: StdMutex::new(HashMap::new()),
            cancel,
            background: AsyncMutex::new(handles),
        })
    }

    /// Open the SQLite-backed store from `config.db_path` and wire a
    /// `SwarmMemory` on top of it.
    pub async fn initialize(config: SwarmMemConfig, master_secret: &[u8]) -> SwarmMemResult<Self> {
        let storage: Arc<dyn StorageTrait> = Arc::new(SqliteStorage::open(
            &config.db_path,
            config.busy_timeout,
            config.reader_pool_size,
        )?);
        Self::new(storage, config, master_secret).await
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut handles = self.background.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    fn request_ctx(&self, ctx: &ActorContext) -> RequestContext {
        RequestContext {
            source_ip: ctx.source_ip,
        }
    }

    fn deny_err(&self, decision: Decision, actor: &Agent, entry_id: EntryId, action: Action) -> SwarmMemResult<()> {
        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                self.counters.acl_denials.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(SwarmEvent::AccessDenied {
                    agent_id: actor.agent_id,
                    resource: resource_label(entry_id),
                    reason,
                });
                Err(swarmmem_core::AclError::Denied {
                    agent_id: actor.agent_id,
                    action: action.to_string(),
                    resource: resource_label(entry_id),
                    reason,
                }
                .into())
            }
        }
    }

    fn privilege_denied(&self, actor: &Agent, reason: DenyReason) -> SwarmMemError {
        swarmmem_core::AclError::Denied {
            agent_id: actor.agent_id,
            action: Action::Admin.to_string(),
            resource: "swarm:admin".to_string(),
            reason,
        }
        .into()
    }

    /// Gate for operations that are not scoped to a single entry (clear,
    /// grant/revoke, key rotation, audit trail): the actor must be active
    /// and not a plain `Worker`.
    fn require_privileged(&self, actor: &Agent) -> SwarmMemResult<()> {
        if !actor.status.is_active() {
            return Err(self.privilege_denied(actor, DenyReason::InactiveActor));
        }
        if actor.role == AgentRole::Worker {
            return Err(self.privilege_denied(actor, DenyReason::InsufficientLevel));
        }
        Ok(())
    }

    fn key_lock(&self, cache_key: [u8; 41]) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().expect("key lock map poisoned");
        locks
            .entry(cache_key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn entry_key(&self, ctx: &ActorContext, namespace: &str, key: &[u8]) -> EntryKey {
        (key.to_vec(), namespace.to_string(), ctx.agent.swarm_id, None)
    }

    /// Read the current value for `key`, demanding journal-verified
    /// freshness. Returns `None` if the entry does not exist, is expired,
    /// or the actor is denied read access.
    pub async fn get(
        &self,
        ctx: &ActorContext,
        namespace: &str,
        key: &[u8],
    ) -> SwarmMemResult<Option<Vec<u8>>> {
        Ok(self
            .get_with_freshness(ctx, namespace, key, Freshness::Consistent)
            .await?
            .map(CacheRead::into_value))
    }

    /// Read with an explicit staleness waiver, returning freshness
    /// metadata alongside the decrypted plaintext.
    pub async fn get_with_freshness(
        &self,
        ctx: &ActorContext,
        namespace: &str,
        key: &[u8],
        freshness: Freshness,
    ) -> SwarmMemResult<Option<CacheRead<Vec<u8>>>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();

        let read = self
            .cache
            .get(ctx.agent.swarm_id, namespace, key, freshness, self.storage.as_ref())
            .await?;
        let Some(read) = read else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        if read.was_cache_hit() {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let was_hit = read.was_cache_hit();
        let cached_at = read.cached_at();
        let entry = read.into_value();

        if entry.is_expired(now) {
            return Ok(None);
        }

        let decision = self
            .acl
            .evaluate(&ctx.agent, &entry, Action::Read, now, self.request_ctx(ctx))
            .await?;
        self.deny_err(decision, &ctx.agent, entry.entry_id, Action::Read)?;

        let _ = self.storage.entry_touch_access(entry.entry_id, now).await;

        let plaintext = unseal(
            &entry.value_blob,
            entry.compression,
            entry.encryption,
            entry.iv.as_ref(),
            entry.tag.as_ref(),
            entry.key_id,
            entry.checksum,
            entry.entry_id,
            &self.keys,
        )
        .await?;

        Ok(Some(if was_hit {
            CacheRead::from_cache(plaintext, cached_at, None)
        } else {
            CacheRead::from_storage(plaintext, None)
        }))
    }

    /// Write `value` under `key`, creating a new version. If an entry
    /// already exists for this logical key the actor must hold write
    /// access to it.
    pub async fn set(
        &self,
        ctx: &ActorContext,
        key: &[u8],
        value: &[u8],
        opts: SetOptions,
    ) -> SwarmMemResult<EntryId> {
        let now = Utc::now();
        if key.len() + opts.namespace.len() > self.config.max_key_namespace_bytes {
            return Err(StoreError::InvalidInput {
                reason: "key plus namespace exceeds configured limit".to_string(),
            }
            .into());
        }

        let entry_key = self.entry_key(ctx, &opts.namespace, key);
        let existing = self.storage.entry_get_current(&entry_key).await?;

        if let Some(existing) = &existing {
            let decision = self
                .acl
                .evaluate(&ctx.agent, existing, Action::Write, now, self.request_ctx(ctx))
                .await?;
            self.deny_err(decision, &ctx.agent, existing.entry_id, Action::Write)?;
        }

        let sealed = seal(
            value,
            self.config.compression_threshold_bytes,
            opts.kind,
            opts.acl_level,
            &self.keys,
        )
        .await?;
        let expires_at = opts
            .ttl
            .map(|secs| now + chrono::Duration::seconds(secs as i64));

        let entry = swarmmem_core::MemoryEntry {
            entry_id: EntryId::now_v7(),
            key: key.to_vec(),
            namespace: opts.namespace.clone(),
            value_blob: sealed.value_blob,
            kind: opts.kind,
            agent_id: ctx.agent.agent_id,
            team_id: opts.team_id,
            project_id: opts.project_id,
            swarm_id: ctx.agent.swarm_id,
            acl_level: opts.acl_level,
            compression: sealed.compression,
            encryption: sealed.encryption,
            iv: sealed.iv,
            tag: sealed.tag,
            key_id: sealed.key_id,
            version: existing.as_ref().map(|e| e.version + 1).unwrap_or(1),
            parent_entry_id: existing.as_ref().map(|e| e.entry_id),
            ttl_seconds: opts.ttl,
            expires_at,
            access_count: 0,
            last_accessed_at: None,
            size_bytes: sealed.size_bytes,
            checksum: sealed.checksum,
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };

        let stored = self.storage.entry_put(entry).await?;

        if opts.write_through {
            self.cache.put(&stored).await?;
        } else {
            self.cache.put_write_around(&stored).await;
        }
        self.journal.record_change(stored.swarm_id).await?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(SwarmEvent::EntrySet {
            entry_id: stored.entry_id,
            swarm_id: stored.swarm_id,
            namespace: stored.namespace.clone(),
            key: stored.key.clone(),
        });

        Ok(stored.entry_id)
    }

    /// `set` with an explicit TTL, written around L2 (short-lived entries
    /// don't displace longer-lived neighbors from the shared cache tier).
    pub async fn setex(
        &self,
        ctx: &ActorContext,
        key: &[u8],
        value: &[u8],
        ttl_seconds: u64,
        mut opts: SetOptions,
    ) -> SwarmMemResult<EntryId> {
        opts.ttl = Some(ttl_seconds);
        opts.write_through = false;
        self.set(ctx, key, value, opts).await
    }

    /// Delete the current version of `key`. Returns `false` if no entry
    /// existed.
    pub async fn delete(&self, ctx: &ActorContext, namespace: &str, key: &[u8]) -> SwarmMemResult<bool> {
        let now = Utc::now();
        let entry_key = self.entry_key(ctx, namespace, key);
        let Some(existing) = self.storage.entry_get_current(&entry_key).await? else {
            return Ok(false);
        };

        let decision = self
            .acl
            .evaluate(&ctx.agent, &existing, Action::Delete, now, self.request_ctx(ctx))
            .await?;
        self.deny_err(decision, &ctx.agent, existing.entry_id, Action::Delete)?;

        let removed = self.storage.entry_delete(&entry_key).await?;
        if removed {
            self.cache.delete(ctx.agent.swarm_id, namespace, key).await?;
            self.journal.record_change(ctx.agent.swarm_id).await?;
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.send(SwarmEvent::EntryDeleted {
                swarm_id: ctx.agent.swarm_id,
                namespace: namespace.to_string(),
                key: key.to_vec(),
            });
        }
        Ok(removed)
    }

    /// Whether `key` exists, is unexpired, and is readable by the actor.
    pub async fn has(&self, ctx: &ActorContext, namespace: &str, key: &[u8]) -> SwarmMemResult<bool> {
        Ok(self.get(ctx, namespace, key).await?.is_some())
    }

    /// Clear an entire namespace or invalidate the swarm's cached entries.
    /// Requires a privileged actor.
    pub async fn clear(&self, ctx: &ActorContext, scope: ClearScope) -> SwarmMemResult<u64> {
        self.require_privileged(&ctx.agent)?;
        match scope {
            ClearScope::Namespace(namespace) => {
                let removed = self
                    .storage
                    .entry_clear_namespace(&namespace, ctx.agent.swarm_id, None)
                    .await?;
                self.cache
                    .invalidate_namespace(ctx.agent.swarm_id, &namespace)
                    .await?;
                self.journal.record_change(ctx.agent.swarm_id).await?;
                let _ = self.events.send(SwarmEvent::NamespaceCleared {
                    swarm_id: ctx.agent.swarm_id,
                    namespace,
                    removed,
                });
                Ok(removed)
            }
            ClearScope::Swarm => {
                let removed = self.cache.invalidate_swarm(ctx.agent.swarm_id).await?;
                self.journal.record_change(ctx.agent.swarm_id).await?;
                let _ = self
                    .events
                    .send(SwarmEvent::SwarmCleared { swarm_id: ctx.agent.swarm_id });
                Ok(removed)
            }
        }
    }

    /// List logical keys in a namespace, optionally filtered by prefix.
    /// Scoped to the actor's own swarm; per-entry ACL is not re-checked
    /// here, only swarm isolation (the store's own addressing boundary).
    pub async fn keys(
        &self,
        ctx: &ActorContext,
        namespace: &str,
        prefix: Option<&[u8]>,
    ) -> SwarmMemResult<Vec<Vec<u8>>> {
        self.storage
            .entry_list_keys(namespace, ctx.agent.swarm_id, None, prefix)
            .await
    }

    pub async fn mget(
        &self,
        ctx: &ActorContext,
        namespace: &str,
        keys: &[Vec<u8>],
    ) -> SwarmMemResult<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(ctx, namespace, key).await?);
        }
        Ok(out)
    }

    pub async fn mset(
        &self,
        ctx: &ActorContext,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        opts: SetOptions,
    ) -> SwarmMemResult<Vec<EntryId>> {
        let mut ids = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            ids.push(self.set(ctx, &key, &value, opts.clone()).await?);
        }
        Ok(ids)
    }

    async fn incr_by(
        &self,
        ctx: &ActorContext,
        namespace: &str,
        key: &[u8],
        delta: i64,
    ) -> SwarmMemResult<i64> {
        let cache_key = MemoryCacheKey::new(ctx.agent.swarm_id, namespace, key).encode();
        let lock = self.key_lock(cache_key);
        let _guard = lock.lock().await;

        let current = match self.get(ctx, namespace, key).await? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| StoreError::InvalidInput {
                    reason: "existing value is not a valid integer counter".to_string(),
                })?,
            None => 0,
        };
        let next = current + delta;
        self.set(
            ctx,
            key,
            next.to_string().as_bytes(),
            SetOptions {
                namespace: namespace.to_string(),
                ..Default::default()
            },
        )
        .await?;
        Ok(next)
    }

    /// Atomically increment an integer counter stored at `key`, creating
    /// it at `1` if absent. Serialized per logical key via an in-process
    /// lock keyed on the same 41-byte cache key used by the L2 tier.
    pub async fn incr(&self, ctx: &ActorContext, namespace: &str, key: &[u8]) -> SwarmMemResult<i64> {
        self.incr_by(ctx, namespace, key, 1).await
    }

    pub async fn decr(&self, ctx: &ActorContext, namespace: &str, key: &[u8]) -> SwarmMemResult<i64> {
        self.incr_by(ctx, namespace, key, -1).await
    }

    /// Grant a permission to an entity. Requires a privileged actor.
    #[allow(clippy::too_many_arguments)]
    pub async fn grant_permission(
        &self,
        ctx: &ActorContext,
        entity: GrantedEntity,
        resource_type: &str,
        resource_id: Option<String>,
        level: ACLLevel,
        actions: ActionSet,
        project_id: Option<ProjectId>,
        conditions: Option<PermissionConditions>,
        expires_at: Option<Timestamp>,
    ) -> SwarmMemResult<PermissionId> {
        self.require_privileged(&ctx.agent)?;
        let permission = Permission {
            permission_id: PermissionId::now_v7(),
            entity,
            resource_type: resource_type.to_string(),
            resource_id,
            project_id,
            level,
            actions,
            conditions,
            granted_by: ctx.agent.agent_id,
            expires_at,
            active: true,
            created_at: Utc::now(),
        };
        let stored = self.storage.permission_insert(permission).await?;
        let _ = self.events.send(SwarmEvent::PermissionGranted {
            permission_id: stored.permission_id,
            entity: stored.entity,
        });
        Ok(stored.permission_id)
    }

    /// Revoke a permission grant. Requires a privileged actor.
    pub async fn revoke_permission(
        &self,
        ctx: &ActorContext,
        permission_id: PermissionId,
    ) -> SwarmMemResult<bool> {
        self.require_privileged(&ctx.agent)?;
        let revoked = self.storage.permission_revoke(permission_id).await?;
        if revoked {
            let _ = self
                .events
                .send(SwarmEvent::PermissionRevoked { permission_id });
        }
        Ok(revoked)
    }

    /// Manually rotate the active encryption key. Requires a privileged
    /// actor.
    pub async fn rotate_key(&self, ctx: &ActorContext) -> SwarmMemResult<KeyId> {
        self.require_privileged(&ctx.agent)?;
        let key_id = self.keys.rotate(RotationCause::Manual, ctx.agent.agent_id).await?;
        self.counters.key_rotations.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(SwarmEvent::KeyRotated {
            key_id,
            cause: RotationCause::Manual,
        });
        Ok(key_id)
    }

    /// Mark a key compromised without rotating, e.g. a retired key found
    /// leaked after the active key already moved on. Requires a
    /// privileged actor.
    pub async fn mark_compromised(&self, ctx: &ActorContext, key_id: KeyId) -> SwarmMemResult<()> {
        self.require_privileged(&ctx.agent)?;
        self.keys.mark_compromised(key_id).await?;
        let _ = self.events.send(SwarmEvent::KeyCompromised { key_id });
        Ok(())
    }

    pub async fn list_keys(&self) -> SwarmMemResult<Vec<EncryptionKey>> {
        self.keys.list_keys().await
    }

    /// A merged snapshot of facade, ACL, and store counters.
    pub async fn metrics(&self) -> SwarmMemResult<MetricsSnapshot> {
        let mut snapshot = self.counters.snapshot();
        let (evaluations, denials, cache_hits, cache_misses) = self.acl.counters().snapshot();
        snapshot.acl_evaluations = evaluations;
        snapshot.acl_denials = denials;
        snapshot.acl_cache_hits = cache_hits;
        snapshot.acl_cache_misses = cache_misses;

        let stats = self.storage.stats().await?;
        snapshot.entry_count = stats.entry_count;
        snapshot.total_bytes = stats.total_bytes;
        snapshot.expired_pending_sweep = stats.expired_pending_sweep;

        Ok(snapshot)
    }

    /// Audit records for a single actor. Requires a privileged actor.
    pub async fn audit_trail(
        &self,
        ctx: &ActorContext,
        actor_id: AgentId,
        limit: usize,
    ) -> SwarmMemResult<Vec<AuditRecord>> {
        self.require_privileged(&ctx.agent)?;
        self.storage.audit_list_for_actor(actor_id, limit).await
    }
}
