//! Maintenance tasks spawned alongside a `SwarmMemory`: TTL expiry sweep,
//! scheduled key rotation, and forced re-encryption after a key leaves
//! `Active` status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use swarmmem_core::{EncryptionMode, KeyId, KeyStatus, RotationCause, SwarmMemResult};
use swarmmem_storage::cache::{ChangeJournal, InMemoryChangeJournal, MultiLayerCache};
use swarmmem_storage::crypto::KeyManager;
use swarmmem_storage::StorageTrait;

use crate::events::SwarmEvent;
use crate::l2::L2Backend;
use crate::metrics::AtomicCounters;

pub fn spawn_ttl_sweep(
    storage: Arc<dyn StorageTrait>,
    counters: Arc<AtomicCounters>,
    interval: Duration,
    batch_size: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match storage.entry_sweep_expired(Utc::now(), batch_size).await {
                        Ok(removed) => {
                            counters.ttl_sweeps.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            counters
                                .entries_swept
                                .fetch_add(removed, std::sync::atomic::Ordering::Relaxed);
                            if removed > 0 {
                                debug!(removed, "ttl sweep removed expired entries");
                            }
                        }
                        Err(err) => error!(error = %err, "ttl sweep failed"),
                    }
                }
            }
        }
    })
}

pub fn spawn_key_rotation_check(
    keys: Arc<KeyManager>,
    counters: Arc<AtomicCounters>,
    events: broadcast::Sender<SwarmEvent>,
    check_interval: Duration,
    rotation_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = check_and_rotate(&keys, &counters, &events, rotation_interval).await {
                        error!(error = %err, "key rotation check failed");
                    }
                }
            }
        }
    })
}

async fn check_and_rotate(
    keys: &Arc<KeyManager>,
    counters: &Arc<AtomicCounters>,
    events: &broadcast::Sender<SwarmEvent>,
    rotation_interval: Duration,
) -> SwarmMemResult<()> {
    let active = keys.list_keys().await?.into_iter().find(|k| k.status == KeyStatus::Active);
    let Some(active) = active else {
        return Ok(());
    };
    let age = Utc::now().signed_duration_since(active.created_at);
    if age.to_std().unwrap_or_default() < rotation_interval {
        return Ok(());
    }
    let actor = swarmmem_core::AgentId::nil();
    let new_key_id = keys.rotate(RotationCause::Scheduled, actor).await?;
    counters.key_rotations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    info!(key_id = %new_key_id, "scheduled key rotation completed");
    let _ = events.send(SwarmEvent::KeyRotated {
        key_id: new_key_id,
        cause: RotationCause::Scheduled,
    });
    Ok(())
}

pub fn spawn_reencrypt_sweep(
    storage: Arc<dyn StorageTrait>,
    keys: Arc<KeyManager>,
    cache: Arc<MultiLayerCache<L2Backend, InMemoryChangeJournal>>,
    journal: Arc<InMemoryChangeJournal>,
    interval: Duration,
    batch_size: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) =
                        reencrypt_pending(&storage, &keys, &cache, &journal, batch_size).await
                    {
                        error!(error = %err, "re-encryption sweep failed");
                    }
                }
            }
        }
    })
}

async fn reencrypt_pending(
    storage: &Arc<dyn StorageTrait>,
    keys: &Arc<KeyManager>,
    cache: &Arc<MultiLayerCache<L2Backend, InMemoryChangeJournal>>,
    journal: &Arc<InMemoryChangeJournal>,
    batch_size: usize,
) -> SwarmMemResult<()> {
    let stale_keys: Vec<KeyId> = keys
        .list_keys()
        .await?
        .into_iter()
        .filter(|k| k.status != KeyStatus::Active)
        .map(|k| k.key_id)
        .collect();

    for key_id in stale_keys {
        let migrated = reencrypt_pass(storage, keys, cache, journal, key_id, batch_size).await?;
        if migrated > 0 {
            debug!(key_id = %key_id, migrated, "re-encryption sweep migrated entries");
        }
    }
    Ok(())
}

/// Move up to `batch_size` entries still encrypted under `key_id` onto the
/// currently active key. Each migration is inserted as a new version row;
/// the cache entry for the logical key is invalidated so the next read
/// picks up the new ciphertext.
async fn reencrypt_pass(
    storage: &Arc<dyn StorageTrait>,
    keys: &Arc<KeyManager>,
    cache: &Arc<MultiLayerCache<L2Backend, InMemoryChangeJournal>>,
    journal: &Arc<InMemoryChangeJournal>,
    key_id: KeyId,
    batch_size: usize,
) -> SwarmMemResult<u64> {
    let targets = storage.entry_list_by_key_id(key_id, batch_size).await?;
    let mut migrated = 0u64;

    for target in targets {
        let Some(entry) = storage.entry_get_current(&target).await? else {
            continue;
        };
        if entry.encryption != EncryptionMode::Aead {
            continue;
        }
        let (Some(iv), Some(tag), Some(old_key_id)) = (entry.iv, entry.tag, entry.key_id) else {
            continue;
        };

        let payload = keys.reencrypt(old_key_id, &iv, &entry.value_blob, &tag).await?;

        let mut next = entry.clone();
        next.key_id = Some(payload.key_id);
        next.iv = Some(payload.iv);
        next.tag = Some(payload.tag);
        next.value_blob = payload.ciphertext;
        next.version += 1;
        next.updated_at = Utc::now();

        let swarm_id = next.swarm_id;
        let namespace = next.namespace.clone();
        let logical_key = next.key.clone();

        storage.entry_put(next).await?;
        cache.delete(swarm_id, &namespace, &logical_key).await?;
        journal.record_change(swarm_id).await?;
        migrated += 1;
    }

    Ok(migrated)
}
