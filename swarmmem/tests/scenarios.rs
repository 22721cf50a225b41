//! End-to-end facade scenarios: cross-tenant denial, key rotation with a
//! forced re-encryption sweep, TTL expiry, and read-after-write cache
//! coherence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use swarmmem::{ActorContext, ClearScope, Freshness, SetOptions, SwarmMemory};
use swarmmem_core::{ACLLevel, Agent, AgentId, AgentRole, AgentStatus, KeyStatus, ProjectId, SwarmId, SwarmMemConfig};
use swarmmem_storage::{MockStorage, StorageTrait};

fn agent(swarm_id: SwarmId, role: AgentRole, project_id: Option<ProjectId>) -> Agent {
    let now = Utc::now();
    Agent {
        agent_id: AgentId::now_v7(),
        identifier: "a".to_string(),
        display_name: "A".to_string(),
        role,
        status: AgentStatus::Active,
        swarm_id,
        team_id: None,
        project_id,
        default_acl_level: ACLLevel::Private,
        created_at: now,
        updated_at: now,
    }
}

async fn memory_with(config: SwarmMemConfig) -> (SwarmMemory, Arc<dyn StorageTrait>) {
    let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
    let mem = SwarmMemory::new(storage.clone(), config, b"test-master-secret-do-not-use-in-prod")
        .await
        .unwrap();
    (mem, storage)
}

/// S2 — an agent in a different project than the entry's owner is denied
/// read access through the full facade, not just the bare ACL enforcer.
#[tokio::test]
async fn cross_project_read_denied_through_facade() {
    let (mem, _storage) = memory_with(SwarmMemConfig::default()).await;
    let swarm_id = SwarmId::now_v7();
    let project_a = ProjectId::now_v7();
    let project_b = ProjectId::now_v7();
    let owner = ActorContext::new(agent(swarm_id, AgentRole::Worker, Some(project_a)));
    let outsider = ActorContext::new(agent(swarm_id, AgentRole::Worker, Some(project_b)));

    mem.set(
        &owner,
        b"roadmap",
        b"q3 plan",
        SetOptions {
            acl_level: ACLLevel::Project,
            project_id: Some(project_a),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let result = mem.get(&outsider, "default", b"roadmap").await;
    assert!(result.is_err(), "cross-project read should be denied, got {:?}", result);
}

/// S4 — entries written under the pre-rotation key stay readable across a
/// rotation, and a forced re-encryption sweep eventually migrates them off
/// the retired key.
#[tokio::test]
async fn key_rotation_preserves_reads_and_sweep_migrates_entries() {
    let mut config = SwarmMemConfig::default();
    config.key_rotation_check_interval = Duration::from_millis(20);
    let (mem, storage) = memory_with(config).await;
    let swarm_id = SwarmId::now_v7();
    let ctx = ActorContext::new(agent(swarm_id, AgentRole::Coordinator, None));

    let keys_before = mem.list_keys().await.unwrap();
    let old_key_id = keys_before
        .iter()
        .find(|k| k.status == KeyStatus::Active)
        .unwrap()
        .key_id;

    for i in 0..20 {
        mem.set(
            &ctx,
            format!("entry-{i}").as_bytes(),
            b"payload under the old key",
            SetOptions {
                acl_level: ACLLevel::Private,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    mem.rotate_key(&ctx).await.unwrap();

    for i in 0..20 {
        let value = mem.get(&ctx, "default", format!("entry-{i}").as_bytes()).await.unwrap();
        assert_eq!(value, Some(b"payload under the old key".to_vec()));
    }

    mem.mark_compromised(&ctx, old_key_id).await.unwrap();

    // Let the reencrypt sweep (driven by key_rotation_check_interval) run
    // a few times.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let remaining_on_old_key = storage.entry_list_by_key_id(old_key_id, 100).await.unwrap();
    assert!(
        remaining_on_old_key.is_empty(),
        "expected the sweep to have migrated all entries off the compromised key"
    );

    for i in 0..20 {
        let value = mem.get(&ctx, "default", format!("entry-{i}").as_bytes()).await.unwrap();
        assert_eq!(value, Some(b"payload under the old key".to_vec()));
    }
}

/// S5 — the TTL sweep physically removes an expired row, not just hides it
/// from reads.
#[tokio::test]
async fn ttl_sweep_removes_expired_row() {
    let mut config = SwarmMemConfig::default();
    config.ttl_sweep_interval = Duration::from_millis(20);
    let (mem, storage) = memory_with(config).await;
    let swarm_id = SwarmId::now_v7();
    let ctx = ActorContext::new(agent(swarm_id, AgentRole::Worker, None));

    mem.setex(&ctx, b"short-lived", b"gone soon", 1, SetOptions::default())
        .await
        .unwrap();

    let entry_key: swarmmem_storage::EntryKey = (b"short-lived".to_vec(), "default".to_string(), swarm_id, None);
    assert!(storage.entry_get_current(&entry_key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(mem.get(&ctx, "default", b"short-lived").await.unwrap(), None);
    assert!(
        storage.entry_get_current(&entry_key).await.unwrap().is_none(),
        "ttl sweep should have deleted the row, not just hidden it at read time"
    );
}

/// S6 — a read issued right after an overwrite always observes the new
/// version, whether the cache is consulted under the consistent contract
/// or a zero-tolerance best-effort one.
#[tokio::test]
async fn cache_reflects_latest_write_after_overwrite() {
    let (mem, _storage) = memory_with(SwarmMemConfig::default()).await;
    let swarm_id = SwarmId::now_v7();
    let ctx = ActorContext::new(agent(swarm_id, AgentRole::Worker, None));

    mem.set(&ctx, b"counter", b"v1", SetOptions::default()).await.unwrap();
    // Warm the cache tier with v1.
    assert_eq!(mem.get(&ctx, "default", b"counter").await.unwrap(), Some(b"v1".to_vec()));

    mem.set(&ctx, b"counter", b"v2", SetOptions::default()).await.unwrap();

    let consistent = mem.get(&ctx, "default", b"counter").await.unwrap();
    assert_eq!(consistent, Some(b"v2".to_vec()));

    let best_effort = mem
        .get_with_freshness(&ctx, "default", b"counter", Freshness::best_effort(Duration::ZERO))
        .await
        .unwrap()
        .map(|read| read.into_value());
    assert_eq!(best_effort, Some(b"v2".to_vec()));
}

/// Sanity check that `ClearScope::Swarm` invalidates the cache but leaves a
/// coordinator able to immediately re-populate it, covering the `clear`
/// scope untouched by the other scenarios.
#[tokio::test]
async fn clear_swarm_scope_invalidates_then_allows_rewrite() {
    let (mem, _storage) = memory_with(SwarmMemConfig::default()).await;
    let swarm_id = SwarmId::now_v7();
    let ctx = ActorContext::new(agent(swarm_id, AgentRole::Coordinator, None));

    mem.set(&ctx, b"k", b"v1", SetOptions::default()).await.unwrap();
    mem.clear(&ctx, ClearScope::Swarm).await.unwrap();
    mem.set(&ctx, b"k", b"v2", SetOptions::default()).await.unwrap();

    assert_eq!(mem.get(&ctx, "default", b"k").await.unwrap(), Some(b"v2".to_vec()));
}
