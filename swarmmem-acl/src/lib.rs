//! Six-level ACL enforcer: evaluates `allow`/`deny` for `(actor, resource,
//! action)` against entry attributes and explicit permission grants, with
//! a decision cache and audit-record emission.
//!
//! Evaluation order: inactive-actor rejection, decision cache, the level
//! ladder (`ACLLevel::Private` through `ACLLevel::System`), explicit
//! permission grants, default deny.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use lru::LruCache;
use std::sync::Arc;

use swarmmem_core::{
    ACLCacheRecord, ACLLevel, Action, Agent, AgentId, AgentRole, AgentStatus, AuditId,
    AuditRecord, DenyReason, EntityIdType, EntryId, GrantedEntity, MemoryEntry, Permission,
    SwarmMemResult, Timestamp,
};
use swarmmem_storage::StorageTrait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Outcome of an ACL evaluation. Deny is never modeled as an error: callers
/// branch on `Decision`, reserving `SwarmMemError` for failures to even
/// complete the evaluation (e.g. a storage error fetching grants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny(_))
    }
}

/// Result of consulting the level ladder before falling through to
/// explicit grants.
enum LadderOutcome {
    Decided(Decision),
    Fallthrough { attributes_matched: bool },
}

/// Emitted whenever an evaluation denies a request.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    pub actor_id: AgentId,
    pub resource: String,
    pub action: Action,
    pub reason: DenyReason,
}

/// Additional request context beyond actor/entry/action: used for
/// condition matching (`time_window`, `days_of_week`, `source_cidr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    pub source_ip: Option<IpAddr>,
}

#[derive(Debug, Default)]
pub struct AclCounters {
    pub evaluations: AtomicU64,
    pub denials: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl AclCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.evaluations.load(Ordering::Relaxed),
            self.denials.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }
}

/// The resource identifier an ACL decision is cached/audited against:
/// the logical entry id and, redundantly, a human-readable string for
/// audit records and explicit grant resource matching.
fn resource_label(entry_id: EntryId) -> String {
    format!("memory_entry:{}", entry_id.as_uuid())
}

/// Six-level ACL enforcer.
pub struct AclEnforcer {
    storage: Arc<dyn StorageTrait>,
    cache: Mutex<LruCache<(AgentId, EntryId, Action), ACLCacheRecord>>,
    cache_ttl: Duration,
    counters: AclCounters,
    denials: broadcast::Sender<AccessDenied>,
}

impl AclEnforcer {
    pub fn new(storage: Arc<dyn StorageTrait>, cache_capacity: usize, cache_ttl: Duration) -> Self {
        let (denials, _) = broadcast::channel(256);
        Self {
            storage,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_capacity.max(1)).unwrap())),
            cache_ttl,
            counters: AclCounters::default(),
            denials,
        }
    }

    pub fn with_defaults(storage: Arc<dyn StorageTrait>) -> Self {
        Self::new(storage, 10_000, Duration::from_secs(300))
    }

    pub fn counters(&self) -> &AclCounters {
        &self.counters
    }

    pub fn subscribe_denials(&self) -> broadcast::Receiver<AccessDenied> {
        self.denials.subscribe()
    }

    /// Decide `allow`/`deny` for `actor` performing `action` against `entry`.
    pub async fn evaluate(
        &self,
        actor: &Agent,
        entry: &MemoryEntry,
        action: Action,
        now: Timestamp,
        ctx: RequestContext,
    ) -> SwarmMemResult<Decision> {
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);

        let is_system_path = entry.acl_level == ACLLevel::System && actor.role == AgentRole::System;
        if actor.status != AgentStatus::Active && !is_system_path {
            return self
                .finish(actor, entry, action, Decision::Deny(DenyReason::InactiveActor), false)
                .await;
        }

        let cache_key = (actor.agent_id, entry.entry_id, action);
        if action == Action::Read {
            if let Some(record) = self.cache.lock().unwrap().get(&cache_key).cloned() {
                if record.is_fresh(now) {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(agent_id = %actor.agent_id, "acl cache hit");
                    return Ok(if record.allow {
                        Decision::Allow
                    } else {
                        // The specific deny reason isn't retained by
                        // ACLCacheRecord; re-derive it from the ladder so
                        // callers still get a typed reason on a cache hit.
                        self.ladder_deny_reason(actor, entry)
                    });
                }
            }
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        match self.evaluate_ladder(actor, entry, action) {
            LadderOutcome::Decided(decision) => {
                return self.finish(actor, entry, action, decision, true).await;
            }
            LadderOutcome::Fallthrough { attributes_matched } => {
                let (mut decision, time_sensitive) =
                    self.evaluate_grants(actor, entry, action, now, ctx).await?;
                // A grant can still override a ladder mismatch (or the
                // not-yet-escalated-to-Admin case); only when grants come
                // back empty does the ladder's own mismatch reason apply.
                if !attributes_matched && decision == Decision::Deny(DenyReason::NoGrant) {
                    decision = self.ladder_deny_reason(actor, entry);
                }
                return self
                    .finish(actor, entry, action, decision, action == Action::Read && !time_sensitive)
                    .await;
            }
        }
    }

    /// The level-ladder rule. Returns `Decided` when the ladder itself
    /// settles the decision (allow or a definitive deny); `Fallthrough`
    /// means "consult explicit grants next", carrying whether the entry's
    /// own attributes (team/swarm/project/owner) matched the actor's so a
    /// later grant-less deny can report the precise mismatch reason instead
    /// of a generic `NoGrant`.
    fn evaluate_ladder(&self, actor: &Agent, entry: &MemoryEntry, action: Action) -> LadderOutcome {
        let is_owner = entry.agent_id == actor.agent_id;
        let matched = match entry.acl_level {
            ACLLevel::Private => is_owner,
            ACLLevel::Team => entry.team_id.is_some() && entry.team_id == actor.team_id,
            ACLLevel::Swarm => entry.swarm_id == actor.swarm_id,
            ACLLevel::Project => entry.project_id.is_some() && entry.project_id == actor.project_id,
            ACLLevel::Public => actor.status == AgentStatus::Active,
            ACLLevel::System => actor.role == AgentRole::System,
        };

        if !matched {
            return LadderOutcome::Fallthrough { attributes_matched: false };
        }

        // Ladder match alone grants read everywhere. Write/delete beyond
        // the creator requires level >= the entry's own level via an
        // explicit grant; only the creator gets default write/delete.
        match action {
            Action::Read => LadderOutcome::Decided(Decision::Allow),
            Action::Write | Action::Delete if is_owner => LadderOutcome::Decided(Decision::Allow),
            Action::Admin if entry.acl_level == ACLLevel::System => {
                LadderOutcome::Decided(Decision::Allow)
            }
            _ => LadderOutcome::Fallthrough { attributes_matched: true },
        }
    }

    /// What the ladder would have denied with, used both for the default
    /// deny path and to re-derive a reason on a cached deny hit.
    fn ladder_deny_reason(&self, actor: &Agent, entry: &MemoryEntry) -> Decision {
        let reason = match entry.acl_level {
            ACLLevel::Private if entry.agent_id != actor.agent_id => DenyReason::NotOwner,
            ACLLevel::Team => DenyReason::TeamMismatch,
            ACLLevel::Swarm => DenyReason::SwarmMismatch,
            ACLLevel::Project => DenyReason::ProjectMismatch,
            ACLLevel::System => DenyReason::InsufficientLevel,
            _ => DenyReason::NoGrant,
        };
        Decision::Deny(reason)
    }

    /// Explicit permission grants. Returns the decision and whether any
    /// condition it depended on was time-sensitive (forcing cache bypass).
    async fn evaluate_grants(
        &self,
        actor: &Agent,
        entry: &MemoryEntry,
        action: Action,
        now: Timestamp,
        ctx: RequestContext,
    ) -> SwarmMemResult<(Decision, bool)> {
        let mut candidate_entities = vec![GrantedEntity::Agent(actor.agent_id)];
        if let Some(team_id) = actor.team_id {
            candidate_entities.push(GrantedEntity::Team(team_id));
        }
        candidate_entities.push(GrantedEntity::Swarm(actor.swarm_id));
        if let Some(project_id) = actor.project_id {
            candidate_entities.push(GrantedEntity::Project(project_id));
        }

        let resource = resource_label(entry.entry_id);
        let mut time_sensitive = false;

        for entity in candidate_entities {
            let grants = self.storage.permission_list_for_entity(entity).await?;
            for grant in grants {
                if !grant.is_usable(now) {
                    continue;
                }
                if let Some(resource_id) = &grant.resource_id {
                    if resource_id != &resource {
                        continue;
                    }
                }
                if grant.level < entry.acl_level {
                    continue;
                }
                if !grant.actions.contains(&action) {
                    continue;
                }
                if let Some(conditions) = &grant.conditions {
                    time_sensitive |= conditions.is_time_sensitive();
                    if let Some((start, end)) = conditions.time_window {
                        let minute_of_day = now.hour() * 60 + now.minute();
                        if minute_of_day < start as u32 || minute_of_day > end as u32 {
                            continue;
                        }
                    }
                    if let Some(days) = &conditions.days_of_week {
                        if !days.contains(&now.weekday()) {
                            continue;
                        }
                    }
                    if let Some(cidr) = &conditions.source_cidr {
                        if !source_matches_cidr(ctx.source_ip, cidr) {
                            continue;
                        }
                    }
                }
                return Ok((Decision::Allow, time_sensitive));
            }
        }

        Ok((Decision::Deny(DenyReason::NoGrant), time_sensitive))
    }

    async fn finish(
        &self,
        actor: &Agent,
        entry: &MemoryEntry,
        action: Action,
        decision: Decision,
        cacheable: bool,
    ) -> SwarmMemResult<Decision> {
        let resource = resource_label(entry.entry_id);

        if let Decision::Deny(reason) = decision {
            self.counters.denials.fetch_add(1, Ordering::Relaxed);
            let _ = self.denials.send(AccessDenied {
                actor_id: actor.agent_id,
                resource: resource.clone(),
                action,
                reason,
            });
            warn!(agent_id = %actor.agent_id, %action, reason = %reason, "acl denied");
        }

        if cacheable {
            let now = Utc::now();
            let record = ACLCacheRecord {
                actor_id: actor.agent_id,
                resource: resource.clone(),
                action,
                allow: decision.is_allow(),
                cached_at: now,
                expires_at: now + chrono::Duration::from_std(self.cache_ttl).unwrap_or_default(),
            };
            self.cache
                .lock()
                .unwrap()
                .put((actor.agent_id, entry.entry_id, action), record);
        }

        let risk_tag = format!(
            "action={action},level={level},deny={deny}",
            level = entry.acl_level,
            deny = decision.is_deny()
        );
        self.storage
            .audit_append(AuditRecord {
                audit_id: AuditId::now_v7(),
                actor_id: actor.agent_id,
                resource,
                action: action.to_string(),
                previous_excerpt: None,
                next_excerpt: None,
                acl_level: entry.acl_level,
                risk_tag,
                timestamp: Utc::now(),
            })
            .await?;

        Ok(decision)
    }
}

/// Minimal CIDR containment check. Only IPv4/IPv6 prefix matching is
/// supported; a malformed CIDR string fails closed (no match).
fn source_matches_cidr(source_ip: Option<IpAddr>, cidr: &str) -> bool {
    let Some(ip) = source_ip else {
        return false;
    };
    let Some((network, prefix_len)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix_len) = prefix_len.parse::<u32>() else {
        return false;
    };
    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
            u32::from(ip) & mask == u32::from(net) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = if prefix_len == 0 { 0 } else { u128::MAX << (128 - prefix_len) };
            u128::from(ip) & mask == u128::from(net) & mask
        }
        _ => false,
    }
}
