//! Per-call options for `set`/`clear`.

use swarmmem_core::{ACLLevel, MemoryKind, ProjectId, TeamId};

/// Options governing a single `set`/`mset`/`setex` write.
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub namespace: String,
    pub acl_level: ACLLevel,
    pub kind: MemoryKind,
    pub team_id: Option<TeamId>,
    pub project_id: Option<ProjectId>,
    /// Seconds until expiry; `None` is persistent.
    pub ttl: Option<u64>,
    /// Whether the write goes through to L2 or around it (short-lived
    /// entries skip L2 so they don't evict longer-lived neighbors).
    pub write_through: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            acl_level: ACLLevel::Private,
            kind: MemoryKind::State,
            team_id: None,
            project_id: None,
            ttl: None,
            write_through: true,
        }
    }
}

/// Scope of a `clear` call.
#[derive(Debug, Clone)]
pub enum ClearScope {
    /// Clears every entry in a namespace, storage and cache alike.
    Namespace(String),
    /// Clears every cached entry for the swarm. `StorageTrait` has no
    /// swarm-wide row purge, so this invalidates the cache tiers only;
    /// storage rows remain and are removed individually or via TTL.
    Swarm,
}
