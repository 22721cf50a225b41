//! Core entity structures for the swarm memory engine.

use crate::*;
use serde::{Deserialize, Serialize};

/// Agent - an actor that reads and writes memory entries.
/// Identifier format is restricted to `[A-Za-z0-9_-]+` by
/// `SwarmMemConfig`-level validation at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub identifier: String,
    pub display_name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub swarm_id: SwarmId,
    pub team_id: Option<TeamId>,
    pub project_id: Option<ProjectId>,
    pub default_acl_level: ACLLevel,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Project - a grouping container above Team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub identifier: String,
    pub status: ContainerStatus,
    pub owner_agent_id: Option<AgentId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Team - a grouping container nested within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub team_id: TeamId,
    pub identifier: String,
    pub status: ContainerStatus,
    pub owner_agent_id: Option<AgentId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Swarm - the top-level grouping container; every agent belongs to
/// exactly one swarm, and every memory entry carries a mandatory swarm_id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    pub swarm_id: SwarmId,
    pub identifier: String,
    pub status: ContainerStatus,
    pub owner_agent_id: Option<AgentId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// MemoryEntry - the central object of the store.
///
/// Uniqueness constraint enforced by the store: `(key, namespace, swarm_id,
/// project_id)` is unique; updates bump `version` rather than overwrite in
/// place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub entry_id: EntryId,
    pub key: LogicalKey,
    pub namespace: String,
    /// Ciphertext after optional compression; `None` when only metadata
    /// (e.g. a tombstone) is being represented in memory.
    pub value_blob: RawContent,
    pub kind: MemoryKind,

    // Ownership triple
    pub agent_id: AgentId,
    pub team_id: Option<TeamId>,
    pub project_id: Option<ProjectId>,
    pub swarm_id: SwarmId,

    pub acl_level: ACLLevel,
    pub compression: Compression,
    pub encryption: EncryptionMode,
    /// AEAD nonce, present iff `encryption == EncryptionMode::Aead`.
    pub iv: Option<[u8; 12]>,
    /// AEAD tag, stored separately to simplify partial re-encryption during
    /// key rotation.
    pub tag: Option<[u8; 16]>,
    pub key_id: Option<KeyId>,

    pub version: u64,
    pub parent_entry_id: Option<EntryId>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<Timestamp>,

    pub access_count: u64,
    pub last_accessed_at: Option<Timestamp>,
    pub size_bytes: u64,
    /// SHA-256 checksum of the plaintext, verified on every read after
    /// decompression/decryption.
    pub checksum: ContentHash,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MemoryEntry {
    /// The logical key this entry is addressed by, independent of version.
    pub fn logical_key(&self) -> (&[u8], &str, SwarmId, Option<ProjectId>) {
        (&self.key, &self.namespace, self.swarm_id, self.project_id)
    }

    /// Whether this entry has passed its expiry, per the current time.
    /// Any read-through path must treat an expired entry as absent.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }
}

/// The entity a permission grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantedEntity {
    Agent(AgentId),
    Team(TeamId),
    Swarm(SwarmId),
    Project(ProjectId),
}

/// Time-of-day and day-of-week conditions narrowing when a grant applies.
/// Time-sensitive conditions always bypass the ACL decision cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionConditions {
    /// Inclusive minute-of-day window, e.g. `(540, 1020)` for 09:00-17:00.
    pub time_window: Option<(u16, u16)>,
    pub days_of_week: Option<Vec<chrono::Weekday>>,
    /// CIDR block the actor's source address must fall within.
    pub source_cidr: Option<String>,
}

impl PermissionConditions {
    /// Whether any condition on this grant is time-sensitive and therefore
    /// forces cache bypass for decisions depending on it.
    pub fn is_time_sensitive(&self) -> bool {
        self.time_window.is_some() || self.days_of_week.is_some()
    }
}

/// Permission - an explicit grant consulted when the level-ladder rule
/// alone does not produce an `allow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_id: PermissionId,
    pub entity: GrantedEntity,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub project_id: Option<ProjectId>,
    pub level: ACLLevel,
    pub actions: ActionSet,
    pub conditions: Option<PermissionConditions>,
    pub granted_by: AgentId,
    pub expires_at: Option<Timestamp>,
    pub active: bool,
    pub created_at: Timestamp,
}

impl Permission {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.active && !self.is_expired(now)
    }
}

/// AuditRecord - an append-only record of a permission decision or
/// mutation. No API mutates an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: AuditId,
    pub actor_id: AgentId,
    pub resource: String,
    pub action: String,
    /// Never the plaintext value — a bounded, redacted excerpt only.
    pub previous_excerpt: Option<String>,
    pub next_excerpt: Option<String>,
    pub acl_level: ACLLevel,
    pub risk_tag: String,
    pub timestamp: Timestamp,
}

/// EncryptionKey - a generation of data-encryption key material.
/// `key_material_wrapped` is always wrapped under the process master key;
/// unwrapped material is never persisted and is zeroized on drop wherever
/// it is held (see `swarmmem-storage::crypto`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub key_id: KeyId,
    pub generation: u64,
    pub key_material_wrapped: Vec<u8>,
    pub algorithm: String,
    pub created_at: Timestamp,
    pub activated_at: Option<Timestamp>,
    pub retired_at: Option<Timestamp>,
    pub status: KeyStatus,
}

/// ACLCacheRecord - an in-memory-only cached ACL decision, keyed by
/// `(actor, resource, action)` with expiry. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ACLCacheRecord {
    pub actor_id: AgentId,
    pub resource: String,
    pub action: Action,
    pub allow: bool,
    pub cached_at: Timestamp,
    pub expires_at: Timestamp,
}

impl ACLCacheRecord {
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        now <= self.expires_at
    }
}
