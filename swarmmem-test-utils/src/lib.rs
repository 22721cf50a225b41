//! Test infrastructure shared across the swarm memory engine workspace:
//! - Proptest generators for every entity type
//! - Fixtures for common multi-entity scenarios
//! - Custom assertions for swarm-memory-specific validation

pub use swarmmem_storage::MockStorage;

pub use swarmmem_core::{
    ACLCacheRecord, ACLLevel, Action, ActionSet, Agent, AgentId, AgentRole, AgentStatus,
    AuditId, AuditRecord, Compression, ContainerStatus, EncryptionKey, EncryptionMode,
    EntityIdType, EntryId, GrantedEntity, KeyId, KeyStatus, MemoryEntry, MemoryKind, Permission,
    PermissionConditions, PermissionId, Project, ProjectId, RotationCause, SwarmId, Team, TeamId,
    Timestamp, compute_content_hash,
};

use chrono::Utc;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating swarm-memory entity types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_swarm_id() -> impl Strategy<Value = SwarmId> {
        arb_uuid().prop_map(SwarmId::new)
    }

    pub fn arb_agent_id() -> impl Strategy<Value = AgentId> {
        arb_uuid().prop_map(AgentId::new)
    }

    pub fn arb_team_id() -> impl Strategy<Value = TeamId> {
        arb_uuid().prop_map(TeamId::new)
    }

    pub fn arb_project_id() -> impl Strategy<Value = ProjectId> {
        arb_uuid().prop_map(ProjectId::new)
    }

    pub fn arb_entry_id() -> impl Strategy<Value = EntryId> {
        arb_uuid().prop_map(EntryId::new)
    }

    pub fn arb_key_id() -> impl Strategy<Value = KeyId> {
        arb_uuid().prop_map(KeyId::new)
    }

    /// Namespace identifiers: short lowercase ascii segments, matching what
    /// a real caller would pick (`"sessions"`, `"config"`, `"agent-scratch"`).
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,20}"
    }

    /// Arbitrary logical key bytes. Logical keys are caller-chosen, so this
    /// covers both ascii and non-utf8 byte strings.
    pub fn arb_logical_key() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 1..64)
    }

    pub fn arb_acl_level() -> impl Strategy<Value = ACLLevel> {
        prop_oneof![
            Just(ACLLevel::Private),
            Just(ACLLevel::Team),
            Just(ACLLevel::Swarm),
            Just(ACLLevel::Project),
            Just(ACLLevel::Public),
            Just(ACLLevel::System),
        ]
    }

    pub fn arb_action() -> impl Strategy<Value = Action> {
        prop_oneof![
            Just(Action::Read),
            Just(Action::Write),
            Just(Action::Delete),
            Just(Action::Admin),
        ]
    }

    pub fn arb_action_set() -> impl Strategy<Value = ActionSet> {
        prop::collection::btree_set(arb_action(), 1..=4)
    }

    pub fn arb_memory_kind() -> impl Strategy<Value = MemoryKind> {
        prop_oneof![
            Just(MemoryKind::State),
            Just(MemoryKind::Data),
            Just(MemoryKind::Cache),
            Just(MemoryKind::Session),
            Just(MemoryKind::Artifact),
        ]
    }

    pub fn arb_compression() -> impl Strategy<Value = Compression> {
        prop_oneof![Just(Compression::None), Just(Compression::Lz4), Just(Compression::Gzip)]
    }

    pub fn arb_granted_entity() -> impl Strategy<Value = GrantedEntity> {
        prop_oneof![
            arb_agent_id().prop_map(GrantedEntity::Agent),
            arb_team_id().prop_map(GrantedEntity::Team),
            arb_swarm_id().prop_map(GrantedEntity::Swarm),
            arb_project_id().prop_map(GrantedEntity::Project),
        ]
    }

    /// An unencrypted, uncompressed memory entry with a random logical key,
    /// scoped to `swarm_id`. Callers needing encryption or compression build
    /// on top of this and overwrite the relevant fields.
    pub fn arb_memory_entry(swarm_id: SwarmId) -> impl Strategy<Value = MemoryEntry> {
        (
            arb_entry_id(),
            arb_logical_key(),
            arb_namespace(),
            prop::collection::vec(any::<u8>(), 0..256),
            arb_memory_kind(),
            arb_agent_id(),
            arb_acl_level(),
            1u64..1000,
        )
            .prop_map(
                move |(entry_id, key, namespace, value_blob, kind, agent_id, acl_level, version)| {
                    let now = Utc::now();
                    let size_bytes = value_blob.len() as u64;
                    let checksum = compute_content_hash(&value_blob);
                    MemoryEntry {
                        entry_id,
                        key,
                        namespace,
                        value_blob,
                        kind,
                        agent_id,
                        team_id: None,
                        project_id: None,
                        swarm_id,
                        acl_level,
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
                        size_bytes,
                        checksum,
                        created_at: now,
                        updated_at: now,
                    }
                },
            )
    }

    pub fn arb_permission() -> impl Strategy<Value = Permission> {
        (
            arb_uuid().prop_map(PermissionId::new),
            arb_granted_entity(),
            "[a-z_]{1,16}",
            arb_acl_level(),
            arb_action_set(),
            arb_agent_id(),
        )
            .prop_map(
                |(permission_id, entity, resource_type, level, actions, granted_by)| Permission {
                    permission_id,
                    entity,
                    resource_type,
                    resource_id: None,
                    project_id: None,
                    level,
                    actions,
                    conditions: None,
                    granted_by,
                    expires_at: None,
                    active: true,
                    created_at: Utc::now(),
                },
            )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made multi-entity scenarios for integration tests.

    use super::*;

    /// A swarm with one owner agent, no team or project nesting. The
    /// minimal scenario every ACL/cache test builds on.
    pub struct BareSwarm {
        pub swarm_id: SwarmId,
        pub owner: Agent,
    }

    pub fn bare_swarm() -> BareSwarm {
        let swarm_id = SwarmId::now_v7();
        let now = Utc::now();
        let owner = Agent {
            agent_id: AgentId::now_v7(),
            identifier: "owner".to_string(),
            display_name: "Owner Agent".to_string(),
            role: AgentRole::Coordinator,
            status: AgentStatus::Active,
            swarm_id,
            team_id: None,
            project_id: None,
            default_acl_level: ACLLevel::Private,
            created_at: now,
            updated_at: now,
        };
        BareSwarm { swarm_id, owner }
    }

    /// A project containing one team, with a member agent scoped to both.
    pub struct NestedProject {
        pub swarm_id: SwarmId,
        pub project: Project,
        pub team: Team,
        pub member: Agent,
    }

    pub fn nested_project() -> NestedProject {
        let swarm_id = SwarmId::now_v7();
        let now = Utc::now();
        let project = Project {
            project_id: ProjectId::now_v7(),
            identifier: "acme-project".to_string(),
            status: ContainerStatus::Active,
            owner_agent_id: None,
            created_at: now,
            updated_at: now,
        };
        let team = Team {
            team_id: TeamId::now_v7(),
            identifier: "acme-team".to_string(),
            status: ContainerStatus::Active,
            owner_agent_id: None,
            created_at: now,
            updated_at: now,
        };
        let member = Agent {
            agent_id: AgentId::now_v7(),
            identifier: "member".to_string(),
            display_name: "Member Agent".to_string(),
            role: AgentRole::Worker,
            status: AgentStatus::Active,
            swarm_id,
            team_id: Some(team.team_id),
            project_id: Some(project.project_id),
            default_acl_level: ACLLevel::Team,
            created_at: now,
            updated_at: now,
        };
        NestedProject {
            swarm_id,
            project,
            team,
            member,
        }
    }

    /// A minimal, unencrypted memory entry ready to round-trip through
    /// storage or cache fixtures.
    pub fn sample_entry(swarm_id: SwarmId, namespace: &str, key: &[u8], value: &[u8]) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            entry_id: EntryId::now_v7(),
            key: key.to_vec(),
            namespace: namespace.to_string(),
            value_blob: value.to_vec(),
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
            size_bytes: value.len() as u64,
            checksum: compute_content_hash(value),
            created_at: now,
            updated_at: now,
        }
    }

    /// A grant of `level` over `resource_type` to `entity`, with no
    /// conditions and no expiry.
    pub fn sample_permission(
        entity: GrantedEntity,
        resource_type: &str,
        level: ACLLevel,
        granted_by: AgentId,
    ) -> Permission {
        Permission {
            permission_id: PermissionId::now_v7(),
            entity,
            resource_type: resource_type.to_string(),
            resource_id: None,
            project_id: None,
            level,
            actions: [Action::Read, Action::Write].into_iter().collect(),
            conditions: None,
            granted_by,
            expires_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for swarm-memory-specific invariants.

    use super::*;
    use swarmmem_core::SwarmMemResult;

    pub fn assert_ok<T: std::fmt::Debug>(result: &SwarmMemResult<T>) {
        assert!(result.is_ok(), "expected Ok, got {:?}", result);
    }

    pub fn assert_err<T: std::fmt::Debug>(result: &SwarmMemResult<T>) {
        assert!(result.is_err(), "expected Err, got {:?}", result);
    }

    /// Asserts two entries address the same logical key, ignoring version
    /// and timestamps.
    pub fn assert_same_logical_key(a: &MemoryEntry, b: &MemoryEntry) {
        assert_eq!(a.key, b.key, "logical key byte mismatch");
        assert_eq!(a.namespace, b.namespace, "namespace mismatch");
        assert_eq!(a.swarm_id, b.swarm_id, "swarm_id mismatch");
        assert_eq!(a.project_id, b.project_id, "project_id mismatch");
    }

    /// Asserts `entry` is not expired as of `now`.
    pub fn assert_not_expired(entry: &MemoryEntry, now: Timestamp) {
        assert!(!entry.is_expired(now), "entry {:?} unexpectedly expired", entry.entry_id);
    }

    /// Asserts `permission` is currently usable (active and unexpired).
    pub fn assert_usable(permission: &Permission, now: Timestamp) {
        assert!(
            permission.is_usable(now),
            "permission {:?} expected usable",
            permission.permission_id
        );
    }
}
